//! In-process round trips through the engine.
//!
//! Each test builds a `Proxy` around a closure origin, drives one or more
//! transactions and checks stage ordering, message fidelity, bypass, data
//! store continuity and traffic shaping timings.

use bytes::Bytes;
use detour_proxy::{
    origin_fn, Body, Hook, Hooks, Phase, Proxy, ProxyError, Request, Response, Throttle,
};
use hyper::{Method, StatusCode, Uri};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ONE_MEG: usize = 1_024_000;

fn ok_origin() -> impl detour_proxy::Origin {
    origin_fn(|_req: Request| async { Ok(Response::with_status(StatusCode::OK)) })
}

fn marker(trace: &Arc<Mutex<String>>, mark: char) -> Hook {
    let trace = trace.clone();
    Hook::sync(move |_| {
        trace.lock().unwrap().push(mark);
        Ok(())
    })
}

fn deferred_marker(trace: &Arc<Mutex<String>>, mark: char) -> Hook {
    let trace = trace.clone();
    Hook::deferred(move |_, next| {
        let trace = trace.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trace.lock().unwrap().push(mark);
            next.done();
        });
        Ok(())
    })
}

/// Synthetic payload produced lazily in 16 KiB chunks.
fn synthetic_payload(total: usize) -> Body {
    let chunk = Bytes::from(vec![b'x'; 16 * 1024]);
    let mut remaining = total;
    let chunks = std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let n = remaining.min(chunk.len());
        remaining -= n;
        Some(chunk.slice(..n))
    });
    Body::from_chunks(chunks)
}

fn assert_within(elapsed: Duration, min_ms: u64, max_ms: u64) {
    let ms = elapsed.as_millis() as u64;
    assert!(
        (min_ms..=max_ms).contains(&ms),
        "took {ms}ms, expected between {min_ms}ms and {max_ms}ms"
    );
}

// =============================================================================
// Stage ordering
// =============================================================================

#[tokio::test]
async fn test_sync_hooks_run_in_stage_order() {
    let trace = Arc::new(Mutex::new(String::new()));
    let origin_trace = trace.clone();
    let origin = origin_fn(move |_req: Request| {
        origin_trace.lock().unwrap().push('3');
        async { Ok(Response::with_status(StatusCode::OK)) }
    });

    let hooks = Hooks::new()
        .on(Phase::Request, marker(&trace, '1'))
        .on(Phase::RequestSent, marker(&trace, '2'))
        .on(Phase::Response, marker(&trace, '4'))
        .on(Phase::ResponseSent, marker(&trace, '5'));
    let proxy = Proxy::builder(origin).hooks(hooks).build();

    proxy
        .handle(Request::get(Uri::from_static("/foobar")))
        .await
        .unwrap();
    assert_eq!(*trace.lock().unwrap(), "12345");
}

#[tokio::test]
async fn test_deferred_hooks_run_in_stage_order() {
    let trace = Arc::new(Mutex::new(String::new()));
    let hooks = Hooks::new()
        .on(Phase::Request, deferred_marker(&trace, '1'))
        .on(Phase::RequestSent, deferred_marker(&trace, '2'))
        .on(Phase::Response, deferred_marker(&trace, '3'))
        .on(Phase::ResponseSent, deferred_marker(&trace, '4'));
    let proxy = Proxy::builder(ok_origin()).hooks(hooks).build();

    proxy
        .handle(Request::get(Uri::from_static("/foobar")))
        .await
        .unwrap();
    assert_eq!(*trace.lock().unwrap(), "1234");
}

#[tokio::test]
async fn test_future_hooks_run_in_stage_order() {
    let trace = Arc::new(Mutex::new(String::new()));
    let future_marker = |mark: char| {
        let trace = trace.clone();
        Hook::future(move |_| {
            let trace = trace.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                trace.lock().unwrap().push(mark);
                Ok(())
            })
        })
    };
    let proxy = Proxy::builder(ok_origin())
        .hook(Phase::Request, future_marker('1'))
        .hook(Phase::RequestSent, future_marker('2'))
        .hook(Phase::Response, marker(&trace, '3'))
        .hook(Phase::ResponseSent, future_marker('4'))
        .build();

    proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
    assert_eq!(*trace.lock().unwrap(), "1234");
}

// =============================================================================
// Message fidelity and mutation
// =============================================================================

#[tokio::test]
async fn test_origin_sees_request_unchanged() {
    let seen = Arc::new(Mutex::new(None));
    let captured = seen.clone();
    let origin = origin_fn(move |req: Request| {
        let body = req.body().as_bytes().cloned();
        *captured.lock().unwrap() = Some((
            req.method().clone(),
            req.uri().to_string(),
            req.headers().get("x-foo").cloned(),
            body,
        ));
        async { Ok(Response::with_status(StatusCode::OK)) }
    });
    let proxy = Proxy::builder(origin).build();

    let request = Request::new(Method::POST, Uri::from_static("/foobar"))
        .with_header("x-foo", "bar")
        .with_body("abc");
    proxy.handle(request).await.unwrap();

    let (method, uri, header, body) = seen.lock().unwrap().take().unwrap();
    assert_eq!(method, Method::POST);
    assert_eq!(uri, "/foobar");
    assert_eq!(header.unwrap(), "bar");
    assert_eq!(body.unwrap(), Bytes::from_static(b"abc"));
}

#[tokio::test]
async fn test_request_hook_mutation_reaches_origin() {
    let origin = origin_fn(|req: Request| async move {
        Ok(Response::with_status(StatusCode::OK).with_body(req.uri().to_string()))
    });
    let proxy = Proxy::builder(origin)
        .hook(
            Phase::Request,
            Hook::sync(|tx| {
                tx.request.set_uri(Uri::from_static("/"));
                Ok(())
            }),
        )
        .build();

    let resp = proxy
        .handle(Request::get(Uri::from_static("/foobar")))
        .await
        .unwrap();
    assert_eq!(resp.body().as_bytes().unwrap(), &Bytes::from_static(b"/"));
}

#[tokio::test]
async fn test_response_hook_rewrites_origin_response() {
    let origin = origin_fn(|_req: Request| async {
        Ok(Response::with_status(StatusCode::OK)
            .with_header("x-origin", "yes")
            .with_body("from origin"))
    });
    let proxy = Proxy::builder(origin)
        .hook(
            Phase::Response,
            Hook::sync(|tx| {
                assert_eq!(tx.response.headers().get("x-origin").unwrap(), "yes");
                tx.response.set_status(StatusCode::CREATED);
                tx.response.set_body("rewritten");
                Ok(())
            }),
        )
        .build();

    let resp = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        resp.body().as_bytes().unwrap(),
        &Bytes::from_static(b"rewritten")
    );
}

// =============================================================================
// Bypass
// =============================================================================

#[tokio::test]
async fn test_populated_response_bypasses_origin() {
    let called = Arc::new(AtomicBool::new(false));
    let origin_called = called.clone();
    let origin = origin_fn(move |_req: Request| {
        origin_called.store(true, Ordering::SeqCst);
        async { Ok(Response::with_status(StatusCode::OK)) }
    });

    let reached_response_sent = Arc::new(AtomicBool::new(false));
    let sent = reached_response_sent.clone();
    let proxy = Proxy::builder(origin)
        .hook(
            Phase::Request,
            Hook::sync(|tx| {
                tx.response.set_status(StatusCode::OK);
                tx.response.set_body("canned");
                Ok(())
            }),
        )
        .hook(
            Phase::ResponseSent,
            Hook::sync(move |_| {
                sent.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .build();

    let resp = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
    assert!(!called.load(Ordering::SeqCst));
    assert!(reached_response_sent.load(Ordering::SeqCst));
    assert_eq!(resp.body().as_bytes().unwrap(), &Bytes::from_static(b"canned"));
}

// =============================================================================
// Data store
// =============================================================================

#[tokio::test]
async fn test_data_store_is_visible_in_every_later_stage() {
    let expect = |phase: Phase| {
        Hook::sync(move |tx| {
            let first = tx.store.get("foo3").cloned();
            let second = tx.store.get("foo3").cloned();
            if first != Some(json!("bar3")) || first != second {
                anyhow::bail!("store value missing in {phase}");
            }
            Ok(())
        })
    };
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Request,
            Hook::sync(|tx| {
                tx.store.set("foo3", "bar3");
                Ok(())
            }),
        )
        .hook(Phase::RequestSent, expect(Phase::RequestSent))
        .hook(Phase::Response, expect(Phase::Response))
        .hook(Phase::ResponseSent, expect(Phase::ResponseSent))
        .build();

    proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_data_store_is_not_shared_between_transactions() {
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Request,
            Hook::sync(|tx| {
                if tx.store.contains("seen") {
                    anyhow::bail!("store leaked from a previous transaction");
                }
                tx.store.set("seen", true);
                Ok(())
            }),
        )
        .build();

    for _ in 0..3 {
        proxy
            .handle(Request::get(Uri::from_static("/")))
            .await
            .unwrap();
    }
}

// =============================================================================
// Failure
// =============================================================================

#[tokio::test]
async fn test_hook_failure_is_the_single_outcome() {
    let later_ran = Arc::new(AtomicBool::new(false));
    let later = later_ran.clone();
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::RequestSent,
            Hook::deferred(|_, next| {
                next.fail(anyhow::anyhow!("quota exceeded"));
                Ok(())
            }),
        )
        .hook(
            Phase::Response,
            Hook::sync(move |_| {
                later.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .build();

    let err = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap_err();
    match err {
        ProxyError::Hook { phase, message, .. } => {
            assert_eq!(phase, Phase::RequestSent);
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("expected hook error, got {other:?}"),
    }
    assert!(!later_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_zero_rate_in_hook_is_shaping_error() {
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Response,
            Hook::sync(|tx| {
                tx.response.slow(Throttle::rate(0)?);
                Ok(())
            }),
        )
        .build();
    let err = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "shaping_config");
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_suspended_transaction_does_not_block_others() {
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(Mutex::new(Some(release_rx)));

    let proxy = Arc::new(
        Proxy::builder(ok_origin())
            .hook(
                Phase::Request,
                Hook::deferred(move |tx, next| {
                    if tx.request.uri().path() == "/slow" {
                        let gate = release_rx.lock().unwrap().take();
                        tokio::spawn(async move {
                            if let Some(gate) = gate {
                                let _ = gate.await;
                            }
                            next.done();
                        });
                    } else {
                        next.done();
                    }
                    Ok(())
                }),
            )
            .build(),
    );

    let slow = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.handle(Request::get(Uri::from_static("/slow"))).await })
    };

    let fast = proxy
        .handle(Request::get(Uri::from_static("/fast")))
        .await
        .unwrap();
    assert_eq!(fast.status(), StatusCode::OK);
    assert!(!slow.is_finished());

    release_tx.send(()).unwrap();
    slow.await.unwrap().unwrap();
}

// =============================================================================
// Traffic shaping (wall clock)
// =============================================================================

#[tokio::test]
async fn test_upload_latency() {
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Request,
            Hook::sync(|tx| {
                tx.request.slow(Throttle::latency(100));
                Ok(())
            }),
        )
        .build();

    let started = Instant::now();
    proxy
        .handle(Request::new(Method::POST, Uri::from_static("/")))
        .await
        .unwrap();
    assert_within(started.elapsed(), 99, 200);
}

#[tokio::test]
async fn test_download_latency() {
    let sent_at = Arc::new(Mutex::new(None));
    let mark = sent_at.clone();
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Response,
            Hook::sync(move |tx| {
                tx.response.slow(Throttle::latency(100));
                *mark.lock().unwrap() = Some(Instant::now());
                Ok(())
            }),
        )
        .build();

    let mut resp = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
    resp.take_body().collect().await.unwrap();
    let started = sent_at.lock().unwrap().unwrap();
    assert_within(started.elapsed(), 90, 110);
}

#[tokio::test]
async fn test_upload_rate() {
    let hooked_at = Arc::new(Mutex::new(None));
    let arrived_at = Arc::new(Mutex::new(None));

    let arrival = arrived_at.clone();
    let origin = origin_fn(move |req: Request| {
        *arrival.lock().unwrap() = Some((Instant::now(), req.body().len()));
        async { Ok(Response::with_status(StatusCode::OK)) }
    });
    let mark = hooked_at.clone();
    let proxy = Proxy::builder(origin)
        .hook(
            Phase::Request,
            Hook::sync(move |tx| {
                *mark.lock().unwrap() = Some(Instant::now());
                tx.request.set_body(synthetic_payload(ONE_MEG));
                tx.request.slow(Throttle::rate(ONE_MEG as u64)?);
                Ok(())
            }),
        )
        .build();

    proxy
        .handle(Request::new(Method::POST, Uri::from_static("/upload")))
        .await
        .unwrap();

    let hooked = hooked_at.lock().unwrap().unwrap();
    let (arrived, len) = arrived_at.lock().unwrap().unwrap();
    assert_eq!(len, Some(ONE_MEG));
    assert_within(arrived - hooked, 900, 1100);
}

#[tokio::test]
async fn test_download_rate() {
    let hooked_at = Arc::new(Mutex::new(None));
    let mark = hooked_at.clone();
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::Response,
            Hook::sync(move |tx| {
                *mark.lock().unwrap() = Some(Instant::now());
                tx.response.set_body(synthetic_payload(ONE_MEG));
                tx.response.slow(Throttle::rate(ONE_MEG as u64)?);
                Ok(())
            }),
        )
        .build();

    let mut resp = proxy
        .handle(Request::get(Uri::from_static("/download")))
        .await
        .unwrap();
    let body = resp.take_body().collect().await.unwrap();

    let hooked = hooked_at.lock().unwrap().unwrap();
    assert_eq!(body.len(), ONE_MEG);
    assert_within(hooked.elapsed(), 900, 1100);
}

#[tokio::test]
async fn test_download_rate_on_origin_body() {
    let origin = origin_fn(|_req: Request| async {
        Ok(Response::with_status(StatusCode::OK).with_body(synthetic_payload(ONE_MEG)))
    });
    let proxy = Proxy::builder(origin)
        .hook(
            Phase::Response,
            Hook::sync(|tx| {
                tx.response.slow(Throttle::rate(ONE_MEG as u64)?);
                Ok(())
            }),
        )
        .build();

    let started = Instant::now();
    let mut resp = proxy
        .handle(Request::get(Uri::from_static("/download")))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    let body = resp.take_body().collect().await.unwrap();
    assert_within(started.elapsed(), 950, 1100);
    assert_eq!(body.len(), ONE_MEG);
}

#[tokio::test]
async fn test_slow_after_transmission_has_no_effect() {
    let proxy = Proxy::builder(ok_origin())
        .hook(
            Phase::RequestSent,
            Hook::sync(|tx| {
                tx.request.slow(Throttle::latency(5_000));
                Ok(())
            }),
        )
        .hook(
            Phase::ResponseSent,
            Hook::sync(|tx| {
                tx.response.slow(Throttle::latency(5_000));
                Ok(())
            }),
        )
        .build();

    let started = Instant::now();
    let resp = proxy
        .handle(Request::get(Uri::from_static("/")))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(resp.throttle().is_none());
}
