use super::Transaction;
use crate::error::ProxyError;
use crate::hooks::{self, Hook, Hooks, Phase};
use crate::message::{Body, Request, Response};
use crate::metrics;
use crate::origin::Origin;
use crate::throttle::{self, BodySink, Leg, Throttle};
use bytes::BytesMut;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info_span, warn, Instrument, Span};

/// Shaped pieces buffered between the shaper and the reader of a body.
const BODY_CHANNEL_CAPACITY: usize = 2;

/// Pipeline position of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ReceiveRequest,
    CheckBypass,
    SendRequest,
    DispatchOrigin,
    ResponseIntercept,
    SendResponse,
    Done,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::ReceiveRequest => "receive_request",
            Stage::CheckBypass => "check_bypass",
            Stage::SendRequest => "send_request",
            Stage::DispatchOrigin => "dispatch_origin",
            Stage::ResponseIntercept => "response_intercept",
            Stage::SendResponse => "send_response",
            Stage::Done => "done",
        }
    }
}

/// How the response leg ends once the stage loop stops.
enum Handoff {
    /// Body and `ResponseSent` are done.
    Delivered,
    /// The body still has to be shaped out to whoever reads it.
    Stream(Option<Throttle>),
}

/// Transaction deadline and the limit it was derived from.
#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

async fn within<F, T>(deadline: Option<Deadline>, fut: F) -> Result<T, ProxyError>
where
    F: std::future::Future<Output = Result<T, ProxyError>>,
{
    match deadline {
        Some(Deadline { at, limit }) => timeout_at(at, fut)
            .await
            .unwrap_or(Err(ProxyError::TimedOut(limit))),
        None => fut.await,
    }
}

fn record_outcome(result: Result<(), &ProxyError>, started: Instant) {
    let elapsed = started.elapsed();
    match result {
        Ok(()) => {
            metrics::record_transaction("ok", elapsed);
            debug!(elapsed_ms = elapsed.as_millis() as u64, "transaction completed");
        }
        Err(err) => {
            metrics::record_transaction(err.kind(), elapsed);
            warn!(
                kind = err.kind(),
                error = %err,
                elapsed_ms = elapsed.as_millis() as u64,
                "transaction failed"
            );
        }
    }
}

/// The intercepting proxy engine.
///
/// One `Proxy` serves any number of concurrent transactions; each call to
/// [`Proxy::handle`] owns its own [`Transaction`] and data store.
pub struct Proxy {
    hooks: Hooks,
    origin: Arc<dyn Origin>,
    request_throttle: Option<Throttle>,
    response_throttle: Option<Throttle>,
    timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl Proxy {
    pub fn builder<O>(origin: O) -> ProxyBuilder
    where
        O: Origin + 'static,
    {
        ProxyBuilder {
            origin: Arc::new(origin),
            hooks: Hooks::new(),
            request_throttle: None,
            response_throttle: None,
            timeout: None,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Directive applied on `leg` when the message carries none.
    pub fn default_throttle(&self, leg: Leg) -> Option<Throttle> {
        match leg {
            Leg::Request => self.request_throttle,
            Leg::Response => self.response_throttle,
        }
    }

    /// Run one transaction.
    ///
    /// An `Err` is the first failure of any stage before the response head is
    /// released. An in-memory response with no shaping comes back fully
    /// transmitted, with `ResponseSent` already run. Otherwise the body is a
    /// lazy stream that the shaper feeds as it is read. `ResponseSent` runs
    /// once the last byte has been handed over, and the stream ends only
    /// after it; a failure from then on ends the stream with an error.
    /// The optional timeout covers both parts.
    pub async fn handle(&self, request: Request) -> Result<Response, ProxyError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!(
            "transaction",
            id,
            method = %request.method(),
            uri = %request.uri()
        );

        async move {
            let started = Instant::now();
            let deadline = self.timeout.map(|limit| Deadline {
                at: started + limit,
                limit,
            });
            let mut tx = Transaction::new(id, request);

            let outcome = within(deadline, self.run(&mut tx)).await;
            match outcome {
                Ok(Handoff::Delivered) => {
                    record_outcome(Ok(()), started);
                    Ok(tx.into_response())
                }
                Ok(Handoff::Stream(directive)) => {
                    Ok(self.stream_response(tx, directive, started, deadline))
                }
                Err(err) => {
                    record_outcome(Err(&err), started);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, tx: &mut Transaction) -> Result<Handoff, ProxyError> {
        let mut stage = Stage::ReceiveRequest;
        loop {
            debug!(stage = stage.as_str(), "entering stage");
            stage = match stage {
                Stage::ReceiveRequest => {
                    self.intercept(Phase::Request, tx).await?;
                    Stage::CheckBypass
                }
                Stage::CheckBypass => {
                    if tx.response.is_populated() {
                        metrics::record_bypass();
                        debug!(
                            status = %tx.response.status(),
                            "response supplied during request interception, skipping origin"
                        );
                        Stage::ResponseIntercept
                    } else {
                        Stage::SendRequest
                    }
                }
                Stage::SendRequest if self.origin.streams_request_body() => {
                    self.stream_request(tx).await?;
                    Stage::ResponseIntercept
                }
                Stage::SendRequest => {
                    self.send_request(tx).await?;
                    self.intercept(Phase::RequestSent, tx).await?;
                    Stage::DispatchOrigin
                }
                Stage::DispatchOrigin => {
                    let outgoing =
                        tx.request.snapshot().ok_or_else(|| ProxyError::OriginDispatch {
                            message: "request body was not buffered before dispatch".to_string(),
                            source: None,
                        })?;
                    let response = self.dispatch(outgoing).await?;
                    self.accept_origin_response(tx, response);
                    Stage::ResponseIntercept
                }
                Stage::ResponseIntercept => {
                    self.intercept(Phase::Response, tx).await?;
                    Stage::SendResponse
                }
                Stage::SendResponse => {
                    let directive = tx.response.throttle().or(self.response_throttle);
                    if tx.response.body().is_stream() || directive.is_some_and(|t| !t.is_unshaped())
                    {
                        return Ok(Handoff::Stream(directive));
                    }
                    self.send_response(tx).await?;
                    self.intercept(Phase::ResponseSent, tx).await?;
                    Stage::Done
                }
                Stage::Done => return Ok(Handoff::Delivered),
            };
        }
    }

    async fn intercept(&self, phase: Phase, tx: &mut Transaction) -> Result<(), ProxyError> {
        hooks::invoke(phase, self.hooks.get(phase), tx).await
    }

    /// Shape the request body into memory for an origin that reads it afterwards.
    async fn send_request(&self, tx: &mut Transaction) -> Result<(), ProxyError> {
        let directive = tx.request.throttle().or(self.request_throttle);
        let body = tx.request.take_body();
        let mut buffer = BytesMut::new();
        let transfer = throttle::transmit(body, directive, Leg::Request, &mut buffer).await?;
        tx.request.set_body(buffer.freeze());
        tx.request.mark_transmitted();
        debug!(bytes = transfer.bytes, "request transmitted");
        Ok(())
    }

    /// Shape the request body straight into the origin while it is dispatched.
    ///
    /// `RequestSent` runs once the last byte is handed over. The first failure
    /// of either side ends the transaction.
    async fn stream_request(&self, tx: &mut Transaction) -> Result<(), ProxyError> {
        let directive = tx.request.throttle().or(self.request_throttle);
        let body = tx.request.take_body();

        // An empty body keeps a fixed zero length upstream.
        let (sink, outgoing_body) = if body.is_empty() {
            (Box::new(BytesMut::new()) as Box<dyn BodySink>, Body::empty())
        } else {
            let (sink, body) = throttle::body_channel(BODY_CHANNEL_CAPACITY);
            (Box::new(sink) as Box<dyn BodySink>, body)
        };
        let outgoing = tx.request.forward_with(outgoing_body);

        let send = {
            let tx = &mut *tx;
            async move {
                let mut sink = sink;
                let transfer =
                    throttle::transmit(body, directive, Leg::Request, &mut *sink).await?;
                drop(sink);
                tx.request.mark_transmitted();
                debug!(bytes = transfer.bytes, "request streamed to origin");
                self.intercept(Phase::RequestSent, tx).await
            }
        };

        let ((), response) = tokio::try_join!(send, self.dispatch(outgoing))?;
        self.accept_origin_response(tx, response);
        Ok(())
    }

    async fn dispatch(&self, outgoing: Request) -> Result<Response, ProxyError> {
        let started = Instant::now();
        let result = self.origin.dispatch(outgoing).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                metrics::record_origin(elapsed, "ok");
                debug!(
                    status = %response.status(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "origin responded"
                );
            }
            Err(_) => metrics::record_origin(elapsed, "error"),
        }
        result
    }

    /// Install the origin's response, keeping a directive attached earlier.
    fn accept_origin_response(&self, tx: &mut Transaction, mut response: Response) {
        if response.throttle().is_none() {
            if let Some(directive) = tx.response.throttle() {
                response.slow(directive);
            }
        }
        tx.response = response;
    }

    async fn send_response(&self, tx: &mut Transaction) -> Result<(), ProxyError> {
        let directive = tx.response.throttle().or(self.response_throttle);
        let body = tx.response.take_body();
        let mut buffer = BytesMut::new();
        let transfer = throttle::transmit(body, directive, Leg::Response, &mut buffer).await?;
        tx.response.set_body(buffer.freeze());
        tx.response.mark_transmitted();
        debug!(bytes = transfer.bytes, "response transmitted");
        Ok(())
    }

    /// Release the response head now and shape the body into a channel from
    /// a background task, then run `ResponseSent`.
    fn stream_response(
        &self,
        mut tx: Transaction,
        directive: Option<Throttle>,
        started: Instant,
        deadline: Option<Deadline>,
    ) -> Response {
        let body = tx.response.take_body();
        tx.response.mark_transmitted();
        let (mut sink, streamed) = throttle::body_channel(BODY_CHANNEL_CAPACITY);
        let response = tx.response.forward_with(streamed);
        let hook: Option<Hook> = self.hooks.get(Phase::ResponseSent).cloned();

        tokio::spawn(
            async move {
                let delivery = async {
                    let transfer =
                        throttle::transmit(body, directive, Leg::Response, &mut sink).await?;
                    debug!(bytes = transfer.bytes, "response streamed");
                    hooks::invoke(Phase::ResponseSent, hook.as_ref(), &mut tx).await
                };
                let result = within(deadline, delivery).await;
                record_outcome(result.as_ref().map(|_| ()), started);
                if let Err(err) = result {
                    sink.abort(io::Error::other(err)).await;
                }
            }
            .instrument(Span::current()),
        );
        response
    }
}

/// Configures a [`Proxy`].
pub struct ProxyBuilder {
    origin: Arc<dyn Origin>,
    hooks: Hooks,
    request_throttle: Option<Throttle>,
    response_throttle: Option<Throttle>,
    timeout: Option<Duration>,
}

impl ProxyBuilder {
    /// Replace the whole hook registration.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hook(mut self, phase: Phase, hook: Hook) -> Self {
        self.hooks.set(phase, hook);
        self
    }

    /// Default directive for `leg`; a directive attached to the message wins.
    pub fn throttle(mut self, leg: Leg, throttle: Throttle) -> Self {
        match leg {
            Leg::Request => self.request_throttle = Some(throttle),
            Leg::Response => self.response_throttle = Some(throttle),
        }
        self
    }

    /// Fail any transaction still running after `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn build(self) -> Proxy {
        Proxy {
            hooks: self.hooks,
            origin: self.origin,
            request_throttle: self.request_throttle,
            response_throttle: self.response_throttle,
            timeout: self.timeout,
            next_id: AtomicU64::new(0),
        }
    }
}
