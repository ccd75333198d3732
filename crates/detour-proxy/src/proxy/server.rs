use super::conversion::{engine_request, error_response, response_for_error};
use crate::config::Config;
use crate::hooks::Hooks;
use crate::message::HttpBody;
use crate::metrics::collect_metrics;
use crate::origin::HttpOrigin;
use crate::pipeline::Proxy;
use crate::throttle::Leg;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Build an engine forwarding to the configured upstream.
pub fn build_proxy(config: &Config, hooks: Hooks) -> Result<Proxy, anyhow::Error> {
    let origin = HttpOrigin::from_config(&config.upstream, &config.connection_pool)?;
    let mut builder = Proxy::builder(origin).hooks(hooks);
    for leg in [Leg::Request, Leg::Response] {
        if let Some(throttle) = config.throttle.leg(leg).to_throttle()? {
            builder = builder.throttle(leg, throttle);
        }
    }
    if let Some(timeout) = config.timeout() {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build())
}

pub struct ProxyServer {
    config: Arc<Config>,
    proxy: Arc<Proxy>,
}

impl ProxyServer {
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        Self::with_hooks(config, Hooks::new())
    }

    pub fn with_hooks(config: Config, hooks: Hooks) -> Result<Self, anyhow::Error> {
        let proxy = build_proxy(&config, hooks)?;
        Ok(Self::with_proxy(config, proxy))
    }

    /// Serve an already configured engine; `config` only supplies listener settings.
    pub fn with_proxy(config: Config, proxy: Proxy) -> Self {
        Self {
            config: Arc::new(config),
            proxy: Arc::new(proxy),
        }
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    /// Bind the configured ports and serve until an accept error.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listen = &self.config.listen;
        let listener = TcpListener::bind((listen.address.as_str(), listen.port)).await?;

        if self.config.metrics.enabled {
            let metrics_listener =
                TcpListener::bind((listen.address.as_str(), self.config.metrics.port)).await?;
            info!("Metrics on http://{}/metrics", metrics_listener.local_addr()?);
            tokio::spawn(async move {
                if let Err(err) = serve_metrics(metrics_listener).await {
                    error!("Metrics listener stopped: {}", err);
                }
            });
        }

        info!("Proxying to {}", self.config.upstream.url);
        self.serve(listener).await
    }

    /// Accept connections on `listener`, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Listening on http://{}", listener.local_addr()?);
        let proxy = self.proxy;

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let proxy = Arc::clone(&proxy);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { handle_request(&proxy, req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(
                        "Error serving HTTP connection from {}: {}",
                        remote_addr, err
                    );
                }
            });
        }
    }
}

/// The head goes out as soon as the engine releases it; a shaped body
/// follows as the shaper feeds it.
async fn handle_request(
    proxy: &Proxy,
    req: hyper::Request<Incoming>,
) -> Result<hyper::Response<HttpBody>, Infallible> {
    match proxy.handle(engine_request(req)).await {
        Ok(response) => Ok(response.into_hyper()),
        // The engine has already logged the failure.
        Err(err) => Ok(response_for_error(&err)
            .map(|body| body.map_err(|never: Infallible| match never {}).boxed_unsync())),
    }
}

/// Serve `/metrics` and `/health` on `listener`.
pub async fn serve_metrics(listener: TcpListener) -> Result<(), anyhow::Error> {
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        tokio::spawn(async move {
            let service = service_fn(|req: hyper::Request<Incoming>| async move {
                Ok::<_, Infallible>(metrics_endpoint(req.method(), req.uri().path()))
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Metrics connection from {} ended: {}", remote_addr, err);
            }
        });
    }
}

fn metrics_endpoint(method: &Method, path: &str) -> hyper::Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            let mut response = hyper::Response::new(Full::new(Bytes::from(collect_metrics())));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        (&Method::GET, "/health") => {
            let mut response = hyper::Response::new(Full::new(Bytes::from_static(
                br#"{"status":"ok"}"#,
            )));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}
