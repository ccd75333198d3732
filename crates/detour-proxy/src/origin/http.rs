//! Forwarding origin backed by a pooled hyper client.

use super::tls;
use super::Origin;
use crate::config::{ConnectionPoolConfig, UpstreamConfig};
use crate::error::ProxyError;
use crate::message::{Body, HttpBody, Request, Response};
use async_trait::async_trait;
use futures::TryStreamExt;
use http_body_util::BodyExt;
use hyper::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, HttpBody>;

/// Forwards every request to one upstream base URL.
///
/// The request body is streamed upstream while the request leg of the shaper
/// releases it, and the response body is handed back as a lazy stream so the
/// response leg paces it as it arrives.
#[derive(Clone)]
pub struct HttpOrigin {
    client: HttpClient,
    base: Arc<str>,
}

impl HttpOrigin {
    /// Origin with the default connection pool settings.
    pub fn new(upstream_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Self::from_config(
            &UpstreamConfig::new(upstream_url),
            &ConnectionPoolConfig::default(),
        )
    }

    pub fn from_config(
        upstream: &UpstreamConfig,
        pool: &ConnectionPoolConfig,
    ) -> Result<Self, anyhow::Error> {
        upstream.validate().map_err(|e| anyhow::anyhow!(e))?;

        // Both ring and aws-lc-rs may be compiled in; pin the process default.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let tls = if upstream.tls_skip_verify {
            warn!("TLS certificate verification DISABLED for the upstream (development/testing only)");
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls::insecure_client_config())
        } else {
            match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
                Ok(builder) => builder,
                Err(err) => {
                    warn!(error = %err, "no native root certificates, https upstreams will fail verification");
                    hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(
                        rustls::ClientConfig::builder()
                            .with_root_certificates(rustls::RootCertStore::empty())
                            .with_no_client_auth(),
                    )
                }
            }
        };
        let https_connector = tls.https_or_http().enable_http1().wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build(https_connector);

        info!(
            upstream = %upstream.url,
            "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
            pool.max_idle_per_host,
            pool.idle_timeout_secs,
            pool.keepalive_timeout_secs
        );

        Ok(Self {
            client,
            base: Arc::from(upstream.url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Absolute upstream URI for `request`.
    fn target(&self, request: &Request) -> String {
        format!("{}{}", self.base, request.path_and_query())
    }

    fn build_request(&self, mut request: Request) -> Result<hyper::Request<HttpBody>, ProxyError> {
        let target = self.target(&request);
        debug!("Forwarding to: {}", target);

        let body = request.take_body();
        let mut builder = hyper::Request::builder()
            .method(request.method().clone())
            .uri(target);

        // Framing headers are recomputed from the outgoing body.
        for (name, value) in request.headers() {
            if name != HOST && name != CONTENT_LENGTH && name != TRANSFER_ENCODING {
                builder = builder.header(name, value);
            }
        }

        builder.body(body.into_http_body()).map_err(ProxyError::origin)
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn dispatch(&self, request: Request) -> Result<Response, ProxyError> {
        let upstream_req = self.build_request(request)?;
        let upstream_resp = self
            .client
            .request(upstream_req)
            .await
            .map_err(ProxyError::origin)?;

        let (parts, body) = upstream_resp.into_parts();
        let stream = body.into_data_stream().map_err(io::Error::other);
        Ok(Response::from(hyper::Response::from_parts(
            parts,
            Body::from_stream(stream),
        )))
    }

    fn streams_request_body(&self) -> bool {
        true
    }
}
