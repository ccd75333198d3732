use anyhow::Context;
use clap::Parser;
use detour_proxy::config::Config;
use detour_proxy::proxy::ProxyServer;
use detour_proxy::throttle::Leg;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "detour")]
#[command(about = "Intercepting HTTP proxy with network-condition simulation")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "DETOUR_CONFIG")]
    config: Option<String>,

    /// Listener port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides the config file)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Added latency in milliseconds on the response leg
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Response leg bandwidth in bytes per second
    #[arg(long)]
    rate: Option<u64>,

    /// Port for /metrics and /health
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn into_config(self) -> Result<Config, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => {
                let upstream = self
                    .upstream
                    .clone()
                    .context("either --config or --upstream is required")?;
                Config::new(self.port.unwrap_or(8080), upstream)
            }
        };

        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(upstream) = self.upstream {
            config.upstream.url = upstream;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        let response = config.throttle.leg_mut(Leg::Response);
        if self.latency_ms.is_some() {
            response.latency_ms = self.latency_ms;
        }
        if self.rate.is_some() {
            response.rate_bytes_per_sec = self.rate;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    info!(
        port = config.listen.port,
        upstream = %config.upstream.url,
        "Starting detour"
    );

    let server = ProxyServer::new(config)?;
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
