use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    routing::{any, get},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod channel;
mod ingress;
mod listener;
mod registry;
mod tracker;

use registry::Registry;

/// Relay configuration, supplied through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub exchange_timeout: Duration,
    pub ping_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PASSAGE_PORT", 8080),
            exchange_timeout: Duration::from_secs(env_parse(
                "PASSAGE_EXCHANGE_TIMEOUT_SECS",
                30,
            )),
            ping_interval: Duration::from_secs(env_parse("PASSAGE_PING_INTERVAL_SECS", 240)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("passage_relay=info")),
        )
        .init();

    let config = Config::from_env();
    let state = AppState {
        registry: Registry::new(),
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        .route("/tunnel", get(listener::ws_handler))
        .route("/health", get(|| async { "OK" }))
        .fallback(any(ingress::proxy_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        "passage relay on {} (exchange timeout {:?}, ping interval {:?})",
        addr, config.exchange_timeout, config.ping_interval
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::from_env();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.exchange_timeout, Duration::from_secs(30));
        assert_eq!(cfg.ping_interval, Duration::from_secs(240));
    }
}
