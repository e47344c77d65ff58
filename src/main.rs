use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use deepscout::core::load_research_config;
use deepscout::http::{build_router, AppState};
use deepscout::research::{
    HttpLlmClient, HttpSearchClient, NoopCredentialsReload, RateLimiter, ResearchEngine,
};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["DEEPSCOUT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting deep-research server");

    let config = load_research_config();

    let http_timeout = env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);
    let connect_timeout = env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(http_timeout))
        .connect_timeout(Duration::from_secs(connect_timeout))
        .build()?;

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.resolve_rpm(),
        config.rate_limit.resolve_initial_backoff_ms(),
        config.rate_limit.resolve_max_backoff_ms(),
        config.rate_limit.resolve_multiplier(),
    ));

    let search_client = Arc::new(HttpSearchClient::new(
        http_client.clone(),
        config.search_provider.resolve_base_url(),
        config.search_provider.resolve_api_key(),
        Duration::from_millis(config.search_provider.resolve_timeout_ms()),
        limiter.clone(),
    ));

    let llm_client = Arc::new(HttpLlmClient::new(
        http_client,
        config.llm_provider.resolve_base_url(),
        config.llm_provider.resolve_api_key(),
        Duration::from_millis(config.llm_provider.resolve_timeout_ms()),
        limiter,
        Arc::new(NoopCredentialsReload),
    ));

    if config.search_provider.resolve_api_key().is_none() {
        warn!("no search provider API key configured; search requests will likely be rejected");
    }
    if config.llm_provider.resolve_api_key().is_none() {
        warn!("no LLM provider API key configured; chat completions will likely be rejected");
    }

    let engine = Arc::new(ResearchEngine::new(search_client, llm_client));
    let state = Arc::new(AppState::new(config, engine));

    let app = build_router(state);

    let port: u16 = parse_port_from_args().or_else(port_from_env).unwrap_or(5100);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/DEEPSCOUT_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("deep-research server listening on http://{}", bind_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
