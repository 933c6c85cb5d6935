//! Thin wiring layer: load configuration, build the control-plane
//! components in dependency order, spawn the background monitors, and
//! serve until interrupted. All decisions live in the library; this
//! binary only constructs and connects.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tradectl::broker::{AuthManager, BrokerClient, HttpBrokerGateway, HttpTokenIssuer};
use tradectl::config::AppConfig;
use tradectl::gtt::{GttExecutor, GttMonitor, GttStore};
use tradectl::kill_switch::KillSwitch;
use tradectl::risk::{RiskGate, RiskGateConfig, SoftLimits};

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("loading configuration");
    let force_paper_mode = env_flag("FORCE_PAPER_MODE", true);
    let config = AppConfig::load(
        env_path("TRADECTL_CONFIG").as_deref(),
        env_path("TRADECTL_HARD_LIMITS").as_deref(),
        force_paper_mode,
    )?;
    tracing::info!(paper_mode = config.is_paper_mode(), exchange = %config.default_exchange, "configuration loaded");

    let token_url = std::env::var("BROKER_TOKEN_URL").unwrap_or_else(|_| "https://broker.invalid/token".to_string());
    let base_url = std::env::var("BROKER_BASE_URL").unwrap_or_else(|_| "https://broker.invalid/api".to_string());

    let auth = AuthManager::new(
        std::env::var("BROKER_API_KEY").ok(),
        std::env::var("BROKER_API_SECRET").ok(),
        Box::new(HttpTokenIssuer::new(token_url)),
    )?;

    let rate_limiter = Arc::new(tradectl::rate_limiter::RateLimiter::new(config.rate_limiter));
    let gateway = HttpBrokerGateway::new(base_url);
    let broker = Arc::new(BrokerClient::new(
        gateway,
        auth,
        Arc::clone(&rate_limiter),
        config.hard_limits.clone(),
        config.is_paper_mode(),
    ));

    let portfolio_source: Arc<dyn tradectl::risk::PortfolioSource> = Arc::clone(&broker);
    let risk_gate = Arc::new(RiskGate::new(
        RiskGateConfig {
            soft: SoftLimits {
                max_portfolio_value: config.max_portfolio_value,
                max_position_size: config.max_position_size,
                max_daily_loss: config.max_daily_loss,
                max_open_positions: config.max_open_positions,
            },
            hard: config.hard_limits.clone(),
        },
        portfolio_source,
    ));

    let kill_switch = KillSwitch::new(config.kill_switch.clone());
    let pnl_source: Arc<dyn tradectl::kill_switch::DailyPnlSource> = Arc::clone(&risk_gate);
    kill_switch.spawn_monitor(pnl_source);

    let db_url = std::env::var("GTT_DB_URL").unwrap_or_else(|_| "sqlite://data/gtt.db".to_string());
    let store = Arc::new(GttStore::new(&db_url).await?);
    let executor = Arc::new(GttExecutor::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&risk_gate),
        Arc::clone(&kill_switch),
    ));
    let monitor = GttMonitor::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&executor),
        Duration::from_secs(config.gtt_monitor_interval_seconds),
    );
    monitor.spawn();

    tracing::info!("control plane running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutdown signal received, stopping monitors");
    monitor.stop();
    kill_switch.stop();

    Ok(())
}
