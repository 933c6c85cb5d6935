//! GTT Monitor: the background loop that polls LTPs for every symbol
//! with an active GTT and hands triggered ones to the Executor.
//! Grounded in the original `gtt/monitor.py`: trading-hours gating,
//! a short-lived per-symbol price cache, group-by-symbol batching, and
//! an error-swallowing loop that never exits on a per-tick failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Timelike};
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::broker::client::BrokerClient;
use crate::broker::gateway::BrokerGateway;
use crate::domain::errors::BrokerError;
use crate::gtt::executor::GttExecutor;
use crate::gtt::store::GttStore;

const PRICE_CACHE_TTL: Duration = Duration::from_secs(10);
const OUTSIDE_HOURS_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorStats {
    pub checks_run: u64,
    pub gtts_triggered: u64,
    pub trigger_failures: u64,
}

impl MonitorStats {
    pub fn trigger_success_rate(&self) -> f64 {
        let attempted = self.gtts_triggered + self.trigger_failures;
        if attempted == 0 {
            0.0
        } else {
            self.gtts_triggered as f64 / attempted as f64
        }
    }
}

struct PriceCacheEntry {
    ltp: Decimal,
    cached_at: Instant,
}

struct RunState {
    paused: bool,
    started_at: Option<Instant>,
}

pub struct GttMonitor<G: BrokerGateway> {
    store: Arc<GttStore>,
    broker: Arc<BrokerClient<G>>,
    executor: Arc<GttExecutor<G>>,
    check_interval: Duration,
    price_cache: Mutex<HashMap<(String, String), PriceCacheEntry>>,
    run_state: RwLock<RunState>,
    stats: Mutex<MonitorStats>,
    shutdown_tx: watch::Sender<bool>,
}

impl<G: BrokerGateway + 'static> GttMonitor<G> {
    pub fn new(
        store: Arc<GttStore>,
        broker: Arc<BrokerClient<G>>,
        executor: Arc<GttExecutor<G>>,
        check_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            store,
            broker,
            executor,
            check_interval,
            price_cache: Mutex::new(HashMap::new()),
            run_state: RwLock::new(RunState { paused: false, started_at: None }),
            stats: Mutex::new(MonitorStats::default()),
            shutdown_tx,
        })
    }

    pub fn spawn(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.check_interval;

        tokio::spawn(async move {
            monitor.run_state.write().await.started_at = Some(Instant::now());
            info!(interval_secs = interval.as_secs(), "GTT monitor started");

            loop {
                let sleep_for = if monitor.run_state.read().await.paused {
                    debug!("GTT monitor paused, skipping check");
                    interval
                } else if !is_trading_hours() {
                    debug!("outside trading hours, skipping check");
                    OUTSIDE_HOURS_SLEEP
                } else {
                    if let Err(e) = monitor.check_gtts().await {
                        error!(error = %e, "GTT monitor tick failed, continuing");
                    }
                    interval
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("GTT monitor stopping");
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn pause(&self) {
        self.run_state.write().await.paused = true;
        info!("GTT monitor paused");
    }

    pub async fn resume(&self) {
        self.run_state.write().await.paused = false;
        info!("GTT monitor resumed");
    }

    pub async fn is_paused(&self) -> bool {
        self.run_state.read().await.paused
    }

    pub async fn is_running(&self) -> bool {
        self.run_state.read().await.started_at.is_some()
    }

    /// Runs one check cycle immediately, bypassing the pause/trading-hours
    /// gate. Used by tests and the manual "check now" operator command.
    pub async fn check_now(&self) -> Result<(), BrokerError> {
        self.check_gtts().await
    }

    pub async fn clear_price_cache(&self) {
        self.price_cache.lock().await.clear();
    }

    pub async fn stats(&self) -> MonitorStats {
        *self.stats.lock().await
    }

    async fn check_gtts(&self) -> Result<(), BrokerError> {
        self.stats.lock().await.checks_run += 1;

        let active = self.store.get_active().await.map_err(|e| {
            BrokerError::DataFetch(crate::domain::errors::DataFetchError {
                kind: crate::domain::errors::DataKind::Positions,
                message: e.to_string(),
            })
        })?;

        if active.is_empty() {
            return Ok(());
        }

        let mut by_symbol: HashMap<(String, String), Vec<_>> = HashMap::new();
        for gtt in active {
            by_symbol.entry((gtt.symbol.clone(), gtt.exchange.clone())).or_default().push(gtt);
        }

        for ((symbol, exchange), gtts) in by_symbol {
            let ltp = match self.get_ltp(&symbol, &exchange).await {
                Ok(ltp) => ltp,
                Err(e) => {
                    warn!(symbol, exchange, error = %e, "could not fetch LTP for GTT group, skipping");
                    continue;
                }
            };

            for gtt in gtts {
                if !gtt.should_trigger(ltp) {
                    continue;
                }

                info!(gtt_id = gtt.id, symbol = %gtt.symbol, %ltp, trigger_price = %gtt.trigger_price, "GTT condition met");
                match self.executor.execute_gtt(&gtt, ltp).await {
                    Ok(()) => {
                        self.stats.lock().await.gtts_triggered += 1;
                    }
                    Err(e) => {
                        self.stats.lock().await.trigger_failures += 1;
                        error!(gtt_id = gtt.id, error = %e, "GTT trigger execution failed");
                    }
                }
            }
        }

        Ok(())
    }

    /// 10-second TTL cache so a symbol shared by several GTTs costs one
    /// LTP call per tick rather than one per GTT.
    async fn get_ltp(&self, symbol: &str, exchange: &str) -> Result<Decimal, BrokerError> {
        let key = (symbol.to_string(), exchange.to_string());

        {
            let cache = self.price_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed() < PRICE_CACHE_TTL {
                    return Ok(entry.ltp);
                }
            }
        }

        let ltp = self.broker.get_ltp(symbol, exchange).await?;
        self.price_cache.lock().await.insert(key, PriceCacheEntry { ltp, cached_at: Instant::now() });
        Ok(ltp)
    }
}

/// Whether the regular trading session (Mon-Fri 09:15-15:30 local) is
/// currently open. Exposed so a market-status adapter has a single
/// source of truth rather than re-deriving the session window itself.
/// No pre-market or post-market session is modeled.
pub fn is_trading_hours() -> bool {
    let now = chrono::Local::now();
    let weekday = now.weekday();
    if matches!(weekday, chrono::Weekday::Sat | chrono::Weekday::Sun) {
        return false;
    }

    let minutes_since_midnight = now.hour() * 60 + now.minute();
    let open = 9 * 60 + 15;
    let close = 15 * 60 + 30;
    minutes_since_midnight >= open && minutes_since_midnight <= close
}
