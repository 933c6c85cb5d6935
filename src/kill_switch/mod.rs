//! Kill Switch: a small state machine, intentionally independent of the
//! Risk Gate (which it may only observe through `DailyPnlSource`).
//! Guards every order-placing path with `check_before_order`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::domain::errors::{KillSwitchActive, KillSwitchDeactivateError};

/// What the Kill Switch's condition monitor needs from the Risk Gate.
/// Kept as a narrow trait rather than a direct dependency so the two
/// components stay decoupled, per the ownership rules in the control
/// plane's concurrency model.
#[async_trait::async_trait]
pub trait DailyPnlSource: Send + Sync {
    async fn daily_pnl(&self) -> Decimal;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchCondition {
    DailyLossLimit,
    ConsecutiveLosses,
    ApiErrorRate,
    NetworkFailure,
    ManualTrigger,
}

impl KillSwitchCondition {
    pub fn label(self) -> &'static str {
        match self {
            KillSwitchCondition::DailyLossLimit => "DAILY_LOSS_LIMIT",
            KillSwitchCondition::ConsecutiveLosses => "CONSECUTIVE_LOSSES",
            KillSwitchCondition::ApiErrorRate => "API_ERROR_RATE",
            KillSwitchCondition::NetworkFailure => "NETWORK_FAILURE",
            KillSwitchCondition::ManualTrigger => "MANUAL_TRIGGER",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KillSwitchStatus {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activation_count: u32,
    pub consecutive_losses: u32,
    pub cooldown_remaining_seconds: f64,
    pub can_deactivate: bool,
}

#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    pub consecutive_loss_threshold: u32,
    pub api_error_rate_threshold: f64,
    pub network_timeout_seconds: i64,
    pub cooldown_minutes: i64,
    pub approval_code: String,
    pub check_interval_seconds: u64,
    pub max_daily_loss_hard: Decimal,
}

struct State {
    active: bool,
    reason: Option<String>,
    activated_at: Option<DateTime<Utc>>,
    activation_count: u32,
    consecutive_losses: u32,
    api_history: VecDeque<bool>,
    network_failure_start: Option<DateTime<Utc>>,
}

impl State {
    fn new() -> Self {
        Self {
            active: false,
            reason: None,
            activated_at: None,
            activation_count: 0,
            consecutive_losses: 0,
            api_history: VecDeque::with_capacity(100),
            network_failure_start: None,
        }
    }
}

pub struct KillSwitch {
    config: KillSwitchConfig,
    state: Mutex<State>,
    shutdown_tx: watch::Sender<bool>,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            state: Mutex::new(State::new()),
            shutdown_tx,
        })
    }

    /// `INACTIVE -> ACTIVE`. Always succeeds; a second call while already
    /// ACTIVE is a silent no-op.
    pub async fn activate(&self, reason: impl Into<String>, condition: KillSwitchCondition) {
        let mut state = self.state.lock().await;
        if state.active {
            warn!(condition = condition.label(), "kill switch already active, ignoring activation");
            return;
        }

        let reason = reason.into();
        state.active = true;
        state.reason = Some(reason.clone());
        state.activated_at = Some(Utc::now());
        state.activation_count += 1;

        error!(condition = condition.label(), reason = %reason, "KILL SWITCH ACTIVATED");
    }

    /// `ACTIVE -> INACTIVE`, gated by both approval-code equality and
    /// cooldown elapsed. The approval code is checked first: a caller
    /// with the wrong code learns that immediately rather than being
    /// told to wait out a cooldown they could never have passed anyway.
    pub async fn deactivate(&self, approval_token: &str) -> Result<(), KillSwitchDeactivateError> {
        let mut state = self.state.lock().await;

        if !state.active {
            return Ok(());
        }

        if approval_token != self.config.approval_code {
            return Err(KillSwitchDeactivateError::InvalidApprovalCode);
        }

        let since = state.activated_at.unwrap_or_else(Utc::now);
        let elapsed_minutes = (Utc::now() - since).num_seconds() as f64 / 60.0;
        if elapsed_minutes < self.config.cooldown_minutes as f64 {
            let remaining_minutes = self.config.cooldown_minutes as f64 - elapsed_minutes;
            return Err(KillSwitchDeactivateError::CooldownNotElapsed { remaining_minutes });
        }

        state.active = false;
        state.reason = None;
        state.activated_at = None;
        info!("kill switch deactivated");
        Ok(())
    }

    /// Every order-placing path must call this first.
    pub async fn check_before_order(&self) -> Result<(), KillSwitchActive> {
        let state = self.state.lock().await;
        if state.active {
            return Err(KillSwitchActive {
                reason: state.reason.clone().unwrap_or_else(|| "unknown".to_string()),
                activated_at: state.activated_at,
            });
        }
        Ok(())
    }

    pub async fn record_trade_result(&self, profit: Decimal) {
        let mut state = self.state.lock().await;
        if profit < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }
    }

    pub async fn record_api_call(&self, success: bool) {
        let mut state = self.state.lock().await;
        if state.api_history.len() >= 100 {
            state.api_history.pop_front();
        }
        state.api_history.push_back(success);
    }

    pub async fn record_network_failure(&self, is_failure: bool) {
        let mut state = self.state.lock().await;
        if is_failure {
            if state.network_failure_start.is_none() {
                state.network_failure_start = Some(Utc::now());
            }
        } else if let Some(start) = state.network_failure_start.take() {
            let duration = Utc::now() - start;
            info!(duration_secs = duration.num_seconds(), "network failure cleared");
        }
    }

    pub async fn status(&self) -> KillSwitchStatus {
        let state = self.state.lock().await;
        let cooldown_remaining_seconds = match state.activated_at {
            Some(since) if state.active => {
                let elapsed = (Utc::now() - since).num_seconds() as f64;
                (self.config.cooldown_minutes as f64 * 60.0 - elapsed).max(0.0)
            }
            _ => 0.0,
        };

        KillSwitchStatus {
            active: state.active,
            reason: state.reason.clone(),
            activated_at: state.activated_at,
            activation_count: state.activation_count,
            consecutive_losses: state.consecutive_losses,
            cooldown_remaining_seconds,
            can_deactivate: state.active && cooldown_remaining_seconds == 0.0,
        }
    }

    fn api_error_rate(history: &VecDeque<bool>) -> f64 {
        let recent: Vec<&bool> = history.iter().rev().take(50).collect();
        if recent.is_empty() {
            return 0.0;
        }
        let errors = recent.iter().filter(|ok| !***ok).count();
        errors as f64 / recent.len() as f64
    }

    /// Evaluates conditions in priority order, stopping at the first
    /// match, and activates on a hit. No-ops if already ACTIVE.
    async fn check_conditions(&self, pnl_source: &dyn DailyPnlSource) {
        {
            let state = self.state.lock().await;
            if state.active {
                return;
            }
        }

        let daily_pnl = pnl_source.daily_pnl().await;
        if daily_pnl < Decimal::ZERO && daily_pnl.abs() >= self.config.max_daily_loss_hard {
            self.activate(
                format!("Daily loss limit breached: {daily_pnl}"),
                KillSwitchCondition::DailyLossLimit,
            )
            .await;
            return;
        }

        let consecutive_losses = self.state.lock().await.consecutive_losses;
        if consecutive_losses >= self.config.consecutive_loss_threshold {
            self.activate(
                format!("{consecutive_losses} consecutive losses"),
                KillSwitchCondition::ConsecutiveLosses,
            )
            .await;
            return;
        }

        let (sample_size, error_rate) = {
            let state = self.state.lock().await;
            (state.api_history.len(), Self::api_error_rate(&state.api_history))
        };
        if sample_size >= 20 && error_rate >= self.config.api_error_rate_threshold {
            self.activate(
                format!("API error rate {error_rate:.2} over {sample_size} samples"),
                KillSwitchCondition::ApiErrorRate,
            )
            .await;
            return;
        }

        let network_failure_start = self.state.lock().await.network_failure_start;
        if let Some(start) = network_failure_start {
            let duration_secs = (Utc::now() - start).num_seconds();
            if duration_secs >= self.config.network_timeout_seconds {
                self.activate(
                    format!("network failure for {duration_secs}s"),
                    KillSwitchCondition::NetworkFailure,
                )
                .await;
            }
        }
    }

    /// Spawns the periodic condition monitor. Errors inside a tick are
    /// logged and swallowed; the loop never exits on a per-tick failure.
    pub fn spawn_monitor(self: &Arc<Self>, pnl_source: Arc<dyn DailyPnlSource>) {
        let switch = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.config.check_interval_seconds);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        switch.check_conditions(pnl_source.as_ref()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("kill switch monitor stopping");
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
}
