//! Configuration Store: an immutable snapshot of soft (operator-tunable)
//! and hard (never-overridable) risk limits, plus kill-switch thresholds
//! and the recovery protocol. Consumed read-only by every other
//! component.
//!
//! Two layers merge deeply, override-last: a built-in default document
//! (embedded at compile time) and an optional operator-local document. A
//! third, separate document carries `ABSOLUTE_LIMITS`,
//! `KILL_SWITCH_CONDITIONS`, and `RECOVERY_PROTOCOL` and is immutable at
//! runtime. `FORCE_PAPER_MODE` (default on) makes `trading.mode = "live"`
//! a load-time error.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::errors::ConfigError;
use crate::kill_switch::KillSwitchConfig as RuntimeKillSwitchConfig;
use crate::rate_limiter::RateLimiterConfig;

const DEFAULT_CONFIG_TOML: &str = include_str!("default.toml");
const HARD_LIMITS_TOML: &str = include_str!("hard_limits.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub mode: String,
    pub default_exchange: String,
    pub default_segment: String,
    pub default_product: String,
    #[serde(default = "default_order_validity")]
    pub order_validity: String,
}

fn default_order_validity() -> String {
    "DAY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfigDoc {
    pub max_portfolio_value: Decimal,
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_positions: u32,
    pub position_size_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsDoc {
    pub orders_per_second: u32,
    pub live_data_per_second: u32,
    pub non_trading_per_second: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiDoc {
    pub rate_limits: RateLimitsDoc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryProtocolDoc {
    pub cooldown_period_minutes: i64,
    pub approval_code: String,
    #[serde(default)]
    pub require_manual_restart: bool,
    #[serde(default)]
    pub require_admin_approval: bool,
    #[serde(default)]
    pub actions_on_activation: Vec<String>,
    #[serde(default)]
    pub restart_checklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KillSwitchDoc {
    #[serde(default = "default_consecutive_loss_threshold")]
    pub consecutive_loss_threshold: u32,
    #[serde(default = "default_api_error_rate_threshold")]
    pub api_error_rate_threshold: f64,
    #[serde(default = "default_network_timeout_seconds")]
    pub network_timeout_seconds: i64,
    pub recovery_protocol: RecoveryProtocolDoc,
}

fn default_consecutive_loss_threshold() -> u32 {
    5
}
fn default_api_error_rate_threshold() -> f64 {
    0.30
}
fn default_network_timeout_seconds() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct GttDoc {
    #[serde(default = "default_gtt_monitor_interval")]
    pub monitor_interval_seconds: u64,
}

fn default_gtt_monitor_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
struct MergedDoc {
    trading: TradingConfig,
    risk: RiskConfigDoc,
    api: ApiDoc,
    kill_switch: KillSwitchDoc,
    gtt: GttDoc,
}

#[derive(Debug, Clone, Deserialize)]
struct KillSwitchConditionDoc {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
    #[allow(dead_code)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AbsoluteLimitsDoc {
    #[serde(rename = "MAX_SINGLE_ORDER_VALUE")]
    max_single_order_value: Decimal,
    #[serde(rename = "MAX_DAILY_ORDERS")]
    max_daily_orders: u32,
    #[serde(rename = "MAX_PORTFOLIO_VALUE")]
    max_portfolio_value: Decimal,
    #[serde(rename = "MAX_DAILY_LOSS_HARD")]
    max_daily_loss_hard: Decimal,
    #[serde(rename = "MIN_ACCOUNT_BALANCE")]
    #[allow(dead_code)]
    min_account_balance: Decimal,
    #[serde(rename = "ALLOWED_EXCHANGES")]
    allowed_exchanges: Vec<String>,
    #[serde(rename = "FORBIDDEN_SEGMENTS")]
    forbidden_segments: Vec<String>,
    #[serde(rename = "FORBIDDEN_PRODUCTS")]
    forbidden_products: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HardLimitsDoc {
    #[serde(rename = "ABSOLUTE_LIMITS")]
    absolute_limits: AbsoluteLimitsDoc,
    #[serde(rename = "KILL_SWITCH_CONDITIONS", default)]
    #[allow(dead_code)]
    kill_switch_conditions: Vec<KillSwitchConditionDoc>,
}

/// Hard, never-overridable limits, loaded once at startup.
#[derive(Debug, Clone)]
pub struct HardLimits {
    pub max_single_order_value: Decimal,
    pub max_daily_orders: u32,
    pub max_portfolio_value: Decimal,
    pub max_daily_loss_hard: Decimal,
    pub allowed_exchanges: Vec<String>,
    pub forbidden_segments: Vec<String>,
    pub forbidden_products: Vec<String>,
}

/// The fully validated, immutable configuration snapshot handed to every
/// component at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: TradingMode,
    pub default_exchange: String,
    pub default_segment: String,
    pub default_product: String,
    pub max_portfolio_value: Decimal,
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_positions: u32,
    pub rate_limiter: RateLimiterConfig,
    pub kill_switch: RuntimeKillSwitchConfig,
    pub gtt_monitor_interval_seconds: u64,
    pub hard_limits: HardLimits,
}

impl AppConfig {
    pub fn is_paper_mode(&self) -> bool {
        matches!(self.mode, TradingMode::Paper)
    }

    /// Load configuration from file paths, following the `default +
    /// optional local override + immutable hard limits` layering.
    /// `force_paper_mode` should be wired from the `FORCE_PAPER_MODE`
    /// environment flag (on by default).
    pub fn load(
        local_path: Option<&Path>,
        hard_limits_path: Option<&Path>,
        force_paper_mode: bool,
    ) -> Result<Self, ConfigError> {
        let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(path) = local_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::ParseError(e.to_string()))?;
                let local: toml::Value =
                    toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
                deep_merge(&mut base, local);
            }
        }

        Self::from_merged_value(base, hard_limits_path, force_paper_mode)
    }

    /// Build directly from in-memory document strings. Exercised by
    /// tests so the merge/validate logic does not need real files on
    /// disk.
    pub fn from_strs(
        default_toml: &str,
        local_toml: Option<&str>,
        hard_limits_toml: &str,
        force_paper_mode: bool,
    ) -> Result<Self, ConfigError> {
        let mut base: toml::Value =
            toml::from_str(default_toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(local_text) = local_toml {
            let local: toml::Value = toml::from_str(local_text)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            deep_merge(&mut base, local);
        }

        let limits: HardLimitsDoc = toml::from_str(hard_limits_toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::build(base, limits, force_paper_mode)
    }

    fn from_merged_value(
        base: toml::Value,
        hard_limits_path: Option<&Path>,
        force_paper_mode: bool,
    ) -> Result<Self, ConfigError> {
        let limits_text = match hard_limits_path {
            Some(path) => {
                std::fs::read_to_string(path).map_err(|e| ConfigError::NotFound(e.to_string()))?
            }
            None => HARD_LIMITS_TOML.to_string(),
        };
        let limits: HardLimitsDoc =
            toml::from_str(&limits_text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::build(base, limits, force_paper_mode)
    }

    fn build(
        base: toml::Value,
        limits: HardLimitsDoc,
        force_paper_mode: bool,
    ) -> Result<Self, ConfigError> {
        let merged: MergedDoc = base
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;

        let hard = limits.absolute_limits;

        // FORCE_PAPER_MODE=1 makes `mode: live` a configuration error,
        // rather than silently coercing it to paper, so a misconfigured
        // deployment fails loudly at startup instead of trading live
        // without the operator realizing paper mode never took effect.
        let mode = match merged.trading.mode.as_str() {
            "paper" => TradingMode::Paper,
            "live" => {
                if force_paper_mode {
                    return Err(ConfigError::LiveModeForcedToPaper);
                }
                TradingMode::Live
            }
            other => {
                return Err(ConfigError::ParseError(format!(
                    "trading.mode must be 'paper' or 'live', got '{other}'"
                )));
            }
        };

        if merged.risk.max_portfolio_value > hard.max_portfolio_value {
            return Err(ConfigError::ExceedsHardLimit {
                field: "risk.max_portfolio_value".to_string(),
                value: merged.risk.max_portfolio_value,
                limit: hard.max_portfolio_value,
            });
        }
        if merged.risk.max_position_size > hard.max_single_order_value {
            return Err(ConfigError::ExceedsHardLimit {
                field: "risk.max_position_size".to_string(),
                value: merged.risk.max_position_size,
                limit: hard.max_single_order_value,
            });
        }
        if merged.risk.max_daily_loss > hard.max_daily_loss_hard {
            return Err(ConfigError::ExceedsHardLimit {
                field: "risk.max_daily_loss".to_string(),
                value: merged.risk.max_daily_loss,
                limit: hard.max_daily_loss_hard,
            });
        }

        if !hard.allowed_exchanges.contains(&merged.trading.default_exchange) {
            return Err(ConfigError::DisallowedExchange(merged.trading.default_exchange));
        }
        if hard.forbidden_segments.contains(&merged.trading.default_segment) {
            return Err(ConfigError::ForbiddenSegment(merged.trading.default_segment));
        }
        if hard.forbidden_products.contains(&merged.trading.default_product) {
            return Err(ConfigError::ForbiddenProduct(merged.trading.default_product));
        }

        Ok(AppConfig {
            mode,
            default_exchange: merged.trading.default_exchange,
            default_segment: merged.trading.default_segment,
            default_product: merged.trading.default_product,
            max_portfolio_value: merged.risk.max_portfolio_value,
            max_position_size: merged.risk.max_position_size,
            max_daily_loss: merged.risk.max_daily_loss,
            max_open_positions: merged.risk.max_open_positions,
            rate_limiter: RateLimiterConfig {
                orders_per_sec: merged.api.rate_limits.orders_per_second,
                live_data_per_sec: merged.api.rate_limits.live_data_per_second,
                non_trading_per_sec: merged.api.rate_limits.non_trading_per_second,
            },
            kill_switch: RuntimeKillSwitchConfig {
                consecutive_loss_threshold: merged.kill_switch.consecutive_loss_threshold,
                api_error_rate_threshold: merged.kill_switch.api_error_rate_threshold,
                network_timeout_seconds: merged.kill_switch.network_timeout_seconds,
                cooldown_minutes: merged.kill_switch.recovery_protocol.cooldown_period_minutes,
                approval_code: merged.kill_switch.recovery_protocol.approval_code,
                check_interval_seconds: 30,
                max_daily_loss_hard: hard.max_daily_loss_hard,
            },
            gtt_monitor_interval_seconds: merged.gtt.monitor_interval_seconds,
            hard_limits: HardLimits {
                max_single_order_value: hard.max_single_order_value,
                max_daily_orders: hard.max_daily_orders,
                max_portfolio_value: hard.max_portfolio_value,
                max_daily_loss_hard: hard.max_daily_loss_hard,
                allowed_exchanges: hard.allowed_exchanges,
                forbidden_segments: hard.forbidden_segments,
                forbidden_products: hard.forbidden_products,
            },
        })
    }
}

/// Recursively merges `override_doc` into `base`, matching the original
/// source's `_deep_merge`: nested tables merge key-by-key, any other
/// value (including arrays) is replaced wholesale by the override.
fn deep_merge(base: &mut toml::Value, override_doc: toml::Value) {
    match (base, override_doc) {
        (toml::Value::Table(base_table), toml::Value::Table(override_table)) => {
            for (key, value) in override_table {
                match base_table.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, override_doc) => *base = override_doc,
    }
}
