//! Risk Gate: the synchronous validation pipeline every order traverses
//! before it reaches the network. Owns daily counters, the open-position
//! mirror, and daily P&L; never retried, never an exception — rejections
//! are structured results the caller inspects.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::HardLimits;
use crate::domain::errors::BrokerError;
use crate::domain::types::{Order, OrderSide, Position, RiskMetrics};
use crate::kill_switch::DailyPnlSource;

/// What the Risk Gate needs from the Broker Client to rebuild its
/// position mirror. A narrow trait rather than a direct dependency on
/// `BrokerClient<G>` so the gate stays generic over the gateway
/// implementation, the same seam `DailyPnlSource` gives the Kill Switch.
#[async_trait::async_trait]
pub trait PortfolioSource: Send + Sync {
    async fn positions(&self) -> Result<Vec<Position>, BrokerError>;
}

/// Operator-tunable soft limits, validated at config load to be `<=`
/// their hard counterparts.
#[derive(Debug, Clone)]
pub struct SoftLimits {
    pub max_portfolio_value: Decimal,
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_positions: u32,
}

#[derive(Debug, Clone)]
pub struct RiskGateConfig {
    pub soft: SoftLimits,
    pub hard: HardLimits,
}

/// Result of `validate_order`. A plain struct, not an error: a rejection
/// is a denial the caller reports to its own caller, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskValidation {
    pub approved: bool,
    pub reason: Option<String>,
    pub limit_type: Option<String>,
    pub current_value: Option<String>,
    pub limit_value: Option<String>,
}

impl RiskValidation {
    fn approved() -> Self {
        Self { approved: true, reason: None, limit_type: None, current_value: None, limit_value: None }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RiskGateStats {
    pub orders_validated: u64,
    pub orders_approved: u64,
    pub orders_rejected: u64,
    pub rejection_reasons: HashMap<String, u64>,
}

impl RiskGateStats {
    pub fn approval_rate(&self) -> f64 {
        if self.orders_validated == 0 {
            0.0
        } else {
            self.orders_approved as f64 / self.orders_validated as f64
        }
    }
}

struct DailyState {
    current_day: NaiveDate,
    daily_pnl: Decimal,
    daily_order_count: u32,
    daily_orders: Vec<Order>,
    open_positions: HashMap<String, Position>,
}

impl DailyState {
    fn new() -> Self {
        Self {
            current_day: Utc::now().date_naive(),
            daily_pnl: Decimal::ZERO,
            daily_order_count: 0,
            daily_orders: Vec::new(),
            open_positions: HashMap::new(),
        }
    }

    /// Idempotent day-boundary reset: counters reset, positions survive.
    fn roll_over_if_new_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.current_day != today {
            info!(
                previous_day = %self.current_day,
                new_day = %today,
                previous_pnl = %self.daily_pnl,
                previous_orders = self.daily_order_count,
                "day rollover: resetting daily counters"
            );
            self.current_day = today;
            self.daily_pnl = Decimal::ZERO;
            self.daily_order_count = 0;
            self.daily_orders.clear();
        }
    }
}

pub struct RiskGate {
    config: RiskGateConfig,
    portfolio: Arc<dyn PortfolioSource>,
    state: Mutex<DailyState>,
    stats: Mutex<RiskGateStats>,
}

impl RiskGate {
    pub fn new(config: RiskGateConfig, portfolio: Arc<dyn PortfolioSource>) -> Self {
        info!(
            max_portfolio_value = %config.soft.max_portfolio_value,
            max_position_size = %config.soft.max_position_size,
            max_daily_loss = %config.soft.max_daily_loss,
            max_open_positions = config.soft.max_open_positions,
            "risk gate initialized"
        );
        Self {
            config,
            portfolio,
            state: Mutex::new(DailyState::new()),
            stats: Mutex::new(RiskGateStats::default()),
        }
    }

    /// Runs the seven-step rejection pipeline from the spec,
    /// short-circuiting on the first violation.
    #[allow(clippy::too_many_arguments)]
    pub async fn validate_order(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        side: OrderSide,
        segment: &str,
        product: &str,
    ) -> RiskValidation {
        let mut stats = self.stats.lock().await;
        stats.orders_validated += 1;
        drop(stats);

        let mut state = self.state.lock().await;
        state.roll_over_if_new_day();

        let order_value = quantity * price;
        info!(symbol, %side, %quantity, %price, %order_value, "validating order");

        // 2. single-order value, hard limit
        if order_value > self.config.hard.max_single_order_value {
            return self
                .reject(
                    format!(
                        "single order value {order_value} exceeds hard limit {}",
                        self.config.hard.max_single_order_value
                    ),
                    "max_single_order_value",
                    Some(order_value.to_string()),
                    Some(self.config.hard.max_single_order_value.to_string()),
                )
                .await;
        }

        // 3. position size, soft, BUY only
        if side == OrderSide::Buy && order_value > self.config.soft.max_position_size {
            return self
                .reject(
                    format!(
                        "position size {order_value} exceeds limit {}",
                        self.config.soft.max_position_size
                    ),
                    "max_position_size",
                    Some(order_value.to_string()),
                    Some(self.config.soft.max_position_size.to_string()),
                )
                .await;
        }

        // 4. daily order cap, hard
        if state.daily_order_count >= self.config.hard.max_daily_orders {
            return self
                .reject(
                    format!(
                        "daily order limit reached: {}/{}",
                        state.daily_order_count, self.config.hard.max_daily_orders
                    ),
                    "max_daily_orders",
                    Some(state.daily_order_count.to_string()),
                    Some(self.config.hard.max_daily_orders.to_string()),
                )
                .await;
        }

        // 5. open-position cap, soft, BUY to a symbol not already held
        if side == OrderSide::Buy
            && !state.open_positions.contains_key(symbol)
            && state.open_positions.len() as u32 >= self.config.soft.max_open_positions
        {
            return self
                .reject(
                    format!(
                        "maximum open positions reached: {}/{}",
                        state.open_positions.len(),
                        self.config.soft.max_open_positions
                    ),
                    "max_open_positions",
                    Some(state.open_positions.len().to_string()),
                    Some(self.config.soft.max_open_positions.to_string()),
                )
                .await;
        }

        // 6. daily loss: hard first (kill-switch territory), then soft
        if state.daily_pnl < Decimal::ZERO {
            let loss = state.daily_pnl.abs();
            if loss >= self.config.hard.max_daily_loss_hard {
                return self
                    .reject(
                        format!(
                            "hard daily loss limit breached: {loss} >= {} (kill switch territory)",
                            self.config.hard.max_daily_loss_hard
                        ),
                        "max_daily_loss_hard",
                        Some(loss.to_string()),
                        Some(self.config.hard.max_daily_loss_hard.to_string()),
                    )
                    .await;
            }
            if loss >= self.config.soft.max_daily_loss {
                return self
                    .reject(
                        format!("daily loss limit reached: {loss} >= {}", self.config.soft.max_daily_loss),
                        "max_daily_loss",
                        Some(loss.to_string()),
                        Some(self.config.soft.max_daily_loss.to_string()),
                    )
                    .await;
            }
        }

        // 7. forbidden segment / product
        if self.config.hard.forbidden_segments.iter().any(|s| s == segment) {
            return self
                .reject(format!("segment '{segment}' is forbidden by hard limits"), "forbidden_segment", None, None)
                .await;
        }
        if self.config.hard.forbidden_products.iter().any(|p| p == product) {
            return self
                .reject(format!("product '{product}' is forbidden by hard limits"), "forbidden_product", None, None)
                .await;
        }

        let mut stats = self.stats.lock().await;
        stats.orders_approved += 1;
        info!(
            symbol,
            daily_orders = state.daily_order_count,
            open_positions = state.open_positions.len(),
            daily_pnl = %state.daily_pnl,
            "order approved by risk gate"
        );

        RiskValidation::approved()
    }

    async fn reject(
        &self,
        reason: String,
        limit_type: &str,
        current_value: Option<String>,
        limit_value: Option<String>,
    ) -> RiskValidation {
        let mut stats = self.stats.lock().await;
        stats.orders_rejected += 1;
        *stats.rejection_reasons.entry(limit_type.to_string()).or_insert(0) += 1;
        warn!(reason = %reason, limit_type, "order rejected by risk gate");

        RiskValidation {
            approved: false,
            reason: Some(reason),
            limit_type: Some(limit_type.to_string()),
            current_value,
            limit_value,
        }
    }

    /// Called after a successful broker placement. Never retried, never
    /// rolled back: a recorded order is a fact, not a proposal.
    pub async fn record_order(&self, order: &Order) {
        let mut state = self.state.lock().await;
        state.roll_over_if_new_day();
        state.daily_orders.push(order.clone());
        state.daily_order_count += 1;
        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            daily_order_count = state.daily_order_count,
            "order recorded"
        );
    }

    /// Re-reads positions from the broker, rebuilds the open-position
    /// mirror, and recomputes daily P&L as the sum of position P&L
    /// (nulls treated as zero).
    pub async fn update_daily_pnl(&self) -> Result<Decimal, BrokerError> {
        let positions = self.portfolio.positions().await?;
        let daily_pnl: Decimal = positions.iter().map(|p| p.pnl.unwrap_or(Decimal::ZERO)).sum();

        let mut state = self.state.lock().await;
        state.open_positions = positions.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        state.daily_pnl = daily_pnl;

        info!(%daily_pnl, open_positions = state.open_positions.len(), "daily P&L updated");
        Ok(daily_pnl)
    }

    /// Point-in-time snapshot. Attempts a P&L refresh first; a failed
    /// refresh is logged and the snapshot falls back to the last known
    /// state rather than failing the whole status call.
    pub async fn get_status(&self) -> RiskMetrics {
        {
            let mut state = self.state.lock().await;
            state.roll_over_if_new_day();
        }

        if let Err(e) = self.update_daily_pnl().await {
            warn!(error = %e, "could not refresh P&L for risk status");
        }

        let state = self.state.lock().await;
        let used_capital: Decimal =
            state.open_positions.values().map(|p| p.quantity * p.average_price).sum();
        let available_capital = self.config.soft.max_portfolio_value - used_capital;

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if state.daily_pnl < Decimal::ZERO {
            let loss = state.daily_pnl.abs();
            if loss >= self.config.hard.max_daily_loss_hard {
                warnings.push(format!("CRITICAL: hard loss limit breached ({loss})"));
                is_healthy = false;
            } else if loss >= self.config.soft.max_daily_loss * Decimal::new(8, 1) {
                warnings.push(format!(
                    "WARNING: daily loss at {:.0}% of limit",
                    (loss / self.config.soft.max_daily_loss) * Decimal::from(100)
                ));
                if loss >= self.config.soft.max_daily_loss {
                    is_healthy = false;
                }
            }
        }

        if state.daily_order_count as f64 >= self.config.hard.max_daily_orders as f64 * 0.8 {
            warnings.push(format!(
                "WARNING: daily orders at {:.0}% of limit",
                state.daily_order_count as f64 / self.config.hard.max_daily_orders as f64 * 100.0
            ));
            if state.daily_order_count >= self.config.hard.max_daily_orders {
                is_healthy = false;
            }
        }

        let open_positions = state.open_positions.len() as u32;
        if open_positions >= self.config.soft.max_open_positions {
            warnings.push("WARNING: maximum positions reached".to_string());
            is_healthy = false;
        } else if open_positions as f64 >= self.config.soft.max_open_positions as f64 * 0.8 {
            warnings.push(format!(
                "WARNING: open positions at {:.0}% of limit",
                open_positions as f64 / self.config.soft.max_open_positions as f64 * 100.0
            ));
        }

        if self.config.soft.max_portfolio_value > Decimal::ZERO {
            let capital_pct = used_capital / self.config.soft.max_portfolio_value;
            if capital_pct >= Decimal::ONE {
                warnings.push("WARNING: portfolio value at or above limit".to_string());
                is_healthy = false;
            } else if capital_pct >= Decimal::new(8, 1) {
                warnings.push(format!("WARNING: capital in use at {:.0}% of limit", capital_pct * Decimal::from(100)));
            }
        }

        RiskMetrics {
            daily_pnl: state.daily_pnl,
            open_positions: state.open_positions.len(),
            max_positions: self.config.soft.max_open_positions as usize,
            used_capital,
            available_capital,
            daily_loss_limit: self.config.soft.max_daily_loss,
            daily_order_count: state.daily_order_count,
            max_daily_orders: self.config.hard.max_daily_orders,
            kill_switch_active: false,
            is_healthy,
            warnings,
        }
    }

    pub async fn stats(&self) -> RiskGateStats {
        self.stats.lock().await.clone()
    }

    /// Manual reset, for tests and emergency operator intervention.
    pub async fn reset_daily_counters(&self) {
        let mut state = self.state.lock().await;
        warn!(previous_pnl = %state.daily_pnl, previous_orders = state.daily_order_count, "manually resetting daily counters");
        state.current_day = Utc::now().date_naive();
        state.daily_pnl = Decimal::ZERO;
        state.daily_order_count = 0;
        state.daily_orders.clear();
    }

    #[cfg(test)]
    async fn set_day_for_test(&self, day: NaiveDate, pnl: Decimal, order_count: u32) {
        let mut state = self.state.lock().await;
        state.current_day = day;
        state.daily_pnl = pnl;
        state.daily_order_count = order_count;
    }
}

/// Lets the Kill Switch observe P&L without depending on the Risk Gate
/// directly. Refreshes from the broker first so the Kill Switch's own
/// monitor tick sees current P&L rather than a stale cached value; a
/// failed refresh falls back to the last known figure.
#[async_trait::async_trait]
impl DailyPnlSource for RiskGate {
    async fn daily_pnl(&self) -> Decimal {
        if let Err(e) = self.update_daily_pnl().await {
            warn!(error = %e, "could not refresh P&L for kill switch monitor");
        }
        self.state.lock().await.daily_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{OrderStatus, OrderType, ProductType, Segment};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct EmptyPortfolio;
    #[async_trait::async_trait]
    impl PortfolioSource for EmptyPortfolio {
        async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
            Ok(Vec::new())
        }
    }

    fn hard_limits() -> HardLimits {
        HardLimits {
            max_single_order_value: dec!(10000),
            max_daily_orders: 15,
            max_portfolio_value: dec!(50000),
            max_daily_loss_hard: dec!(5000),
            allowed_exchanges: vec!["NSE".to_string()],
            forbidden_segments: vec!["FNO".to_string()],
            forbidden_products: vec!["MIS".to_string()],
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(
            RiskGateConfig {
                soft: SoftLimits {
                    max_portfolio_value: dec!(50000),
                    max_position_size: dec!(5000),
                    max_daily_loss: dec!(2000),
                    max_open_positions: 3,
                },
                hard: hard_limits(),
            },
            Arc::new(EmptyPortfolio),
        )
    }

    fn sample_order(symbol: &str, side: OrderSide) -> Order {
        Order {
            order_id: "BRK1".to_string(),
            symbol: symbol.to_string(),
            exchange: "NSE".to_string(),
            quantity: dec!(1),
            price: Some(dec!(100)),
            trigger_price: None,
            side,
            order_type: OrderType::Limit,
            product: ProductType::Cnc,
            segment: Segment::Cash,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: Utc::now(),
            message: None,
        }
    }

    #[tokio::test]
    async fn rejects_order_value_over_hard_limit() {
        let gate = gate();
        let result = gate
            .validate_order("RELIANCE", dec!(100), dec!(500), OrderSide::Buy, "CASH", "CNC")
            .await;
        assert!(!result.approved);
        assert_eq!(result.limit_type.as_deref(), Some("max_single_order_value"));
    }

    #[tokio::test]
    async fn rejects_buy_position_size_over_soft_limit() {
        let gate = gate();
        let result = gate
            .validate_order("RELIANCE", dec!(60), dec!(100), OrderSide::Buy, "CASH", "CNC")
            .await;
        assert!(!result.approved);
        assert_eq!(result.limit_type.as_deref(), Some("max_position_size"));
    }

    #[tokio::test]
    async fn sell_orders_are_exempt_from_position_size_cap() {
        let gate = gate();
        let result = gate
            .validate_order("RELIANCE", dec!(60), dec!(100), OrderSide::Sell, "CASH", "CNC")
            .await;
        assert!(result.approved);
    }

    #[tokio::test]
    async fn rejects_forbidden_segment_and_product() {
        let gate = gate();
        let segment = gate.validate_order("X", dec!(1), dec!(10), OrderSide::Buy, "FNO", "CNC").await;
        assert_eq!(segment.limit_type.as_deref(), Some("forbidden_segment"));

        let product = gate.validate_order("X", dec!(1), dec!(10), OrderSide::Buy, "CASH", "MIS").await;
        assert_eq!(product.limit_type.as_deref(), Some("forbidden_product"));
    }

    #[tokio::test]
    async fn day_rollover_resets_counters_but_keeps_approving() {
        let gate = gate();
        gate.set_day_for_test(Utc::now().date_naive() - Duration::days(1), dec!(-500), 10).await;

        let result = gate.validate_order("X", dec!(1), dec!(10), OrderSide::Buy, "CASH", "CNC").await;
        assert!(result.approved);

        let state = gate.state.lock().await;
        assert_eq!(state.daily_order_count, 0);
        assert_eq!(state.daily_pnl, Decimal::ZERO);
    }

    #[tokio::test]
    async fn record_order_increments_daily_count() {
        let gate = gate();
        gate.record_order(&sample_order("RELIANCE", OrderSide::Buy)).await;
        assert_eq!(gate.state.lock().await.daily_order_count, 1);
    }

    struct HeavyPortfolio;
    #[async_trait::async_trait]
    impl PortfolioSource for HeavyPortfolio {
        async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
            Ok(vec![Position {
                symbol: "RELIANCE".to_string(),
                exchange: "NSE".to_string(),
                product: ProductType::Cnc,
                quantity: dec!(410),
                average_price: dec!(100),
                ltp: None,
                pnl: None,
                pnl_percent: None,
                day_change: None,
                day_change_percent: None,
            }])
        }
    }

    #[tokio::test]
    async fn get_status_warns_at_80_percent_capital_usage() {
        let gate = RiskGate::new(
            RiskGateConfig {
                soft: SoftLimits {
                    max_portfolio_value: dec!(50000),
                    max_position_size: dec!(5000),
                    max_daily_loss: dec!(2000),
                    max_open_positions: 3,
                },
                hard: hard_limits(),
            },
            Arc::new(HeavyPortfolio),
        );

        let metrics = gate.get_status().await;
        assert_eq!(metrics.used_capital, dec!(41000));
        assert!(metrics.is_healthy);
        assert!(metrics.warnings.iter().any(|w| w.contains("capital in use")));
    }

    #[tokio::test]
    async fn stats_report_rejection_reasons_and_approval_rate() {
        let gate = gate();
        let _ = gate.validate_order("X", dec!(100), dec!(500), OrderSide::Buy, "CASH", "CNC").await;
        let _ = gate.validate_order("Y", dec!(1), dec!(10), OrderSide::Buy, "CASH", "CNC").await;

        let stats = gate.stats().await;
        assert_eq!(stats.orders_validated, 2);
        assert_eq!(stats.orders_approved, 1);
        assert_eq!(stats.orders_rejected, 1);
        assert_eq!(stats.rejection_reasons.get("max_single_order_value"), Some(&1));
        assert!((stats.approval_rate() - 0.5).abs() < 1e-9);
    }
}
