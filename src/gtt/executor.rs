//! GTT Executor: the five-step pipeline a triggered conditional order
//! runs through. Grounded in the original `gtt/executor.py` -
//! kill-switch guard, risk validation, always-CNC/CASH placement, status
//! update, then risk recording - with every failure mode landing the
//! GTT in FAILED rather than leaving it stuck ACTIVE or silently lost.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::broker::gateway::BrokerGateway;
use crate::broker::client::BrokerClient;
use crate::domain::errors::GttError;
use crate::domain::types::{Gtt, GttStatus, OrderSide, OrderType, ProductType, Segment};
use crate::gtt::store::GttStore;
use crate::kill_switch::KillSwitch;
use crate::risk::RiskGate;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutorStats {
    pub executions_attempted: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub risk_rejections: u64,
    pub kill_switch_blocks: u64,
}

impl ExecutorStats {
    pub fn success_rate(&self) -> f64 {
        if self.executions_attempted == 0 {
            0.0
        } else {
            self.executions_succeeded as f64 / self.executions_attempted as f64
        }
    }
}

pub struct GttExecutor<G: BrokerGateway> {
    store: Arc<GttStore>,
    broker: Arc<BrokerClient<G>>,
    risk: Arc<RiskGate>,
    kill_switch: Arc<KillSwitch>,
    stats: tokio::sync::Mutex<ExecutorStats>,
}

impl<G: BrokerGateway> GttExecutor<G> {
    pub fn new(
        store: Arc<GttStore>,
        broker: Arc<BrokerClient<G>>,
        risk: Arc<RiskGate>,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        Self { store, broker, risk, kill_switch, stats: tokio::sync::Mutex::new(ExecutorStats::default()) }
    }

    /// Executes a triggered GTT at `current_price`. Never panics and
    /// never leaves the GTT ACTIVE once this is called: every exit path
    /// either places the order (TRIGGERED) or marks FAILED.
    pub async fn execute_gtt(&self, gtt: &Gtt, current_price: Decimal) -> Result<(), GttError> {
        self.stats.lock().await.executions_attempted += 1;
        info!(gtt_id = gtt.id, symbol = %gtt.symbol, %current_price, "executing GTT");

        if let Err(blocked) = self.kill_switch.check_before_order().await {
            self.stats.lock().await.kill_switch_blocks += 1;
            let message = format!("kill switch active: {}", blocked.reason);
            self.fail(gtt.id, &message).await;
            return Err(GttError::ExecutionError { gtt_id: gtt.id, message });
        }

        // LIMIT GTTs validate against their limit price; everything else
        // validates against the price that actually triggered them.
        let validate_price = match gtt.order_type {
            OrderType::Limit => gtt.limit_price.unwrap_or(current_price),
            _ => current_price,
        };

        let validation = self
            .risk
            .validate_order(&gtt.symbol, gtt.quantity, validate_price, gtt.action, "CASH", "CNC")
            .await;

        if !validation.approved {
            self.stats.lock().await.risk_rejections += 1;
            let message = format!(
                "risk rejected: {}",
                validation.reason.unwrap_or_else(|| "unknown reason".to_string())
            );
            self.fail(gtt.id, &message).await;
            return Err(GttError::ExecutionError { gtt_id: gtt.id, message });
        }

        let price = match gtt.order_type {
            OrderType::Limit => gtt.limit_price,
            _ => None,
        };

        match self
            .broker
            .place_order(
                &gtt.symbol,
                &gtt.exchange,
                gtt.action,
                gtt.quantity,
                gtt.order_type,
                price,
                None,
                ProductType::Cnc,
                Segment::Cash,
            )
            .await
        {
            Ok(order) => {
                if let Err(e) = self
                    .store
                    .update_status(gtt.id, GttStatus::Triggered, Some(&order.order_id), None, Some(current_price))
                    .await
                {
                    error!(gtt_id = gtt.id, error = %e, "failed to record GTT trigger after placement");
                    return Err(e);
                }
                self.risk.record_order(&order).await;
                self.stats.lock().await.executions_succeeded += 1;
                info!(gtt_id = gtt.id, order_id = %order.order_id, "GTT triggered and order placed");
                Ok(())
            }
            Err(e) => {
                let message = format!("order placement failed: {e}");
                self.fail(gtt.id, &message).await;
                Err(GttError::ExecutionError { gtt_id: gtt.id, message })
            }
        }
    }

    async fn fail(&self, gtt_id: i64, message: &str) {
        self.stats.lock().await.executions_failed += 1;
        warn!(gtt_id, message, "GTT execution failed");
        if let Err(e) = self.store.update_status(gtt_id, GttStatus::Failed, None, Some(message), None).await {
            error!(gtt_id, error = %e, "failed to mark GTT as FAILED after execution failure");
        }
    }

    /// Resets a FAILED GTT back to ACTIVE and re-checks the trigger
    /// condition against the current price. If the condition is no
    /// longer met the GTT is left ACTIVE to wait for the next monitor
    /// tick rather than re-executed immediately.
    pub async fn retry_failed_gtt(&self, gtt_id: i64, current_price: Decimal) -> Result<(), GttError> {
        let gtt = self.store.get(gtt_id).await?;
        if gtt.status != GttStatus::Failed {
            return Err(GttError::NotRetryable { gtt_id, status: gtt.status.to_string() });
        }

        let reactivated = self.store.update_status(gtt_id, GttStatus::Active, None, None, None).await?;
        info!(gtt_id, "GTT reset to ACTIVE for retry");

        if reactivated.should_trigger(current_price) {
            self.execute_gtt(&reactivated, current_price).await
        } else {
            info!(gtt_id, %current_price, trigger_price = %reactivated.trigger_price, "retrigger condition not met, GTT remains ACTIVE");
            Ok(())
        }
    }

    pub async fn stats(&self) -> ExecutorStats {
        *self.stats.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::auth::{AuthManager, TokenIssuer};
    use crate::config::HardLimits;
    use crate::kill_switch::KillSwitchConfig;
    use crate::rate_limiter::RateLimiter;
    use crate::risk::{PortfolioSource, RiskGateConfig, SoftLimits};
    use rust_decimal_macros::dec;

    struct StubIssuer;
    #[async_trait::async_trait]
    impl TokenIssuer for StubIssuer {
        async fn issue_token(&self, _k: &str, _s: &str) -> Result<String, crate::domain::errors::AuthError> {
            Ok("tok".to_string())
        }
    }

    struct FakeGateway {
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl BrokerGateway for FakeGateway {
        async fn place_order(
            &self,
            _t: &str,
            req: crate::broker::gateway::PlaceOrderRequest,
        ) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            if self.should_fail {
                return Err(crate::domain::errors::NetworkError::Connection("down".to_string()));
            }
            Ok(serde_json::json!({"order_id": "BRK1", "quantity": req.quantity, "status": "OPEN"}))
        }
        async fn cancel_order(&self, _t: &str, _o: &str, _s: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({}))
        }
        async fn get_order_status(&self, _t: &str, _o: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({}))
        }
        async fn get_quote(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({}))
        }
        async fn get_ltp(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"ltp": "100"}))
        }
        async fn get_ohlc(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({}))
        }
        async fn get_historical_data(
            &self,
            _t: &str,
            _r: crate::broker::gateway::HistoricalDataRequest,
        ) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"candles": []}))
        }
        async fn get_positions(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"positions": []}))
        }
        async fn get_holdings(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"holdings": []}))
        }
    }

    struct EmptyPortfolio;
    #[async_trait::async_trait]
    impl PortfolioSource for EmptyPortfolio {
        async fn positions(&self) -> Result<Vec<crate::domain::types::Position>, crate::domain::errors::BrokerError> {
            Ok(Vec::new())
        }
    }

    fn hard_limits() -> HardLimits {
        HardLimits {
            max_single_order_value: dec!(1000000),
            max_daily_orders: 100,
            max_portfolio_value: dec!(1000000),
            max_daily_loss_hard: dec!(100000),
            allowed_exchanges: vec!["NSE".to_string()],
            forbidden_segments: vec![],
            forbidden_products: vec![],
        }
    }

    async fn harness(gateway_fails: bool) -> (Arc<GttStore>, GttExecutor<FakeGateway>) {
        let store = Arc::new(GttStore::new("sqlite::memory:").await.unwrap());
        let auth = AuthManager::new(Some("k".into()), Some("s".into()), Box::new(StubIssuer)).unwrap();
        let broker = Arc::new(BrokerClient::new(
            FakeGateway { should_fail: gateway_fails },
            auth,
            Arc::new(RateLimiter::new(Default::default())),
            hard_limits(),
            false,
        ));
        let risk = Arc::new(RiskGate::new(
            RiskGateConfig {
                soft: SoftLimits {
                    max_portfolio_value: dec!(1000000),
                    max_position_size: dec!(1000000),
                    max_daily_loss: dec!(100000),
                    max_open_positions: 10,
                },
                hard: hard_limits(),
            },
            Arc::new(EmptyPortfolio),
        ));
        let kill_switch = KillSwitch::new(KillSwitchConfig {
            consecutive_loss_threshold: 5,
            api_error_rate_threshold: 0.3,
            network_timeout_seconds: 60,
            cooldown_minutes: 30,
            approval_code: "CODE".to_string(),
            check_interval_seconds: 30,
            max_daily_loss_hard: dec!(100000),
        });
        let executor = GttExecutor::new(Arc::clone(&store), broker, risk, kill_switch);
        (store, executor)
    }

    fn sample_gtt(id: i64) -> Gtt {
        Gtt {
            id,
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
            trigger_price: dec!(100),
            order_type: OrderType::Market,
            action: OrderSide::Buy,
            quantity: dec!(1),
            limit_price: None,
            status: GttStatus::Active,
            created_at: chrono::Utc::now(),
            triggered_at: None,
            completed_at: None,
            order_id: None,
            error_message: None,
            trigger_ltp: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn successful_execution_marks_triggered_and_records_order() {
        let (store, executor) = harness(false).await;
        let gtt = store
            .create("RELIANCE", "NSE", dec!(100), OrderType::Market, OrderSide::Buy, dec!(1), None, None)
            .await
            .unwrap();

        executor.execute_gtt(&gtt, dec!(99)).await.unwrap();

        let updated = store.get(gtt.id).await.unwrap();
        assert_eq!(updated.status, GttStatus::Triggered);
        assert_eq!(updated.order_id.as_deref(), Some("BRK1"));
        assert_eq!(executor.stats().await.executions_succeeded, 1);
    }

    #[tokio::test]
    async fn broker_failure_marks_gtt_failed() {
        let (store, executor) = harness(true).await;
        let gtt = store
            .create("RELIANCE", "NSE", dec!(100), OrderType::Market, OrderSide::Buy, dec!(1), None, None)
            .await
            .unwrap();

        let err = executor.execute_gtt(&gtt, dec!(99)).await.unwrap_err();
        assert!(matches!(err, GttError::ExecutionError { .. }));

        let updated = store.get(gtt.id).await.unwrap();
        assert_eq!(updated.status, GttStatus::Failed);
        assert_eq!(executor.stats().await.executions_failed, 1);
    }

    #[tokio::test]
    async fn retry_failed_gtt_requires_failed_status() {
        let (store, executor) = harness(false).await;
        let gtt = store
            .create("RELIANCE", "NSE", dec!(100), OrderType::Market, OrderSide::Buy, dec!(1), None, None)
            .await
            .unwrap();

        let err = executor.retry_failed_gtt(gtt.id, dec!(99)).await.unwrap_err();
        assert!(matches!(err, GttError::NotRetryable { .. }));
    }

    #[tokio::test]
    async fn retry_failed_gtt_stays_active_if_condition_no_longer_met() {
        let (store, executor) = harness(true).await;
        let gtt = store
            .create("RELIANCE", "NSE", dec!(100), OrderType::Market, OrderSide::Buy, dec!(1), None, None)
            .await
            .unwrap();
        // Force it into FAILED first.
        let _ = executor.execute_gtt(&gtt, dec!(99)).await;

        // Price has since risen above the BUY trigger: condition no
        // longer met, so retry leaves it ACTIVE rather than firing.
        executor.retry_failed_gtt(gtt.id, dec!(150)).await.unwrap();

        let updated = store.get(gtt.id).await.unwrap();
        assert_eq!(updated.status, GttStatus::Active);
    }
}
