//! Scenario: a BUY GTT fires the moment LTP falls to or below its
//! trigger price, and the Store records the transition with the
//! triggering order id and the LTP that caused it.

mod common;

use std::sync::Arc;

use rust_decimal_macros::dec;
use tradectl::broker::{BrokerClient, BrokerGateway, HistoricalDataRequest, PlaceOrderRequest};
use tradectl::config::HardLimits;
use tradectl::domain::errors::NetworkError;
use tradectl::domain::types::{GttStatus, OrderSide, OrderType};
use tradectl::gtt::{GttExecutor, GttStore};
use tradectl::kill_switch::{KillSwitch, KillSwitchConfig};
use tradectl::rate_limiter::{RateLimiter, RateLimiterConfig};
use tradectl::risk::{PortfolioSource, RiskGate, RiskGateConfig, SoftLimits};

/// Hands back a fixed fill for any order placed; the executor's only
/// network seam under test.
struct FakeGateway;

#[async_trait::async_trait]
impl BrokerGateway for FakeGateway {
    async fn place_order(&self, _token: &str, req: PlaceOrderRequest) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({"order_id": "BRK-1001", "quantity": req.quantity, "status": "OPEN"}))
    }
    async fn cancel_order(&self, _token: &str, _order_id: &str, _segment: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({}))
    }
    async fn get_order_status(&self, _token: &str, _order_id: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({}))
    }
    async fn get_quote(&self, _token: &str, _symbol: &str, _exchange: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({}))
    }
    async fn get_ltp(&self, _token: &str, _symbol: &str, _exchange: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({"ltp": "2490"}))
    }
    async fn get_ohlc(&self, _token: &str, _symbol: &str, _exchange: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({}))
    }
    async fn get_historical_data(&self, _token: &str, _req: HistoricalDataRequest) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({"candles": []}))
    }
    async fn get_positions(&self, _token: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({"data": []}))
    }
    async fn get_holdings(&self, _token: &str) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::json!({"data": []}))
    }
}

struct EmptyPortfolio;

#[async_trait::async_trait]
impl PortfolioSource for EmptyPortfolio {
    async fn positions(&self) -> Result<Vec<tradectl::domain::types::Position>, tradectl::domain::errors::BrokerError> {
        Ok(vec![])
    }
}

fn hard_limits() -> HardLimits {
    HardLimits {
        max_single_order_value: dec!(1_000_000),
        max_daily_orders: 100,
        max_portfolio_value: dec!(10_000_000),
        max_daily_loss_hard: dec!(500_000),
        allowed_exchanges: vec!["NSE".to_string()],
        forbidden_segments: vec![],
        forbidden_products: vec![],
    }
}

#[tokio::test]
async fn buy_gtt_fires_when_ltp_falls_to_trigger() {
    let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
    let broker = Arc::new(BrokerClient::new(FakeGateway, common::auth_manager(), rate_limiter, hard_limits(), false));

    let risk = Arc::new(RiskGate::new(
        RiskGateConfig {
            soft: SoftLimits {
                max_portfolio_value: dec!(10_000_000),
                max_position_size: dec!(1_000_000),
                max_daily_loss: dec!(100_000),
                max_open_positions: 20,
            },
            hard: hard_limits(),
        },
        Arc::new(EmptyPortfolio),
    ));

    let kill_switch = KillSwitch::new(KillSwitchConfig {
        consecutive_loss_threshold: 5,
        api_error_rate_threshold: 0.5,
        network_timeout_seconds: 30,
        cooldown_minutes: 60,
        approval_code: "TEST_CODE_123".to_string(),
        check_interval_seconds: 30,
        max_daily_loss_hard: dec!(500_000),
    });

    let store = Arc::new(GttStore::new("sqlite::memory:").await.unwrap());
    let gtt = store
        .create(
            "RELIANCE",
            "NSE",
            dec!(2500),
            OrderType::Limit,
            OrderSide::Buy,
            dec!(1),
            Some(dec!(2490)),
            None,
        )
        .await
        .unwrap();

    let executor = GttExecutor::new(Arc::clone(&store), Arc::clone(&broker), Arc::clone(&risk), kill_switch);

    assert!(gtt.should_trigger(dec!(2490)));
    executor.execute_gtt(&gtt, dec!(2490)).await.expect("GTT execution should succeed");

    let stored = store.get(gtt.id).await.unwrap();
    assert_eq!(stored.status, GttStatus::Triggered);
    assert_eq!(stored.order_id.as_deref(), Some("BRK-1001"));
    assert_eq!(stored.trigger_ltp, Some(dec!(2490)));

    assert_eq!(risk.stats().await.orders_approved, 1);
}
