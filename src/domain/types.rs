//! Wire-level and persisted data types shared across components: orders,
//! GTTs, broker read models. Mirrors the original source's pydantic
//! models one-for-one, with unknown enum values rejected at the parse
//! boundary rather than allowed to propagate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossMarket => "STOP_LOSS_MARKET",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Cnc,
    Mis,
    Nrml,
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductType::Cnc => "CNC",
            ProductType::Mis => "MIS",
            ProductType::Nrml => "NRML",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Segment {
    Cash,
    Fno,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Segment::Cash => "CASH",
            Segment::Fno => "FNO",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    Completed,
    Cancelled,
    Rejected,
    Failed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// A broker order, created by a risk-validated place call. Status is
/// mutated only by broker status polls; the record is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub exchange: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub product: ProductType,
    pub segment: Segment,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

/// Status-query-specific response shape, distinct from `Order` because
/// the broker's status endpoint returns a few extra fields (pending
/// quantity, validity, exchange timestamp) that a place call does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub symbol: String,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub pending_quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub validity: Option<String>,
    pub product: Option<ProductType>,
    pub exchange: Option<String>,
    pub order_timestamp: Option<DateTime<Utc>>,
    pub exchange_timestamp: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GttStatus {
    Active,
    Triggered,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for GttStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GttStatus::Active => "ACTIVE",
            GttStatus::Triggered => "TRIGGERED",
            GttStatus::Completed => "COMPLETED",
            GttStatus::Cancelled => "CANCELLED",
            GttStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for GttStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(GttStatus::Active),
            "TRIGGERED" => Ok(GttStatus::Triggered),
            "COMPLETED" => Ok(GttStatus::Completed),
            "CANCELLED" => Ok(GttStatus::Cancelled),
            "FAILED" => Ok(GttStatus::Failed),
            other => Err(format!("unknown GTT status: {other}")),
        }
    }
}

/// A durable conditional (Good-Till-Triggered) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gtt {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub trigger_price: Decimal,
    pub order_type: OrderType,
    pub action: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub status: GttStatus,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub error_message: Option<String>,
    pub trigger_ltp: Option<Decimal>,
    pub notes: Option<String>,
}

impl Gtt {
    /// BUY triggers when LTP falls to or below the trigger; SELL
    /// triggers when LTP rises to or above it. Shared by the Monitor and
    /// the Executor's retry path so both agree on the same predicate.
    pub fn should_trigger(&self, ltp: Decimal) -> bool {
        match self.action {
            OrderSide::Buy => ltp <= self.trigger_price,
            OrderSide::Sell => ltp >= self.trigger_price,
        }
    }
}

/// Read-through position snapshot, cached in the Risk Gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: String,
    pub product: ProductType,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub ltp: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub day_change: Option<Decimal>,
    pub day_change_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub exchange: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub ltp: Option<Decimal>,
    pub current_value: Option<Decimal>,
    pub investment_value: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub day_change: Option<Decimal>,
    pub day_change_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub exchange: String,
    pub ltp: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub bid_quantity: Option<Decimal>,
    pub ask_quantity: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ohlc {
    pub symbol: String,
    pub exchange: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalData {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub available_cash: Decimal,
    pub used_margin: Decimal,
    pub available_margin: Option<Decimal>,
    pub total_collateral: Option<Decimal>,
    pub portfolio_value: Option<Decimal>,
    pub total_pnl: Option<Decimal>,
    pub day_pnl: Option<Decimal>,
}

/// Point-in-time view of the Risk Gate, returned by `get_status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub daily_pnl: Decimal,
    pub open_positions: usize,
    pub max_positions: usize,
    pub used_capital: Decimal,
    pub available_capital: Decimal,
    pub daily_loss_limit: Decimal,
    pub daily_order_count: u32,
    pub max_daily_orders: u32,
    pub kill_switch_active: bool,
    pub is_healthy: bool,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtt_buy_triggers_at_or_below_trigger_price() {
        let gtt = sample_gtt(OrderSide::Buy, rust_decimal_macros::dec!(2500));
        assert!(gtt.should_trigger(rust_decimal_macros::dec!(2490)));
        assert!(gtt.should_trigger(rust_decimal_macros::dec!(2500)));
        assert!(!gtt.should_trigger(rust_decimal_macros::dec!(2501)));
    }

    #[test]
    fn gtt_sell_triggers_at_or_above_trigger_price() {
        let gtt = sample_gtt(OrderSide::Sell, rust_decimal_macros::dec!(2500));
        assert!(gtt.should_trigger(rust_decimal_macros::dec!(2510)));
        assert!(gtt.should_trigger(rust_decimal_macros::dec!(2500)));
        assert!(!gtt.should_trigger(rust_decimal_macros::dec!(2499)));
    }

    fn sample_gtt(action: OrderSide, trigger_price: Decimal) -> Gtt {
        Gtt {
            id: 1,
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
            trigger_price,
            order_type: OrderType::Limit,
            action,
            quantity: rust_decimal_macros::dec!(1),
            limit_price: Some(trigger_price),
            status: GttStatus::Active,
            created_at: Utc::now(),
            triggered_at: None,
            completed_at: None,
            order_id: None,
            error_message: None,
            trigger_ltp: None,
            notes: None,
        }
    }
}
