//! The Broker Client facade: the single entry point every other
//! component uses to talk to the broker. Owns validation-before-network,
//! the paper-mode gate, rate limiting, and broker error classification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::broker::auth::AuthManager;
use crate::broker::gateway::{BrokerGateway, HistoricalDataRequest, PlaceOrderRequest};
use crate::config::HardLimits;
use crate::domain::errors::{BrokerError, DataFetchError, DataKind, OrderError, ValidationError};
use crate::domain::types::{
    AccountSummary, Candle, Holding, HistoricalData, Ohlc, Order, OrderSide, OrderStatus,
    OrderStatusResponse, OrderType, Position, ProductType, Quote, Segment,
};
use crate::rate_limiter::{Category, RateLimiter};

/// Business-logic retry for broker calls, distinct from the gateway's
/// own HTTP-transient retry middleware: this operator retries a
/// classified, already-parsed `BrokerError`, so it can tell a retryable
/// rate-limit/network hiccup from a validation or auth failure that
/// retrying would never fix. Backs off by `factor` each attempt.
async fn retry_with_backoff<T, F, Fut>(max_attempts: u32, factor: f64, mut op: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrokerError>>,
{
    let mut delay_ms = 500.0_f64;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                warn!(attempt, error = %e, "retrying broker call after transient error");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms as u64)).await;
                delay_ms *= factor;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Only network hiccups and broker-reported rate limiting are worth
/// retrying; validation, auth, and business rejections (insufficient
/// funds, market closed, symbol not found) are never transient.
fn is_retryable(error: &BrokerError) -> bool {
    matches!(
        error,
        BrokerError::Network(_) | BrokerError::Order(OrderError::RateLimitExceeded { .. })
    )
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientStats {
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub quotes_fetched: u64,
    pub api_errors: u64,
    pub paper_mode_orders: u64,
}

pub struct BrokerClient<G: BrokerGateway> {
    gateway: G,
    auth: AuthManager,
    rate_limiter: Arc<RateLimiter>,
    hard_limits: HardLimits,
    paper_mode: bool,
    stats: Mutex<ClientStats>,
}

impl<G: BrokerGateway> BrokerClient<G> {
    pub fn new(
        gateway: G,
        auth: AuthManager,
        rate_limiter: Arc<RateLimiter>,
        hard_limits: HardLimits,
        paper_mode: bool,
    ) -> Self {
        info!(paper_mode, "broker client created");
        Self {
            gateway,
            auth,
            rate_limiter,
            hard_limits,
            paper_mode,
            stats: Mutex::new(ClientStats::default()),
        }
    }

    pub fn is_paper_mode(&self) -> bool {
        self.paper_mode
    }

    pub async fn stats(&self) -> ClientStats {
        *self.stats.lock().await
    }

    fn validate_order_params(
        &self,
        symbol: &str,
        quantity: Decimal,
        order_type: OrderType,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
        product: ProductType,
        segment: Segment,
    ) -> Result<(), ValidationError> {
        if symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }
        if self.hard_limits.forbidden_products.contains(&product.to_string()) {
            return Err(ValidationError::ForbiddenProduct(product.to_string()));
        }
        if self.hard_limits.forbidden_segments.contains(&segment.to_string()) {
            return Err(ValidationError::ForbiddenSegment(segment.to_string()));
        }
        if matches!(order_type, OrderType::Limit) && price.is_none_or(|p| p <= Decimal::ZERO) {
            return Err(ValidationError::MissingLimitPrice);
        }
        if matches!(order_type, OrderType::StopLoss | OrderType::StopLossMarket)
            && trigger_price.is_none_or(|p| p <= Decimal::ZERO)
        {
            return Err(ValidationError::MissingTriggerPrice { order_type: order_type.to_string() });
        }
        Ok(())
    }

    /// Places an order. Paper mode short-circuits before any network
    /// call or rate-limit acquire, per the hard requirement that
    /// simulated orders never touch the broker API.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        symbol: &str,
        exchange: &str,
        side: OrderSide,
        quantity: Decimal,
        order_type: OrderType,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
        product: ProductType,
        segment: Segment,
    ) -> Result<Order, BrokerError> {
        self.validate_order_params(symbol, quantity, order_type, price, trigger_price, product, segment)?;

        let order_value = quantity * price.unwrap_or(Decimal::ZERO);
        if order_value > self.hard_limits.max_single_order_value {
            return Err(ValidationError::OverSingleOrderLimit {
                value: order_value,
                limit: self.hard_limits.max_single_order_value,
            }
            .into());
        }

        if self.paper_mode {
            warn!(symbol, "PAPER MODE: order simulated, not sent to broker");
            self.stats.lock().await.paper_mode_orders += 1;
            return Ok(Order {
                order_id: format!("PAPER_{}_{symbol}", Utc::now().format("%Y%m%d%H%M%S")),
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                quantity,
                price,
                trigger_price,
                side,
                order_type,
                product,
                segment,
                status: OrderStatus::Pending,
                filled_quantity: Decimal::ZERO,
                average_price: None,
                timestamp: Utc::now(),
                message: Some("PAPER MODE - order simulated".to_string()),
            });
        }

        self.rate_limiter.acquire(Category::Orders).await;
        let token = self.auth.get_access_token(false).await?;

        info!(symbol, %side, %quantity, "placing order");
        let result = retry_with_backoff(3, 1.5, || async {
            let req = PlaceOrderRequest {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                transaction_type: side.to_string(),
                quantity: quantity.to_string(),
                order_type: order_type.to_string(),
                price: price.map(|p| p.to_string()),
                trigger_price: trigger_price.map(|p| p.to_string()),
                product: product.to_string(),
                segment: segment.to_string(),
            };
            self.gateway
                .place_order(&token, req)
                .await
                .map_err(|e| classify_order_error(&e.to_string(), symbol).into())
        })
        .await;

        match result {
            Ok(response) => {
                let order = parse_order_response(&response, symbol, exchange, side, order_type, product, segment)?;
                self.stats.lock().await.orders_placed += 1;
                info!(order_id = %order.order_id, symbol, status = %order.status, "order placed");
                Ok(order)
            }
            Err(e) => {
                self.stats.lock().await.api_errors += 1;
                error!(symbol, error = %e, "order placement failed");
                Err(e)
            }
        }
    }

    pub async fn cancel_order(&self, order_id: &str, segment: Segment) -> Result<bool, BrokerError> {
        if self.paper_mode {
            warn!(order_id, "PAPER MODE: cancellation simulated");
            return Ok(true);
        }

        self.rate_limiter.acquire(Category::Orders).await;
        let token = self.auth.get_access_token(false).await?;

        let segment_str = segment.to_string();
        let result = retry_with_backoff(3, 1.5, || async {
            self.gateway.cancel_order(&token, order_id, &segment_str).await.map_err(|e| {
                OrderError::Generic { symbol: order_id.to_string(), message: e.to_string() }.into()
            })
        })
        .await;

        match result {
            Ok(_) => {
                self.stats.lock().await.orders_cancelled += 1;
                info!(order_id, "order cancelled");
                Ok(true)
            }
            Err(e) => {
                self.stats.lock().await.api_errors += 1;
                Err(e)
            }
        }
    }

    pub async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusResponse, BrokerError> {
        if self.paper_mode && order_id.starts_with("PAPER_") {
            debug!(order_id, "PAPER MODE: returning mock order status");
            return Ok(OrderStatusResponse {
                order_id: order_id.to_string(),
                status: OrderStatus::Pending,
                symbol: "UNKNOWN".to_string(),
                quantity: Decimal::ZERO,
                filled_quantity: Decimal::ZERO,
                average_price: None,
                pending_quantity: None,
                price: None,
                trigger_price: None,
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                validity: None,
                product: None,
                exchange: None,
                order_timestamp: None,
                exchange_timestamp: None,
                message: Some("paper mode order".to_string()),
            });
        }

        self.rate_limiter.acquire(Category::NonTrading).await;
        let token = self.auth.get_access_token(false).await?;

        self.gateway
            .get_order_status(&token, order_id)
            .await
            .map_err(|e| {
                OrderError::Generic { symbol: order_id.to_string(), message: e.to_string() }.into()
            })
            .and_then(|response| parse_order_status_response(&response))
    }

    pub async fn get_quote(&self, symbol: &str, exchange: &str) -> Result<Quote, BrokerError> {
        self.rate_limiter.acquire(Category::LiveData).await;
        let token = self.auth.get_access_token(false).await?;

        let response = self.gateway.get_quote(&token, symbol, exchange).await.map_err(|e| {
            DataFetchError { kind: DataKind::Quote, message: e.to_string() }
        })?;
        self.stats.lock().await.quotes_fetched += 1;
        parse_quote_response(&response, symbol, exchange)
    }

    pub async fn get_ltp(&self, symbol: &str, exchange: &str) -> Result<Decimal, BrokerError> {
        self.rate_limiter.acquire(Category::LiveData).await;
        let token = self.auth.get_access_token(false).await?;

        let response = self.gateway.get_ltp(&token, symbol, exchange).await.map_err(|e| {
            DataFetchError { kind: DataKind::Ltp, message: e.to_string() }
        })?;
        let ltp = response
            .get("ltp")
            .and_then(|v| v.as_str().and_then(|s| s.parse::<Decimal>().ok()).or_else(|| v.as_f64().and_then(Decimal::from_f64_retain)))
            .unwrap_or(Decimal::ZERO);
        if ltp <= Decimal::ZERO {
            return Err(DataFetchError { kind: DataKind::Ltp, message: format!("invalid LTP value: {ltp}") }.into());
        }
        Ok(ltp)
    }

    pub async fn get_ohlc(&self, symbol: &str, exchange: &str) -> Result<Ohlc, BrokerError> {
        self.rate_limiter.acquire(Category::NonTrading).await;
        let token = self.auth.get_access_token(false).await?;
        let response = self.gateway.get_ohlc(&token, symbol, exchange).await.map_err(|e| {
            DataFetchError { kind: DataKind::Ohlc, message: e.to_string() }
        })?;
        parse_ohlc_response(&response, symbol, exchange)
    }

    pub async fn get_historical_data(
        &self,
        symbol: &str,
        exchange: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        interval: &str,
    ) -> Result<HistoricalData, BrokerError> {
        self.rate_limiter.acquire(Category::NonTrading).await;
        let token = self.auth.get_access_token(false).await?;

        let req = HistoricalDataRequest {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            from_date: from_date.format("%Y-%m-%d").to_string(),
            to_date: to_date.format("%Y-%m-%d").to_string(),
            interval: interval.to_string(),
        };
        let response = self.gateway.get_historical_data(&token, req).await.map_err(|e| {
            DataFetchError { kind: DataKind::Historical, message: e.to_string() }
        })?;
        parse_historical_data(&response, symbol, exchange, interval, from_date, to_date)
    }

    /// Returns an empty list unconditionally in paper mode: simulated
    /// orders never create real positions.
    pub async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        if self.paper_mode {
            debug!("PAPER MODE: returning empty positions");
            return Ok(Vec::new());
        }
        self.rate_limiter.acquire(Category::NonTrading).await;
        let token = self.auth.get_access_token(false).await?;
        let response = self.gateway.get_positions(&token).await.map_err(|e| {
            DataFetchError { kind: DataKind::Positions, message: e.to_string() }
        })?;
        parse_positions_response(&response)
    }

    pub async fn get_holdings(&self) -> Result<Vec<Holding>, BrokerError> {
        if self.paper_mode {
            debug!("PAPER MODE: returning empty holdings");
            return Ok(Vec::new());
        }
        self.rate_limiter.acquire(Category::NonTrading).await;
        let token = self.auth.get_access_token(false).await?;
        let response = self.gateway.get_holdings(&token).await.map_err(|e| {
            DataFetchError { kind: DataKind::Holdings, message: e.to_string() }
        })?;
        parse_holdings_response(&response)
    }
}

/// Classifies a broker error by message substring, matching the
/// original client's `_handle_order_error`.
fn classify_order_error(message: &str, symbol: &str) -> OrderError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient") || lower.contains("balance") {
        OrderError::InsufficientFunds { symbol: symbol.to_string(), message: message.to_string() }
    } else if lower.contains("market closed") || lower.contains("trading closed") {
        OrderError::MarketClosed { symbol: symbol.to_string(), message: message.to_string() }
    } else if lower.contains("symbol") && lower.contains("not found") {
        OrderError::SymbolNotFound { symbol: symbol.to_string() }
    } else if lower.contains("rate limit") {
        OrderError::RateLimitExceeded { message: message.to_string(), retry_after: None }
    } else {
        OrderError::Generic { symbol: symbol.to_string(), message: message.to_string() }
    }
}

fn dec(value: &serde_json::Value) -> Option<Decimal> {
    value
        .as_str()
        .and_then(|s| s.parse::<Decimal>().ok())
        .or_else(|| value.as_f64().and_then(Decimal::from_f64_retain))
        .or_else(|| value.as_i64().map(Decimal::from))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key).and_then(|x| x.as_str()).unwrap_or_default().to_string()
}

fn parse_order_response(
    response: &serde_json::Value,
    symbol: &str,
    exchange: &str,
    side: OrderSide,
    order_type: OrderType,
    product: ProductType,
    segment: Segment,
) -> Result<Order, BrokerError> {
    Ok(Order {
        order_id: str_field(response, "order_id"),
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        quantity: response.get("quantity").and_then(dec).unwrap_or(Decimal::ZERO),
        price: response.get("price").and_then(dec),
        trigger_price: response.get("trigger_price").and_then(dec),
        side,
        order_type,
        product,
        segment,
        status: OrderStatus::Pending,
        filled_quantity: response.get("filled_quantity").and_then(dec).unwrap_or(Decimal::ZERO),
        average_price: response.get("average_price").and_then(dec),
        timestamp: Utc::now(),
        message: response.get("message").and_then(|x| x.as_str()).map(str::to_string),
    })
}

fn parse_order_status_response(response: &serde_json::Value) -> Result<OrderStatusResponse, BrokerError> {
    let status_str = str_field(response, "status");
    let status = match status_str.as_str() {
        "PENDING" => OrderStatus::Pending,
        "OPEN" => OrderStatus::Open,
        "COMPLETED" => OrderStatus::Completed,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Failed,
    };
    let side = if str_field(response, "transaction_type") == "SELL" { OrderSide::Sell } else { OrderSide::Buy };
    let order_type = match str_field(response, "order_type").as_str() {
        "MARKET" => OrderType::Market,
        "STOP_LOSS" => OrderType::StopLoss,
        "STOP_LOSS_MARKET" => OrderType::StopLossMarket,
        _ => OrderType::Limit,
    };
    Ok(OrderStatusResponse {
        order_id: str_field(response, "order_id"),
        status,
        symbol: str_field(response, "symbol"),
        quantity: response.get("quantity").and_then(dec).unwrap_or(Decimal::ZERO),
        filled_quantity: response.get("filled_quantity").and_then(dec).unwrap_or(Decimal::ZERO),
        average_price: response.get("average_price").and_then(dec),
        pending_quantity: response.get("pending_quantity").and_then(dec),
        price: response.get("price").and_then(dec),
        trigger_price: response.get("trigger_price").and_then(dec),
        side,
        order_type,
        validity: response.get("validity").and_then(|x| x.as_str()).map(str::to_string),
        product: None,
        exchange: response.get("exchange").and_then(|x| x.as_str()).map(str::to_string),
        order_timestamp: None,
        exchange_timestamp: None,
        message: response.get("message").and_then(|x| x.as_str()).map(str::to_string),
    })
}

fn parse_quote_response(response: &serde_json::Value, symbol: &str, exchange: &str) -> Result<Quote, BrokerError> {
    Ok(Quote {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        ltp: response.get("ltp").and_then(dec).unwrap_or(Decimal::ZERO),
        open: response.get("open").and_then(dec),
        high: response.get("high").and_then(dec),
        low: response.get("low").and_then(dec),
        close: response.get("close").and_then(dec),
        volume: response.get("volume").and_then(dec),
        bid: response.get("bid").and_then(dec),
        ask: response.get("ask").and_then(dec),
        bid_quantity: response.get("bid_quantity").and_then(dec),
        ask_quantity: response.get("ask_quantity").and_then(dec),
        change: response.get("change").and_then(dec),
        change_percent: response.get("change_percent").and_then(dec),
        timestamp: Utc::now(),
    })
}

fn parse_ohlc_response(response: &serde_json::Value, symbol: &str, exchange: &str) -> Result<Ohlc, BrokerError> {
    let high = response.get("high").and_then(dec).unwrap_or(Decimal::ZERO);
    let low = response.get("low").and_then(dec).unwrap_or(Decimal::ZERO);
    if high < low {
        return Err(DataFetchError {
            kind: DataKind::Ohlc,
            message: format!("high ({high}) cannot be less than low ({low})"),
        }
        .into());
    }

    Ok(Ohlc {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        open: response.get("open").and_then(dec).unwrap_or(Decimal::ZERO),
        high,
        low,
        close: response.get("close").and_then(dec).unwrap_or(Decimal::ZERO),
        volume: response.get("volume").and_then(dec),
        date: Utc::now(),
    })
}

fn parse_historical_data(
    response: &serde_json::Value,
    symbol: &str,
    exchange: &str,
    interval: &str,
    from_date: DateTime<Utc>,
    to_date: DateTime<Utc>,
) -> Result<HistoricalData, BrokerError> {
    let candles = response
        .get("candles")
        .and_then(|c| c.as_array())
        .map(|arr| {
            arr.iter()
                .map(|c| {
                    let high = c.get("high").and_then(dec).unwrap_or(Decimal::ZERO);
                    let low = c.get("low").and_then(dec).unwrap_or(Decimal::ZERO);
                    if high < low {
                        return Err(DataFetchError {
                            kind: DataKind::Historical,
                            message: format!("high ({high}) cannot be less than low ({low})"),
                        }
                        .into());
                    }
                    Ok(Candle {
                        timestamp: c
                            .get("timestamp")
                            .and_then(|t| t.as_str())
                            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(Utc::now),
                        open: c.get("open").and_then(dec).unwrap_or(Decimal::ZERO),
                        high,
                        low,
                        close: c.get("close").and_then(dec).unwrap_or(Decimal::ZERO),
                        volume: c.get("volume").and_then(dec).unwrap_or(Decimal::ZERO),
                    })
                })
                .collect::<Result<Vec<_>, BrokerError>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(HistoricalData {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        interval: interval.to_string(),
        from_date,
        to_date,
        candles,
    })
}

fn parse_positions_response(response: &serde_json::Value) -> Result<Vec<Position>, BrokerError> {
    let positions = response
        .get("positions")
        .and_then(|p| p.as_array())
        .map(|arr| {
            arr.iter()
                .map(|p| Position {
                    symbol: str_field(p, "symbol"),
                    exchange: str_field(p, "exchange"),
                    product: match str_field(p, "product").as_str() {
                        "MIS" => ProductType::Mis,
                        "NRML" => ProductType::Nrml,
                        _ => ProductType::Cnc,
                    },
                    quantity: p.get("quantity").and_then(dec).unwrap_or(Decimal::ZERO),
                    average_price: p.get("average_price").and_then(dec).unwrap_or(Decimal::ZERO),
                    ltp: p.get("ltp").and_then(dec),
                    pnl: p.get("pnl").and_then(dec),
                    pnl_percent: p.get("pnl_percent").and_then(dec),
                    day_change: p.get("day_change").and_then(dec),
                    day_change_percent: p.get("day_change_percent").and_then(dec),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(positions)
}

fn parse_holdings_response(response: &serde_json::Value) -> Result<Vec<Holding>, BrokerError> {
    let holdings = response
        .get("holdings")
        .and_then(|h| h.as_array())
        .map(|arr| {
            arr.iter()
                .map(|h| Holding {
                    symbol: str_field(h, "symbol"),
                    exchange: str_field(h, "exchange"),
                    quantity: h.get("quantity").and_then(dec).unwrap_or(Decimal::ZERO),
                    average_price: h.get("average_price").and_then(dec).unwrap_or(Decimal::ZERO),
                    ltp: h.get("ltp").and_then(dec),
                    current_value: h.get("current_value").and_then(dec),
                    investment_value: h.get("investment_value").and_then(dec),
                    pnl: h.get("pnl").and_then(dec),
                    pnl_percent: h.get("pnl_percent").and_then(dec),
                    day_change: h.get("day_change").and_then(dec),
                    day_change_percent: h.get("day_change_percent").and_then(dec),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(holdings)
}

/// Converts a broker account snapshot into the facade's read model. Used
/// by callers building a portfolio view on top of positions/holdings.
pub fn account_summary_from_parts(available_cash: Decimal, used_margin: Decimal) -> AccountSummary {
    AccountSummary {
        available_cash,
        used_margin,
        available_margin: None,
        total_collateral: None,
        portfolio_value: None,
        total_pnl: None,
        day_pnl: None,
    }
}

/// Lets the Risk Gate rebuild its open-position mirror without being
/// generic over the gateway type.
#[async_trait::async_trait]
impl<G: BrokerGateway> crate::risk::PortfolioSource for BrokerClient<G> {
    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.get_positions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::auth::TokenIssuer;
    use crate::broker::gateway::HistoricalDataRequest as HistReq;
    use crate::config::HardLimits;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubIssuer;
    #[async_trait::async_trait]
    impl TokenIssuer for StubIssuer {
        async fn issue_token(&self, _k: &str, _s: &str) -> Result<String, crate::domain::errors::AuthError> {
            Ok("stub-token".to_string())
        }
    }

    struct FakeGateway {
        place_calls: AtomicU32,
        fail_with: Option<String>,
    }

    #[async_trait::async_trait]
    impl BrokerGateway for FakeGateway {
        async fn place_order(&self, _t: &str, req: PlaceOrderRequest) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = &self.fail_with {
                return Err(crate::domain::errors::NetworkError::Connection(msg.clone()));
            }
            Ok(serde_json::json!({
                "order_id": "BRK123",
                "quantity": req.quantity,
                "status": "OPEN",
            }))
        }
        async fn cancel_order(&self, _t: &str, _o: &str, _s: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({}))
        }
        async fn get_order_status(&self, _t: &str, _o: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"order_id": "BRK123", "status": "OPEN", "symbol": "RELIANCE"}))
        }
        async fn get_quote(&self, _t: &str, symbol: &str, exchange: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            let _ = (symbol, exchange);
            Ok(serde_json::json!({"ltp": "2500.50"}))
        }
        async fn get_ltp(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"ltp": "2500.50"}))
        }
        async fn get_ohlc(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"open": "1", "high": "2", "low": "0.5", "close": "1.5"}))
        }
        async fn get_historical_data(&self, _t: &str, _r: HistReq) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"candles": []}))
        }
        async fn get_positions(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"positions": []}))
        }
        async fn get_holdings(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
            Ok(serde_json::json!({"holdings": []}))
        }
    }

    fn hard_limits() -> HardLimits {
        HardLimits {
            max_single_order_value: dec!(100000),
            max_daily_orders: 100,
            max_portfolio_value: dec!(1000000),
            max_daily_loss_hard: dec!(50000),
            allowed_exchanges: vec!["NSE".to_string()],
            forbidden_segments: vec![],
            forbidden_products: vec![],
        }
    }

    fn client(paper_mode: bool, fail_with: Option<String>) -> BrokerClient<FakeGateway> {
        let auth = AuthManager::new(Some("k".into()), Some("s".into()), Box::new(StubIssuer)).unwrap();
        let limiter = Arc::new(RateLimiter::new(Default::default()));
        BrokerClient::new(
            FakeGateway { place_calls: AtomicU32::new(0), fail_with },
            auth,
            limiter,
            hard_limits(),
            paper_mode,
        )
    }

    #[tokio::test]
    async fn paper_mode_simulates_without_calling_the_gateway() {
        let client = client(true, None);
        let order = client
            .place_order("RELIANCE", "NSE", OrderSide::Buy, dec!(10), OrderType::Limit, Some(dec!(2500)), None, ProductType::Cnc, Segment::Cash)
            .await
            .unwrap();
        assert!(order.order_id.starts_with("PAPER_"));
        assert_eq!(client.gateway.place_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.stats().await.paper_mode_orders, 1);
    }

    #[tokio::test]
    async fn rejects_order_value_over_hard_limit() {
        let client = client(true, None);
        let err = client
            .place_order("RELIANCE", "NSE", OrderSide::Buy, dec!(1000), OrderType::Limit, Some(dec!(1000)), None, ProductType::Cnc, Segment::Cash)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(ValidationError::OverSingleOrderLimit { .. })));
    }

    #[tokio::test]
    async fn limit_order_without_price_is_rejected() {
        let client = client(true, None);
        let err = client
            .place_order("RELIANCE", "NSE", OrderSide::Buy, dec!(1), OrderType::Limit, None, None, ProductType::Cnc, Segment::Cash)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(ValidationError::MissingLimitPrice)));
    }

    #[tokio::test]
    async fn live_mode_places_through_the_gateway() {
        let client = client(false, None);
        let order = client
            .place_order("RELIANCE", "NSE", OrderSide::Buy, dec!(10), OrderType::Limit, Some(dec!(2500)), None, ProductType::Cnc, Segment::Cash)
            .await
            .unwrap();
        assert_eq!(order.order_id, "BRK123");
        assert_eq!(client.gateway.place_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classifies_insufficient_funds_error() {
        let client = client(false, Some("Insufficient balance in account".to_string()));
        let err = client
            .place_order("RELIANCE", "NSE", OrderSide::Buy, dec!(10), OrderType::Limit, Some(dec!(2500)), None, ProductType::Cnc, Segment::Cash)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Order(OrderError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn positions_and_holdings_are_empty_in_paper_mode() {
        let client = client(true, None);
        assert!(client.get_positions().await.unwrap().is_empty());
        assert!(client.get_holdings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_ohlc_rejects_high_below_low() {
        struct BadOhlcGateway;
        #[async_trait::async_trait]
        impl BrokerGateway for BadOhlcGateway {
            async fn place_order(&self, _t: &str, _r: PlaceOrderRequest) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
                Ok(serde_json::json!({}))
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
                Ok(serde_json::json!({}))
            }
            async fn get_ohlc(&self, _t: &str, _s: &str, _e: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
                Ok(serde_json::json!({"open": "1", "high": "0.5", "low": "2", "close": "1"}))
            }
            async fn get_historical_data(&self, _t: &str, _r: HistReq) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
                Ok(serde_json::json!({"candles": []}))
            }
            async fn get_positions(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
                Ok(serde_json::json!({"positions": []}))
            }
            async fn get_holdings(&self, _t: &str) -> Result<serde_json::Value, crate::domain::errors::NetworkError> {
                Ok(serde_json::json!({"holdings": []}))
            }
        }

        let auth = AuthManager::new(Some("k".into()), Some("s".into()), Box::new(StubIssuer)).unwrap();
        let limiter = Arc::new(RateLimiter::new(Default::default()));
        let client = BrokerClient::new(BadOhlcGateway, auth, limiter, hard_limits(), false);

        let err = client.get_ohlc("RELIANCE", "NSE").await.unwrap_err();
        assert!(matches!(err, BrokerError::DataFetch(DataFetchError { kind: DataKind::Ohlc, .. })));
    }
}
