//! The narrow seam between the Broker Client facade and the actual
//! broker SDK/HTTP API. Kept as a trait so the facade's validation,
//! rate-limiting, paper-mode gating, and retry/error-classification
//! logic can be exercised against a fake in tests, the way the teacher
//! separates `ExecutionService` from `AlpacaExecutionService`.

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;
use tracing::debug;

use crate::domain::errors::NetworkError;

/// Builds the shared HTTP client: pooled connections, a 30s timeout, and
/// up to 3 retries with exponential backoff on transient failures.
fn build_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub transaction_type: String,
    pub quantity: String,
    pub order_type: String,
    pub price: Option<String>,
    pub trigger_price: Option<String>,
    pub product: String,
    pub segment: String,
}

#[derive(Debug, Clone)]
pub struct HistoricalDataRequest {
    pub symbol: String,
    pub exchange: String,
    pub from_date: String,
    pub to_date: String,
    pub interval: String,
}

/// Raw, untyped broker responses. Parsing into domain types happens one
/// layer up, in the facade, mirroring the original client's
/// `_parse_*_response` helpers.
#[async_trait::async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn place_order(&self, token: &str, req: PlaceOrderRequest) -> Result<Value, NetworkError>;
    async fn cancel_order(&self, token: &str, order_id: &str, segment: &str) -> Result<Value, NetworkError>;
    async fn get_order_status(&self, token: &str, order_id: &str) -> Result<Value, NetworkError>;
    async fn get_quote(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError>;
    async fn get_ltp(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError>;
    async fn get_ohlc(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError>;
    async fn get_historical_data(&self, token: &str, req: HistoricalDataRequest) -> Result<Value, NetworkError>;
    async fn get_positions(&self, token: &str) -> Result<Value, NetworkError>;
    async fn get_holdings(&self, token: &str) -> Result<Value, NetworkError>;
}

pub struct HttpBrokerGateway {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpBrokerGateway {
    pub fn new(base_url: String) -> Self {
        Self { client: build_client(), base_url }
    }

    async fn get(&self, token: &str, path: &str, query: &[(&str, &str)]) -> Result<Value, NetworkError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "broker gateway GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        Self::parse(response).await
    }

    async fn post(&self, token: &str, path: &str, body: &Value) -> Result<Value, NetworkError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "broker gateway POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        Self::parse(response).await
    }

    async fn delete(&self, token: &str, path: &str, query: &[(&str, &str)]) -> Result<Value, NetworkError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .delete(&url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<Value, NetworkError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(NetworkError::Connection(format!("HTTP {status}: {text}")));
        }

        serde_json::from_str(&text).map_err(|e| NetworkError::Connection(format!("bad JSON: {e}")))
    }
}

#[async_trait::async_trait]
impl BrokerGateway for HttpBrokerGateway {
    async fn place_order(&self, token: &str, req: PlaceOrderRequest) -> Result<Value, NetworkError> {
        let body = serde_json::json!({
            "symbol": req.symbol,
            "exchange": req.exchange,
            "transaction_type": req.transaction_type,
            "quantity": req.quantity,
            "order_type": req.order_type,
            "price": req.price,
            "trigger_price": req.trigger_price,
            "product": req.product,
            "segment": req.segment,
        });
        self.post(token, "/orders", &body).await
    }

    async fn cancel_order(&self, token: &str, order_id: &str, segment: &str) -> Result<Value, NetworkError> {
        self.delete(token, &format!("/orders/{order_id}"), &[("segment", segment)]).await
    }

    async fn get_order_status(&self, token: &str, order_id: &str) -> Result<Value, NetworkError> {
        self.get(token, &format!("/orders/{order_id}"), &[]).await
    }

    async fn get_quote(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError> {
        self.get(token, "/quote", &[("symbol", symbol), ("exchange", exchange)]).await
    }

    async fn get_ltp(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError> {
        self.get(token, "/ltp", &[("symbol", symbol), ("exchange", exchange)]).await
    }

    async fn get_ohlc(&self, token: &str, symbol: &str, exchange: &str) -> Result<Value, NetworkError> {
        self.get(token, "/ohlc", &[("symbol", symbol), ("exchange", exchange)]).await
    }

    async fn get_historical_data(&self, token: &str, req: HistoricalDataRequest) -> Result<Value, NetworkError> {
        self.get(
            token,
            "/historical",
            &[
                ("symbol", req.symbol.as_str()),
                ("exchange", req.exchange.as_str()),
                ("from_date", req.from_date.as_str()),
                ("to_date", req.to_date.as_str()),
                ("interval", req.interval.as_str()),
            ],
        )
        .await
    }

    async fn get_positions(&self, token: &str) -> Result<Value, NetworkError> {
        self.get(token, "/positions", &[]).await
    }

    async fn get_holdings(&self, token: &str) -> Result<Value, NetworkError> {
        self.get(token, "/holdings", &[]).await
    }
}
