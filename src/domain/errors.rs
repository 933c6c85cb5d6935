use rust_decimal::Decimal;
use thiserror::Error;

/// Authentication failures from the Auth sub-component: missing
/// credentials at construction, or a failed token fetch.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("broker credentials not configured: {0}")]
    MissingCredentials(String),

    #[error("failed to obtain access token: {0}")]
    TokenFetchFailed(String),
}

/// Order/field validation failures. Never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("LIMIT order requires a positive price")]
    MissingLimitPrice,

    #[error("{order_type} order requires a positive trigger price")]
    MissingTriggerPrice { order_type: String },

    #[error("segment '{0}' is forbidden")]
    ForbiddenSegment(String),

    #[error("product '{0}' is forbidden")]
    ForbiddenProduct(String),

    #[error("order value {value} exceeds limit {limit}")]
    OverSingleOrderLimit { value: Decimal, limit: Decimal },
}

/// Broker-side order failure, classified by message substring per
/// spec's error-mapping rule.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("insufficient funds for {symbol}: {message}")]
    InsufficientFunds { symbol: String, message: String },

    #[error("market closed for {symbol}: {message}")]
    MarketClosed { symbol: String, message: String },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded { message: String, retry_after: Option<u64> },

    #[error("order failed for {symbol}: {message}")]
    Generic { symbol: String, message: String },
}

/// Which market-data call failed, for `DataFetchError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Quote,
    Ltp,
    Ohlc,
    Historical,
    Positions,
    Holdings,
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataKind::Quote => "quote",
            DataKind::Ltp => "ltp",
            DataKind::Ohlc => "ohlc",
            DataKind::Historical => "historical",
            DataKind::Positions => "positions",
            DataKind::Holdings => "holdings",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
#[error("failed to fetch {kind}: {message}")]
pub struct DataFetchError {
    pub kind: DataKind,
    pub message: String,
}

/// Network / timeout failures talking to the broker SDK.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network error: {0}")]
    Connection(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

/// Unified error returned by the Broker Client facade's public methods.
/// Composes the sibling taxonomies the way the pipeline needs them,
/// mirroring how a port boundary collapses several internal error enums
/// into one signature.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    DataFetch(#[from] DataFetchError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Kill-switch lockout failure. Carries enough context that a caller can
/// report the active reason without a second round-trip.
#[derive(Debug, Error, Clone)]
#[error("kill switch active: {reason}")]
pub struct KillSwitchActive {
    pub reason: String,
    pub activated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Why `deactivate` was refused.
#[derive(Debug, Error, Clone)]
pub enum KillSwitchDeactivateError {
    #[error("invalid approval code")]
    InvalidApprovalCode,

    #[error("cooldown period not elapsed, wait {remaining_minutes:.1} more minutes")]
    CooldownNotElapsed { remaining_minutes: f64 },
}

/// GTT-specific failures.
#[derive(Debug, Error)]
pub enum GttError {
    #[error("GTT {0} not found")]
    NotFound(i64),

    #[error("GTT {gtt_id} execution failed: {message}")]
    ExecutionError { gtt_id: i64, message: String },

    #[error("only ACTIVE GTTs can be cancelled (GTT {0})")]
    NotActive(i64),

    #[error("can only retry FAILED GTTs, GTT {gtt_id} is {status}")]
    NotRetryable { gtt_id: i64, status: String },

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

/// Schema or hard-limit violations discovered while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("{field} ({value}) exceeds hard limit ({limit})")]
    ExceedsHardLimit {
        field: String,
        value: Decimal,
        limit: Decimal,
    },

    #[error("exchange '{0}' is not in the allowed exchanges list")]
    DisallowedExchange(String),

    #[error("segment '{0}' is forbidden by hard limits")]
    ForbiddenSegment(String),

    #[error("product '{0}' is forbidden by hard limits")]
    ForbiddenProduct(String),

    #[error(
        "FORCE_PAPER_MODE=1 prevents live trading; set FORCE_PAPER_MODE=0 only after \
         extensive testing and approval"
    )]
    LiveModeForcedToPaper,
}
