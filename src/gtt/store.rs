//! GTT Store: durable persistence for conditional orders, backed by
//! SQLite. Schema and connection setup mirror the teacher's own
//! `Database` wrapper; transition semantics mirror the original
//! `gtt/storage.py`.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::domain::errors::GttError;
use crate::domain::types::{Gtt, GttStatus, OrderSide, OrderType};

#[derive(Debug, Clone, Default)]
pub struct GttStatistics {
    pub active: u32,
    pub triggered: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub failed: u32,
    pub created_last_24h: u32,
    pub triggered_last_24h: u32,
    pub success_rate: f64,
}

pub struct GttStore {
    pool: SqlitePool,
}

impl GttStore {
    pub async fn new(db_url: &str) -> Result<Self, GttError> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = std::path::Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        GttError::Storage(sqlx::Error::Io(e))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(GttError::Storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init(&self) -> Result<(), GttError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gtt_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                trigger_price TEXT NOT NULL,
                order_type TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity TEXT NOT NULL,
                limit_price TEXT,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at TEXT NOT NULL,
                triggered_at TEXT,
                completed_at TEXT,
                order_id TEXT,
                error_message TEXT,
                trigger_ltp TEXT,
                notes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gtt_status ON gtt_orders (status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gtt_symbol ON gtt_orders (symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gtt_created_at ON gtt_orders (created_at)")
            .execute(&self.pool)
            .await?;

        info!("GTT store schema initialized");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        symbol: &str,
        exchange: &str,
        trigger_price: Decimal,
        order_type: OrderType,
        action: OrderSide,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        notes: Option<String>,
    ) -> Result<Gtt, GttError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO gtt_orders
                (symbol, exchange, trigger_price, order_type, action, quantity, limit_price, status, created_at, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?, ?)
            RETURNING id
            "#,
        )
        .bind(symbol)
        .bind(exchange)
        .bind(trigger_price.to_string())
        .bind(order_type.to_string())
        .bind(action.to_string())
        .bind(quantity.to_string())
        .bind(limit_price.map(|p| p.to_string()))
        .bind(now.to_rfc3339())
        .bind(&notes)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        info!(gtt_id = id, symbol, %trigger_price, "GTT created");

        Ok(Gtt {
            id,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            trigger_price,
            order_type,
            action,
            quantity,
            limit_price,
            status: GttStatus::Active,
            created_at: now,
            triggered_at: None,
            completed_at: None,
            order_id: None,
            error_message: None,
            trigger_ltp: None,
            notes,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Gtt, GttError> {
        let row = sqlx::query("SELECT * FROM gtt_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GttError::NotFound(id))?;
        row_to_gtt(&row)
    }

    /// Active GTTs, oldest first so the Monitor processes fairly across
    /// long-running and newly-created orders alike.
    pub async fn get_active(&self) -> Result<Vec<Gtt>, GttError> {
        let rows = sqlx::query("SELECT * FROM gtt_orders WHERE status = 'ACTIVE' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_gtt).collect()
    }

    pub async fn get_by_symbol(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        status: Option<GttStatus>,
    ) -> Result<Vec<Gtt>, GttError> {
        let rows = match (exchange, status) {
            (Some(exchange), Some(status)) => {
                sqlx::query(
                    "SELECT * FROM gtt_orders WHERE symbol = ? AND exchange = ? AND status = ? ORDER BY created_at ASC",
                )
                .bind(symbol)
                .bind(exchange)
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            (Some(exchange), None) => {
                sqlx::query("SELECT * FROM gtt_orders WHERE symbol = ? AND exchange = ? ORDER BY created_at ASC")
                    .bind(symbol)
                    .bind(exchange)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(status)) => {
                sqlx::query("SELECT * FROM gtt_orders WHERE symbol = ? AND status = ? ORDER BY created_at ASC")
                    .bind(symbol)
                    .bind(status.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query("SELECT * FROM gtt_orders WHERE symbol = ? ORDER BY created_at ASC")
                    .bind(symbol)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_gtt).collect()
    }

    pub async fn get_all(&self, status: Option<GttStatus>, limit: Option<i64>) -> Result<Vec<Gtt>, GttError> {
        let limit = limit.unwrap_or(100);
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM gtt_orders WHERE status = ? ORDER BY created_at DESC LIMIT ?")
                    .bind(status.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM gtt_orders ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_gtt).collect()
    }

    /// Updates status and, depending on the transition, the matching
    /// timestamp: entering TRIGGERED stamps `triggered_at`; entering any
    /// terminal status (COMPLETED/FAILED/CANCELLED) stamps
    /// `completed_at`.
    pub async fn update_status(
        &self,
        id: i64,
        status: GttStatus,
        order_id: Option<&str>,
        error_message: Option<&str>,
        trigger_ltp: Option<Decimal>,
    ) -> Result<Gtt, GttError> {
        let now = Utc::now().to_rfc3339();

        let triggered_at = matches!(status, GttStatus::Triggered).then(|| now.clone());
        let completed_at =
            matches!(status, GttStatus::Completed | GttStatus::Failed | GttStatus::Cancelled)
                .then(|| now.clone());

        let result = sqlx::query(
            r#"
            UPDATE gtt_orders SET
                status = ?,
                order_id = COALESCE(?, order_id),
                error_message = COALESCE(?, error_message),
                trigger_ltp = COALESCE(?, trigger_ltp),
                triggered_at = COALESCE(?, triggered_at),
                completed_at = COALESCE(?, completed_at)
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(order_id)
        .bind(error_message)
        .bind(trigger_ltp.map(|v| v.to_string()))
        .bind(triggered_at)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GttError::NotFound(id));
        }

        info!(gtt_id = id, new_status = %status, "GTT status updated");
        self.get(id).await
    }

    /// Cancels an ACTIVE GTT; anything else is not retryable through
    /// cancellation.
    pub async fn cancel(&self, id: i64) -> Result<Gtt, GttError> {
        let gtt = self.get(id).await?;
        if gtt.status != GttStatus::Active {
            return Err(GttError::NotActive(id));
        }
        self.update_status(id, GttStatus::Cancelled, None, None, None).await
    }

    /// Permanent removal. Test-only: production code cancels rather
    /// than deletes, preserving the audit trail.
    #[cfg(test)]
    pub async fn delete(&self, id: i64) -> Result<(), GttError> {
        let result = sqlx::query("DELETE FROM gtt_orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GttError::NotFound(id));
        }
        Ok(())
    }

    pub async fn statistics(&self) -> Result<GttStatistics, GttError> {
        let mut stats = GttStatistics::default();

        let rows = sqlx::query("SELECT status, COUNT(*) as count FROM gtt_orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match status.as_str() {
                "ACTIVE" => stats.active = count as u32,
                "TRIGGERED" => stats.triggered = count as u32,
                "COMPLETED" => stats.completed = count as u32,
                "CANCELLED" => stats.cancelled = count as u32,
                "FAILED" => stats.failed = count as u32,
                _ => {}
            }
        }

        let cutoff = (Utc::now() - Duration::hours(24)).to_rfc3339();

        let created_row = sqlx::query("SELECT COUNT(*) as count FROM gtt_orders WHERE created_at >= ?")
            .bind(&cutoff)
            .fetch_one(&self.pool)
            .await?;
        stats.created_last_24h = created_row.try_get::<i64, _>("count")? as u32;

        let triggered_row = sqlx::query(
            "SELECT COUNT(*) as count FROM gtt_orders WHERE triggered_at IS NOT NULL AND triggered_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;
        stats.triggered_last_24h = triggered_row.try_get::<i64, _>("count")? as u32;

        let total_triggered = stats.completed + stats.failed + stats.triggered;
        stats.success_rate = if total_triggered == 0 {
            0.0
        } else {
            stats.completed as f64 / total_triggered as f64
        };

        Ok(stats)
    }
}

fn row_to_gtt(row: &sqlx::sqlite::SqliteRow) -> Result<Gtt, GttError> {
    let trigger_price: String = row.try_get("trigger_price")?;
    let quantity: String = row.try_get("quantity")?;
    let limit_price: Option<String> = row.try_get("limit_price")?;
    let trigger_ltp: Option<String> = row.try_get("trigger_ltp")?;
    let order_type: String = row.try_get("order_type")?;
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let triggered_at: Option<String> = row.try_get("triggered_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Gtt {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        exchange: row.try_get("exchange")?,
        trigger_price: trigger_price.parse().map_err(|_| {
            GttError::Storage(sqlx::Error::Decode("bad trigger_price".into()))
        })?,
        order_type: parse_order_type(&order_type)?,
        action: parse_side(&action)?,
        quantity: quantity
            .parse()
            .map_err(|_| GttError::Storage(sqlx::Error::Decode("bad quantity".into())))?,
        limit_price: limit_price
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| GttError::Storage(sqlx::Error::Decode("bad limit_price".into())))?,
        status: status
            .parse()
            .map_err(|e: String| GttError::Storage(sqlx::Error::Decode(e.into())))?,
        created_at: parse_datetime(&created_at)?,
        triggered_at: triggered_at.map(|v| parse_datetime(&v)).transpose()?,
        completed_at: completed_at.map(|v| parse_datetime(&v)).transpose()?,
        order_id: row.try_get("order_id")?,
        error_message: row.try_get("error_message")?,
        trigger_ltp: trigger_ltp
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| GttError::Storage(sqlx::Error::Decode("bad trigger_ltp".into())))?,
        notes: row.try_get("notes")?,
    })
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, GttError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GttError::Storage(sqlx::Error::Decode(e.into())))
}

fn parse_order_type(raw: &str) -> Result<OrderType, GttError> {
    match raw {
        "LIMIT" => Ok(OrderType::Limit),
        "MARKET" => Ok(OrderType::Market),
        "STOP_LOSS" => Ok(OrderType::StopLoss),
        "STOP_LOSS_MARKET" => Ok(OrderType::StopLossMarket),
        other => Err(GttError::Storage(sqlx::Error::Decode(format!("unknown order_type: {other}").into()))),
    }
}

fn parse_side(raw: &str) -> Result<OrderSide, GttError> {
    match raw {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(GttError::Storage(sqlx::Error::Decode(format!("unknown side: {other}").into()))),
    }
}
