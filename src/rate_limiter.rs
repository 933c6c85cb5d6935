//! Per-category token-bucket rate limiter protecting broker API quotas.
//!
//! Three independent sliding-window buckets (`orders`, `live_data`,
//! `non_trading`), each guarded by its own lock so contention on one
//! category never stalls another.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Orders,
    LiveData,
    NonTrading,
}

impl Category {
    fn label(self) -> &'static str {
        match self {
            Category::Orders => "orders",
            Category::LiveData => "live_data",
            Category::NonTrading => "non_trading",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BucketStats {
    pub total: u64,
    pub delayed: u64,
}

struct Bucket {
    limit_per_sec: u32,
    history: VecDeque<Instant>,
    stats: BucketStats,
}

impl Bucket {
    fn new(limit_per_sec: u32) -> Self {
        Self {
            limit_per_sec,
            history: VecDeque::new(),
            stats: BucketStats::default(),
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(&front) = self.history.front() {
            if now.duration_since(front) >= WINDOW {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Configured bucket sizes, strictly below broker-side caps.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub orders_per_sec: u32,
    pub live_data_per_sec: u32,
    pub non_trading_per_sec: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            orders_per_sec: 10,
            live_data_per_sec: 8,
            non_trading_per_sec: 15,
        }
    }
}

pub struct RateLimiter {
    orders: Mutex<Bucket>,
    live_data: Mutex<Bucket>,
    non_trading: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            orders: Mutex::new(Bucket::new(config.orders_per_sec)),
            live_data: Mutex::new(Bucket::new(config.live_data_per_sec)),
            non_trading: Mutex::new(Bucket::new(config.non_trading_per_sec)),
        }
    }

    fn bucket(&self, category: Category) -> &Mutex<Bucket> {
        match category {
            Category::Orders => &self.orders,
            Category::LiveData => &self.live_data,
            Category::NonTrading => &self.non_trading,
        }
    }

    /// Blocks the caller until a token is available for `category`.
    /// Never fails the request outright.
    pub async fn acquire(&self, category: Category) {
        let bucket = self.bucket(category);

        loop {
            let wait = {
                let mut guard = bucket.lock().await;
                let now = Instant::now();
                guard.evict_stale(now);

                if guard.history.len() < guard.limit_per_sec as usize {
                    guard.history.push_back(now);
                    guard.stats.total += 1;
                    return;
                }

                let oldest = *guard.history.front().expect("non-empty: len >= limit > 0");
                let deadline = oldest + WINDOW;
                guard.stats.delayed += 1;
                deadline.saturating_duration_since(now)
            };

            debug!(category = category.label(), wait_ms = wait.as_millis() as u64, "rate limiter pacing");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of acquires within the last second for `category`.
    pub async fn current_rate(&self, category: Category) -> usize {
        let mut guard = self.bucket(category).lock().await;
        let now = Instant::now();
        guard.evict_stale(now);
        guard.history.len()
    }

    pub async fn is_near_limit(&self, category: Category, threshold: f64) -> bool {
        let guard = self.bucket(category).lock().await;
        let rate = guard.history.len() as f64;
        rate >= guard.limit_per_sec as f64 * threshold
    }

    pub async fn stats(&self, category: Category) -> BucketStats {
        self.bucket(category).lock().await.stats
    }

    pub async fn reset_stats(&self) {
        for category in [Category::Orders, Category::LiveData, Category::NonTrading] {
            self.bucket(category).lock().await.stats = BucketStats::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_freely_under_the_limit() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            orders_per_sec: 10,
            ..RateLimiterConfig::default()
        });

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(Category::Orders).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.current_rate(Category::Orders).await, 5);
    }

    #[tokio::test]
    async fn paces_the_11th_and_12th_acquire_past_one_second() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            orders_per_sec: 10,
            ..RateLimiterConfig::default()
        });

        let start = Instant::now();
        for _ in 0..12 {
            limiter.acquire(Category::Orders).await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "elapsed={elapsed:?}");

        let stats = limiter.stats(Category::Orders).await;
        assert_eq!(stats.total, 12);
        assert!(stats.delayed >= 2);
    }

    #[tokio::test]
    async fn categories_do_not_contend_with_each_other() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            orders_per_sec: 1,
            live_data_per_sec: 10,
            non_trading_per_sec: 10,
        });

        limiter.acquire(Category::Orders).await;

        let start = Instant::now();
        limiter.acquire(Category::LiveData).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn is_near_limit_reports_at_configured_threshold() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            orders_per_sec: 10,
            ..RateLimiterConfig::default()
        });

        for _ in 0..8 {
            limiter.acquire(Category::Orders).await;
        }
        assert!(limiter.is_near_limit(Category::Orders, 0.8).await);
    }
}
