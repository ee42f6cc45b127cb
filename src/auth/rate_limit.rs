//! Per-client sliding-window rate limiting (§4.G "Rate limiting", §8
//! "Rate-limit window with exactly N requests admits the N-th and rejects
//! the (N+1)-th within the same window").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Window {
    start: Instant,
    count: u32,
}

/// Tracks one sliding window per client id. Guarded by a single mutex,
/// mirroring the Session Server's `clients` + `rate_limit_info` guard (§5).
pub struct RateLimiter {
    window_size: Duration,
    requests_per_minute: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window_size: Duration, requests_per_minute: u32) -> Self {
        Self {
            window_size,
            requests_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh rate-limit record for a newly accepted client.
    pub async fn register(&self, client_id: &str) {
        self.windows.lock().await.insert(
            client_id.to_string(),
            Window {
                start: Instant::now(),
                count: 0,
            },
        );
    }

    pub async fn remove(&self, client_id: &str) {
        self.windows.lock().await.remove(client_id);
    }

    /// Check and, on admission, advance the window's count. A rejected
    /// request does NOT advance the count (§4.G).
    pub async fn check(&self, client_id: &str) -> bool {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(client_id.to_string()).or_insert_with(|| Window {
            start: Instant::now(),
            count: 0,
        });

        let now = Instant::now();
        if now.duration_since(window.start) > self.window_size {
            window.start = now;
            window.count = 0;
        }

        if window.count >= self.requests_per_minute {
            return false;
        }

        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exactly_n_requests_admits_nth_and_rejects_n_plus_one() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        limiter.register("client-1").await;

        assert!(limiter.check("client-1").await);
        assert!(limiter.check("client-1").await);
        assert!(limiter.check("client-1").await);
        assert!(!limiter.check("client-1").await);
    }

    #[tokio::test]
    async fn rejected_request_does_not_advance_count() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.register("client-1").await;

        assert!(limiter.check("client-1").await);
        assert!(!limiter.check("client-1").await);
        assert!(!limiter.check("client-1").await);
    }

    #[tokio::test]
    async fn window_reset_after_elapsed_duration() {
        let limiter = RateLimiter::new(Duration::from_millis(50), 1);
        limiter.register("client-1").await;

        assert!(limiter.check("client-1").await);
        assert!(!limiter.check("client-1").await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check("client-1").await);
    }

    #[tokio::test]
    async fn clients_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.register("a").await;
        limiter.register("b").await;

        assert!(limiter.check("a").await);
        assert!(limiter.check("b").await);
        assert!(!limiter.check("a").await);
    }
}
