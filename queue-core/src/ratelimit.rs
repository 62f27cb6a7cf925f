//! Tiered outbound rate limiting (C2).
//!
//! Grounded on `rate_limiter.py`: a global semaphore bounds total concurrent
//! outbound requests for a tenant's tier, and a per-host minimum delay keeps
//! any single target from being hammered. `max_requests_per_minute` is kept
//! on [`TierLimits`] for parity with the original but, like the Python
//! version, is not separately enforced — the semaphore and per-host delay
//! already bound sustained throughput.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub max_concurrent: usize,
    pub min_host_delay: Duration,
    pub max_requests_per_minute: u32,
}

pub fn limits_for_tier(tier: &str) -> TierLimits {
    match tier {
        "pro" => TierLimits {
            max_concurrent: 5,
            min_host_delay: Duration::from_millis(500),
            max_requests_per_minute: 60,
        },
        "enterprise" => TierLimits {
            max_concurrent: 10,
            min_host_delay: Duration::from_millis(250),
            max_requests_per_minute: 120,
        },
        _ => TierLimits {
            max_concurrent: 3,
            min_host_delay: Duration::from_secs(1),
            max_requests_per_minute: 30,
        },
    }
}

/// Per-tenant (really per-tier) rate limiter: one instance is built per
/// in-flight audit job and shared by every fetch that job issues.
pub struct RateLimiter {
    limits: TierLimits,
    semaphore: Semaphore,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn for_tier(tier: &str) -> Arc<Self> {
        let limits = limits_for_tier(tier);
        Arc::new(Self {
            semaphore: Semaphore::new(limits.max_concurrent),
            last_request: Mutex::new(HashMap::new()),
            limits,
        })
    }

    /// Acquire a concurrency slot and wait out any remaining per-host delay
    /// for `host`. The returned permit must be held for the duration of the
    /// request and dropped afterwards to free the slot.
    pub async fn acquire(&self, host: &str) -> SemaphorePermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("rate limiter semaphore is never closed");

        let wait = {
            let mut last_request = self.last_request.lock().await;
            let now = Instant::now();
            let wait = last_request
                .get(host)
                .and_then(|prev| self.limits.min_host_delay.checked_sub(now.duration_since(*prev)));
            last_request.insert(host.to_string(), now);
            wait
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }

        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_limits_match_spec_defaults() {
        assert_eq!(limits_for_tier("basic").max_concurrent, 3);
        assert_eq!(limits_for_tier("pro").max_concurrent, 5);
        assert_eq!(limits_for_tier("enterprise").max_concurrent, 10);
        assert_eq!(
            limits_for_tier("enterprise").min_host_delay,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn unknown_tier_falls_back_to_basic() {
        let limits = limits_for_tier("nonexistent");
        assert_eq!(limits.max_concurrent, 3);
    }

    #[tokio::test]
    async fn second_request_to_same_host_waits_out_delay() {
        let limiter = RateLimiter::for_tier("pro");
        let start = Instant::now();
        {
            let _permit = limiter.acquire("example.com").await;
        }
        {
            let _permit = limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn requests_to_different_hosts_do_not_wait_on_each_other() {
        let limiter = RateLimiter::for_tier("enterprise");
        let start = Instant::now();
        {
            let _a = limiter.acquire("a.example.com").await;
        }
        {
            let _b = limiter.acquire("b.example.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
