//! Sliding-window, multi-category rate limiting (§4.4).
//!
//! Grounded on `enterprise::ratelimit::algorithm`'s sliding-window
//! log/counter approach for the per-bucket admission check, and on
//! `enterprise::cache::lock::FencingToken`'s atomically-coordinated
//! counters for the lock-free burst reserve.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Rate-limit admission category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Ordinary per-agent traffic (heartbeats, queries).
    General,
    /// Room broadcasts.
    Broadcast,
    /// Task claim/release/transition operations.
    TaskOps,
}

/// An agent's coordination role, scaling its effective rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// An ordinary worker agent.
    Worker,
    /// A reviewing agent, granted a higher ceiling for `task_ops`.
    Reviewer,
    /// A coordinating/orchestrating agent, the highest ceiling across categories.
    Coordinator,
}

impl Role {
    fn multiplier(self) -> f64 {
        match self {
            Role::Worker => 1.0,
            Role::Reviewer => 1.5,
            Role::Coordinator => 2.0,
        }
    }
}

/// A flat bonus applied on top of the role multiplier for agents
/// flagged priority, per §4.4.
const PRIORITY_BONUS: f64 = 1.5;

const WINDOW: Duration = Duration::from_secs(60);

fn base_per_minute(category: Category) -> u32 {
    match category {
        Category::General => 60,
        Category::Broadcast => 20,
        Category::TaskOps => 30,
    }
}

/// Per-category sliding-window configuration, exposed for tests and
/// deployments that want non-default ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Extra admissions per minute granted by the burst reserve.
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { burst_capacity: 10 }
    }
}

/// One sliding-window bucket: timestamps of admitted calls within the
/// last 60 seconds.
#[derive(Debug, Default)]
struct Bucket {
    timestamps: VecDeque<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-agent rate-limit state: three sliding-window buckets plus a
/// lock-free burst reserve.
#[derive(Debug)]
pub struct RateLimiter {
    role: Role,
    priority: bool,
    general: Bucket,
    broadcast: Bucket,
    task_ops: Bucket,
    burst_used: AtomicU32,
    last_burst_reset_ms: AtomicI64,
    burst_capacity: u32,
}

impl RateLimiter {
    /// A fresh limiter for an agent with the given role and priority flag.
    pub fn new(role: Role, priority: bool, config: &RateLimitConfig) -> Self {
        Self {
            role,
            priority,
            general: Bucket::default(),
            broadcast: Bucket::default(),
            task_ops: Bucket::default(),
            burst_used: AtomicU32::new(0),
            last_burst_reset_ms: AtomicI64::new(now_ms()),
            burst_capacity: config.burst_capacity,
        }
    }

    fn bucket_mut(&mut self, category: Category) -> &mut Bucket {
        match category {
            Category::General => &mut self.general,
            Category::Broadcast => &mut self.broadcast,
            Category::TaskOps => &mut self.task_ops,
        }
    }

    fn effective_limit(&self, category: Category) -> f64 {
        let mut limit = base_per_minute(category) as f64 * self.role.multiplier();
        if self.priority {
            limit *= PRIORITY_BONUS;
        }
        limit
    }

    fn maybe_reset_burst(&self) {
        let now = now_ms();
        let last = self.last_burst_reset_ms.load(Ordering::Acquire);
        if now - last > 60_000
            && self
                .last_burst_reset_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.burst_used.store(0, Ordering::Release);
        }
    }

    /// Attempt to admit one call in `category`. Returns `true` iff
    /// admitted, consuming one sliding-window slot or one burst unit.
    pub fn admit(&mut self, category: Category) -> bool {
        self.maybe_reset_burst();
        let now = Instant::now();
        let limit = self.effective_limit(category);
        let bucket = self.bucket_mut(category);
        bucket.prune(now);

        if (bucket.timestamps.len() as f64) < limit {
            bucket.timestamps.push_back(now);
            return true;
        }

        let used = self.burst_used.fetch_add(1, Ordering::AcqRel);
        if used < self.burst_capacity {
            bucket.timestamps.push_back(now);
            true
        } else {
            self.burst_used.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    /// Number of burst-reserve admissions consumed since the last reset.
    pub fn burst_used(&self) -> u32 {
        self.burst_used.load(Ordering::Acquire)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_effective_limit_then_falls_to_burst() {
        let config = RateLimitConfig { burst_capacity: 2 };
        let mut limiter = RateLimiter::new(Role::Worker, false, &config);
        // base_per_minute(Broadcast) = 20, multiplier 1.0 => 20 admissions.
        for _ in 0..20 {
            assert!(limiter.admit(Category::Broadcast));
        }
        // Burst reserve covers 2 more.
        assert!(limiter.admit(Category::Broadcast));
        assert!(limiter.admit(Category::Broadcast));
        // Reserve exhausted.
        assert!(!limiter.admit(Category::Broadcast));
    }

    #[test]
    fn priority_and_role_multipliers_compose() {
        let config = RateLimitConfig::default();
        let limiter = RateLimiter::new(Role::Coordinator, true, &config);
        // base 60 * role 2.0 * priority 1.5 = 180.
        assert_eq!(limiter.effective_limit(Category::General), 180.0);
    }

    #[test]
    fn categories_are_independent() {
        let config = RateLimitConfig { burst_capacity: 0 };
        let mut limiter = RateLimiter::new(Role::Worker, false, &config);
        for _ in 0..20 {
            assert!(limiter.admit(Category::Broadcast));
        }
        assert!(!limiter.admit(Category::Broadcast));
        // task_ops bucket is untouched by broadcast exhaustion.
        assert!(limiter.admit(Category::TaskOps));
    }
}
