use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Operators ==============

/// Operators are the only users allowed to build links and broadcast.
pub fn is_operator(user_id: Option<UserId>, operators: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    operators.contains(&user_id.0)
}

// ============== Link-open limiter (token bucket) ==============

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-recipient token bucket guarding `/start <token>` deliveries.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = f64::from(max_tokens.max(1));
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed;
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        RateDecision::Limited {
            retry_after: Duration::from_secs_f64(secs.max(0.0)),
        }
    }

    /// Drop buckets that have refilled completely; they carry no state.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.buckets.len();
        let (max, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
        before - self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_check() {
        assert!(!is_operator(None, &[1]));
        assert!(!is_operator(Some(UserId(1)), &[]));
        assert!(is_operator(Some(UserId(1)), &[2, 1]));
        assert!(!is_operator(Some(UserId(3)), &[2, 1]));
    }

    #[test]
    fn limiter_refills_over_the_window() {
        let mut rl = RateLimiter::new(true, 2, Duration::from_secs(10));
        let u = UserId(7);
        let start = Instant::now();

        assert!(rl.check_at(u, start).is_allowed());
        assert!(rl.check_at(u, start).is_allowed());
        let RateDecision::Limited { retry_after } = rl.check_at(u, start) else {
            panic!("expected limited");
        };
        assert!(retry_after <= Duration::from_secs(5));

        // 2 tokens / 10s: one token back after 5s.
        assert!(rl.check_at(u, start + Duration::from_secs(5)).is_allowed());
        assert!(rl.check_at(UserId(8), start).is_allowed());
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut rl = RateLimiter::new(false, 1, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            assert!(rl.check_at(UserId(1), start).is_allowed());
        }
    }

    #[test]
    fn prune_drops_refilled_buckets() {
        let mut rl = RateLimiter::new(true, 1, Duration::from_secs(10));
        let start = Instant::now();
        rl.check_at(UserId(1), start);
        assert_eq!(rl.prune(start), 0);
        assert_eq!(rl.prune(start + Duration::from_secs(11)), 1);
    }
}
