// Oasis Gate - Gate (Rate Limiting)
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Every tools/call passes through here before reaching the registry.
// Sliding one-minute window per category. Over the limit -> RATE_LIMIT
// with the number of seconds until the oldest call leaves the window.

use crate::config::RateLimitConfig;
use crate::error::{GateError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// exists, stat, list, read, find, complete
    Read,
    /// write, mkdir, move, delete, open_app
    Mutation,
    /// do_anything
    Agent,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Read => "read",
            Category::Mutation => "mutation",
            Category::Agent => "agent",
        }
    }
}

pub struct RateLimiter {
    enabled: bool,
    limits: HashMap<Category, usize>,
    windows: Mutex<HashMap<Category, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let limits = HashMap::from([
            (Category::Read, config.reads_per_minute),
            (Category::Mutation, config.mutations_per_minute),
            (Category::Agent, config.agent_per_minute),
        ]);
        Self {
            enabled: config.enabled,
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one call, or refuse it if the category is saturated
    pub fn admit(&self, category: Category) -> Result<()> {
        self.admit_at(category, Instant::now())
    }

    fn admit_at(&self, category: Category, now: Instant) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let max = self.limits.get(&category).copied().unwrap_or(usize::MAX);

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(category).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= max {
            let retry_after = window.front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(WINDOW);
            // Round up so a client waiting exactly retryAfter is admitted
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return Err(GateError::RateLimit {
                message: format!(
                    "{} calls in the last minute (max {} for {} tools)",
                    window.len(), max, category.as_str()
                ),
                retry_after_secs: secs.max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(agent: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            agent_per_minute: agent,
            ..Default::default()
        })
    }

    #[test]
    fn refuses_past_limit_with_retry_after() {
        let gate = limiter(2);
        let t0 = Instant::now();
        gate.admit_at(Category::Agent, t0).unwrap();
        gate.admit_at(Category::Agent, t0 + Duration::from_secs(10)).unwrap();

        match gate.admit_at(Category::Agent, t0 + Duration::from_secs(15)) {
            Err(GateError::RateLimit { retry_after_secs, .. }) => assert_eq!(retry_after_secs, 45),
            other => panic!("expected RATE_LIMIT, got {:?}", other),
        }
        // Categories are independent
        gate.admit_at(Category::Read, t0 + Duration::from_secs(15)).unwrap();
    }

    #[test]
    fn window_slides() {
        let gate = limiter(1);
        let t0 = Instant::now();
        gate.admit_at(Category::Agent, t0).unwrap();
        assert!(gate.admit_at(Category::Agent, t0 + Duration::from_secs(59)).is_err());
        gate.admit_at(Category::Agent, t0 + Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn disabled_admits_everything() {
        let gate = RateLimiter::new(&RateLimitConfig { enabled: false, agent_per_minute: 0, ..Default::default() });
        for _ in 0..5 {
            gate.admit(Category::Agent).unwrap();
        }
    }
}
