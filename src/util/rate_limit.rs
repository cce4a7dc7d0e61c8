use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::constants::RATE_LIMIT_WINDOW;

/// Sliding-window request counter keyed by `<endpoint>:<ip>`.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a hit and returns whether it stays within `max_per_window`.
    pub fn check(&self, endpoint: &str, ip: &str, max_per_window: usize) -> bool {
        self.check_at(endpoint, ip, max_per_window, Instant::now())
    }

    fn check_at(&self, endpoint: &str, ip: &str, max_per_window: usize, now: Instant) -> bool {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = hits.entry(format!("{}:{}", endpoint, ip)).or_default();
        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= max_per_window {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Drops keys without hits inside the window.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hits.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
    }
}
