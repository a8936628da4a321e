// Per-group fixed-window rate limiter for pings

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::clock::span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    /// Still inside the window; time left until it closes
    Wait(std::time::Duration),
}

pub struct CooldownGate {
    window: Duration,
    expiries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownGate {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: span(window),
            expiries: Mutex::new(HashMap::new()),
        }
    }

    /// Open a new window for `group` unless one is still running.
    ///
    /// A refused attempt does not extend the running window. Windows that
    /// have closed, for any group, are dropped on the way.
    pub fn try_acquire(&self, group: &str, now: DateTime<Utc>) -> Acquire {
        let mut expiries = self.expiries.lock().unwrap_or_else(|e| e.into_inner());
        expiries.retain(|_, expires_at| *expires_at > now);

        if let Some(expires_at) = expiries.get(group) {
            let remaining = (*expires_at - now).to_std().unwrap_or_default();
            return Acquire::Wait(remaining);
        }

        expiries.insert(group.to_string(), now + self.window);
        Acquire::Acquired
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.expiries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
