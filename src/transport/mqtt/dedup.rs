//! Bounded duplicate suppression for notification ids
//!
//! The backend may redeliver a notification after a reconnect. Ids are kept
//! in insertion order so expiry and capacity eviction both pop from the front.

use crate::config::ConfigError;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
pub struct MessageDeduplicator {
    retention: Option<Duration>,
    max_entries: Option<usize>,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl MessageDeduplicator {
    /// Create a cache bounded by age, by size, or both
    pub fn new(retention: Option<Duration>, max_entries: Option<usize>) -> Result<Self, ConfigError> {
        match (retention, max_entries) {
            (None, None) => Err(ConfigError::InvalidConfig(
                "deduplicator needs a retention window or an entry limit".to_string(),
            )),
            (Some(window), _) if window.is_zero() => Err(ConfigError::InvalidConfig(
                "dedup retention must be greater than 0".to_string(),
            )),
            (_, Some(0)) => Err(ConfigError::InvalidConfig(
                "dedup max_entries must be greater than 0".to_string(),
            )),
            _ => Ok(Self {
                retention,
                max_entries,
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns true the first time `id` is seen within the cache bounds
    pub fn should_process(&mut self, id: &str) -> bool {
        self.should_process_at(id, Instant::now())
    }

    pub fn should_process_at(&mut self, id: &str, now: Instant) -> bool {
        self.evict_expired(now);

        if self.seen.contains_key(id) {
            trace!(notification_id = %id, "Duplicate notification suppressed");
            return false;
        }

        self.seen.insert(id.to_string(), now);
        self.order.push_back((id.to_string(), now));

        if let Some(max_entries) = self.max_entries {
            while self.order.len() > max_entries {
                self.pop_oldest();
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    fn evict_expired(&mut self, now: Instant) {
        let Some(retention) = self.retention else {
            return;
        };

        while let Some((_, seen_at)) = self.order.front() {
            if now.saturating_duration_since(*seen_at) < retention {
                break;
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((id, _)) = self.order.pop_front() {
            self.seen.remove(&id);
        }
    }
}
