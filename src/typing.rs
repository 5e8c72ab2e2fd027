//! Ephemeral typing indicators, one live entry per user per game room.
//!
//! An entry older than the TTL (3 seconds in production) is never shown,
//! even between sweeps; the periodic sweep merely reclaims the memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::time::Clock;

/// A remote user currently typing in a game room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: String,
    pub user_name: String,
    /// Last refresh, Unix milliseconds
    pub timestamp: i64,
}

/// Tracks who is typing in which game room.
pub struct TypingTracker {
    clock: Arc<dyn Clock>,
    ttl_millis: i64,
    /// (game_id, user_id) -> indicator; a refresh supersedes the previous
    /// entry for the same user in the same room
    entries: Mutex<HashMap<(String, String), TypingIndicator>>,
}

impl TypingTracker {
    /// Create an empty tracker whose entries go stale after `ttl`
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl_millis: ttl.as_millis() as i64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record or refresh a typing event from a user in a game room
    pub fn record(&self, game_id: &str, user_id: &str, user_name: &str) {
        let indicator = TypingIndicator {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            timestamp: self.clock.now_millis(),
        };
        let mut entries = self.entries.lock().expect("typing lock poisoned");
        entries.insert((game_id.to_string(), user_id.to_string()), indicator);
    }

    /// Live indicators for a game room, stale entries filtered out
    pub fn active(&self, game_id: &str) -> Vec<TypingIndicator> {
        let cutoff = self.clock.now_millis() - self.ttl_millis;
        let entries = self.entries.lock().expect("typing lock poisoned");
        let mut active: Vec<TypingIndicator> = entries
            .iter()
            .filter(|((room, _), indicator)| room == game_id && indicator.timestamp > cutoff)
            .map(|(_, indicator)| indicator.clone())
            .collect();
        // Stable display order for the UI
        active.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        active
    }

    /// Drop every entry past the TTL; returns the number removed
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now_millis() - self.ttl_millis;
        let mut entries = self.entries.lock().expect("typing lock poisoned");
        let before = entries.len();
        entries.retain(|_, indicator| indicator.timestamp > cutoff);
        before - entries.len()
    }
}
