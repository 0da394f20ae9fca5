use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

/// Deadlines after which a row's "just raised a hand" status is dropped.
///
/// The raised-hand rating itself is untouched; only the transient status
/// text expires. One shared timer serves all rows: the owner sleeps until
/// [`RaisedHandExpiry::next_deadline`] and then calls
/// [`RaisedHandExpiry::take_expired`].
#[derive(Debug, Clone)]
pub struct RaisedHandExpiry {
    remove_at: BTreeMap<String, Instant>,
    duration: Duration,
}

impl RaisedHandExpiry {
    pub fn new(duration: Duration) -> Self {
        Self {
            remove_at: BTreeMap::new(),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Schedule or push back the expiry for `peer`. Returns the new deadline.
    pub fn schedule(&mut self, peer: &str, now: Instant) -> Instant {
        let when = now + self.duration;
        match self.remove_at.get_mut(peer) {
            Some(existing) => *existing = when,
            None => {
                self.remove_at.insert(peer.to_string(), when);
            }
        }
        when
    }

    pub fn cancel(&mut self, peer: &str) -> bool {
        self.remove_at.remove(peer).is_some()
    }

    pub fn is_pending(&self, peer: &str) -> bool {
        self.remove_at.contains_key(peer)
    }

    pub fn deadline(&self, peer: &str) -> Option<Instant> {
        self.remove_at.get(peer).copied()
    }

    /// When the shared timer should fire next, if anything is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.remove_at.values().min().copied()
    }

    /// Remove and return every entry whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .remove_at
            .iter()
            .filter(|(_, when)| **when <= now)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            self.remove_at.remove(peer);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.remove_at.clear();
    }
}
