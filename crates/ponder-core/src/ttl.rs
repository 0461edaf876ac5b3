//! Time-limited activation flags.
//!
//! Used to keep auxiliary instruction text in the interpreter context for a
//! while after a tool is first used. Expiry is lazy: an expired key reads as
//! inactive and is only physically removed by [`InstructionTTLCache::sweep_expired`]
//! or the next activation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Keyed activation timestamps with a shared TTL.
pub struct InstructionTTLCache<K = String> {
    flags: RwLock<HashMap<K, DateTime<Utc>>>,
    ttl: chrono::Duration,
}

impl<K> InstructionTTLCache<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, DateTime<Utc>>> {
        self.flags.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, DateTime<Utc>>> {
        self.flags.write().unwrap_or_else(|e| e.into_inner())
    }

    fn live(&self, activated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - activated_at < self.ttl
    }

    /// Activate or refresh `key` at `now`.
    ///
    /// Returns true when the key was not active before.
    pub fn activate(&self, key: K, now: DateTime<Utc>) -> bool {
        let mut flags = self.write();
        let was_active = flags
            .get(&key)
            .map(|at| self.live(*at, now))
            .unwrap_or(false);
        flags.insert(key, now);
        !was_active
    }

    /// Whether `key` was activated less than one TTL before `now`.
    pub fn is_active(&self, key: &K, now: DateTime<Utc>) -> bool {
        self.read()
            .get(key)
            .map(|at| self.live(*at, now))
            .unwrap_or(false)
    }

    /// Time left before `key` expires, or None if inactive.
    pub fn remaining(&self, key: &K, now: DateTime<Utc>) -> Option<Duration> {
        let activated_at = *self.read().get(key)?;
        let left = self.ttl - (now - activated_at);
        if left > chrono::Duration::zero() {
            left.to_std().ok()
        } else {
            None
        }
    }

    /// All keys active at `now`.
    pub fn active_keys(&self, now: DateTime<Utc>) -> Vec<K> {
        self.read()
            .iter()
            .filter(|(_, at)| self.live(**at, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Remove a key. Returns whether it was present.
    pub fn deactivate(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Keep only keys accepted by `allowed` (e.g. drop disabled tools).
    pub fn retain_keys(&self, mut allowed: impl FnMut(&K) -> bool) {
        self.write().retain(|k, _| allowed(k));
    }

    /// Physically drop expired entries. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut flags = self.write();
        let before = flags.len();
        let ttl = self.ttl;
        flags.retain(|_, at| now - *at < ttl);
        let removed = before - flags.len();
        if removed > 0 {
            debug!(removed, remaining = flags.len(), "Swept expired instruction flags");
        }
        removed
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or_default()
    }
}
