//! Shared state for the enrichment workers: the rate limiter for the lookup
//! services and the per-model cache of auxiliary results, both behind one
//! mutex. The lock is only held to read or update them; waiting for a rate
//! limit slot and the lookup itself happen after it is released.
//!
//! A cache entry of `None` records a lookup that failed during this pass.
//! The model is not queried again until the next pass builds a fresh gate.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::fields::{Auxiliary, ModelKey};
use crate::limiter::RateLimiter;

/// Which auxiliary lookup a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxKind {
    Safety,
    Recalls,
    Complaints,
}

impl AuxKind {
    pub const ALL: [AuxKind; 3] = [AuxKind::Safety, AuxKind::Recalls, AuxKind::Complaints];

    pub fn name(self) -> &'static str {
        match self {
            AuxKind::Safety => "safety",
            AuxKind::Recalls => "recalls",
            AuxKind::Complaints => "complaints",
        }
    }
}

struct GateState {
    limiter: RateLimiter,
    cache: HashMap<(AuxKind, ModelKey), Option<Auxiliary>>,
}

pub struct SharedGate {
    state: Mutex<GateState>,
}

impl SharedGate {
    pub fn new(interval: Duration) -> Self {
        SharedGate {
            state: Mutex::new(GateState {
                limiter: RateLimiter::new(interval),
                cache: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the caller may issue one outbound request.
    pub fn pace(&self) {
        let wait = self.lock().limiter.reserve(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    /// `Some(result)` once the lookup has been made, whether or not it
    /// produced data; `None` if it has not.
    pub fn cached(&self, kind: AuxKind, key: &ModelKey) -> Option<Option<Auxiliary>> {
        self.lock().cache.get(&(kind, key.clone())).cloned()
    }

    /// Remember a lookup result, `None` for a failed lookup. The first stored
    /// value wins if two workers raced on the same key.
    pub fn store(&self, kind: AuxKind, key: &ModelKey, value: Option<Auxiliary>) -> Option<Auxiliary> {
        self.lock()
            .cache
            .entry((kind, key.clone()))
            .or_insert(value)
            .clone()
    }

    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::fields::RecallSummary;
    use std::sync::Arc;

    fn key() -> ModelKey {
        ModelKey::new("2015", "HONDA", "CIVIC").unwrap()
    }

    #[test]
    fn first_stored_value_wins() {
        let gate = SharedGate::new(Duration::ZERO);
        let first = Auxiliary::Recalls(RecallSummary {
            total_recalls: 1,
            ..RecallSummary::default()
        });
        let second = Auxiliary::Recalls(RecallSummary::default());

        assert_eq!(gate.store(AuxKind::Recalls, &key(), Some(first.clone())), Some(first.clone()));
        assert_eq!(gate.store(AuxKind::Recalls, &key(), Some(second)), Some(first.clone()));
        assert_eq!(gate.cached(AuxKind::Recalls, &key()), Some(Some(first)));
        assert_eq!(gate.cached(AuxKind::Safety, &key()), None);
    }

    #[test]
    fn failed_lookup_is_remembered() {
        let gate = SharedGate::new(Duration::ZERO);

        assert_eq!(gate.store(AuxKind::Complaints, &key(), None), None);
        assert_eq!(gate.cached(AuxKind::Complaints, &key()), Some(None));
        assert_eq!(gate.cached_len(), 1);
    }

    #[test]
    fn pace_spaces_calls_across_threads() {
        let gate = Arc::new(SharedGate::new(Duration::from_millis(20)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.pace())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // four slots: 0, 20, 40, 60 ms
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
