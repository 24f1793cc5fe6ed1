//! Replay Matching
//!
//! Resolves inbound requests to stored fixtures, walking recorded variants
//! in capture order and cycling back to the base response when they run out.
//!
//! # Per-fingerprint State Machine
//!
//! ```text
//! counter = session[F]                        (default 0)
//! candidate = F           if counter == 0
//!           = F|counter   otherwise
//! session[F] = counter + 1
//!
//! candidate concrete           -> serve candidate
//! candidate != F (variant gap) -> restart: serve F, session[F] = 1
//! otherwise                    -> miss
//! ```
//!
//! With fixtures `{F=A, F|1=B, F|2=C}` successive requests are served
//! `A, B, C, A, B, C, ...`. Tombstones resolve like absent keys.
//!
//! # Concurrency
//!
//! Counters live in a [`ReplaySession`] with one lock per base fingerprint.
//! The whole decision (read, advance, restart) happens under that lock, so
//! concurrent requests to one endpoint never observe the same counter value.
//! Fixture files are read after the lock is released.

use crate::mock::error::ReplayError;
use crate::mock::fingerprint::{Fingerprint, Fingerprinter, RequestDescriptor};
use crate::mock::store::{Fixture, FixtureEntry, FixtureStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// SESSION STATE
// =============================================================================

/// Volatile per-session replay counters, keyed by base fingerprint.
#[derive(Debug, Default)]
pub struct ReplaySession {
    counters: RwLock<HashMap<Fingerprint, Arc<Mutex<u32>>>>,
}

impl ReplaySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter for `base` (0 when never requested).
    pub fn counter(&self, base: &Fingerprint) -> u32 {
        self.counters
            .read()
            .get(base)
            .map(|slot| *slot.lock())
            .unwrap_or(0)
    }

    /// Forget all counters; the next request for every endpoint serves its base.
    pub fn reset(&self) {
        self.counters.write().clear();
    }

    fn slot(&self, base: &Fingerprint) -> Arc<Mutex<u32>> {
        if let Some(slot) = self.counters.read().get(base) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(base.clone())
                .or_insert_with(|| Arc::new(Mutex::new(0))),
        )
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// A resolved fixture. Transport-derived headers are already removed.
#[derive(Debug, Clone)]
pub struct ServedFixture {
    pub fingerprint: Fingerprint,
    pub fixture: Arc<Fixture>,
}

/// No usable fixture for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayMiss {
    pub base: Fingerprint,
    /// The key that failed to resolve first.
    pub candidate: Fingerprint,
    /// Every key in the index, sorted.
    pub known: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Hit(ServedFixture),
    Miss(ReplayMiss),
}

impl MatchOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

enum Decision {
    Serve(Fingerprint),
    Miss(Fingerprint),
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct MatchingEngine {
    store: Arc<FixtureStore>,
    fingerprinter: Fingerprinter,
    session: Arc<ReplaySession>,
}

impl MatchingEngine {
    /// Engine over a read-only store with a fresh session.
    pub fn new(store: Arc<FixtureStore>, fingerprinter: Fingerprinter) -> Self {
        Self::with_session(store, fingerprinter, Arc::new(ReplaySession::new()))
    }

    pub fn with_session(
        store: Arc<FixtureStore>,
        fingerprinter: Fingerprinter,
        session: Arc<ReplaySession>,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            session,
        }
    }

    pub fn store(&self) -> &FixtureStore {
        &self.store
    }

    pub fn session(&self) -> &ReplaySession {
        &self.session
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Resolve one inbound request, advancing its endpoint's counter.
    pub fn resolve(&self, request: &RequestDescriptor) -> Result<MatchOutcome, ReplayError> {
        let base = self.fingerprinter.fingerprint(request)?;
        self.resolve_base(base)
    }

    /// Resolve by an already computed base fingerprint.
    pub fn resolve_base(&self, base: Fingerprint) -> Result<MatchOutcome, ReplayError> {
        let base = base.base();
        let slot = self.session.slot(&base);

        let decision = {
            let mut counter = slot.lock();
            let candidate = match NonZeroU32::new(*counter) {
                Some(n) => base.with_sequence(n),
                None => base.clone(),
            };
            *counter = counter.saturating_add(1);

            if self.is_concrete(&candidate) {
                Decision::Serve(candidate)
            } else if candidate != base {
                // Variants exhausted: the base answers and consumes slot 0.
                *counter = 1;
                if self.is_concrete(&base) {
                    Decision::Serve(base.clone())
                } else {
                    Decision::Miss(candidate)
                }
            } else {
                Decision::Miss(candidate)
            }
        };

        match decision {
            Decision::Serve(fingerprint) => {
                let fixture = self.store.get(&fingerprint)?;
                debug!(fingerprint = %fingerprint, status = fixture.status_code, "Serving fixture");
                Ok(MatchOutcome::Hit(ServedFixture {
                    fingerprint,
                    fixture,
                }))
            }
            Decision::Miss(candidate) => {
                info!(base = %base, candidate = %candidate, "No recorded response");
                Ok(MatchOutcome::Miss(ReplayMiss {
                    base,
                    candidate,
                    known: self.store.fingerprints(),
                }))
            }
        }
    }

    fn is_concrete(&self, fingerprint: &Fingerprint) -> bool {
        matches!(self.store.entry(fingerprint), Some(FixtureEntry::Stored(_)))
    }
}
