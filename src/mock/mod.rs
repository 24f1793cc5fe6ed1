//! Record/Replay Engine
//!
//! Turns a captured stream of HTTP exchanges into fixtures on disk, then
//! serves them back deterministically without contacting the origin.
//!
//! # Architecture
//!
//! ```text
//!  capture time                              replay time
//!  ────────────                              ───────────
//!  ┌──────────────┐                          ┌──────────────┐
//!  │ CaptureReader│ (JSONL from the proxy)   │ axum listener│ (server)
//!  └──────┬───────┘                          └──────┬───────┘
//!         │ CaptureRecord                           │ RequestDescriptor
//!         ▼                                         ▼
//!  ┌──────────────────┐                      ┌──────────────────┐
//!  │IngestionCompiler │                      │ MatchingEngine   │
//!  │ fingerprint      │                      │ ReplaySession    │
//!  │ dedup/signature  │                      │ (counter per F)  │
//!  │ sequence alloc   │                      └──────┬───────────┘
//!  └──────┬───────────┘                             │ read
//!         │ write                                   ▼
//!         ▼                                  ┌──────────────────┐
//!  ┌──────────────────┐   index.json         │  FixtureStore    │
//!  │  FixtureStore    │ ───────────────────▶ │  (read-only)     │
//!  └──────────────────┘                      └──────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Fingerprints**: pure function of method, path, stable query names and origin
//! - **Variants**: numbered densely in capture order (`F`, `F|1`, `F|2`, ...)
//! - **Replay**: per-endpoint cycle `[F, F|1, ..., F|K, F, F|1, ...]`, serialized per key

pub mod capture;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod matcher;
pub mod server;
pub mod signature;
pub mod store;

#[cfg(test)]
mod ingest_tests;

pub use capture::{CaptureReader, CaptureRecord};
pub use error::{CaptureError, FingerprintError, IngestError, ReplayError, StoreError};
pub use fingerprint::{Fingerprint, Fingerprinter, RequestDescriptor, NO_ORIGIN};
pub use ingest::{compile, IngestReport, IngestionCompiler};
pub use matcher::{MatchOutcome, MatchingEngine, ReplayMiss, ReplaySession, ServedFixture};
pub use store::{Fixture, FixtureEntry, FixturePaths, FixtureStore};
