//! Capture Ingestion
//!
//! Compiles an ordered capture stream into the fixture store.
//!
//! # Per-record Rules
//!
//! ```text
//! F = base fingerprint of the request
//!
//! F not indexed:
//!     no response  -> tombstone at F
//!     response     -> store at F
//! F indexed:
//!     signature(response) == signature(fixture at F)  -> duplicate, skip
//!     otherwise -> N = smallest unused sequence >= 1
//!                  no response -> tombstone at F|N
//!                  response    -> store at F|N
//! ```
//!
//! Only the fixture at `F` is compared. A response that matches an earlier
//! variant but not the base still gets its own slot, so replay reproduces the
//! capture order exactly.
//!
//! The index is persisted once, after the last record. Any write failure
//! aborts the run before that point; fixture files already written stay on
//! disk.

use crate::mock::capture::{CaptureRecord, HttpExchange};
use crate::mock::error::{CaptureError, IngestError};
use crate::mock::fingerprint::{Fingerprint, Fingerprinter};
use crate::mock::signature::ContentSignature;
use crate::mock::store::{FixtureEntry, FixtureStore};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};

/// Counts for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records read from the stream.
    pub records: usize,
    pub skipped_non_http: usize,
    /// HTTP records whose fingerprint could not be computed.
    pub rejected: usize,
    /// Fixtures written (base and variants).
    pub stored: usize,
    /// Tombstones reserved (base and variants).
    pub tombstones: usize,
    pub duplicates: usize,
    /// Sequenced slots allocated.
    pub variants: usize,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    SkippedNonHttp,
    Rejected { reason: String },
    Stored(Fingerprint),
    Tombstone(Fingerprint),
    Duplicate(Fingerprint),
    VariantStored(Fingerprint),
    VariantTombstone(Fingerprint),
}

pub struct IngestionCompiler<'a> {
    store: &'a mut FixtureStore,
    fingerprinter: Fingerprinter,
    /// Every sequence below the hint is known to be taken.
    next_free: HashMap<Fingerprint, NonZeroU32>,
    base_signatures: HashMap<Fingerprint, ContentSignature>,
    report: IngestReport,
}

impl<'a> IngestionCompiler<'a> {
    pub fn new(store: &'a mut FixtureStore, fingerprinter: Fingerprinter) -> Self {
        Self {
            store,
            fingerprinter,
            next_free: HashMap::new(),
            base_signatures: HashMap::new(),
            report: IngestReport::default(),
        }
    }

    pub fn report(&self) -> IngestReport {
        self.report
    }

    /// Apply one record. Records must be fed in capture order.
    pub fn ingest(&mut self, record: &CaptureRecord) -> Result<RecordOutcome, IngestError> {
        self.report.records += 1;
        let exchange = match record {
            CaptureRecord::Http(exchange) => exchange,
            CaptureRecord::Other => {
                self.report.skipped_non_http += 1;
                debug!("Skipping non-HTTP capture record");
                return Ok(RecordOutcome::SkippedNonHttp);
            }
        };

        let target = match exchange.request.target() {
            Ok(target) => target,
            Err(e) => return Ok(self.reject(exchange, format!("invalid url: {}", e))),
        };
        let base = match self.fingerprinter.fingerprint(&target.descriptor) {
            Ok(base) => base,
            Err(e) => return Ok(self.reject(exchange, e.to_string())),
        };

        self.apply(base, &target.host, exchange)
    }

    /// Persist the index and return the run's counts.
    pub fn finish(self) -> Result<IngestReport, IngestError> {
        self.store.persist()?;
        let r = self.report;
        info!(
            records = r.records,
            stored = r.stored,
            variants = r.variants,
            duplicates = r.duplicates,
            tombstones = r.tombstones,
            skipped_non_http = r.skipped_non_http,
            rejected = r.rejected,
            "Ingestion complete"
        );
        Ok(r)
    }

    fn reject(&mut self, exchange: &HttpExchange, reason: String) -> RecordOutcome {
        self.report.rejected += 1;
        warn!(
            method = %exchange.request.method,
            url = %exchange.request.url,
            %reason,
            "Rejected capture record"
        );
        RecordOutcome::Rejected { reason }
    }

    fn apply(
        &mut self,
        base: Fingerprint,
        host: &str,
        exchange: &HttpExchange,
    ) -> Result<RecordOutcome, IngestError> {
        let fixture = exchange.response.as_ref().map(|r| r.to_fixture());

        if !self.store.exists(&base) {
            return Ok(match fixture {
                None => {
                    self.store.put_tombstone(&base);
                    self.report.tombstones += 1;
                    RecordOutcome::Tombstone(base)
                }
                Some(fixture) => {
                    self.store.put(&base, host, &fixture)?;
                    self.base_signatures
                        .insert(base.clone(), ContentSignature::of(&fixture));
                    self.report.stored += 1;
                    RecordOutcome::Stored(base)
                }
            });
        }

        if let Some(fixture) = &fixture {
            if let Some(existing) = self.base_signature(&base)? {
                if existing == ContentSignature::of(fixture) {
                    self.report.duplicates += 1;
                    debug!(fingerprint = %base, "Duplicate response skipped");
                    return Ok(RecordOutcome::Duplicate(base));
                }
            }
        }

        let variant = self.allocate_sequence(&base);
        self.report.variants += 1;
        Ok(match fixture {
            None => {
                self.store.put_tombstone(&variant);
                self.report.tombstones += 1;
                RecordOutcome::VariantTombstone(variant)
            }
            Some(fixture) => {
                self.store.put(&variant, host, &fixture)?;
                self.report.stored += 1;
                RecordOutcome::VariantStored(variant)
            }
        })
    }

    /// Signature of the fixture bound to `base`, or `None` for a tombstone.
    fn base_signature(
        &mut self,
        base: &Fingerprint,
    ) -> Result<Option<ContentSignature>, IngestError> {
        if let Some(signature) = self.base_signatures.get(base) {
            return Ok(Some(signature.clone()));
        }
        match self.store.entry(base) {
            Some(FixtureEntry::Stored(_)) => {
                let signature = ContentSignature::of(&*self.store.get(base)?);
                self.base_signatures.insert(base.clone(), signature.clone());
                Ok(Some(signature))
            }
            _ => Ok(None),
        }
    }

    /// Smallest sequence `N >= 1` with `base|N` unused.
    fn allocate_sequence(&mut self, base: &Fingerprint) -> Fingerprint {
        let mut n = self.next_free.get(base).copied().unwrap_or(NonZeroU32::MIN);
        loop {
            let candidate = base.with_sequence(n);
            n = n.saturating_add(1);
            if !self.store.exists(&candidate) {
                self.next_free.insert(base.clone(), n);
                return candidate;
            }
        }
    }
}

/// Ingest every record of `records` in order, then persist the index.
pub fn compile<I>(
    store: &mut FixtureStore,
    fingerprinter: Fingerprinter,
    records: I,
) -> Result<IngestReport, IngestError>
where
    I: IntoIterator<Item = Result<CaptureRecord, CaptureError>>,
{
    let mut compiler = IngestionCompiler::new(store, fingerprinter);
    for record in records {
        compiler.ingest(&record?)?;
    }
    compiler.finish()
}
