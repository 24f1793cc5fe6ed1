//! Response Content Signatures
//!
//! Two captured responses for the same base fingerprint are duplicates when
//! their signatures match:
//!
//! ```text
//! signature = SHA256(canonical metadata) || SHA256(raw body)
//! ```
//!
//! Canonical metadata is the status code plus the header set with names
//! lowercased and sorted, and with `Date` plus the transport-derived headers
//! removed. Header values are compared verbatim.

use crate::mock::store::{is_excluded_header, Fixture};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Headers ignored when comparing responses (timestamp noise).
const IGNORED_HEADERS: &[&str] = &["date"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentSignature(String);

impl ContentSignature {
    pub fn of(fixture: &Fixture) -> Self {
        let metadata_hash = hex::encode(metadata_digest(fixture));
        let body_hash = hex::encode(Sha256::digest(&fixture.body));
        Self(format!("{}{}", metadata_hash, body_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn metadata_digest(fixture: &Fixture) -> Vec<u8> {
    let canonical: BTreeMap<String, &str> = fixture
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .filter(|(name, _)| !IGNORED_HEADERS.contains(&name.as_str()) && !is_excluded_header(name))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(fixture.status_code.to_be_bytes());
    for (name, value) in &canonical {
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.finalize().to_vec()
}
