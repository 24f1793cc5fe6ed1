//! Request Fingerprints
//!
//! Maps the shape of an HTTP request onto a deterministic key used by both
//! the ingestion compiler and the replay matcher.
//!
//! # Key Format
//!
//! ```text
//! base      = METHOD|/path|query-hash|origin-hash
//! sequenced = METHOD|/path|query-hash|origin-hash|N      (N >= 1)
//! ```
//!
//! - `query-hash`: CRC32 of the sorted, `&`-joined query-parameter names after
//!   volatile tracking names are removed. Values never participate.
//! - `origin-hash`: CRC32 of the `Origin` header, or of `no_origin` when absent.
//!
//! Both hashes render as 8 lowercase hex digits. The `|` delimiter is reserved:
//! a method or path containing it is rejected instead of producing a key that
//! cannot be split back.

use crate::mock::error::FingerprintError;
use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Delimiter between key fields.
pub const KEY_DELIMITER: char = '|';

/// Sentinel origin used when a request carries no `Origin` header.
pub const NO_ORIGIN: &str = "no_origin";

/// Tracking/analytics query names that never influence a fingerprint.
pub const VOLATILE_QUERY_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "gclid",
    "gclsrc",
    "dclid",
    "fbclid",
    "msclkid",
    "yclid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "_hsenc",
    "_hsmi",
];

/// CRC32 of `value`, rendered as fixed-width lowercase hex.
pub fn hash_crc32(value: &str) -> String {
    format!("{:08x}", crc32fast::hash(value.as_bytes()))
}

// =============================================================================
// REQUEST DESCRIPTOR
// =============================================================================

/// The parts of an inbound or captured request that identify its shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub query_names: BTreeSet<String>,
    /// `None` and `Some("no_origin")` are equivalent.
    pub origin: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query_names: BTreeSet::new(),
            origin: None,
        }
    }

    pub fn with_query_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Origin value as it enters the hash.
    pub fn origin_value(&self) -> &str {
        self.origin.as_deref().unwrap_or(NO_ORIGIN)
    }
}

// =============================================================================
// FINGERPRINT
// =============================================================================

/// Structured fingerprint. Serialized to the delimited form only at the
/// index boundary and in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: String,
    path: String,
    query_hash: String,
    origin_hash: String,
    sequence: Option<NonZeroU32>,
}

impl Fingerprint {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_hash(&self) -> &str {
        &self.query_hash
    }

    pub fn origin_hash(&self) -> &str {
        &self.origin_hash
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence.map(NonZeroU32::get)
    }

    pub fn is_sequenced(&self) -> bool {
        self.sequence.is_some()
    }

    /// The same key with any sequence number dropped.
    pub fn base(&self) -> Fingerprint {
        Fingerprint {
            sequence: None,
            ..self.clone()
        }
    }

    /// The variant `self|n` of this key's base.
    pub fn with_sequence(&self, n: NonZeroU32) -> Fingerprint {
        Fingerprint {
            sequence: Some(n),
            ..self.clone()
        }
    }

    /// Parse a delimited key. Four fields form a base key, five a sequenced one.
    pub fn split(key: &str) -> Result<Self, FingerprintError> {
        let fields: Vec<&str> = key.split(KEY_DELIMITER).collect();
        let sequence = match fields.len() {
            4 => None,
            5 => {
                let n = fields[4]
                    .parse::<u32>()
                    .ok()
                    .and_then(NonZeroU32::new)
                    .ok_or_else(|| FingerprintError::MalformedKey(key.to_string()))?;
                Some(n)
            }
            _ => return Err(FingerprintError::MalformedKey(key.to_string())),
        };

        Ok(Fingerprint {
            method: fields[0].to_string(),
            path: fields[1].to_string(),
            query_hash: fields[2].to_string(),
            origin_hash: fields[3].to_string(),
            sequence,
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.method, self.path, self.query_hash, self.origin_hash
        )?;
        if let Some(n) = self.sequence {
            write!(f, "|{}", n)?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::split(s)
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// Computes fingerprints. Holds the volatile query-name set so extra
/// tracking names can be configured per deployment.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    volatile: BTreeSet<String>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            volatile: VOLATILE_QUERY_PARAMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Fingerprinter {
    /// Fixed volatile set plus `extra` names.
    pub fn with_extra_volatile<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fp = Self::default();
        fp.volatile.extend(extra.into_iter().map(Into::into));
        fp
    }

    pub fn is_volatile(&self, name: &str) -> bool {
        self.volatile.contains(name)
    }

    /// Hash of the stable query-name set. Order and duplicates are irrelevant.
    pub fn query_signature<'a, I>(&self, names: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let stable: BTreeSet<&str> = names
            .into_iter()
            .filter(|name| !self.is_volatile(name))
            .collect();
        let joined = stable.into_iter().collect::<Vec<_>>().join("&");
        hash_crc32(&joined)
    }

    /// Hash of the origin value; `None` is the `no_origin` sentinel.
    pub fn origin_signature(origin: Option<&str>) -> Result<String, FingerprintError> {
        let origin = origin.unwrap_or(NO_ORIGIN);
        if !(origin.starts_with("http://") || origin.starts_with("https://") || origin == NO_ORIGIN)
        {
            return Err(FingerprintError::InvalidOriginHeader(origin.to_string()));
        }
        Ok(hash_crc32(origin))
    }

    pub fn generate<'a, I>(
        &self,
        method: &str,
        path: &str,
        query_names: I,
        origin: Option<&str>,
        sequence: Option<NonZeroU32>,
    ) -> Result<Fingerprint, FingerprintError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let origin_hash = Self::origin_signature(origin)?;
        for field in [method, path] {
            if field.contains(KEY_DELIMITER) {
                return Err(FingerprintError::ReservedDelimiter(field.to_string()));
            }
        }

        Ok(Fingerprint {
            method: method.to_string(),
            path: path.to_string(),
            query_hash: self.query_signature(query_names),
            origin_hash,
            sequence,
        })
    }

    /// Base fingerprint of a request descriptor.
    pub fn fingerprint(&self, request: &RequestDescriptor) -> Result<Fingerprint, FingerprintError> {
        self.generate(
            &request.method,
            &request.path,
            request.query_names.iter().map(String::as_str),
            request.origin.as_deref(),
            None,
        )
    }
}
