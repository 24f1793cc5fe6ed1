//! Error types for the fingerprint, store and ingestion layers.

use std::path::PathBuf;

/// Errors raised while computing or parsing a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// Origin present but neither `http(s)://`-prefixed nor the `no_origin` sentinel.
    InvalidOriginHeader(String),
    /// Method or path contains the `|` key delimiter.
    ReservedDelimiter(String),
    /// A delimited key could not be split back into its fields.
    MalformedKey(String),
}

impl std::fmt::Display for FingerprintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOriginHeader(origin) => write!(
                f,
                "origin header must start with 'http://' or 'https://', or be 'no_origin'. Value was {}",
                origin
            ),
            Self::ReservedDelimiter(field) => {
                write!(f, "reserved delimiter '|' found in request field: {}", field)
            }
            Self::MalformedKey(key) => write!(f, "malformed fingerprint key: {}", key),
        }
    }
}

impl std::error::Error for FingerprintError {}

/// Errors from the fixture store.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: std::io::Error },
    CorruptIndex { path: PathBuf, reason: String },
    /// The layout for `fingerprint` lands on a file already bound to `owner`.
    PathConflict {
        path: PathBuf,
        owner: String,
        fingerprint: String,
    },
    Serialization(serde_json::Error),
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "I/O error at {}: {}", path.display(), source),
            Self::CorruptIndex { path, reason } => {
                write!(f, "corrupt fixture index {}: {}", path.display(), reason)
            }
            Self::PathConflict {
                path,
                owner,
                fingerprint,
            } => write!(
                f,
                "fixture file {} belongs to {}, refusing to bind {}",
                path.display(),
                owner,
                fingerprint
            ),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::NotFound(key) => write!(f, "Fixture not found: {}", key),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

/// Errors decoding the capture stream.
#[derive(Debug)]
pub enum CaptureError {
    Io(std::io::Error),
    Decode { line: usize, reason: String },
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "capture read error: {}", e),
            Self::Decode { line, reason } => {
                write!(f, "capture record on line {} is invalid: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors that abort an ingestion run. The index is never persisted after one.
#[derive(Debug)]
pub enum IngestError {
    /// Writing a fixture or the index failed.
    Store(StoreError),
    Capture(CaptureError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "ingestion I/O failure: {}", e),
            Self::Capture(e) => write!(f, "ingestion input failure: {}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Capture(e) => Some(e),
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<CaptureError> for IngestError {
    fn from(e: CaptureError) -> Self {
        Self::Capture(e)
    }
}

/// Errors surfaced while resolving a replay request. A missing fixture is
/// not an error; see `MatchOutcome::Miss`.
#[derive(Debug)]
pub enum ReplayError {
    InvalidRequest(FingerprintError),
    Store(StoreError),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(e) => write!(f, "invalid replay request: {}", e),
            Self::Store(e) => write!(f, "fixture read failed: {}", e),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<FingerprintError> for ReplayError {
    fn from(e: FingerprintError) -> Self {
        Self::InvalidRequest(e)
    }
}

impl From<StoreError> for ReplayError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
