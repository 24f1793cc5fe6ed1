//! Fixture Storage
//!
//! Persistent mapping from fingerprint to a stored response. The JSON index
//! is the only source of truth; fixture files are opaque handles owned by
//! this store.
//!
//! # On-disk Layout
//!
//! ```text
//! {root}/index.json
//! {root}/{host}/{path-dir}/{METHOD}.META.{origin-hash}.{query-hash}.{filename}.seqN.json
//! {root}/{host}/{path-dir}/{METHOD}.BODY.{origin-hash}.{query-hash}.{filename}.seqN.{ext}
//! ```
//!
//! `filename` is the full last path segment (`app.min.js`), or `#index` for a
//! path ending in `/`. `N` is `0` for a base key.
//!
//! # Index Document
//!
//! ```json
//! {
//!   "GET|/app.js|00000000|6c3a1e0b":   ["host/GET.META....json", "host/GET.BODY....js"],
//!   "GET|/app.js|00000000|6c3a1e0b|1": null
//! }
//! ```
//!
//! `null` is a tombstone: the slot is reserved but no response was captured.
//! Paths are stored relative to `root`.

use crate::mock::error::StoreError;
use crate::mock::fingerprint::Fingerprint;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default index file name, relative to the store root.
pub const DEFAULT_INDEX_FILE: &str = "index.json";

/// Headers the serving transport recomputes; never stored or served.
pub const EXCLUDED_HEADERS: &[&str] = &["content-encoding", "content-length"];

/// Longest path segment written to disk before it is replaced by its hash.
pub const MAX_SEGMENT_LEN: usize = 255;

/// File name used for paths ending in `/`. Request paths never contain a raw `#`.
const DIRECTORY_INDEX: &str = "#index";

/// Directory name used for empty interior segments (`/a//b`).
const EMPTY_SEGMENT: &str = "#";

pub fn is_excluded_header(name: &str) -> bool {
    EXCLUDED_HEADERS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

// =============================================================================
// FIXTURE
// =============================================================================

/// A recorded response ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Fixture {
    /// Build a fixture, dropping transport-derived headers. A repeated header
    /// name keeps its last value.
    pub fn new<I>(status_code: u16, headers: I, body: Vec<u8>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            status_code,
            headers: headers
                .into_iter()
                .filter(|(name, _)| !is_excluded_header(name))
                .collect(),
            body,
        }
    }

    fn metadata(&self) -> FixtureMetadata {
        FixtureMetadata {
            status_code: self.status_code,
            headers: self
                .headers
                .iter()
                .filter(|(name, _)| !is_excluded_header(name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Contents of a metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMetadata {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for FixtureMetadata {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: BTreeMap::new(),
        }
    }
}

/// Location of one fixture's files, relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixturePaths {
    pub metadata: PathBuf,
    pub body: PathBuf,
}

/// One index slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureEntry {
    Stored(FixturePaths),
    Tombstone,
}

impl FixtureEntry {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }
}

/// Serialized form of the index.
type IndexDocument = BTreeMap<String, Option<(PathBuf, PathBuf)>>;

/// Counts over the current index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub entries: usize,
    pub stored: usize,
    pub tombstones: usize,
    pub variants: usize,
}

// =============================================================================
// LAYOUT
// =============================================================================

/// Compute where a fixture for `fingerprint`, captured from `host`, lives.
///
/// Distinct fingerprints map to distinct files. The `.seqN` marker is always
/// present, so a file name ending in `.seq1` cannot pose as a variant.
pub fn fixture_layout(host: &str, fingerprint: &Fingerprint) -> FixturePaths {
    let mut dir = PathBuf::from(safe_segment(if host.is_empty() { "_" } else { host }));

    let path = fingerprint.path();
    let mut segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
    let filename = match segments.pop() {
        Some(name) if !name.is_empty() => name,
        _ => DIRECTORY_INDEX,
    };
    for segment in segments {
        dir.push(safe_segment(if segment.is_empty() {
            EMPTY_SEGMENT
        } else {
            segment
        }));
    }

    let ext = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => "bin",
    };
    let name = |kind: &str, ext: &str| {
        format!(
            "{}.{}.{}.{}.{}.seq{}.{}",
            fingerprint.method(),
            kind,
            fingerprint.origin_hash(),
            fingerprint.query_hash(),
            filename,
            fingerprint.sequence().unwrap_or(0),
            ext
        )
    };

    FixturePaths {
        metadata: dir.join(safe_segment(&name("META", "json"))),
        body: dir.join(safe_segment(&name("BODY", ext))),
    }
}

/// Segments longer than [`MAX_SEGMENT_LEN`] bytes, and `.`/`..`, are replaced
/// by the SHA256 hex digest of the segment.
fn safe_segment(segment: &str) -> String {
    if segment.len() > MAX_SEGMENT_LEN || segment == "." || segment == ".." {
        hex::encode(Sha256::digest(segment.as_bytes()))
    } else {
        segment.to_string()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Fingerprint-indexed fixture storage rooted at a directory.
pub struct FixtureStore {
    root: PathBuf,
    index_path: PathBuf,
    index: HashMap<Fingerprint, FixtureEntry>,
    /// Which key each metadata/body file belongs to.
    owners: HashMap<PathBuf, Fingerprint>,
    cache: Option<RwLock<HashMap<FixturePaths, Arc<Fixture>>>>,
}

impl FixtureStore {
    /// An empty store. Nothing is read from disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_path: root.join(DEFAULT_INDEX_FILE),
            root,
            index: HashMap::new(),
            owners: HashMap::new(),
            cache: None,
        }
    }

    /// Use an index file other than [`DEFAULT_INDEX_FILE`] (relative to root).
    pub fn with_index_file(mut self, index_file: impl AsRef<Path>) -> Self {
        self.index_path = self.root.join(index_file);
        self
    }

    /// Cache decoded fixtures in memory, keyed by their paths.
    pub fn with_body_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(|| RwLock::new(HashMap::new()));
        self
    }

    /// Load an existing index. A missing or unparseable index is an error.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self::new(root);
        store.load()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Replace the in-memory index with the persisted one.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let contents = fs::read_to_string(&self.index_path)
            .map_err(|e| StoreError::io(&self.index_path, e))?;
        let document: IndexDocument =
            serde_json::from_str(&contents).map_err(|e| StoreError::CorruptIndex {
                path: self.index_path.clone(),
                reason: e.to_string(),
            })?;

        let mut index = HashMap::with_capacity(document.len());
        let mut owners = HashMap::with_capacity(document.len() * 2);
        for (key, paths) in document {
            let fingerprint = Fingerprint::split(&key).map_err(|e| StoreError::CorruptIndex {
                path: self.index_path.clone(),
                reason: e.to_string(),
            })?;
            let entry = match paths {
                Some((metadata, body)) => {
                    for path in [&metadata, &body] {
                        if let Some(owner) = owners.insert(path.clone(), fingerprint.clone()) {
                            return Err(StoreError::CorruptIndex {
                                path: self.index_path.clone(),
                                reason: format!(
                                    "{} is bound to both {} and {}",
                                    path.display(),
                                    owner,
                                    fingerprint
                                ),
                            });
                        }
                    }
                    FixtureEntry::Stored(FixturePaths { metadata, body })
                }
                None => FixtureEntry::Tombstone,
            };
            index.insert(fingerprint, entry);
        }

        info!(
            path = %self.index_path.display(),
            entries = index.len(),
            "Loaded fixture index"
        );
        self.index = index;
        self.owners = owners;
        if let Some(cache) = &self.cache {
            cache.write().clear();
        }
        Ok(())
    }

    /// Load the index when it exists, otherwise keep the current (empty) one.
    pub fn load_if_present(&mut self) -> Result<bool, StoreError> {
        if self.index_path.exists() {
            self.load()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Write the whole index. The document is written beside the index and
    /// renamed over it.
    pub fn persist(&self) -> Result<(), StoreError> {
        let document: IndexDocument = self
            .index
            .iter()
            .map(|(fp, entry)| {
                let paths = match entry {
                    FixtureEntry::Stored(p) => Some((p.metadata.clone(), p.body.clone())),
                    FixtureEntry::Tombstone => None,
                };
                (fp.to_string(), paths)
            })
            .collect();

        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let contents = serde_json::to_vec_pretty(&document)?;
        let tmp = self.index_path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.index_path).map_err(|e| StoreError::io(&self.index_path, e))?;

        info!(
            path = %self.index_path.display(),
            entries = document.len(),
            "Persisted fixture index"
        );
        Ok(())
    }

    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<&FixtureEntry> {
        self.index.get(fingerprint)
    }

    /// Resolve a concrete fixture. Absent keys and tombstones are `NotFound`.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Arc<Fixture>, StoreError> {
        match self.index.get(fingerprint) {
            Some(FixtureEntry::Stored(paths)) => self.read_fixture(paths),
            _ => Err(StoreError::NotFound(fingerprint.to_string())),
        }
    }

    /// Write a fixture's files and bind `fingerprint` to them.
    pub fn put(
        &mut self,
        fingerprint: &Fingerprint,
        host: &str,
        fixture: &Fixture,
    ) -> Result<FixturePaths, StoreError> {
        let paths = fixture_layout(host, fingerprint);
        for path in [&paths.metadata, &paths.body] {
            if let Some(owner) = self.owners.get(path) {
                if owner != fingerprint {
                    return Err(StoreError::PathConflict {
                        path: path.clone(),
                        owner: owner.to_string(),
                        fingerprint: fingerprint.to_string(),
                    });
                }
            }
        }
        let metadata_path = self.root.join(&paths.metadata);
        let body_path = self.root.join(&paths.body);

        if let Some(dir) = metadata_path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let metadata = serde_json::to_vec_pretty(&fixture.metadata())?;
        fs::write(&metadata_path, metadata).map_err(|e| StoreError::io(&metadata_path, e))?;
        fs::write(&body_path, &fixture.body).map_err(|e| StoreError::io(&body_path, e))?;

        debug!(
            fingerprint = %fingerprint,
            body = %paths.body.display(),
            bytes = fixture.body.len(),
            "Stored fixture"
        );
        if let Some(cache) = &self.cache {
            cache.write().remove(&paths);
        }
        self.release(fingerprint);
        self.owners.insert(paths.metadata.clone(), fingerprint.clone());
        self.owners.insert(paths.body.clone(), fingerprint.clone());
        self.index
            .insert(fingerprint.clone(), FixtureEntry::Stored(paths.clone()));
        Ok(paths)
    }

    /// Reserve `fingerprint` without any stored files.
    pub fn put_tombstone(&mut self, fingerprint: &Fingerprint) {
        debug!(fingerprint = %fingerprint, "Stored tombstone");
        self.release(fingerprint);
        self.index.insert(fingerprint.clone(), FixtureEntry::Tombstone);
    }

    /// Drop `fingerprint`'s claim on the files it is currently bound to.
    fn release(&mut self, fingerprint: &Fingerprint) {
        if let Some(FixtureEntry::Stored(old)) = self.index.get(fingerprint) {
            self.owners.remove(&old.metadata);
            self.owners.remove(&old.body);
        }
    }

    /// All known keys in their delimited form, sorted.
    pub fn fingerprints(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index.keys().map(Fingerprint::to_string).collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Fingerprint, &FixtureEntry)> {
        self.index.iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary {
            entries: self.index.len(),
            ..Default::default()
        };
        for (fp, entry) in &self.index {
            match entry {
                FixtureEntry::Stored(_) => summary.stored += 1,
                FixtureEntry::Tombstone => summary.tombstones += 1,
            }
            if fp.is_sequenced() {
                summary.variants += 1;
            }
        }
        summary
    }

    fn read_fixture(&self, paths: &FixturePaths) -> Result<Arc<Fixture>, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.read().get(paths) {
                return Ok(Arc::clone(hit));
            }
        }

        let metadata_path = self.root.join(&paths.metadata);
        let metadata = match fs::read(&metadata_path) {
            Ok(bytes) => serde_json::from_slice::<FixtureMetadata>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %metadata_path.display(), "Fixture metadata missing, serving 200 with no headers");
                FixtureMetadata::default()
            }
            Err(e) => return Err(StoreError::io(metadata_path, e)),
        };

        let body_path = self.root.join(&paths.body);
        let body = match fs::read(&body_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %body_path.display(), "Fixture body missing, serving empty body");
                Vec::new()
            }
            Err(e) => return Err(StoreError::io(body_path, e)),
        };

        let fixture = Arc::new(Fixture::new(
            metadata.status_code,
            metadata.headers,
            body,
        ));
        if let Some(cache) = &self.cache {
            cache.write().insert(paths.clone(), Arc::clone(&fixture));
        }
        Ok(fixture)
    }
}
