//! Ingestion Tests
//!
//! Dedup, dense sequence allocation, tombstones and failure behavior of the
//! capture ingestion compiler.

use crate::mock::capture::{CaptureReader, CaptureRecord, CapturedRequest, CapturedResponse, HttpExchange};
use crate::mock::error::IngestError;
use crate::mock::fingerprint::{Fingerprint, Fingerprinter, RequestDescriptor};
use crate::mock::ingest::{compile, IngestReport, IngestionCompiler, RecordOutcome};
use crate::mock::store::{FixtureEntry, FixtureStore};
use std::num::NonZeroU32;

// =============================================================================
// HELPERS
// =============================================================================

fn request(url: &str) -> CapturedRequest {
    CapturedRequest {
        method: "GET".to_string(),
        url: url.to_string(),
        headers: vec![],
        query: None,
    }
}

fn exchange(url: &str, body: &str, headers: &[(&str, &str)]) -> CaptureRecord {
    CaptureRecord::Http(HttpExchange {
        request: request(url),
        response: Some(CapturedResponse {
            status_code: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }),
    })
}

fn no_response(url: &str) -> CaptureRecord {
    CaptureRecord::Http(HttpExchange {
        request: request(url),
        response: None,
    })
}

fn base_of(path: &str) -> Fingerprint {
    Fingerprinter::default()
        .fingerprint(&RequestDescriptor::new("GET", path))
        .unwrap()
}

fn seq(fp: &Fingerprint, n: u32) -> Fingerprint {
    fp.with_sequence(NonZeroU32::new(n).unwrap())
}

fn run(store: &mut FixtureStore, records: Vec<CaptureRecord>) -> IngestReport {
    compile(store, Fingerprinter::default(), records.into_iter().map(Ok)).unwrap()
}

fn body_at(store: &FixtureStore, fp: &Fingerprint) -> String {
    String::from_utf8(store.get(fp).unwrap().body.clone()).unwrap()
}

// =============================================================================
// DEDUPLICATION
// =============================================================================

#[test]
fn test_identical_responses_yield_one_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let report = run(
        &mut store,
        vec![
            exchange("https://site.test/app.js", "same", &[("Content-Type", "text/javascript")]),
            exchange("https://site.test/app.js", "same", &[("Content-Type", "text/javascript")]),
        ],
    );

    let base = base_of("/app.js");
    assert_eq!(store.len(), 1);
    assert!(store.exists(&base));
    assert!(!store.exists(&seq(&base, 1)));
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(report.variants, 0);
}

#[test]
fn test_date_only_difference_is_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let report = run(
        &mut store,
        vec![
            exchange("https://site.test/", "page", &[("Date", "Mon, 01 Jan 2024 00:00:00 GMT")]),
            exchange("https://site.test/", "page", &[("Date", "Mon, 01 Jan 2024 00:00:09 GMT")]),
        ],
    );
    assert_eq!(report.duplicates, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_transport_headers_do_not_create_variants() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let report = run(
        &mut store,
        vec![
            exchange("https://site.test/a.css", "x", &[("Content-Encoding", "gzip")]),
            exchange("https://site.test/a.css", "x", &[("Content-Length", "1")]),
        ],
    );
    assert_eq!(report.duplicates, 1);
}

// =============================================================================
// SEQUENCE ALLOCATION
// =============================================================================

#[test]
fn test_three_distinct_responses_are_dense() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    run(
        &mut store,
        vec![
            exchange("https://site.test/api/poll", "A", &[]),
            exchange("https://site.test/api/poll", "B", &[]),
            exchange("https://site.test/api/poll", "C", &[]),
        ],
    );

    let base = base_of("/api/poll");
    assert_eq!(body_at(&store, &base), "A");
    assert_eq!(body_at(&store, &seq(&base, 1)), "B");
    assert_eq!(body_at(&store, &seq(&base, 2)), "C");
    assert!(!store.exists(&seq(&base, 3)));
    assert_eq!(store.len(), 3);
}

#[test]
fn test_variant_compared_only_against_base() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let report = run(
        &mut store,
        vec![
            exchange("https://site.test/n", "A", &[]),
            exchange("https://site.test/n", "B", &[]),
            exchange("https://site.test/n", "B", &[]),
            exchange("https://site.test/n", "A", &[]),
        ],
    );

    let base = base_of("/n");
    assert_eq!(body_at(&store, &seq(&base, 1)), "B");
    assert_eq!(body_at(&store, &seq(&base, 2)), "B");
    assert!(!store.exists(&seq(&base, 3)));
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.variants, 2);
}

#[test]
fn test_query_values_share_a_base() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    run(
        &mut store,
        vec![
            exchange("https://site.test/item?id=1&utm_source=mail", "one", &[]),
            exchange("https://site.test/item?id=2", "two", &[]),
        ],
    );

    let base = Fingerprinter::default()
        .fingerprint(&RequestDescriptor::new("GET", "/item").with_query_names(["id"]))
        .unwrap();
    assert_eq!(body_at(&store, &base), "one");
    assert_eq!(body_at(&store, &seq(&base, 1)), "two");
}

// =============================================================================
// TOMBSTONES
// =============================================================================

#[test]
fn test_missing_response_reserves_base() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let report = run(
        &mut store,
        vec![
            no_response("https://site.test/slow"),
            exchange("https://site.test/slow", "late", &[]),
        ],
    );

    let base = base_of("/slow");
    assert_eq!(store.entry(&base), Some(&FixtureEntry::Tombstone));
    assert_eq!(body_at(&store, &seq(&base, 1)), "late");
    assert_eq!(report.tombstones, 1);
    assert_eq!(report.variants, 1);
}

#[test]
fn test_missing_response_after_fixture_is_variant_tombstone() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let mut compiler = IngestionCompiler::new(&mut store, Fingerprinter::default());

    let first = compiler
        .ingest(&exchange("https://site.test/x", "ok", &[]))
        .unwrap();
    let second = compiler.ingest(&no_response("https://site.test/x")).unwrap();
    let third = compiler
        .ingest(&exchange("https://site.test/x", "again", &[]))
        .unwrap();

    let base = base_of("/x");
    assert_eq!(first, RecordOutcome::Stored(base.clone()));
    assert_eq!(second, RecordOutcome::VariantTombstone(seq(&base, 1)));
    assert_eq!(third, RecordOutcome::VariantStored(seq(&base, 2)));
    compiler.finish().unwrap();

    assert_eq!(store.entry(&seq(&base, 1)), Some(&FixtureEntry::Tombstone));
}

// =============================================================================
// STORAGE LAYOUT
// =============================================================================

#[test]
fn test_similar_paths_keep_their_own_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());

    let css = CaptureRecord::Http(HttpExchange {
        request: request("https://site.test/x/app.css"),
        response: Some(CapturedResponse {
            status_code: 404,
            headers: vec![("Content-Type".to_string(), "text/css".to_string())],
            body: b"missing".to_vec(),
        }),
    });
    let records = vec![
        exchange(
            "https://site.test/x/app.js",
            "js",
            &[("Content-Type", "text/javascript")],
        ),
        css,
        exchange("https://site.test/x/", "dir", &[]),
        exchange("https://site.test/x/index", "idx", &[]),
        exchange("https://site.test/x/app", "bare", &[]),
        exchange("https://site.test/x/app.bin", "bin", &[]),
    ];
    let report = run(&mut store, records);
    assert_eq!(report.stored, 6);
    assert_eq!(report.variants, 0);

    let reopened = FixtureStore::open(dir.path()).unwrap();
    let js = reopened.get(&base_of("/x/app.js")).unwrap();
    assert_eq!(js.status_code, 200);
    assert_eq!(
        js.headers.get("Content-Type").map(String::as_str),
        Some("text/javascript")
    );
    assert_eq!(js.body, b"js");
    assert_eq!(reopened.get(&base_of("/x/app.css")).unwrap().status_code, 404);
    assert_eq!(body_at(&reopened, &base_of("/x/")), "dir");
    assert_eq!(body_at(&reopened, &base_of("/x/index")), "idx");
    assert_eq!(body_at(&reopened, &base_of("/x/app")), "bare");
    assert_eq!(body_at(&reopened, &base_of("/x/app.bin")), "bin");
}

// =============================================================================
// SKIPS, REJECTIONS, FAILURES
// =============================================================================

#[test]
fn test_non_http_skipped_and_bad_origin_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());

    let mut bad_origin = request("https://site.test/api");
    bad_origin.headers.push(("Origin".to_string(), "null".to_string()));
    let records = vec![
        CaptureRecord::Other,
        CaptureRecord::Http(HttpExchange {
            request: bad_origin,
            response: None,
        }),
        CaptureRecord::Http(HttpExchange {
            request: request("not a url"),
            response: None,
        }),
        exchange("https://site.test/ok", "fine", &[]),
    ];
    let report = run(&mut store, records);

    assert_eq!(report.records, 4);
    assert_eq!(report.skipped_non_http, 1);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.stored, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_index_persisted_only_at_finish() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FixtureStore::new(dir.path());
    let index_path = store.index_path().to_path_buf();

    let mut compiler = IngestionCompiler::new(&mut store, Fingerprinter::default());
    compiler
        .ingest(&exchange("https://site.test/a", "a", &[]))
        .unwrap();
    assert!(!index_path.exists());

    compiler.finish().unwrap();
    assert!(index_path.exists());
    assert_eq!(FixtureStore::open(dir.path()).unwrap().len(), 1);
}

#[test]
fn test_write_failure_is_fatal_and_index_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    // The store root is a regular file, so fixture directories cannot be created.
    let root = dir.path().join("blocked");
    std::fs::write(&root, b"").unwrap();
    let mut store = FixtureStore::new(&root);

    let result = compile(
        &mut store,
        Fingerprinter::default(),
        vec![Ok(exchange("https://site.test/a", "a", &[]))],
    );
    assert!(matches!(result, Err(IngestError::Store(_))));
    assert!(!store.index_path().exists());
}

#[test]
fn test_reingest_into_existing_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = FixtureStore::new(dir.path());
        run(&mut store, vec![exchange("https://site.test/r", "A", &[])]);
    }

    let mut store = FixtureStore::open(dir.path()).unwrap();
    let report = run(
        &mut store,
        vec![
            exchange("https://site.test/r", "A", &[]),
            exchange("https://site.test/r", "B", &[]),
        ],
    );
    assert_eq!(report.duplicates, 1);
    assert_eq!(body_at(&store, &seq(&base_of("/r"), 1)), "B");
}

#[test]
fn test_compile_from_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("capture.jsonl");
    let lines = [
        exchange("https://site.test/one", "1", &[]),
        CaptureRecord::Other,
        exchange("https://site.test/one", "2", &[]),
    ]
    .iter()
    .map(|r| serde_json::to_string(r).unwrap())
    .collect::<Vec<_>>()
    .join("\n");
    std::fs::write(&capture, lines).unwrap();

    let mut store = FixtureStore::new(dir.path().join("fixtures"));
    let report = compile(
        &mut store,
        Fingerprinter::default(),
        CaptureReader::open(&capture).unwrap(),
    )
    .unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.variants, 1);
}
