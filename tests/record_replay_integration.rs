//! Integration tests for the record/replay pipeline
//!
//! A JSONL capture is compiled into a fixture root, reloaded from disk the
//! way `mockasite serve` does, then replayed through the axum router.
//! The CLI binary is exercised for `ingest` and `fingerprint`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use mockasite::mock::fingerprint::{hash_crc32, NO_ORIGIN};
use mockasite::mock::{self, CaptureReader, Fingerprinter, FixtureStore, MatchingEngine};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tower::ServiceExt;

const CAPTURE: &str = r#"{"type":"http","request":{"method":"GET","url":"https://api.site.test/v1/feed?page=1&utm_source=mail","headers":[]},"response":{"status_code":200,"headers":[["Content-Type","application/json"],["Date","Mon, 01 Jan 2024 00:00:00 GMT"]],"body":"QQ=="}}
{"type":"websocket","flow_id":"abc"}
{"type":"http","request":{"method":"GET","url":"https://api.site.test/v1/feed?page=2","headers":[]},"response":{"status_code":200,"headers":[["Content-Type","application/json"],["Date","Mon, 01 Jan 2024 00:00:05 GMT"]],"body":"Qg=="}}

{"type":"http","request":{"method":"GET","url":"https://api.site.test/v1/feed?page=3","headers":[]},"response":{"status_code":200,"headers":[["Content-Type","application/json"],["Content-Length","1"]],"body":"Qw=="}}
{"type":"http","request":{"method":"GET","url":"https://api.site.test/v1/feed?page=4","headers":[]},"response":{"status_code":200,"headers":[["Content-Type","application/json"]],"body":"Qw=="}}
{"type":"http","request":{"method":"POST","url":"https://api.site.test/v1/login","headers":[["Origin","https://app.site.test"]]},"response":null}
{"type":"http","request":{"method":"GET","url":"https://cdn.site.test/app.js","headers":[["Origin","ftp://bad"]]},"response":{"status_code":200,"headers":[],"body":""}}
"#;

fn write_capture(dir: &Path) -> PathBuf {
    let path = dir.join("capture.jsonl");
    fs::write(&path, CAPTURE).unwrap();
    path
}

fn compile_capture(root: &Path, capture: &Path) -> mock::IngestReport {
    let mut store = FixtureStore::new(root);
    let reader = CaptureReader::open(capture).unwrap();
    mock::compile(&mut store, Fingerprinter::default(), reader).unwrap()
}

fn replay_router(root: &Path) -> Router {
    let store = FixtureStore::open(root).unwrap();
    let engine = Arc::new(MatchingEngine::new(
        Arc::new(store),
        Fingerprinter::default(),
    ));
    mock::server::router(engine, true)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[test]
fn test_capture_compiles_to_dense_variants() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path());
    let root = dir.path().join("mock_data");

    let report = compile_capture(&root, &capture);
    assert_eq!(report.records, 7);
    assert_eq!(report.skipped_non_http, 1);
    assert_eq!(report.rejected, 1);
    // A at base, B and C as variants; the trailing C differs from base so it is
    // stored again as a third variant
    assert_eq!(report.stored, 4);
    assert_eq!(report.variants, 3);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.tombstones, 1);

    let store = FixtureStore::open(&root).unwrap();
    assert_eq!(store.len(), 5);
    assert!(root.join("index.json").exists());
    assert!(root.join("api.site.test").join("v1").is_dir());
}

#[tokio::test]
async fn test_replay_cycles_through_capture_order() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path());
    let root = dir.path().join("mock_data");
    compile_capture(&root, &capture);
    let app = replay_router(&root);

    let mut served = Vec::new();
    for page in 0..8 {
        let (status, body) = send(&app, get(&format!("/v1/feed?page={}", page))).await;
        assert_eq!(status, StatusCode::OK);
        served.push(String::from_utf8(body).unwrap());
    }
    assert_eq!(served, vec!["A", "B", "C", "C", "A", "B", "C", "C"]);
}

#[tokio::test]
async fn test_replay_tombstone_and_unknown_are_misses() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path());
    let root = dir.path().join("mock_data");
    compile_capture(&root, &capture);
    let app = replay_router(&root);

    let login = Request::builder()
        .method("POST")
        .uri("/v1/login")
        .header("Origin", "https://app.site.test")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, login).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["origin_header"], "https://app.site.test");
    assert_eq!(report["available_keys"].as_array().unwrap().len(), 5);

    let (status, _) = send(&app, get("/app.js")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn test_cli_ingest_and_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path());
    let root = dir.path().join("cli_root");

    let output = Command::new(env!("CARGO_BIN_EXE_mockasite"))
        .current_dir(dir.path())
        .env_remove("MOCKASITE_ROOT")
        .env_remove("MOCKASITE_CONFIG")
        .env("RUST_LOG", "mockasite=debug")
        .arg("ingest")
        .arg("--capture")
        .arg(&capture)
        .arg("--root")
        .arg(&root)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    // Logs stay on stderr so the report on stdout parses as-is
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["variants"], 3);
    assert!(String::from_utf8_lossy(&output.stderr).contains("Ingestion complete"));
    assert!(root.join("index.json").exists());

    let output = Command::new(env!("CARGO_BIN_EXE_mockasite"))
        .current_dir(dir.path())
        .env_remove("MOCKASITE_CONFIG")
        .args(["fingerprint", "--method", "GET", "--path", "/v1/feed"])
        .args(["--query", "page,utm_source"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let printed = String::from_utf8(output.stdout).unwrap();
    assert_eq!(
        printed.trim(),
        format!("GET|/v1/feed|{}|{}", hash_crc32("page"), hash_crc32(NO_ORIGIN))
    );
}

#[tokio::test]
async fn test_percent_encoded_path_matches_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("encoded.jsonl");
    fs::write(
        &capture,
        concat!(
            r#"{"type":"http","request":{"method":"GET","url":"https://site.test/files/report%202024.pdf","headers":[]},"response":{"status_code":200,"headers":[],"body":"UERG"}}"#,
            "\n",
            r#"{"type":"http","request":{"method":"GET","url":"https://site.test/docs/./guide/../intro","headers":[]},"response":{"status_code":200,"headers":[],"body":"aW50cm8="}}"#,
            "\n",
        ),
    )
    .unwrap();
    let root = dir.path().join("mock_data");
    compile_capture(&root, &capture);
    let app = replay_router(&root);

    // Percent-encoding is kept verbatim on both sides
    let (status, body) = send(&app, get("/files/report%202024.pdf")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"PDF");

    // Dot segments are resolved at capture time, as a browser resolves them
    let (status, body) = send(&app, get("/docs/intro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"intro");
}

#[test]
fn test_inspector_reads_configured_index_file() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path());
    let config_path = dir.path().join("custom.toml");
    fs::write(
        &config_path,
        "[store]\nroot = \"fixtures\"\nindex_file = \"catalog.json\"\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_mockasite"))
        .current_dir(dir.path())
        .env_remove("MOCKASITE_ROOT")
        .env("MOCKASITE_CONFIG", &config_path)
        .arg("ingest")
        .arg("--capture")
        .arg(&capture)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("fixtures").join("catalog.json").exists());
    assert!(!dir.path().join("fixtures").join("index.json").exists());

    let output = Command::new(env!("CARGO_BIN_EXE_fixture_inspector"))
        .current_dir(dir.path())
        .env_remove("MOCKASITE_ROOT")
        .env("MOCKASITE_CONFIG", &config_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let printed = String::from_utf8(output.stdout).unwrap();
    assert!(printed.contains("catalog.json"), "{}", printed);
    assert!(printed.contains("Total keys: 5"), "{}", printed);
}
