//! Fixture Inspector CLI
//!
//! Inspects a compiled fixture root and reports statistics.
//!
//! Usage:
//!   cargo run --bin fixture_inspector -- --root /path/to/mock_data
//!   cargo run --bin fixture_inspector -- --root /path/to/mock_data --filter /api --verbose
//!
//! The index file and default root come from `MOCKASITE_CONFIG` (see `MockConfig`).

use anyhow::{Context, Result};
use clap::Parser;
use mockasite::mock::{Fingerprint, FixtureEntry, FixtureStore};
use mockasite::MockConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fixture_inspector")]
#[command(about = "Inspect a compiled mockasite fixture root")]
struct Args {
    /// Fixture root (defaults to the configured `store.root`)
    #[arg(long, env = "MOCKASITE_ROOT")]
    root: Option<PathBuf>,

    /// Only show endpoints whose path contains this string
    #[arg(long)]
    filter: Option<String>,

    /// Show every key and its files
    #[arg(long, default_value = "false")]
    verbose: bool,
}

#[derive(Default)]
struct EndpointStats {
    method: String,
    path: String,
    stored: usize,
    tombstones: usize,
    max_sequence: u32,
    missing_files: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = MockConfig::from_env();
    if let Some(root) = args.root {
        config.store.root = root;
    }

    let mut store = config.store_handle();

    println!("=== Fixture Inspector ===");
    println!("Root: {}", store.root().display());
    println!("Index: {}", store.index_path().display());
    println!();

    store.load().context("Failed to open fixture index")?;

    let summary = store.summary();
    println!("--- Index ---");
    println!("Total keys: {}", summary.entries);
    println!("  stored:     {}", summary.stored);
    println!("  tombstones: {}", summary.tombstones);
    println!("  variants:   {}", summary.variants);
    println!();

    if store.is_empty() {
        println!("  (no data)\n");
        return Ok(());
    }

    inspect_endpoints(&store, args.filter.as_deref(), args.verbose)?;

    println!("=== Inspection Complete ===");
    Ok(())
}

fn inspect_endpoints(store: &FixtureStore, filter: Option<&str>, verbose: bool) -> Result<()> {
    println!("--- Endpoints ---");

    let mut endpoints: BTreeMap<String, EndpointStats> = BTreeMap::new();
    let mut entries: Vec<(&Fingerprint, &FixtureEntry)> = store.entries().collect();
    entries.sort_by_key(|(fp, _)| (fp.base().to_string(), fp.sequence().unwrap_or(0)));

    for (fp, entry) in entries {
        if let Some(filter) = filter {
            if !fp.path().contains(filter) {
                continue;
            }
        }
        let stats = endpoints
            .entry(fp.base().to_string())
            .or_insert_with(|| EndpointStats {
                method: fp.method().to_string(),
                path: fp.path().to_string(),
                ..Default::default()
            });
        stats.max_sequence = stats.max_sequence.max(fp.sequence().unwrap_or(0));

        match entry {
            FixtureEntry::Stored(paths) => {
                stats.stored += 1;
                let meta_ok = store.root().join(&paths.metadata).exists();
                let body_ok = store.root().join(&paths.body).exists();
                if !meta_ok || !body_ok {
                    stats.missing_files += 1;
                }
                if verbose {
                    println!("  {}", fp);
                    println!("    meta: {}{}", paths.metadata.display(), missing(meta_ok));
                    println!("    body: {}{}", paths.body.display(), missing(body_ok));
                }
            }
            FixtureEntry::Tombstone => {
                stats.tombstones += 1;
                if verbose {
                    println!("  {}", fp);
                    println!("    (no response recorded)");
                }
            }
        }
    }

    if verbose {
        println!();
    }

    println!("Per-endpoint breakdown:");
    let mut gaps = 0usize;
    for stats in endpoints.values() {
        let slots = stats.stored + stats.tombstones;
        let expected = stats.max_sequence as usize + 1;
        let gap_indicator = if slots < expected {
            gaps += 1;
            " [GAPS]"
        } else {
            ""
        };
        let missing_indicator = if stats.missing_files > 0 {
            format!(" [{} MISSING FILES]", stats.missing_files)
        } else {
            String::new()
        };
        println!(
            "  {} {}: {} responses, {} tombstones, cycle length {}{}{}",
            stats.method,
            stats.path,
            stats.stored,
            stats.tombstones,
            expected,
            gap_indicator,
            missing_indicator
        );
    }

    println!("\nSequence check:");
    if gaps == 0 {
        println!("  ✓ variants are densely numbered for every endpoint");
    } else {
        println!("  ✗ {} endpoints have gaps; replay cycles stop at the first gap", gaps);
    }
    println!();
    Ok(())
}

fn missing(present: bool) -> &'static str {
    if present {
        ""
    } else {
        " [missing]"
    }
}
