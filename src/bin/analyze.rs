//! Analyze one trace file and print the report as JSON.
//!
//! Usage: analyze <trace.json> [--no-cache]
//! Honors the analysis env overrides and CACHE_DIR.

use std::env;
use std::path::PathBuf;

use sightline::analysis::analyze_path;
use sightline::cache::ResultCache;
use sightline::config::{AnalysisConfig, ServerConfig};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let no_cache = args.iter().any(|a| a == "--no-cache");
    let path = match args.iter().find(|a| !a.starts_with("--")) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: analyze <trace.json> [--no-cache]");
            std::process::exit(1);
        }
    };

    let cfg = AnalysisConfig::from_env();
    let cache = (!no_cache).then(|| ResultCache::new(ServerConfig::from_env().cache_dir));

    let report = match analyze_path(&path, &cfg, cache.as_ref()) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("analysis failed: {:#}", err);
            std::process::exit(2);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(err) => {
            eprintln!("failed to render report: {}", err);
            std::process::exit(3);
        }
    }
}
