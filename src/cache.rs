//! File-hash keyed store of finished analysis reports.
//!
//! Entries live at `<dir>/<sha256 of trace bytes>.json`. Each write goes to
//! its own uniquely named temporary file and is renamed into place, so
//! readers never see a partial entry even when two analyses of the same
//! trace finish together. Every failure here is logged and treated as a miss.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::analysis::AnalysisReport;
use crate::logging::{self, obj, v_str, Domain};

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash))
    }

    pub fn get(&self, trace: &Path) -> Option<AnalysisReport> {
        match self.try_get(trace) {
            Ok(hit) => hit,
            Err(e) => {
                logging::warn(
                    Domain::Cache,
                    "cache_read_failed",
                    obj(&[("path", v_str(&trace.display().to_string())), ("error", v_str(&e.to_string()))]),
                );
                None
            }
        }
    }

    fn try_get(&self, trace: &Path) -> Result<Option<AnalysisReport>> {
        let hash = file_sha256(trace)?;
        let entry = self.entry_path(&hash);
        if !entry.exists() {
            logging::debug(Domain::Cache, "cache_miss", obj(&[("file_hash", v_str(&hash))]));
            return Ok(None);
        }
        let bytes = fs::read(&entry)?;
        let report = serde_json::from_slice(&bytes)
            .with_context(|| format!("decode cache entry {}", entry.display()))?;
        logging::info(Domain::Cache, "cache_hit", obj(&[("file_hash", v_str(&hash))]));
        Ok(Some(report))
    }

    pub fn put(&self, trace: &Path, report: &AnalysisReport) {
        if let Err(e) = self.try_put(trace, report) {
            logging::warn(
                Domain::Cache,
                "cache_write_failed",
                obj(&[("path", v_str(&trace.display().to_string())), ("error", v_str(&e.to_string()))]),
            );
        }
    }

    fn try_put(&self, trace: &Path, report: &AnalysisReport) -> Result<()> {
        let hash = file_sha256(trace)?;
        fs::create_dir_all(&self.dir)?;
        let entry = self.entry_path(&hash);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serde_json::to_vec(report)?)?;
        tmp.persist(&entry)?;
        logging::debug(Domain::Cache, "cache_stored", obj(&[("file_hash", v_str(&hash))]));
        Ok(())
    }
}
