use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::is_trace_name;
use super::retry::{is_retryable_http_status, is_retryable_network_error, retry_async, Permanent, RetryConfig};
use crate::logging::{self, obj, v_int, v_str, Domain};

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Local file name for a download: the URL's last path segment when it
/// names a trace, otherwise the URL's SHA-256 with a `.dem.gz` suffix.
pub fn derive_filename(raw_url: &str) -> Result<String> {
    let url = Url::parse(raw_url).with_context(|| format!("invalid url {}", raw_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported scheme {}", url.scheme()));
    }
    let last = url
        .path_segments()
        .and_then(|segs| segs.last())
        .unwrap_or("");
    if is_trace_name(last) && !last.contains("..") {
        return Ok(last.to_string());
    }
    let digest = hex::encode(Sha256::digest(raw_url.as_bytes()));
    Ok(format!("{}.dem.gz", digest))
}

pub struct Downloader {
    client: Client,
    dir: PathBuf,
    retry: RetryConfig,
}

impl Downloader {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, dir: dir.into(), retry: RetryConfig::default() })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Downloads `url` into the download directory, or returns the existing
    /// file if an earlier download already completed.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let name = derive_filename(url)?;
        let dest = self.dir.join(&name);
        if dest.is_file() {
            logging::info(Domain::Source, "download_reused", obj(&[("file", v_str(&name))]));
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let dest_ref = dest.as_path();
        let bytes = retry_async(&self.retry, "download", move || self.fetch_once(url, dest_ref)).await?;
        logging::info(
            Domain::Source,
            "download_complete",
            obj(&[("file", v_str(&name)), ("bytes", v_int(bytes))]),
        );
        Ok(dest)
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut resp = self.client.get(url).send().await.map_err(|e| {
            if is_retryable_network_error(&e) {
                anyhow!(e)
            } else {
                anyhow!(Permanent(e.to_string()))
            }
        })?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let msg = format!("HTTP {} from {}", status, url);
            return if is_retryable_http_status(status) {
                Err(anyhow!(msg))
            } else {
                Err(anyhow!(Permanent(msg)))
            };
        }

        // removed on drop unless persisted, so a failed attempt leaves nothing behind
        let tmp = NamedTempFile::new_in(&self.dir)?.into_temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tmp.persist(dest)?;
        Ok(written)
    }
}
