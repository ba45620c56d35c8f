//! Where trace files come from: local paths, direct URLs, share codes and
//! the match-history API.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;

use crate::logging::{self, obj, v_int, v_str, Domain};

mod download;
pub mod faceit;
pub mod retry;
pub mod sharecode;

pub use download::{derive_filename, Downloader};

/// Accepted file name endings for uploads and downloads.
pub const TRACE_EXTENSIONS: [&str; 6] = [".json", ".json.gz", ".json.zst", ".dem", ".dem.gz", ".dem.zst"];

const COMPRESSED: [&str; 2] = [".gz", ".zst"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Zstd,
}

pub fn is_trace_name(name: &str) -> bool {
    TRACE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

fn strip_compression(name: &str) -> Option<&str> {
    COMPRESSED.iter().find_map(|ext| name.strip_suffix(ext))
}

/// An existing `.json` export next to a demo, compressed or not.
fn demo_export(path: &Path, plain: &str) -> Option<PathBuf> {
    let stem = plain.strip_suffix(".dem")?;
    [format!("{}.json", stem), format!("{}.dem.json", stem)]
        .into_iter()
        .map(|name| path.with_file_name(name))
        .find(|p| p.is_file())
}

fn sniff(path: &Path) -> Result<Option<Codec>> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }
    let magic = &magic[..read];
    Ok(if magic.starts_with(&GZIP_MAGIC) {
        Some(Codec::Gzip)
    } else if magic.starts_with(&ZSTD_MAGIC) {
        Some(Codec::Zstd)
    } else {
        None
    })
}

/// Unpacks `path` into `target` through a temp file in the same directory,
/// so a concurrent reader never sees a partial trace.
fn decompress(path: &Path, target: &Path, codec: Codec) -> Result<()> {
    let dir = target
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let src = BufReader::new(File::open(path)?);
    match codec {
        Codec::Gzip => io::copy(&mut MultiGzDecoder::new(src), tmp.as_file_mut()).map(|_| ()),
        Codec::Zstd => zstd::stream::copy_decode(src, tmp.as_file_mut()),
    }
    .with_context(|| format!("decompressing {}", path.display()))?;
    let written = tmp.as_file().metadata()?.len();
    tmp.persist(target)?;

    logging::info(
        Domain::Source,
        "trace_decompressed",
        obj(&[
            ("file", v_str(&target.display().to_string())),
            ("codec", v_str(&format!("{:?}", codec))),
            ("bytes", v_int(written)),
        ]),
    );
    Ok(())
}

/// Maps a stored upload or download to the trace export the analyzer reads.
///
/// A `.dem` prefers a `.json` export next to it. A `.gz` or `.zst` file is
/// unpacked once into its extension-stripped sibling, which later calls
/// reuse. Files carrying a compression suffix but no matching magic bytes
/// are read as they are.
pub fn resolve_trace_path(path: &Path) -> Result<PathBuf> {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return Ok(path.to_path_buf()),
    };
    let stripped = strip_compression(name);
    if let Some(export) = demo_export(path, stripped.unwrap_or(name)) {
        return Ok(export);
    }
    if !path.is_file() {
        bail!("trace not found: {}", path.display());
    }
    let plain = match stripped {
        Some(plain) => path.with_file_name(plain),
        None => return Ok(path.to_path_buf()),
    };
    if plain.is_file() {
        return Ok(plain);
    }
    match sniff(path)? {
        Some(codec) => {
            decompress(path, &plain, codec)?;
            Ok(plain)
        }
        None => Ok(path.to_path_buf()),
    }
}
