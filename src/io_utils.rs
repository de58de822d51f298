//! I/O helpers shared by the harness commands.
//!
//! Every document the harness writes (snapshots, summaries, manifests) goes
//! through [`render_json_pretty`] so that re-running a command over unchanged
//! inputs produces byte-identical files. The `-` path convention routes output
//! to stdout.

use std::{
    fs::{self, File},
    io::{self, BufReader, Write},
    path::{Component, Path},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use log::warn;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Like [`resolve_encoding`], but an unknown label degrades to UTF-8 with a warning.
pub fn resolve_encoding_or_utf8(label: Option<&str>) -> &'static Encoding {
    resolve_encoding(label).unwrap_or_else(|err| {
        warn!("{err}; decoding bytes as UTF-8");
        UTF_8
    })
}

/// Two-space indented JSON with a trailing newline.
pub fn render_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).context("Serializing JSON document")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write `bytes` to `path`, creating parent directories as needed.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating output directory {parent:?}"))?;
    }
    fs::write(path, bytes).with_context(|| format!("Writing {path:?}"))
}

/// Render `value` and write it to `path` (or stdout for `None`/`-`), returning the bytes.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<Vec<u8>> {
    let bytes = render_json_pretty(value)?;
    match path {
        Some(p) if !is_dash(p) => write_bytes(p, &bytes)?,
        _ => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes).context("Writing to stdout")?;
            stdout.flush().context("Flushing stdout")?;
        }
    }
    Ok(bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing JSON from {path:?}"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Forward-slash rendering of a path, independent of the host separator.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::RootDir => Some(String::new()),
            Component::CurDir => None,
            Component::ParentDir => Some("..".to_string()),
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        })
        .collect::<Vec<_>>()
        .join("/")
}
