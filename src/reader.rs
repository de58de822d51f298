//! Reference reader plumbing.
//!
//! A reader turns a fixture into a raw dump stream. Two sources are supported:
//! pre-generated dumps under a directory (`<dir>/<key>.jsonl`) and an external
//! program that prints the dump for the fixture path it receives as its last
//! argument.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufRead, BufReader, Cursor},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::HarnessError,
    fixtures::Fixture,
    io_utils,
    raw::{RawDumpReader, RawTable},
    summary::{ChunkAggregator, DatasetSummary},
};

pub type DumpStream = RawDumpReader<Box<dyn BufRead>>;

pub trait ReferenceReader {
    fn name(&self) -> &str;

    fn open(&self, fixture: &Fixture) -> Result<DumpStream>;

    /// Whether byte cells should be decoded with the dump's declared encoding.
    fn decodes_bytes(&self) -> bool {
        false
    }

    fn read_table(&self, fixture: &Fixture) -> Result<RawTable> {
        let mut table = self.open(fixture)?.into_table()?;
        if self.decodes_bytes() {
            let encoding = io_utils::resolve_encoding_or_utf8(table.encoding.as_deref());
            table.decode_byte_cells(encoding);
        }
        Ok(table)
    }

    fn summarize(&self, fixture: &Fixture, chunk_size: usize) -> Result<DatasetSummary> {
        let stream = self.open(fixture)?;
        let encoding = self
            .decodes_bytes()
            .then(|| io_utils::resolve_encoding_or_utf8(stream.header().encoding.as_deref()));
        let mut aggregator = ChunkAggregator::with_columns(stream.columns())?;
        for chunk in stream.chunks(chunk_size) {
            let mut chunk = chunk?;
            if let Some(encoding) = encoding {
                chunk.decode_byte_cells(encoding);
            }
            aggregator.ingest(&chunk)?;
        }
        Ok(aggregator.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderSource {
    DumpDir(PathBuf),
    Command(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSpec {
    pub name: String,
    #[serde(flatten)]
    pub source: ReaderSource,
    #[serde(default)]
    pub decode_bytes: bool,
}

impl ReaderSpec {
    pub fn dump_dir(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: ReaderSource::DumpDir(dir.into()),
            decode_bytes: false,
        }
    }

    pub fn command(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            source: ReaderSource::Command(argv),
            decode_bytes: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            bail!("Reader names must not be empty");
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("Reader name '{name}' cannot be used as a directory name");
        }
        if let ReaderSource::Command(argv) = &self.source
            && argv.first().is_none_or(|program| program.trim().is_empty())
        {
            bail!("Reader '{name}' has an empty command");
        }
        Ok(())
    }

    /// Dump file for `key` below `dir`; keys outside the root are re-rooted.
    pub fn dump_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(key.trim_start_matches('/')).with_extension("jsonl")
    }

    fn run_command(&self, argv: &[String], fixture: &Fixture) -> Result<Vec<u8>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("Reader '{}' has an empty command", self.name))?;
        debug!("Running {program} {args:?} {:?}", fixture.path);
        let output = Command::new(program)
            .args(args)
            .arg(&fixture.path)
            .output()
            .with_context(|| format!("Launching reader '{}' ({program})", self.name))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let details = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                format!("exited with {}: {stderr}", output.status)
            };
            return Err(HarnessError::ReaderFailed {
                reader: self.name.clone(),
                fixture: fixture.path.clone(),
                details,
            }
            .into());
        }
        Ok(output.stdout)
    }
}

impl ReferenceReader for ReaderSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, fixture: &Fixture) -> Result<DumpStream> {
        let source: Box<dyn BufRead> = match &self.source {
            ReaderSource::DumpDir(dir) => {
                let path = Self::dump_path(dir, &fixture.key);
                let file = File::open(&path).with_context(|| {
                    format!("Opening {} dump for {} at {path:?}", self.name, fixture.key)
                })?;
                Box::new(BufReader::new(file))
            }
            ReaderSource::Command(argv) => Box::new(Cursor::new(self.run_command(argv, fixture)?)),
        };
        RawDumpReader::new(source)
            .with_context(|| format!("Reading {} dump header for {}", self.name, fixture.key))
    }

    fn decodes_bytes(&self) -> bool {
        self.decode_bytes
    }
}

/// Which configured readers a command runs, and with which tweaks.
#[derive(Debug, Default)]
pub struct ReaderSelection<'a> {
    pub only: &'a [String],
    pub decode_bytes: &'a [String],
}

impl ReaderSelection<'_> {
    /// Merge configured and command-line readers in order, then filter.
    pub fn resolve(&self, configured: &[ReaderSpec], extra: &[ReaderSpec]) -> Result<Vec<ReaderSpec>> {
        let mut seen = BTreeSet::new();
        let mut readers = Vec::with_capacity(configured.len() + extra.len());
        for reader in configured.iter().chain(extra) {
            reader.validate()?;
            if !seen.insert(reader.name.clone()) {
                bail!("Reader '{}' is defined more than once", reader.name);
            }
            readers.push(reader.clone());
        }

        for name in self.decode_bytes {
            let reader = readers
                .iter_mut()
                .find(|reader| &reader.name == name)
                .ok_or_else(|| HarnessError::UnknownReader(name.clone()))?;
            reader.decode_bytes = true;
        }
        if let Some(unknown) = self.only.iter().find(|name| !seen.contains(*name)) {
            return Err(HarnessError::UnknownReader(unknown.clone()).into());
        }
        if !self.only.is_empty() {
            readers.retain(|reader| self.only.contains(&reader.name));
        }
        if readers.is_empty() {
            bail!("No reference readers configured; pass --dump-dir, --reader-cmd or --config");
        }
        Ok(readers)
    }
}
