//! Sequential batch driver.
//!
//! Readers run in configured order and fixtures in key order, one at a time.
//! A fixture that fails for one reader is recorded and the batch moves on;
//! only misconfiguration (unwritable output, duplicate keys) stops the run.

use std::path::{Path, PathBuf};

use anyhow::Result;
use itertools::Itertools;
use log::{error, info, warn};
use serde::Serialize;

use crate::{
    fixtures::{Fixture, FixtureSet},
    io_utils,
    reader::ReferenceReader,
    table::{Align, TextTable},
};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Snapshot,
    Summary,
}

impl Artifact {
    fn extension(self) -> &'static str {
        match self {
            Artifact::Snapshot => "json",
            Artifact::Summary => "summary.json",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Artifact::Snapshot => "snapshot",
            Artifact::Summary => "summary",
        }
    }
}

/// `<output>/<reader>/<key>` with the fixture extension replaced.
pub fn artifact_path(output: &Path, reader: &str, key: &str, artifact: Artifact) -> PathBuf {
    output
        .join(reader)
        .join(key.trim_start_matches('/'))
        .with_extension(artifact.extension())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureFailure {
    pub reader: String,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: Vec<ManifestEntry>,
    pub failures: Vec<FixtureFailure>,
    pub skipped: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure and skip listing for the end-of-run log.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if !self.failures.is_empty() {
            let mut table = TextTable::new(["reader", "fixture", "error"]);
            for failure in &self.failures {
                table.push_row([
                    failure.reader.as_str(),
                    failure.key.as_str(),
                    failure.error.as_str(),
                ]);
            }
            out.push_str(&table.render());
        }
        if !self.skipped.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            let mut table = TextTable::new(["skipped fixture"]);
            for key in &self.skipped {
                table.push_row([key.as_str()]);
            }
            out.push_str(&table.render());
        }
        let per_reader = self
            .written
            .iter()
            .filter_map(|entry| entry.path.split_once('/').map(|(reader, _)| reader))
            .counts();
        if !per_reader.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            let mut table = TextTable::new(["reader", "written"]).align(1, Align::Right);
            for (reader, count) in per_reader.into_iter().sorted() {
                table.push_row([reader.to_string(), count.to_string()]);
            }
            out.push_str(&table.render());
        }
        out
    }
}

/// Run `job` for every (reader, fixture) pair and write each document under `output`.
pub fn run_batch<R, T, F>(
    fixtures: &FixtureSet,
    readers: &[R],
    output: &Path,
    artifact: Artifact,
    mut job: F,
) -> Result<BatchOutcome>
where
    R: ReferenceReader,
    T: Serialize,
    F: FnMut(&R, &Fixture) -> Result<T>,
{
    let mut outcome = BatchOutcome {
        skipped: fixtures.skipped.clone(),
        ..BatchOutcome::default()
    };
    for reader in readers {
        let name = reader.name();
        for fixture in &fixtures.fixtures {
            let document = match job(reader, fixture) {
                Ok(document) => document,
                Err(err) => {
                    error!("[error] {name} failed for {}: {err:#}", fixture.key);
                    outcome.failures.push(FixtureFailure {
                        reader: name.to_string(),
                        key: fixture.key.clone(),
                        error: format!("{err:#}"),
                    });
                    continue;
                }
            };
            let target = artifact_path(output, name, &fixture.key, artifact);
            let bytes = io_utils::render_json_pretty(&document)?;
            io_utils::write_bytes(&target, &bytes)?;
            info!("[ok] {name} {} -> {target:?}", artifact.label());
            let relative = target.strip_prefix(output).unwrap_or(target.as_path());
            outcome.written.push(ManifestEntry {
                path: io_utils::slash_path(relative),
                sha256: io_utils::sha256_hex(&bytes),
            });
        }
    }

    if !outcome.skipped.is_empty() {
        warn!("Skipped {} fixture(s) listed as unsupported", outcome.skipped.len());
    }
    write_manifest(output, &outcome.written)?;
    Ok(outcome)
}

fn write_manifest(output: &Path, entries: &[ManifestEntry]) -> Result<()> {
    let sorted = entries
        .iter()
        .sorted_by(|a, b| a.path.cmp(&b.path))
        .collect::<Vec<_>>();
    io_utils::write_json_pretty(Some(output.join(MANIFEST_FILE).as_path()), &sorted)?;
    Ok(())
}
