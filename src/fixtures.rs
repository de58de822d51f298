use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::{error::HarnessError, io_utils::slash_path};

pub const DEFAULT_EXTENSION: &str = "sas7bdat";
pub const DEFAULT_FIXTURES_DIR: &str = "fixtures/raw_data";

/// Fixtures no reference reader can represent faithfully.
pub const DEFAULT_SKIP_FIXTURES: &[&str] = &[
    "fixtures/raw_data/pandas/corrupt.sas7bdat",
    "fixtures/raw_data/pandas/zero_variables.sas7bdat",
    "fixtures/raw_data/csharp/54-class.sas7bdat",
    "fixtures/raw_data/csharp/54-cookie.sas7bdat",
    "fixtures/raw_data/csharp/charset_zpce.sas7bdat",
    "fixtures/raw_data/csharp/date_format_dtdate.sas7bdat",
    "fixtures/raw_data/csharp/date_formats.sas7bdat",
    "fixtures/raw_data/ahs2013/topical.sas7bdat",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    /// Path relative to the root, `/`-separated.
    pub key: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
    pub fixtures: Vec<Fixture>,
    pub skipped: Vec<String>,
}

impl FixtureSet {
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

pub struct Discovery<'a> {
    pub root: &'a Path,
    pub extension: &'a str,
    pub skip: &'a BTreeSet<String>,
}

impl Discovery<'_> {
    pub fn discover(&self, dirs: &[PathBuf]) -> Result<FixtureSet> {
        let extension = self.extension.trim().trim_start_matches('.');
        let mut entries: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut skipped = BTreeSet::new();

        for dir in dirs {
            let dir = resolve_against(self.root, dir);
            if !dir.is_dir() {
                return Err(HarnessError::MissingFixturesDir(dir).into());
            }
            let mut paths = Vec::new();
            for entry in WalkDir::new(&dir).follow_links(true) {
                let entry =
                    entry.with_context(|| format!("Scanning fixtures directory {dir:?}"))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let matches = entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
                if matches {
                    paths.push(entry.into_path());
                }
            }
            paths.sort();

            for path in paths {
                let key = fixture_key(&path, self.root);
                if self.skip.contains(&key) {
                    warn!("[skip] {key}");
                    skipped.insert(key);
                    continue;
                }
                if let Some(existing) = entries.get(&key) {
                    return Err(HarnessError::DuplicateFixture {
                        key,
                        path,
                        existing: existing.clone(),
                    }
                    .into());
                }
                entries.insert(key, path);
            }
        }

        debug!(
            "Discovered {} fixture(s), skipped {}",
            entries.len(),
            skipped.len()
        );
        Ok(FixtureSet {
            fixtures: entries
                .into_iter()
                .map(|(key, path)| Fixture { key, path })
                .collect(),
            skipped: skipped.into_iter().collect(),
        })
    }
}

pub fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Key of `path` relative to `root`; absolute when the fixture lives elsewhere.
pub fn fixture_key(path: &Path, root: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let base = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    match resolved.strip_prefix(&base) {
        Ok(relative) => slash_path(relative),
        Err(_) => slash_path(&resolved),
    }
}

/// Built-in skip keys plus any configured extras.
pub fn skip_set<I, S>(extra: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    DEFAULT_SKIP_FIXTURES
        .iter()
        .map(|key| key.to_string())
        .chain(
            extra
                .into_iter()
                .map(|key| key.as_ref().trim().to_string())
                .filter(|key| !key.is_empty()),
        )
        .collect()
}
