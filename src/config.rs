use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    compare::Tolerance,
    fixtures,
    format::{FormatCatalog, FormatOverrides},
    reader::{ReaderSource, ReaderSpec},
};

/// Optional harness settings file. Every field has a default, so an empty
/// document is valid.
///
/// ```yaml
/// extension: sas7bdat
/// chunk_size: 50000
/// skip:
///   - fixtures/raw_data/local/huge.sas7bdat
/// formats:
///   date: [yymmdd10]
/// tolerance:
///   rel: 1.0e-9
///   abs: 1.0e-9
/// readers:
///   - name: pandas
///     dump_dir: dumps/pandas
///   - name: pyreadstat
///     command: [python3, scripts/dump_pyreadstat.py]
///     decode_bytes: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub extension: Option<String>,
    pub chunk_size: Option<usize>,
    pub skip: Vec<String>,
    pub formats: FormatOverrides,
    pub tolerance: Option<ToleranceConfig>,
    pub readers: Vec<ReaderSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToleranceConfig {
    pub rel: Option<f64>,
    pub abs: Option<f64>,
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Opening config file {path:?}"))?;
        let mut config: HarnessConfig = if text.trim().is_empty() {
            HarnessConfig::default()
        } else {
            serde_yaml::from_str(&text).with_context(|| format!("Parsing config YAML {path:?}"))?
        };
        if let Some(base) = path.parent() {
            config.rebase_dump_dirs(base);
        }
        config.validate()?;
        debug!(
            "Loaded config {path:?}: {} reader(s), {} extra skip(s)",
            config.readers.len(),
            config.skip.len()
        );
        Ok(config)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    // Relative dump directories are relative to the config file.
    fn rebase_dump_dirs(&mut self, base: &Path) {
        for reader in &mut self.readers {
            if let ReaderSource::DumpDir(dir) = &mut reader.source
                && dir.is_relative()
            {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            bail!("chunk_size must be greater than zero");
        }
        if let Some(tolerance) = &self.tolerance {
            for (field, value) in [("rel", tolerance.rel), ("abs", tolerance.abs)] {
                if let Some(value) = value
                    && !(value.is_finite() && value >= 0.0)
                {
                    bail!("tolerance.{field} must be a non-negative number, got {value}");
                }
            }
        }
        for reader in &self.readers {
            reader.validate()?;
        }
        self.format_catalog()?;
        Ok(())
    }

    pub fn format_catalog(&self) -> Result<FormatCatalog> {
        Ok(FormatCatalog::with_overrides(&self.formats)?)
    }

    pub fn skip_set(&self) -> BTreeSet<String> {
        fixtures::skip_set(&self.skip)
    }

    pub fn extension(&self) -> &str {
        self.extension
            .as_deref()
            .unwrap_or(fixtures::DEFAULT_EXTENSION)
    }

    /// Configured tolerance with command-line values layered on top.
    pub fn tolerance(
        &self,
        uniform: Option<f64>,
        rel: Option<f64>,
        abs: Option<f64>,
    ) -> Tolerance {
        let base = uniform.map_or_else(
            || {
                let configured = self.tolerance.unwrap_or_default();
                let default = Tolerance::default();
                Tolerance {
                    rel: configured.rel.unwrap_or(default.rel),
                    abs: configured.abs.unwrap_or(default.abs),
                }
            },
            Tolerance::uniform,
        );
        Tolerance {
            rel: rel.unwrap_or(base.rel),
            abs: abs.unwrap_or(base.abs),
        }
    }
}
