use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::HarnessError,
    io_utils,
    raw::{ColumnKind, ColumnMeta, RawChunk, RawValue, lenient_float},
};

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: u64,
    #[serde(with = "lenient_float")]
    pub sum: f64,
    #[serde(default, with = "lenient_float::option")]
    pub min: Option<f64>,
    #[serde(default, with = "lenient_float::option")]
    pub max: Option<f64>,
}

impl NumericSummary {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(match self.min {
            Some(current) => current.min(value),
            None => value,
        });
        self.max = Some(match self.max {
            Some(current) => current.max(value),
            None => value,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub index: usize,
    pub name: String,
    pub label: Option<String>,
    pub format: Option<String>,
    pub kind: ColumnKind,
    pub non_missing: u64,
    pub missing: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericSummary>,
}

impl ColumnSummary {
    pub fn from_meta(index: usize, meta: &ColumnMeta) -> Self {
        let kind = meta.kind();
        Self {
            index,
            name: meta.name.clone(),
            label: meta.label().map(str::to_string),
            format: meta.format_hint().map(str::to_string),
            kind,
            non_missing: 0,
            missing: 0,
            numeric: (kind == ColumnKind::Numeric).then(NumericSummary::default),
        }
    }

    fn observe(&mut self, values: &[RawValue]) {
        let missing = values.iter().filter(|value| value.is_missing()).count() as u64;
        self.missing += missing;
        self.non_missing += values.len() as u64 - missing;
        if let Some(stats) = self.numeric.as_mut() {
            values
                .iter()
                .filter(|value| !value.is_missing())
                .filter_map(RawValue::coerce_f64)
                .for_each(|value| stats.add(value));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub row_count: u64,
    pub columns: Vec<ColumnSummary>,
}

impl DatasetSummary {
    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_json(path).with_context(|| format!("Loading summary from {path:?}"))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSummary> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Per-fixture accumulator fed one chunk at a time.
///
/// Values are folded into each running sum one by one in row order, so the
/// result does not depend on where chunk boundaries fall.
#[derive(Debug, Default)]
pub struct ChunkAggregator {
    positions: HashMap<String, usize>,
    columns: Vec<ColumnSummary>,
    row_count: u64,
    chunks_seen: usize,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from known metadata so fixtures without rows still report their columns.
    pub fn with_columns(columns: &[ColumnMeta]) -> Result<Self> {
        let mut aggregator = Self::new();
        aggregator.initialize(columns)?;
        Ok(aggregator)
    }

    fn initialize(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        for (index, meta) in columns.iter().enumerate() {
            if self.positions.insert(meta.name.clone(), index).is_some() {
                return Err(HarnessError::MalformedChunk(format!(
                    "column '{}' is declared twice",
                    meta.name
                ))
                .into());
            }
            self.columns.push(ColumnSummary::from_meta(index, meta));
        }
        Ok(())
    }

    pub fn ingest(&mut self, chunk: &RawChunk) -> Result<()> {
        self.chunks_seen += 1;
        if self.chunks_seen == 1 && self.columns.is_empty() {
            self.initialize(chunk.columns())?;
        }
        if chunk.columns().len() != self.columns.len() {
            return Err(HarnessError::ChunkMismatch {
                chunk: self.chunks_seen,
                reason: format!(
                    "{} column(s) present, expected {}",
                    chunk.columns().len(),
                    self.columns.len()
                ),
            }
            .into());
        }
        // Validate the whole chunk before touching any summary.
        let targets = chunk
            .iter()
            .map(|(meta, values)| {
                self.positions
                    .get(&meta.name)
                    .copied()
                    .map(|position| (position, values))
                    .ok_or_else(|| HarnessError::ChunkMismatch {
                        chunk: self.chunks_seen,
                        reason: format!("unexpected column '{}'", meta.name),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen = vec![false; self.columns.len()];
        for (position, _) in &targets {
            if std::mem::replace(&mut seen[*position], true) {
                return Err(HarnessError::ChunkMismatch {
                    chunk: self.chunks_seen,
                    reason: format!("column '{}' appears twice", self.columns[*position].name),
                }
                .into());
            }
        }

        self.row_count += chunk.len() as u64;
        for (position, values) in targets {
            self.columns[position].observe(values);
        }
        debug!(
            "Aggregated chunk {} ({} row(s), {} total)",
            self.chunks_seen,
            chunk.len(),
            self.row_count
        );
        Ok(())
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn finish(self) -> DatasetSummary {
        let mut columns = self.columns;
        columns.sort_by_key(|column| column.index);
        DatasetSummary {
            row_count: self.row_count,
            columns,
        }
    }
}

/// Aggregate a full chunk sequence; the first read error discards everything.
pub fn summarize_chunks<I>(chunks: I) -> Result<DatasetSummary>
where
    I: IntoIterator<Item = Result<RawChunk>>,
{
    let mut aggregator = ChunkAggregator::new();
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let chunk = chunk.with_context(|| format!("Reading chunk {}", idx + 1))?;
        aggregator.ingest(&chunk)?;
    }
    Ok(aggregator.finish())
}
