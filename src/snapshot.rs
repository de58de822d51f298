use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    canonical::{CanonicalValue, canonicalize},
    error::HarnessError,
    format::{FormatCatalog, TemporalKind},
    io_utils,
    raw::{ColumnMeta, RawTable, RawValue},
};

/// Canonical row-major dump of one fixture as read by one reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub rows: Vec<Vec<CanonicalValue>>,
}

impl SnapshotDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let document: Self =
            io_utils::read_json(path).with_context(|| format!("Loading snapshot from {path:?}"))?;
        if document.row_count != document.rows.len() {
            debug!(
                "Snapshot {path:?} declares {} row(s) but carries {}",
                document.row_count,
                document.rows.len()
            );
        }
        Ok(document)
    }
}

pub struct SnapshotBuilder {
    columns: Vec<String>,
    kinds: Vec<TemporalKind>,
    rows: Vec<Vec<CanonicalValue>>,
}

impl SnapshotBuilder {
    /// Classifies every column's display format once up front.
    pub fn new(columns: &[ColumnMeta], catalog: &FormatCatalog) -> Self {
        let kinds = columns
            .iter()
            .map(|meta| catalog.classify(meta.format_hint()))
            .collect::<Vec<_>>();
        for (meta, kind) in columns.iter().zip(&kinds) {
            if *kind != TemporalKind::Unclassified {
                debug!("Column '{}' classified as {}", meta.name, kind.as_str());
            }
        }
        Self {
            columns: columns.iter().map(|meta| meta.name.clone()).collect(),
            kinds,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: &[RawValue]) -> Result<()> {
        if row.len() != self.kinds.len() {
            return Err(HarnessError::RowWidth {
                row: self.rows.len() + 1,
                actual: row.len(),
                expected: self.kinds.len(),
            }
            .into());
        }
        self.rows.push(
            row.iter()
                .zip(&self.kinds)
                .map(|(value, kind)| canonicalize(value, *kind))
                .collect(),
        );
        Ok(())
    }

    pub fn finish(self) -> SnapshotDocument {
        SnapshotDocument {
            columns: self.columns,
            row_count: self.rows.len(),
            rows: self.rows,
        }
    }
}

pub fn build_snapshot<I>(
    columns: &[ColumnMeta],
    rows: I,
    catalog: &FormatCatalog,
) -> Result<SnapshotDocument>
where
    I: IntoIterator<Item = Result<Vec<RawValue>>>,
{
    let mut builder = SnapshotBuilder::new(columns, catalog);
    for row in rows {
        builder.push_row(&row?)?;
    }
    Ok(builder.finish())
}

/// Canonicalize a materialized table, consuming its rows as they are converted.
pub fn snapshot_table(table: RawTable, catalog: &FormatCatalog) -> Result<SnapshotDocument> {
    let RawTable { columns, rows, .. } = table;
    build_snapshot(&columns, rows.into_iter().map(Ok), catalog)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn table() -> RawTable {
        RawTable::new(
            vec![
                ColumnMeta::new("id", "double"),
                ColumnMeta::new("born", "double").with_format("DATE9"),
                ColumnMeta::new("seen", "double").with_format("DATETIME20"),
                ColumnMeta::new("name", "string").with_format("$CHAR8"),
            ],
            vec![
                vec![
                    RawValue::Int(1),
                    RawValue::Date(NaiveDate::from_ymd_opt(1960, 1, 2).expect("date")),
                    RawValue::Float(60.0),
                    RawValue::Text("Ann".to_string()),
                ],
                vec![
                    RawValue::Float(f64::NAN),
                    RawValue::Null,
                    RawValue::Text("1960-01-01 00:00:30".to_string()),
                    RawValue::Bytes(vec![0xff]),
                ],
            ],
        )
    }

    #[test]
    fn snapshot_canonicalizes_by_column_format() {
        let document = snapshot_table(table(), &FormatCatalog::default()).expect("snapshot");
        assert_eq!(document.columns, vec!["id", "born", "seen", "name"]);
        assert_eq!(document.row_count, 2);
        assert_eq!(
            document.rows[0],
            vec![
                CanonicalValue::Number(1.0),
                CanonicalValue::Date(1.0),
                CanonicalValue::DateTime(60.0),
                CanonicalValue::String("Ann".to_string()),
            ]
        );
        assert_eq!(document.rows[1][0], CanonicalValue::Missing);
        assert_eq!(document.rows[1][1], CanonicalValue::Missing);
        assert_eq!(document.rows[1][2], CanonicalValue::DateTime(30.0));
        assert_eq!(document.rows[1][3], CanonicalValue::Bytes(vec![0xff]));
    }

    #[test]
    fn consumed_table_matches_the_row_stream() {
        let source = table();
        let streamed = build_snapshot(
            &source.columns,
            source.rows.clone().into_iter().map(Ok),
            &FormatCatalog::default(),
        )
        .expect("stream");
        let consumed = snapshot_table(source, &FormatCatalog::default()).expect("snapshot");
        assert_eq!(consumed, streamed);
        assert_eq!(consumed.row_count, consumed.rows.len());
    }

    #[test]
    fn zero_row_tables_keep_their_columns() {
        let table = RawTable::new(vec![ColumnMeta::new("a", "double")], Vec::new());
        let document = snapshot_table(table, &FormatCatalog::default()).expect("snapshot");
        assert_eq!(document.columns, vec!["a"]);
        assert_eq!(document.row_count, 0);
        assert!(document.rows.is_empty());
    }

    #[test]
    fn ragged_rows_fail_the_fixture() {
        let rows = vec![Ok(vec![RawValue::Int(1)]), Ok(Vec::new())];
        let err = build_snapshot(
            &[ColumnMeta::new("a", "double")],
            rows,
            &FormatCatalog::default(),
        )
        .expect_err("ragged");
        assert!(err.to_string().contains("row 2"), "{err}");
    }

    #[test]
    fn snapshot_json_has_stable_shape() {
        let document = snapshot_table(table(), &FormatCatalog::default()).expect("snapshot");
        let rendered = io_utils::render_json_pretty(&document).expect("render");
        let text = String::from_utf8(rendered).expect("utf8");
        assert!(text.starts_with("{\n  \"columns\": ["), "{text}");
        assert!(text.ends_with("}\n"));
        let reparsed: SnapshotDocument = serde_json::from_str(&text).expect("reparse");
        assert_eq!(reparsed, document);
    }
}
