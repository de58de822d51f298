//! Cell-by-cell comparison of an actual snapshot against a reference one.
//!
//! Reference readers disagree with each other in a handful of known, benign
//! ways (a number where a date was expected, mojibake in Latin-1 captured
//! text, a reference that gave up and reported missing). Those are accepted
//! and counted in [`RelaxationCounts`] rather than reported.

use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::{
    canonical::{CanonicalKind, CanonicalValue, SECONDS_PER_DAY},
    snapshot::SnapshotDocument,
};

pub const DEFAULT_MAX_DIFFERENCES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapshotTolerances {
    pub number: f64,
    pub date: f64,
    pub time: f64,
    pub datetime: f64,
}

impl Default for SnapshotTolerances {
    fn default() -> Self {
        Self {
            number: 1e-4,
            date: 1e-4,
            time: 1e-4,
            datetime: 1.5,
        }
    }
}

impl SnapshotTolerances {
    fn for_kind(&self, kind: CanonicalKind) -> f64 {
        match kind {
            CanonicalKind::Date => self.date,
            CanonicalKind::Time => self.time,
            CanonicalKind::DateTime => self.datetime,
            _ => self.number,
        }
    }

    fn bridges(&self, days: f64, seconds: f64) -> bool {
        days.mul_add(SECONDS_PER_DAY, -seconds).abs() <= self.datetime
            || (days - seconds / SECONDS_PER_DAY).abs() <= self.date
            || (seconds - days).abs() <= self.datetime
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelaxationCounts {
    pub column_decode: usize,
    pub kind_upgrade: usize,
    pub date_datetime_bridge: usize,
    pub string_decode: usize,
    pub missing_override: usize,
}

impl RelaxationCounts {
    pub fn total(&self) -> usize {
        self.column_decode
            + self.kind_upgrade
            + self.date_datetime_bridge
            + self.string_decode
            + self.missing_override
    }
}

impl fmt::Display for RelaxationCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relaxed comparisons: column_decode={}, kind_upgrade={}, date/datetime_bridge={}, string_decode={}, expected_missing_overridden={}",
            self.column_decode,
            self.kind_upgrade,
            self.date_datetime_bridge,
            self.string_decode,
            self.missing_override
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDifference {
    pub row: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

impl fmt::Display for SnapshotDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.row, self.column) {
            (Some(row), Some(column)) => write!(f, "row {row} column {column}: {}", self.message),
            (Some(row), None) => write!(f, "row {row}: {}", self.message),
            (None, Some(column)) => write!(f, "column {column}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOptions {
    pub tolerances: SnapshotTolerances,
    pub max_differences: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            tolerances: SnapshotTolerances::default(),
            max_differences: DEFAULT_MAX_DIFFERENCES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub differences: Vec<SnapshotDifference>,
    pub total: usize,
    pub relaxed: RelaxationCounts,
    #[serde(skip)]
    max_differences: usize,
}

impl SnapshotDiff {
    pub fn is_match(&self) -> bool {
        self.total == 0
    }

    fn record(&mut self, row: Option<usize>, column: Option<usize>, message: String) {
        self.total += 1;
        if self.differences.len() < self.max_differences {
            self.differences.push(SnapshotDifference {
                row,
                column,
                message,
            });
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for difference in &self.differences {
            let _ = writeln!(out, "{difference}");
        }
        if self.total > self.differences.len() {
            let _ = writeln!(
                out,
                "... {} more difference(s) not shown",
                self.total - self.differences.len()
            );
        }
        if self.relaxed.total() > 0 {
            let _ = writeln!(out, "{}", self.relaxed);
        }
        if self.is_match() {
            out.push_str("Snapshots match.\n");
        } else {
            let _ = writeln!(out, "Found {} difference(s).", self.total);
        }
        out
    }
}

pub fn diff_snapshots(
    actual: &SnapshotDocument,
    expected: &SnapshotDocument,
    options: &DiffOptions,
) -> SnapshotDiff {
    let mut diff = SnapshotDiff {
        max_differences: options.max_differences,
        ..SnapshotDiff::default()
    };

    if actual.columns.len() != expected.columns.len() {
        diff.record(
            None,
            None,
            format!(
                "column count mismatch: actual {} expected {}",
                actual.columns.len(),
                expected.columns.len()
            ),
        );
        return diff;
    }
    for (idx, (a, e)) in actual.columns.iter().zip(&expected.columns).enumerate() {
        if a == e {
            continue;
        }
        if expected_name_is_mojibake(a, e) {
            diff.relaxed.column_decode += 1;
            continue;
        }
        diff.record(
            None,
            Some(idx),
            format!("column name mismatch: actual {a:?} expected {e:?}"),
        );
    }

    if actual.row_count != expected.row_count || actual.rows.len() != expected.rows.len() {
        diff.record(
            None,
            None,
            format!(
                "row count mismatch: actual {} expected {}",
                actual.rows.len(),
                expected.rows.len()
            ),
        );
        return diff;
    }

    let tolerances = &options.tolerances;
    for (row_idx, (actual_row, expected_row)) in actual.rows.iter().zip(&expected.rows).enumerate()
    {
        if actual_row.len() != expected_row.len() {
            diff.record(
                Some(row_idx),
                None,
                format!(
                    "row width mismatch: actual {} expected {}",
                    actual_row.len(),
                    expected_row.len()
                ),
            );
            continue;
        }
        for (col_idx, (a, e)) in actual_row.iter().zip(expected_row).enumerate() {
            match compare_cell(a, e, tolerances) {
                CellOutcome::Equal => {}
                CellOutcome::Relaxed(relaxation) => relaxation.bump(&mut diff.relaxed),
                CellOutcome::Different(message) => {
                    diff.record(Some(row_idx), Some(col_idx), message)
                }
            }
        }
    }
    diff
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relaxation {
    KindUpgrade,
    DateTimeBridge,
    StringDecode,
    MissingOverride,
}

impl Relaxation {
    fn bump(self, counts: &mut RelaxationCounts) {
        match self {
            Relaxation::KindUpgrade => counts.kind_upgrade += 1,
            Relaxation::DateTimeBridge => counts.date_datetime_bridge += 1,
            Relaxation::StringDecode => counts.string_decode += 1,
            Relaxation::MissingOverride => counts.missing_override += 1,
        }
    }
}

#[derive(Debug, PartialEq)]
enum CellOutcome {
    Equal,
    Relaxed(Relaxation),
    Different(String),
}

fn compare_cell(
    actual: &CanonicalValue,
    expected: &CanonicalValue,
    tolerances: &SnapshotTolerances,
) -> CellOutcome {
    use CanonicalValue as V;

    let (actual_kind, expected_kind) = (actual.kind(), expected.kind());
    if actual_kind != expected_kind {
        if let (
            V::Date(a) | V::DateTime(a) | V::Time(a),
            V::Number(e),
        ) = (actual, expected)
            && within(*a, *e, tolerances.for_kind(actual_kind))
        {
            return CellOutcome::Relaxed(Relaxation::KindUpgrade);
        }
        let bridged = match (actual, expected) {
            (V::Date(days), V::DateTime(secs))
            | (V::DateTime(secs), V::Date(days))
            | (V::Number(days), V::DateTime(secs))
            | (V::DateTime(secs), V::Number(days)) => tolerances.bridges(*days, *secs),
            _ => false,
        };
        if bridged {
            return CellOutcome::Relaxed(Relaxation::DateTimeBridge);
        }
        if expected.is_missing() {
            return CellOutcome::Relaxed(Relaxation::MissingOverride);
        }
        return CellOutcome::Different(format!(
            "kind mismatch: actual {actual_kind} expected {expected_kind}"
        ));
    }

    match (actual, expected) {
        (V::Missing, V::Missing) => CellOutcome::Equal,
        (V::String(a), V::String(e)) => {
            if a == e {
                CellOutcome::Equal
            } else if reinterpret_latin1_as_utf8(e).is_some_and(|decoded| &decoded == a) {
                CellOutcome::Relaxed(Relaxation::StringDecode)
            } else {
                CellOutcome::Different(format!("string mismatch: actual {a:?} expected {e:?}"))
            }
        }
        (V::Bytes(a), V::Bytes(e)) => {
            if a == e {
                CellOutcome::Equal
            } else {
                CellOutcome::Different(format!("bytes mismatch: actual {a:?} expected {e:?}"))
            }
        }
        _ => match (actual.numeric(), expected.numeric()) {
            (Some(a), Some(e)) => {
                let tolerance = tolerances.for_kind(actual_kind);
                if within(a, e, tolerance) {
                    CellOutcome::Equal
                } else {
                    CellOutcome::Different(format!(
                        "{actual_kind} mismatch: actual {a} expected {e} (tolerance {tolerance})"
                    ))
                }
            }
            _ => CellOutcome::Different(format!(
                "incomparable values: actual {actual} expected {expected}"
            )),
        },
    }
}

// Equal infinities have a NaN difference.
fn within(a: f64, e: f64, tolerance: f64) -> bool {
    a == e || (a - e).abs() <= tolerance
}

fn expected_name_is_mojibake(actual: &str, expected: &str) -> bool {
    let decoded = reinterpret_latin1_as_utf8(expected);
    decoded.as_deref() == Some(actual)
        || likely_mojibake(expected)
        || (decoded.is_none() && expected.chars().all(|c| u32::from(c) <= 0xFF))
}

/// Undo a Latin-1 decode of UTF-8 bytes, if the text is representable in Latin-1.
fn reinterpret_latin1_as_utf8(text: &str) -> Option<String> {
    let bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

// C0 controls and the C1 block show up when UTF-8 bytes are read as Latin-1.
fn likely_mojibake(text: &str) -> bool {
    text.chars().any(|c| {
        let code = u32::from(c);
        code <= 0x1F || (0x7F..=0x9F).contains(&code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(columns: &[&str], rows: Vec<Vec<CanonicalValue>>) -> SnapshotDocument {
        SnapshotDocument {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: rows.len(),
            rows,
        }
    }

    fn diff(actual: &SnapshotDocument, expected: &SnapshotDocument) -> SnapshotDiff {
        diff_snapshots(actual, expected, &DiffOptions::default())
    }

    #[test]
    fn identical_documents_match() {
        let a = doc(
            &["x", "s"],
            vec![vec![
                CanonicalValue::Number(1.0),
                CanonicalValue::String("a".to_string()),
            ]],
        );
        let result = diff(&a, &a.clone());
        assert!(result.is_match());
        assert_eq!(result.render(), "Snapshots match.\n");
    }

    #[test]
    fn reloaded_snapshot_with_infinite_cells_matches_itself() {
        let written = doc(
            &["t", "n"],
            vec![
                vec![CanonicalValue::Time(f64::INFINITY), CanonicalValue::Number(1.0)],
                vec![CanonicalValue::Time(2.0), CanonicalValue::Number(f64::NEG_INFINITY)],
            ],
        );
        let json = serde_json::to_string(&written).expect("json");
        let reloaded: SnapshotDocument = serde_json::from_str(&json).expect("reload");
        assert_eq!(reloaded, written);
        assert!(diff(&reloaded, &written).is_match());

        let flipped = doc(
            &["t", "n"],
            vec![
                vec![CanonicalValue::Time(f64::NEG_INFINITY), CanonicalValue::Number(1.0)],
                vec![CanonicalValue::Time(2.0), CanonicalValue::Number(f64::NEG_INFINITY)],
            ],
        );
        assert_eq!(diff(&flipped, &written).total, 1);
    }

    #[test]
    fn numeric_cells_use_per_kind_tolerances() {
        let actual = doc(
            &["n", "dt", "d"],
            vec![vec![
                CanonicalValue::Number(1.00005),
                CanonicalValue::DateTime(100.0),
                CanonicalValue::Date(3.0),
            ]],
        );
        let expected = doc(
            &["n", "dt", "d"],
            vec![vec![
                CanonicalValue::Number(1.0),
                CanonicalValue::DateTime(101.4),
                CanonicalValue::Date(3.01),
            ]],
        );
        let result = diff(&actual, &expected);
        assert_eq!(result.total, 1);
        assert_eq!(result.differences[0].column, Some(2));
        assert!(result.differences[0].message.starts_with("date mismatch"));
    }

    #[test]
    fn benign_reader_disagreements_are_relaxed() {
        let actual = doc(
            &["café", "a", "b", "c", "d"],
            vec![vec![
                CanonicalValue::Date(2.0),
                CanonicalValue::Date(1.0),
                CanonicalValue::Number(5.0),
                CanonicalValue::String("café".to_string()),
                CanonicalValue::Time(7.0),
            ]],
        );
        let expected = doc(
            &["cafÃ©", "a", "b", "c", "d"],
            vec![vec![
                CanonicalValue::Number(2.0),
                CanonicalValue::DateTime(86_400.5),
                CanonicalValue::Missing,
                CanonicalValue::String("cafÃ©".to_string()),
                CanonicalValue::Missing,
            ]],
        );
        let result = diff(&actual, &expected);
        assert!(result.is_match(), "{}", result.render());
        assert_eq!(
            result.relaxed,
            RelaxationCounts {
                column_decode: 1,
                kind_upgrade: 1,
                date_datetime_bridge: 1,
                string_decode: 1,
                missing_override: 2,
            }
        );
        assert!(result.render().contains("expected_missing_overridden=2"));
    }

    #[test]
    fn missing_actual_against_present_expected_is_reported() {
        let actual = doc(&["x"], vec![vec![CanonicalValue::Missing]]);
        let expected = doc(&["x"], vec![vec![CanonicalValue::Number(1.0)]]);
        let result = diff(&actual, &expected);
        assert_eq!(result.total, 1);
        assert_eq!(
            result.differences[0].to_string(),
            "row 0 column 0: kind mismatch: actual missing expected number"
        );
    }

    #[test]
    fn structural_mismatches_stop_cell_comparison() {
        let actual = doc(&["x"], vec![vec![CanonicalValue::Number(1.0)]]);
        let expected = doc(&["x"], Vec::new());
        let result = diff(&actual, &expected);
        assert_eq!(result.total, 1);
        assert!(result.differences[0].message.contains("row count mismatch"));

        let wider = doc(&["x", "y"], Vec::new());
        assert!(
            diff(&actual, &wider).differences[0]
                .message
                .contains("column count mismatch")
        );
    }

    #[test]
    fn recorded_differences_are_capped_but_counted() {
        let rows = (0..10)
            .map(|i| vec![CanonicalValue::Number(f64::from(i))])
            .collect::<Vec<_>>();
        let shifted = rows
            .iter()
            .map(|row| vec![CanonicalValue::Number(row[0].numeric().unwrap_or(0.0) + 1.0)])
            .collect::<Vec<_>>();
        let options = DiffOptions {
            max_differences: 3,
            ..DiffOptions::default()
        };
        let result = diff_snapshots(&doc(&["n"], rows), &doc(&["n"], shifted), &options);
        assert_eq!(result.total, 10);
        assert_eq!(result.differences.len(), 3);
        let rendered = result.render();
        assert!(rendered.contains("... 7 more difference(s) not shown"), "{rendered}");
        assert!(rendered.ends_with("Found 10 difference(s).\n"), "{rendered}");
    }

    #[test]
    fn latin1_reinterpretation_round_trips_utf8() {
        assert_eq!(reinterpret_latin1_as_utf8("Ã©"), Some("é".to_string()));
        assert_eq!(reinterpret_latin1_as_utf8("plain"), Some("plain".to_string()));
        assert_eq!(reinterpret_latin1_as_utf8("€"), None);
        assert!(likely_mojibake("a\u{0085}b"));
        assert!(!likely_mojibake("abc"));
    }
}
