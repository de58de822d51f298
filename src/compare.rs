//! Tolerant comparison of two dataset summaries.
//!
//! Mismatches are data: [`compare_summaries`] never fails, it returns a
//! [`MismatchReport`] that callers render or inspect.

use std::{collections::BTreeMap, fmt::Write as _};

use serde::{Deserialize, Serialize};

use crate::{
    summary::{ColumnSummary, DatasetSummary, NumericSummary},
    table::{Align, TextTable},
};

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rel: f64,
    pub abs: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::uniform(DEFAULT_TOLERANCE)
    }
}

impl Tolerance {
    pub fn uniform(value: f64) -> Self {
        Self {
            rel: value,
            abs: value,
        }
    }

    /// `|a - b| <= max(rel * max(|a|, |b|), abs)`; equal infinities are close.
    pub fn is_close(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        if !a.is_finite() || !b.is_finite() {
            return false;
        }
        let diff = (a - b).abs();
        diff <= (self.rel * a.abs().max(b.abs())).max(self.abs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericField {
    Count,
    Sum,
    Min,
    Max,
}

impl NumericField {
    pub fn as_str(self) -> &'static str {
        match self {
            NumericField::Count => "count",
            NumericField::Sum => "sum",
            NumericField::Min => "min",
            NumericField::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDifference {
    pub left: Option<f64>,
    pub right: Option<f64>,
    /// `left - right`, with an absent side counted as zero.
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericMismatch {
    /// Only one side carries numeric statistics.
    OneSided { left_present: bool },
    Fields(BTreeMap<NumericField, FieldDifference>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub left_missing: u64,
    pub left_non_missing: u64,
    pub right_missing: u64,
    pub right_non_missing: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMismatch {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<CountMismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericMismatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MismatchReport {
    pub row_count: Option<(u64, u64)>,
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
    pub columns: Vec<ColumnMismatch>,
}

impl MismatchReport {
    /// One per one-sided column, count disagreement and numeric disagreement.
    pub fn mismatch_count(&self) -> usize {
        self.only_left.len()
            + self.only_right.len()
            + self
                .columns
                .iter()
                .map(|column| {
                    usize::from(column.counts.is_some()) + usize::from(column.numeric.is_some())
                })
                .sum::<usize>()
    }

    pub fn mismatched_names(&self) -> Vec<&str> {
        let mut names = self
            .only_left
            .iter()
            .chain(&self.only_right)
            .map(String::as_str)
            .chain(self.columns.iter().map(|column| column.name.as_str()))
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn is_match(&self) -> bool {
        self.row_count.is_none() && self.mismatch_count() == 0
    }

    pub fn render(&self, left_label: &str, right_label: &str) -> String {
        let mut out = String::new();
        if let Some((left, right)) = self.row_count {
            let _ = writeln!(
                out,
                "Row count mismatch: {left_label}={left} {right_label}={right}"
            );
        }

        let mut one_sided = self
            .only_left
            .iter()
            .map(|name| (name, right_label))
            .chain(self.only_right.iter().map(|name| (name, left_label)))
            .collect::<Vec<_>>();
        one_sided.sort();
        for (name, absent_from) in one_sided {
            let _ = writeln!(out, "Column '{name}' missing from {absent_from} summary");
        }

        let mut fields = TextTable::new(["column", "field", left_label, right_label, "delta"])
            .align(2, Align::Right)
            .align(3, Align::Right)
            .align(4, Align::Right);
        for column in &self.columns {
            let name = &column.name;
            if let Some(counts) = &column.counts {
                let _ = writeln!(
                    out,
                    "Column '{name}' count mismatch: {left_label} missing/non-missing={}/{} vs {right_label} {}/{}",
                    counts.left_missing,
                    counts.left_non_missing,
                    counts.right_missing,
                    counts.right_non_missing
                );
            }
            match &column.numeric {
                Some(NumericMismatch::OneSided { .. }) => {
                    let _ = writeln!(out, "Column '{name}' numeric stats mismatch: one side missing");
                }
                Some(NumericMismatch::Fields(diffs)) => {
                    let rendered = diffs
                        .iter()
                        .map(|(field, diff)| format!("{}={}", field.as_str(), diff.delta))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(out, "Column '{name}' numeric differences: {rendered}");
                    for (field, diff) in diffs {
                        fields.push_row([
                            name.clone(),
                            field.as_str().to_string(),
                            render_optional(diff.left),
                            render_optional(diff.right),
                            diff.delta.to_string(),
                        ]);
                    }
                }
                None => {}
            }
        }
        if !fields.is_empty() {
            out.push('\n');
            out.push_str(&fields.render());
            out.push('\n');
        }

        let mismatches = self.mismatch_count();
        if self.is_match() {
            out.push_str("Summaries match within tolerance.\n");
        } else if mismatches == 0 {
            out.push_str("Columns match within tolerance, but row counts differ.\n");
        } else {
            let _ = writeln!(out, "Found {mismatches} mismatched column(s).");
        }
        out
    }
}

fn render_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

pub fn compare_summaries(
    left: &DatasetSummary,
    right: &DatasetSummary,
    tolerance: Tolerance,
) -> MismatchReport {
    let mut report = MismatchReport::default();
    if left.row_count != right.row_count {
        report.row_count = Some((left.row_count, right.row_count));
    }

    let left_columns = index_by_name(left);
    let right_columns = index_by_name(right);
    let mut names = left_columns
        .keys()
        .chain(right_columns.keys())
        .copied()
        .collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();

    for name in names {
        match (left_columns.get(name), right_columns.get(name)) {
            (Some(_), None) => report.only_left.push(name.to_string()),
            (None, Some(_)) => report.only_right.push(name.to_string()),
            (Some(l), Some(r)) => {
                if let Some(mismatch) = compare_column(l, r, tolerance) {
                    report.columns.push(mismatch);
                }
            }
            (None, None) => {}
        }
    }
    report
}

// Later duplicates win, matching a name-keyed lookup over the column list.
fn index_by_name(summary: &DatasetSummary) -> BTreeMap<&str, &ColumnSummary> {
    summary
        .columns
        .iter()
        .map(|column| (column.name.as_str(), column))
        .collect()
}

fn compare_column(
    left: &ColumnSummary,
    right: &ColumnSummary,
    tolerance: Tolerance,
) -> Option<ColumnMismatch> {
    let counts = (left.missing != right.missing || left.non_missing != right.non_missing).then(
        || CountMismatch {
            left_missing: left.missing,
            left_non_missing: left.non_missing,
            right_missing: right.missing,
            right_non_missing: right.non_missing,
        },
    );
    let numeric = match (&left.numeric, &right.numeric) {
        (None, None) => None,
        (Some(_), None) => Some(NumericMismatch::OneSided { left_present: true }),
        (None, Some(_)) => Some(NumericMismatch::OneSided {
            left_present: false,
        }),
        (Some(l), Some(r)) => {
            let diffs = compare_numeric(l, r, tolerance);
            (!diffs.is_empty()).then_some(NumericMismatch::Fields(diffs))
        }
    };
    (counts.is_some() || numeric.is_some()).then(|| ColumnMismatch {
        name: left.name.clone(),
        counts,
        numeric,
    })
}

fn compare_numeric(
    left: &NumericSummary,
    right: &NumericSummary,
    tolerance: Tolerance,
) -> BTreeMap<NumericField, FieldDifference> {
    let mut diffs = BTreeMap::new();
    if left.count != right.count {
        let (l, r) = (left.count as f64, right.count as f64);
        diffs.insert(NumericField::Count, difference(Some(l), Some(r)));
    }
    if !tolerance.is_close(left.sum, right.sum) {
        diffs.insert(NumericField::Sum, difference(Some(left.sum), Some(right.sum)));
    }
    for (field, l, r) in [
        (NumericField::Min, left.min, right.min),
        (NumericField::Max, left.max, right.max),
    ] {
        let differs = match (l, r) {
            (None, None) => false,
            (Some(a), Some(b)) => !tolerance.is_close(a, b),
            _ => true,
        };
        if differs {
            diffs.insert(field, difference(l, r));
        }
    }
    diffs
}

fn difference(left: Option<f64>, right: Option<f64>) -> FieldDifference {
    FieldDifference {
        left,
        right,
        delta: left.unwrap_or(0.0) - right.unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::ColumnKind;

    fn numeric_column(name: &str, count: u64, sum: f64, min: f64, max: f64) -> ColumnSummary {
        ColumnSummary {
            index: 0,
            name: name.to_string(),
            label: None,
            format: None,
            kind: ColumnKind::Numeric,
            non_missing: count,
            missing: 0,
            numeric: Some(NumericSummary {
                count,
                sum,
                min: Some(min),
                max: Some(max),
            }),
        }
    }

    fn character_column(name: &str, non_missing: u64, missing: u64) -> ColumnSummary {
        ColumnSummary {
            index: 1,
            name: name.to_string(),
            label: None,
            format: None,
            kind: ColumnKind::Character,
            non_missing,
            missing,
            numeric: None,
        }
    }

    fn summary(columns: Vec<ColumnSummary>) -> DatasetSummary {
        DatasetSummary {
            row_count: 3,
            columns,
        }
    }

    #[test]
    fn identical_summaries_match() {
        let a = summary(vec![numeric_column("x", 3, 6.0, 1.0, 3.0), character_column("s", 3, 0)]);
        let report = compare_summaries(&a, &a.clone(), Tolerance::default());
        assert!(report.is_match());
        assert_eq!(
            report.render("rust", "pyreadstat"),
            "Summaries match within tolerance.\n"
        );
    }

    #[test]
    fn row_count_only_difference_is_not_reported_as_a_match() {
        let left = summary(vec![character_column("s", 3, 0)]);
        let mut right = left.clone();
        right.row_count = 4;
        let report = compare_summaries(&left, &right, Tolerance::default());
        assert!(!report.is_match());
        assert_eq!(report.mismatch_count(), 0);
        assert_eq!(
            report.render("left", "right"),
            "Row count mismatch: left=3 right=4\nColumns match within tolerance, but row counts differ.\n"
        );
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let tolerance = Tolerance { rel: 0.0, abs: 1e-6 };
        assert!(tolerance.is_close(0.0, 1e-6));
        assert!(!tolerance.is_close(0.0, 1e-6 * 1.0001));
        assert!(tolerance.is_close(f64::INFINITY, f64::INFINITY));
        assert!(!tolerance.is_close(f64::INFINITY, f64::MAX));
        assert!(!tolerance.is_close(f64::NAN, f64::NAN));
    }

    #[test]
    fn relative_tolerance_scales_with_magnitude() {
        let tolerance = Tolerance::uniform(1e-9);
        assert!(tolerance.is_close(1e12, 1e12 + 100.0));
        assert!(!tolerance.is_close(1e12, 1e12 + 10_000.0));
    }

    #[test]
    fn reports_row_counts_one_sided_columns_and_counts() {
        let left = summary(vec![
            numeric_column("x", 3, 6.0, 1.0, 3.0),
            character_column("only_left", 3, 0),
            character_column("s", 2, 1),
        ]);
        let mut right = summary(vec![
            numeric_column("x", 3, 6.0, 1.0, 3.0),
            character_column("only_right", 3, 0),
            character_column("s", 3, 0),
        ]);
        right.row_count = 4;

        let report = compare_summaries(&left, &right, Tolerance::default());
        assert_eq!(report.row_count, Some((3, 4)));
        assert_eq!(report.only_left, vec!["only_left"]);
        assert_eq!(report.only_right, vec!["only_right"]);
        assert_eq!(report.columns.len(), 1);
        assert_eq!(report.mismatch_count(), 3);

        let text = report.render("rust", "python");
        assert!(text.contains("Row count mismatch: rust=3 python=4"), "{text}");
        assert!(text.contains("Column 'only_left' missing from python summary"), "{text}");
        assert!(text.contains("Column 'only_right' missing from rust summary"), "{text}");
        assert!(
            text.contains("Column 's' count mismatch: rust missing/non-missing=1/2 vs python 0/3"),
            "{text}"
        );
        assert!(text.ends_with("Found 3 mismatched column(s).\n"), "{text}");
    }

    #[test]
    fn numeric_differences_carry_signed_deltas() {
        let left = summary(vec![numeric_column("x", 3, 6.0, 1.0, 3.0)]);
        let mut right = summary(vec![numeric_column("x", 2, 5.0, 1.0, 4.0)]);
        right.columns[0].numeric.as_mut().expect("numeric").min = None;
        right.columns[0].non_missing = 3;

        let report = compare_summaries(&left, &right, Tolerance::default());
        let Some(NumericMismatch::Fields(diffs)) = &report.columns[0].numeric else {
            panic!("expected field differences: {report:?}");
        };
        assert_eq!(diffs[&NumericField::Count].delta, 1.0);
        assert_eq!(diffs[&NumericField::Sum].delta, 1.0);
        assert_eq!(diffs[&NumericField::Min].delta, 1.0);
        assert_eq!(diffs[&NumericField::Max].delta, -1.0);

        let text = report.render("left", "right");
        assert!(
            text.contains("Column 'x' numeric differences: count=1, sum=1, min=1, max=-1"),
            "{text}"
        );
    }

    #[test]
    fn numeric_stats_on_one_side_only_is_a_mismatch() {
        let left = summary(vec![numeric_column("x", 3, 6.0, 1.0, 3.0)]);
        let right = summary(vec![character_column("x", 3, 0)]);
        let report = compare_summaries(&left, &right, Tolerance::default());
        assert_eq!(
            report.columns[0].numeric,
            Some(NumericMismatch::OneSided { left_present: true })
        );
        assert!(
            report
                .render("a", "b")
                .contains("Column 'x' numeric stats mismatch: one side missing")
        );
    }

    #[test]
    fn both_extremes_absent_is_not_a_difference() {
        let mut left = summary(vec![numeric_column("x", 0, 0.0, 0.0, 0.0)]);
        let stats = left.columns[0].numeric.as_mut().expect("numeric");
        stats.min = None;
        stats.max = None;
        let report = compare_summaries(&left, &left.clone(), Tolerance::default());
        assert!(report.is_match());
    }

    #[test]
    fn swapping_sides_keeps_names_and_flips_signs() {
        let left = summary(vec![
            numeric_column("x", 3, 6.0, 1.0, 3.0),
            character_column("a", 3, 0),
        ]);
        let right = summary(vec![
            numeric_column("x", 3, 6.5, 1.0, 3.0),
            character_column("b", 3, 0),
        ]);
        let forward = compare_summaries(&left, &right, Tolerance::default());
        let backward = compare_summaries(&right, &left, Tolerance::default());
        assert_eq!(forward.mismatched_names(), backward.mismatched_names());
        assert_eq!(forward.mismatch_count(), backward.mismatch_count());
        let delta = |report: &MismatchReport| match &report.columns[0].numeric {
            Some(NumericMismatch::Fields(diffs)) => diffs[&NumericField::Sum].delta,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(delta(&forward), -delta(&backward));
    }
}
