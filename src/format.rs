//! Display-format classification.
//!
//! SAS stores dates, datetimes and times as plain doubles; the only thing that
//! tells them apart from ordinary numbers is the column's display format. This
//! module maps a format name onto a [`TemporalKind`] by exact, case-folded
//! membership in three disjoint sets. No parsing of the name happens beyond
//! lower-casing: `DATE9.` and `date9` are different names.

use std::{collections::BTreeSet, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub const DATE_FORMATS: &[&str] = &[
    "date", "date9", "yymmdd", "ddmmyy", "mmddyy", "mmddyy10", "e8601da", "minguo", "monname",
];
pub const DATETIME_FORMATS: &[&str] = &["datetime", "datetime20", "datetime22.3"];
pub const TIME_FORMATS: &[&str] = &["time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalKind {
    Date,
    DateTime,
    Time,
    Unclassified,
}

impl TemporalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalKind::Date => "date",
            TemporalKind::DateTime => "datetime",
            TemporalKind::Time => "time",
            TemporalKind::Unclassified => "unclassified",
        }
    }
}

/// Extra format names layered on top of the built-in sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatOverrides {
    pub date: Vec<String>,
    pub datetime: Vec<String>,
    pub time: Vec<String>,
}

impl FormatOverrides {
    pub fn is_empty(&self) -> bool {
        self.date.is_empty() && self.datetime.is_empty() && self.time.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCatalog {
    date: BTreeSet<String>,
    datetime: BTreeSet<String>,
    time: BTreeSet<String>,
}

impl Default for FormatCatalog {
    fn default() -> Self {
        let collect = |names: &[&str]| -> BTreeSet<String> {
            names.iter().map(|n| n.to_string()).collect()
        };
        Self {
            date: collect(DATE_FORMATS),
            datetime: collect(DATETIME_FORMATS),
            time: collect(TIME_FORMATS),
        }
    }
}

impl FormatCatalog {
    /// Built-in sets extended with `overrides`. Every name must stay in exactly one set.
    pub fn with_overrides(overrides: &FormatOverrides) -> Result<Self, HarnessError> {
        let mut catalog = Self::default();
        let additions = [
            (TemporalKind::Date, &overrides.date),
            (TemporalKind::DateTime, &overrides.datetime),
            (TemporalKind::Time, &overrides.time),
        ];
        for (kind, names) in additions {
            for name in names {
                let folded = name.trim().to_lowercase();
                if folded.is_empty() {
                    continue;
                }
                let existing = catalog.lookup(&folded);
                if existing != TemporalKind::Unclassified && existing != kind {
                    return Err(HarnessError::OverlappingFormat {
                        name: folded,
                        first: existing.as_str(),
                        second: kind.as_str(),
                    });
                }
                catalog.set_mut(kind).insert(folded);
            }
        }
        Ok(catalog)
    }

    pub fn classify(&self, hint: Option<&str>) -> TemporalKind {
        match hint {
            None => TemporalKind::Unclassified,
            Some(raw) if raw.is_empty() => TemporalKind::Unclassified,
            Some(raw) => self.lookup(&raw.to_lowercase()),
        }
    }

    // Priority order matters once overrides can grow the sets.
    fn lookup(&self, folded: &str) -> TemporalKind {
        if self.datetime.contains(folded) {
            TemporalKind::DateTime
        } else if self.time.contains(folded) {
            TemporalKind::Time
        } else if self.date.contains(folded) {
            TemporalKind::Date
        } else {
            TemporalKind::Unclassified
        }
    }

    fn set_mut(&mut self, kind: TemporalKind) -> &mut BTreeSet<String> {
        match kind {
            TemporalKind::Date => &mut self.date,
            TemporalKind::DateTime => &mut self.datetime,
            TemporalKind::Time | TemporalKind::Unclassified => &mut self.time,
        }
    }
}

/// Classify against the built-in format sets.
pub fn classify(hint: Option<&str>) -> TemporalKind {
    static BUILTIN: OnceLock<FormatCatalog> = OnceLock::new();
    BUILTIN.get_or_init(FormatCatalog::default).classify(hint)
}
