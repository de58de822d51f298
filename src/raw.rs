//! Native cell values as emitted by reference reader stacks.
//!
//! Reference libraries hand back whatever their runtime uses for a cell:
//! floats that may be NaN, library "not available" markers, zone-less or zoned
//! timestamps, durations, raw bytes and so on. [`RawValue`] models that zoo
//! explicitly so canonicalization can match on it exhaustively.
//!
//! Raw values travel as a JSON Lines dump: one header line carrying the column
//! metadata, then one array of tagged cells per row. [`RawDumpReader`] streams
//! the rows back, either one at a time or grouped into columnar [`RawChunk`]s.

use std::{
    io::{BufRead, Lines},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use encoding_rs::Encoding;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RawValue {
    Null,
    /// Library-specific "not available" marker (NA, NaT, ...).
    NotAvailable,
    Bool(bool),
    Int(i64),
    #[serde(rename = "uint")]
    UInt(u64),
    Float(#[serde(with = "lenient_float")] f64),
    Float32(#[serde(with = "lenient_float32")] f32),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    /// Calendar timestamp without a zone; read as UTC.
    Timestamp(NaiveDateTime),
    ZonedTimestamp(DateTime<FixedOffset>),
    Date(NaiveDate),
    Duration(#[serde(with = "duration_seconds")] TimeDelta),
    WallTime(NaiveTime),
    /// Opaque object, carried as its textual rendering.
    Other(String),
}

impl RawValue {
    /// Null references, NaN of any width and NA markers.
    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::Null | RawValue::NotAvailable => true,
            RawValue::Float(value) => value.is_nan(),
            RawValue::Float32(value) => value.is_nan(),
            _ => false,
        }
    }

    /// Plain numeric payload for booleans and number types.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            RawValue::Int(value) => Some(*value as f64),
            RawValue::UInt(value) => Some(*value as f64),
            RawValue::Float(value) => Some(*value),
            RawValue::Float32(value) => Some(f64::from(*value)),
            RawValue::Decimal(value) => value.to_f64(),
            _ => None,
        }
    }

    /// Numeric coercion used by aggregation: numbers and numeric text, NaN dropped.
    pub fn coerce_f64(&self) -> Option<f64> {
        let value = match self {
            RawValue::Text(text) => text.trim().parse::<f64>().ok(),
            other => other.as_number(),
        };
        value.filter(|v| !v.is_nan())
    }

    /// Byte cells that decode cleanly with `encoding` become text.
    pub fn decode_bytes(self, encoding: &'static Encoding) -> RawValue {
        match self {
            RawValue::Bytes(bytes) => {
                match encoding.decode_without_bom_handling_and_without_replacement(&bytes) {
                    Some(text) => RawValue::Text(text.into_owned()),
                    None => RawValue::Bytes(bytes),
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Character,
}

impl ColumnKind {
    /// Derived from the storage type name, never from values.
    pub fn from_storage(storage: &str) -> Self {
        match storage.trim().to_ascii_lowercase().as_str() {
            "double" | "float" | "numeric" | "int8" | "int16" | "int32" | "int64" => {
                ColumnKind::Numeric
            }
            _ => ColumnKind::Character,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub storage: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            format: None,
            storage: storage.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        non_blank(self.label.as_deref())
    }

    pub fn format_hint(&self) -> Option<&str> {
        non_blank(self.format.as_deref())
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_storage(&self.storage)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpHeader {
    #[serde(default)]
    pub encoding: Option<String>,
    pub columns: Vec<ColumnMeta>,
}

/// A fully materialized fixture in row-major order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub encoding: Option<String>,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<RawValue>>) -> Self {
        Self {
            encoding: None,
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn decode_byte_cells(&mut self, encoding: &'static Encoding) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if matches!(cell, RawValue::Bytes(_)) {
                    let taken = std::mem::replace(cell, RawValue::Null);
                    *cell = taken.decode_bytes(encoding);
                }
            }
        }
    }

    /// Columnar chunks of at most `size` rows each.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = Result<RawChunk>> + '_ {
        let columns: Arc<[ColumnMeta]> = self.columns.clone().into();
        self.rows
            .chunks(size.max(1))
            .map(move |rows| RawChunk::from_rows(Arc::clone(&columns), rows.to_vec()))
    }
}

/// Column-major slice of consecutive rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    columns: Arc<[ColumnMeta]>,
    values: Vec<Vec<RawValue>>,
    len: usize,
}

impl RawChunk {
    pub fn from_columns(columns: Vec<ColumnMeta>, values: Vec<Vec<RawValue>>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(HarnessError::MalformedChunk(format!(
                "{} column(s) declared but {} value vector(s) supplied",
                columns.len(),
                values.len()
            ))
            .into());
        }
        let len = values.first().map_or(0, Vec::len);
        if let Some((meta, column)) = columns
            .iter()
            .zip(values.iter())
            .find(|(_, column)| column.len() != len)
        {
            return Err(HarnessError::MalformedChunk(format!(
                "column '{}' has {} value(s) but column '{}' has {len}",
                meta.name,
                column.len(),
                columns[0].name
            ))
            .into());
        }
        Ok(Self {
            columns: columns.into(),
            values,
            len,
        })
    }

    pub fn from_rows(columns: Arc<[ColumnMeta]>, rows: Vec<Vec<RawValue>>) -> Result<Self> {
        let width = columns.len();
        let mut values: Vec<Vec<RawValue>> = (0..width)
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        let len = rows.len();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(HarnessError::RowWidth {
                    row: row_idx + 1,
                    actual: row.len(),
                    expected: width,
                }
                .into());
            }
            for (column, cell) in values.iter_mut().zip(row) {
                column.push(cell);
            }
        }
        Ok(Self {
            columns,
            values,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[RawValue]> {
        self.columns
            .iter()
            .position(|meta| meta.name == name)
            .map(|idx| self.values[idx].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnMeta, &[RawValue])> {
        self.columns
            .iter()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    pub fn decode_byte_cells(&mut self, encoding: &'static Encoding) {
        for column in &mut self.values {
            for cell in column.iter_mut() {
                if matches!(cell, RawValue::Bytes(_)) {
                    let taken = std::mem::replace(cell, RawValue::Null);
                    *cell = taken.decode_bytes(encoding);
                }
            }
        }
    }
}

/// Streaming reader over a JSON Lines raw dump.
pub struct RawDumpReader<R: BufRead> {
    lines: Lines<R>,
    header: DumpHeader,
    line_no: usize,
    row_no: usize,
    failed: bool,
}

impl<R: BufRead> RawDumpReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let mut line_no = 0usize;
        let header = loop {
            line_no += 1;
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    break serde_json::from_str::<DumpHeader>(&line).map_err(|err| {
                        HarnessError::MalformedDump {
                            line: line_no,
                            reason: format!("invalid header: {err}"),
                        }
                    })?;
                }
                None => {
                    return Err(HarnessError::MalformedDump {
                        line: line_no,
                        reason: "missing header line".to_string(),
                    }
                    .into());
                }
            }
        };
        Ok(Self {
            lines,
            header,
            line_no,
            row_no: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &DumpHeader {
        &self.header
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.header.columns
    }

    fn parse_row(&self, line: &str) -> Result<Vec<RawValue>> {
        let row: Vec<RawValue> =
            serde_json::from_str(line).map_err(|err| HarnessError::MalformedDump {
                line: self.line_no,
                reason: err.to_string(),
            })?;
        let expected = self.header.columns.len();
        if row.len() != expected {
            return Err(HarnessError::RowWidth {
                row: self.row_no,
                actual: row.len(),
                expected,
            }
            .into());
        }
        Ok(row)
    }

    pub fn into_table(self) -> Result<RawTable> {
        let encoding = self.header.encoding.clone();
        let columns = self.header.columns.clone();
        let rows = self.collect::<Result<Vec<_>>>()?;
        Ok(RawTable {
            encoding,
            columns,
            rows,
        })
    }

    pub fn chunks(self, size: usize) -> RawChunks<R> {
        let columns: Arc<[ColumnMeta]> = self.header.columns.clone().into();
        RawChunks {
            rows: self,
            columns,
            size: size.max(1),
        }
    }
}

impl<R: BufRead> Iterator for RawDumpReader<R> {
    type Item = Result<Vec<RawValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err.into()));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            self.row_no += 1;
            let parsed = self.parse_row(&line);
            self.failed = parsed.is_err();
            return Some(parsed);
        }
    }
}

pub struct RawChunks<R: BufRead> {
    rows: RawDumpReader<R>,
    columns: Arc<[ColumnMeta]>,
    size: usize,
}

impl<R: BufRead> Iterator for RawChunks<R> {
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.rows.next() {
                Some(Ok(row)) => batch.push(row),
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        if batch.is_empty() {
            return None;
        }
        Some(RawChunk::from_rows(Arc::clone(&self.columns), batch))
    }
}

/// Float codec that spells non-finite values as `"NaN"`, `"inf"` and `"-inf"`.
///
/// JSON has no representation for them, and serde_json would otherwise write
/// `null`. Reading accepts numbers, those strings and `null` (as NaN).
pub(crate) mod lenient_float {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(crate) enum FloatRepr {
        Number(Option<f64>),
        Text(String),
    }

    impl FloatRepr {
        pub(crate) fn into_f64(self) -> Result<f64, String> {
            match self {
                FloatRepr::Number(value) => Ok(value.unwrap_or(f64::NAN)),
                FloatRepr::Text(text) => parse_text(&text),
            }
        }
    }

    pub(crate) fn parse_text(text: &str) -> Result<f64, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "nan" => Ok(f64::NAN),
            "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
            "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|_| format!("invalid float '{text}'")),
        }
    }

    /// Text spelling for a non-finite value; `None` for ordinary numbers.
    pub(crate) fn non_finite_text(value: f64) -> Option<&'static str> {
        if value.is_nan() {
            Some("NaN")
        } else if value == f64::INFINITY {
            Some("inf")
        } else if value == f64::NEG_INFINITY {
            Some("-inf")
        } else {
            None
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match non_finite_text(*value) {
            Some(text) => serializer.serialize_str(text),
            None => serializer.serialize_f64(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        FloatRepr::deserialize(deserializer)?
            .into_f64()
            .map_err(de::Error::custom)
    }

    /// Same codec for optional floats; `null` stays `None`.
    pub(crate) mod option {
        use serde::{Deserialize, Deserializer, Serializer, de};

        use super::FloatRepr;

        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<FloatRepr>::deserialize(deserializer)?
                .map(FloatRepr::into_f64)
                .transpose()
                .map_err(de::Error::custom)
        }
    }
}

mod lenient_float32 {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        super::lenient_float::serialize(&f64::from(*value), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        super::lenient_float::deserialize(deserializer).map(|value| value as f32)
    }
}

mod duration_seconds {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::duration_to_seconds(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(de::Error::custom("duration must be finite"));
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1_000_000_000.0).round() as i64;
        TimeDelta::try_seconds(whole as i64)
            .and_then(|delta| delta.checked_add(&TimeDelta::nanoseconds(nanos)))
            .ok_or_else(|| de::Error::custom(format!("duration {seconds} out of range")))
    }
}

pub(crate) fn duration_to_seconds(delta: &TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const DUMP: &str = r#"{"encoding":"latin1","columns":[{"name":"id","storage":"double"},{"name":"name","label":" Name ","format":"$","storage":"string"}]}
[{"type":"float","value":1},{"type":"text","value":"a"}]

[{"type":"float","value":null},{"type":"null"}]
[{"type":"float","value":"NaN"},{"type":"bytes","value":[104,105]}]
"#;

    #[test]
    fn raw_values_parse_tagged_cells() {
        let cells: Vec<RawValue> = serde_json::from_str(
            r#"[{"type":"not_available"},{"type":"uint","value":7},{"type":"float32","value":"-inf"},
               {"type":"decimal","value":"1.25"},{"type":"timestamp","value":"1960-01-01T00:00:01"},
               {"type":"zoned_timestamp","value":"1960-01-01T01:00:00+01:00"},
               {"type":"date","value":"1960-01-02"},{"type":"duration","value":-1.5},
               {"type":"wall_time","value":"01:02:03.5"},{"type":"other","value":"<obj>"}]"#,
        )
        .expect("parse cells");
        assert_eq!(cells[0], RawValue::NotAvailable);
        assert_eq!(cells[1], RawValue::UInt(7));
        assert_eq!(cells[2], RawValue::Float32(f32::NEG_INFINITY));
        assert_eq!(cells[3], RawValue::Decimal(Decimal::new(125, 2)));
        assert!(matches!(cells[4], RawValue::Timestamp(_)));
        assert!(matches!(cells[5], RawValue::ZonedTimestamp(_)));
        assert!(matches!(cells[6], RawValue::Date(_)));
        match &cells[7] {
            RawValue::Duration(delta) => assert_eq!(duration_to_seconds(delta), -1.5),
            other => panic!("expected duration, got {other:?}"),
        }
        assert!(matches!(cells[8], RawValue::WallTime(_)));
        assert_eq!(cells[9], RawValue::Other("<obj>".to_string()));
    }

    #[test]
    fn missing_test_covers_null_nan_and_na() {
        assert!(RawValue::Null.is_missing());
        assert!(RawValue::NotAvailable.is_missing());
        assert!(RawValue::Float(f64::NAN).is_missing());
        assert!(RawValue::Float32(f32::NAN).is_missing());
        assert!(!RawValue::Float(0.0).is_missing());
        assert!(!RawValue::Text(String::new()).is_missing());
        assert!(!RawValue::Float(f64::INFINITY).is_missing());
    }

    #[test]
    fn coerce_f64_accepts_numbers_and_numeric_text() {
        assert_eq!(RawValue::Int(-3).coerce_f64(), Some(-3.0));
        assert_eq!(RawValue::Bool(true).coerce_f64(), Some(1.0));
        assert_eq!(RawValue::Text(" 2.5 ".to_string()).coerce_f64(), Some(2.5));
        assert_eq!(RawValue::Text("abc".to_string()).coerce_f64(), None);
        assert_eq!(RawValue::Text("nan".to_string()).coerce_f64(), None);
        assert_eq!(RawValue::Bytes(vec![49]).coerce_f64(), None);
    }

    #[test]
    fn column_meta_normalizes_labels_and_kind() {
        let meta = ColumnMeta::new("x", "DOUBLE")
            .with_label("  ")
            .with_format(" DATE9 ");
        assert_eq!(meta.label(), None);
        assert_eq!(meta.format_hint(), Some("DATE9"));
        assert_eq!(meta.kind(), ColumnKind::Numeric);
        assert_eq!(ColumnKind::from_storage("string"), ColumnKind::Character);
        assert_eq!(ColumnKind::from_storage(""), ColumnKind::Character);
    }

    #[test]
    fn dump_reader_streams_rows_and_skips_blank_lines() {
        let reader = RawDumpReader::new(Cursor::new(DUMP)).expect("header");
        assert_eq!(reader.header().encoding.as_deref(), Some("latin1"));
        assert_eq!(reader.columns()[1].label(), Some("Name"));
        let table = reader.into_table().expect("table");
        assert_eq!(table.row_count(), 3);
        assert!(table.rows[1][0].is_missing());
        assert!(table.rows[2][0].is_missing());
    }

    #[test]
    fn dump_reader_rejects_wrong_row_width() {
        let dump = "{\"columns\":[{\"name\":\"a\"}]}\n[{\"type\":\"int\",\"value\":1},{\"type\":\"null\"}]\n";
        let reader = RawDumpReader::new(Cursor::new(dump)).expect("header");
        let err = reader.into_table().expect_err("width mismatch");
        assert!(err.to_string().contains("2 cell(s)"), "{err}");
    }

    #[test]
    fn dump_reader_requires_header() {
        let err = RawDumpReader::new(Cursor::new("\n\n")).err().expect("no header");
        assert!(err.to_string().contains("missing header"), "{err}");
    }

    #[test]
    fn chunks_split_rows_and_stop_after_error() {
        let dump = format!("{DUMP}not json\n[{{\"type\":\"int\",\"value\":1}}]\n");
        let reader = RawDumpReader::new(Cursor::new(dump)).expect("header");
        let chunks: Vec<_> = reader.chunks(2).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().expect("first").len(), 2);
        assert!(chunks[1].is_err());
    }

    #[test]
    fn byte_cells_decode_only_when_valid() {
        let mut table = RawTable::new(
            vec![ColumnMeta::new("s", "string")],
            vec![
                vec![RawValue::Bytes(b"caf\xe9".to_vec())],
                vec![RawValue::Bytes(b"ok".to_vec())],
            ],
        );
        table.decode_byte_cells(encoding_rs::UTF_8);
        assert_eq!(table.rows[0][0], RawValue::Bytes(b"caf\xe9".to_vec()));
        assert_eq!(table.rows[1][0], RawValue::Text("ok".to_string()));

        table.decode_byte_cells(encoding_rs::WINDOWS_1252);
        assert_eq!(table.rows[0][0], RawValue::Text("café".to_string()));
    }

    #[test]
    fn chunk_from_columns_validates_lengths() {
        let err = RawChunk::from_columns(
            vec![ColumnMeta::new("a", "double"), ColumnMeta::new("b", "double")],
            vec![vec![RawValue::Int(1)], vec![]],
        )
        .expect_err("ragged");
        assert_eq!(
            err.to_string(),
            "malformed chunk: column 'b' has 0 value(s) but column 'a' has 1"
        );

        let err = RawChunk::from_columns(vec![ColumnMeta::new("a", "double")], Vec::new())
            .expect_err("missing values");
        assert_eq!(
            err.to_string(),
            "malformed chunk: 1 column(s) declared but 0 value vector(s) supplied"
        );
    }
}
