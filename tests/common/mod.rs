#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

/// Header plus two rows covering numbers, dates, datetimes, text and bytes.
pub fn sample_dump() -> String {
    dump_text(
        &json!({
            "encoding": "utf-8",
            "columns": [
                {"name": "id", "storage": "double"},
                {"name": "seen", "storage": "double", "format": "DATETIME20"},
                {"name": "born", "storage": "double", "format": "DATE9", "label": "Birth date"},
                {"name": "name", "storage": "string"}
            ]
        }),
        &[
            json!([
                {"type": "float", "value": 1.0},
                {"type": "float", "value": 60.0},
                {"type": "date", "value": "1960-01-02"},
                {"type": "text", "value": "Ann"}
            ]),
            json!([
                {"type": "float", "value": null},
                {"type": "timestamp", "value": "1960-01-01T00:00:01"},
                {"type": "null"},
                {"type": "bytes", "value": [65]}
            ]),
            json!([
                {"type": "int", "value": 3},
                {"type": "text", "value": "1960-01-01 00:02:00"},
                {"type": "float", "value": -1.5},
                {"type": "text", "value": ""}
            ]),
        ],
    )
}

pub fn dump_text(header: &Value, rows: &[Value]) -> String {
    let mut text = serde_json::to_string(header).expect("header json");
    text.push('\n');
    for row in rows {
        text.push_str(&serde_json::to_string(row).expect("row json"));
        text.push('\n');
    }
    text
}

/// Scratch directory laid out like a repository: fixtures under
/// `fixtures/raw_data`, reader dumps under `dumps/<reader>`.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` under the workspace, creating parent directories.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Creates an empty fixture file at `key` (relative to the workspace root).
    pub fn touch_fixture(&self, key: &str) -> PathBuf {
        self.write(key, "")
    }

    pub fn dump_dir(&self, reader: &str) -> PathBuf {
        self.path().join("dumps").join(reader)
    }

    /// `NAME=DIR` argument for `--dump-dir`.
    pub fn dump_dir_arg(&self, reader: &str) -> String {
        format!("{reader}={}", self.dump_dir(reader).display())
    }

    /// Stores the raw dump `reader` produces for fixture `key`.
    pub fn write_dump(&self, reader: &str, key: &str, dump: &str) -> PathBuf {
        let relative = Path::new("dumps")
            .join(reader)
            .join(key)
            .with_extension("jsonl");
        self.write(relative.to_str().expect("utf-8 path"), dump)
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).expect("read workspace file")
    }

    pub fn read_json(&self, name: &str) -> Value {
        serde_json::from_str(&self.read(name)).expect("parse workspace json")
    }
}
