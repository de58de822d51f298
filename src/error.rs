use std::path::PathBuf;

use thiserror::Error;

/// Failures the harness needs to tell apart from ordinary I/O context errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("duplicate fixture key '{key}': {path:?} clashes with {existing:?}")]
    DuplicateFixture {
        key: String,
        path: PathBuf,
        existing: PathBuf,
    },
    #[error("fixtures directory {0:?} does not exist")]
    MissingFixturesDir(PathBuf),
    #[error("raw dump line {line} is malformed: {reason}")]
    MalformedDump { line: usize, reason: String },
    #[error("row {row} has {actual} cell(s) but the dump declares {expected} column(s)")]
    RowWidth {
        row: usize,
        actual: usize,
        expected: usize,
    },
    #[error("chunk {chunk} is inconsistent with the first chunk: {reason}")]
    ChunkMismatch { chunk: usize, reason: String },
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
    #[error("reader '{reader}' failed for {fixture:?}: {details}")]
    ReaderFailed {
        reader: String,
        fixture: PathBuf,
        details: String,
    },
    #[error("unknown reader '{0}'")]
    UnknownReader(String),
    #[error("format '{name}' is declared as both {first} and {second}")]
    OverlappingFormat {
        name: String,
        first: &'static str,
        second: &'static str,
    },
    #[error("{failed} fixture(s) failed; see log for details")]
    BatchFailed { failed: usize },
    #[error("found {0} mismatch(es)")]
    Mismatches(usize),
}
