use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{reader::ReaderSpec, snapshot_diff::DEFAULT_MAX_DIFFERENCES};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Canonicalize, summarize and diff SAS7BDAT reference reader output",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write canonical snapshots for every fixture and reader
    Snapshot(SnapshotArgs),
    /// Write chunked per-column summaries for fixtures
    Summarize(SummarizeArgs),
    /// Compare two summary files under a numeric tolerance
    Compare(CompareArgs),
    /// Diff an actual snapshot against a reference snapshot
    Diff(DiffArgs),
}

/// Where fixtures live and which readers process them.
#[derive(Debug, Clone, Args)]
pub struct FixtureArgs {
    /// Directory searched recursively for fixtures (repeatable; defaults to fixtures/raw_data)
    #[arg(long = "fixtures-dir", action = clap::ArgAction::Append)]
    pub fixtures_dirs: Vec<PathBuf>,
    /// Directory fixture keys are made relative to
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// YAML file with readers, skip-list additions and format overrides
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Only run the named reader (repeatable)
    #[arg(long = "reader", action = clap::ArgAction::Append)]
    pub readers: Vec<String>,
    /// Reader backed by pre-generated dumps, as `NAME=DIR`
    #[arg(long = "dump-dir", value_parser = parse_dump_dir, action = clap::ArgAction::Append)]
    pub dump_dirs: Vec<ReaderSpec>,
    /// Reader backed by a program that prints a dump, as `NAME=PROGRAM [ARGS...]`
    #[arg(long = "reader-cmd", value_parser = parse_reader_command, action = clap::ArgAction::Append)]
    pub reader_commands: Vec<ReaderSpec>,
    /// Decode byte cells with the dump's declared encoding for the named reader (repeatable)
    #[arg(long = "decode-bytes", action = clap::ArgAction::Append)]
    pub decode_bytes: Vec<String>,
    /// Fixture file extension (defaults to sas7bdat)
    #[arg(long)]
    pub extension: Option<String>,
}

impl FixtureArgs {
    pub fn cli_readers(&self) -> Vec<ReaderSpec> {
        self.dump_dirs
            .iter()
            .chain(&self.reader_commands)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub fixtures: FixtureArgs,
    /// Directory receiving `<reader>/<key>.json` snapshots
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    #[command(flatten)]
    pub fixtures: FixtureArgs,
    /// Summarize a single fixture instead of scanning directories
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Output directory for batches, or output file with --input (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Rows per chunk (defaults to 50000)
    #[arg(long = "chunk-size", value_parser = parse_chunk_size)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Left-hand summary JSON file
    pub left: PathBuf,
    /// Right-hand summary JSON file
    pub right: PathBuf,
    /// Relative and absolute tolerance for numeric statistics (defaults to 1e-9)
    #[arg(long, value_parser = parse_tolerance)]
    pub tolerance: Option<f64>,
    /// Relative tolerance, overriding --tolerance
    #[arg(long = "rel-tol", value_parser = parse_tolerance)]
    pub rel_tol: Option<f64>,
    /// Absolute tolerance, overriding --tolerance
    #[arg(long = "abs-tol", value_parser = parse_tolerance)]
    pub abs_tol: Option<f64>,
    /// Name used for the left summary in the report
    #[arg(long = "left-label", default_value = "left")]
    pub left_label: String,
    /// Name used for the right summary in the report
    #[arg(long = "right-label", default_value = "right")]
    pub right_label: String,
    /// YAML config supplying default tolerances
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Exit non-zero when any mismatch is found
    #[arg(long = "fail-on-mismatch")]
    pub fail_on_mismatch: bool,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Snapshot produced by the parser under test
    pub actual: PathBuf,
    /// Reference snapshot
    pub expected: PathBuf,
    /// Maximum number of differences listed
    #[arg(long = "max-differences", default_value_t = DEFAULT_MAX_DIFFERENCES)]
    pub max_differences: usize,
    /// Exit non-zero when any difference is found
    #[arg(long = "fail-on-mismatch")]
    pub fail_on_mismatch: bool,
}

fn split_named(value: &str, what: &str) -> Result<(String, String), String> {
    let (name, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("{what} must look like NAME=VALUE"))?;
    let name = name.trim();
    let rest = rest.trim();
    if name.is_empty() {
        return Err(format!("{what} is missing a reader name"));
    }
    if rest.is_empty() {
        return Err(format!("{what} for '{name}' is empty"));
    }
    Ok((name.to_string(), rest.to_string()))
}

pub fn parse_dump_dir(value: &str) -> Result<ReaderSpec, String> {
    let (name, dir) = split_named(value, "Dump directory")?;
    Ok(ReaderSpec::dump_dir(name, dir))
}

pub fn parse_reader_command(value: &str) -> Result<ReaderSpec, String> {
    let (name, command) = split_named(value, "Reader command")?;
    let argv = command.split_whitespace().map(str::to_string).collect();
    Ok(ReaderSpec::command(name, argv))
}

pub fn parse_chunk_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .trim()
        .parse()
        .map_err(|_| format!("Chunk size '{value}' is not a whole number"))?;
    if size == 0 {
        return Err("Chunk size must be greater than zero".to_string());
    }
    Ok(size)
}

pub fn parse_tolerance(value: &str) -> Result<f64, String> {
    let tolerance: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("Tolerance '{value}' is not a number"))?;
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(format!("Tolerance must be a non-negative number, got {value}"));
    }
    Ok(tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderSource;

    #[test]
    fn named_reader_values_parse() {
        let spec = parse_dump_dir("pandas=dumps/pandas").expect("dump dir");
        assert_eq!(spec, ReaderSpec::dump_dir("pandas", "dumps/pandas"));

        let spec = parse_reader_command("pyreadstat = python3 dump.py --strict").expect("cmd");
        assert_eq!(spec.name, "pyreadstat");
        assert_eq!(
            spec.source,
            ReaderSource::Command(vec!["python3".into(), "dump.py".into(), "--strict".into()])
        );

        assert!(parse_dump_dir("pandas").is_err());
        assert!(parse_dump_dir("=dir").is_err());
        assert!(parse_reader_command("x=  ").is_err());
    }

    #[test]
    fn numeric_options_are_validated() {
        assert_eq!(parse_chunk_size("128"), Ok(128));
        assert!(parse_chunk_size("0").is_err());
        assert!(parse_chunk_size("-4").is_err());
        assert_eq!(parse_tolerance("1e-6"), Ok(1e-6));
        assert!(parse_tolerance("-1").is_err());
        assert!(parse_tolerance("inf").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
