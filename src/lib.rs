pub mod batch;
pub mod canonical;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod format;
pub mod io_utils;
pub mod raw;
pub mod reader;
pub mod snapshot;
pub mod snapshot_diff;
pub mod summary;
pub mod table;

use std::{env, path::PathBuf, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    batch::{Artifact, BatchOutcome},
    cli::{Cli, Commands, FixtureArgs},
    compare::compare_summaries,
    config::HarnessConfig,
    error::HarnessError,
    fixtures::{Discovery, Fixture, FixtureSet},
    reader::{ReaderSelection, ReaderSpec, ReferenceReader},
    snapshot::{SnapshotDocument, snapshot_table},
    snapshot_diff::{DiffOptions, diff_snapshots},
    summary::{DEFAULT_CHUNK_SIZE, DatasetSummary},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sas_oracle", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Snapshot(args) => handle_snapshot(&args),
        Commands::Summarize(args) => handle_summarize(&args),
        Commands::Compare(args) => handle_compare(&args),
        Commands::Diff(args) => handle_diff(&args),
    }
}

/// Config file, resolved readers and discovered fixtures for a batch command.
struct Workspace {
    config: HarnessConfig,
    readers: Vec<ReaderSpec>,
}

impl Workspace {
    fn load(args: &FixtureArgs) -> Result<Self> {
        let config = HarnessConfig::load_optional(args.config.as_deref())?;
        let readers = ReaderSelection {
            only: &args.readers,
            decode_bytes: &args.decode_bytes,
        }
        .resolve(&config.readers, &args.cli_readers())?;
        debug!(
            "Readers: {:?}",
            readers.iter().map(|reader| reader.name.as_str()).collect::<Vec<_>>()
        );
        Ok(Self { config, readers })
    }

    fn discover(&self, args: &FixtureArgs) -> Result<FixtureSet> {
        let dirs = if args.fixtures_dirs.is_empty() {
            vec![PathBuf::from(fixtures::DEFAULT_FIXTURES_DIR)]
        } else {
            args.fixtures_dirs.clone()
        };
        let skip = self.config.skip_set();
        let extension = args
            .extension
            .as_deref()
            .unwrap_or_else(|| self.config.extension());
        Discovery {
            root: &args.root,
            extension,
            skip: &skip,
        }
        .discover(&dirs)
    }
}

fn finish_batch(outcome: &BatchOutcome) -> Result<()> {
    let report = outcome.report();
    if !report.is_empty() {
        eprint!("{report}");
    }
    if outcome.is_success() {
        info!("Wrote {} document(s)", outcome.written.len());
        Ok(())
    } else {
        Err(HarnessError::BatchFailed {
            failed: outcome.failures.len(),
        }
        .into())
    }
}

fn handle_snapshot(args: &cli::SnapshotArgs) -> Result<()> {
    let workspace = Workspace::load(&args.fixtures)?;
    let catalog = workspace.config.format_catalog()?;
    let fixtures = workspace.discover(&args.fixtures)?;
    if fixtures.is_empty() {
        warn!("No fixtures found; nothing to do.");
        return Ok(());
    }
    info!(
        "Snapshotting {} fixture(s) with {} reader(s) into {:?}",
        fixtures.fixtures.len(),
        workspace.readers.len(),
        args.output_dir
    );
    let outcome = batch::run_batch(
        &fixtures,
        &workspace.readers,
        &args.output_dir,
        Artifact::Snapshot,
        |reader, fixture| snapshot_table(reader.read_table(fixture)?, &catalog),
    )?;
    finish_batch(&outcome)
}

fn handle_summarize(args: &cli::SummarizeArgs) -> Result<()> {
    let workspace = Workspace::load(&args.fixtures)?;
    let chunk_size = args
        .chunk_size
        .or(workspace.config.chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);

    if let Some(input) = &args.input {
        let [reader] = workspace.readers.as_slice() else {
            bail!(
                "--input needs exactly one reader, found {}; select one with --reader",
                workspace.readers.len()
            );
        };
        let fixture = Fixture {
            key: fixtures::fixture_key(input, &args.fixtures.root),
            path: input.clone(),
        };
        info!("Summarizing {} with {} (chunk size {chunk_size})", fixture.key, reader.name);
        let summary = reader
            .summarize(&fixture, chunk_size)
            .with_context(|| format!("Summarizing {:?}", input))?;
        io_utils::write_json_pretty(args.output.as_deref(), &summary)?;
        return Ok(());
    }

    let Some(output) = &args.output else {
        bail!("--output is required when summarizing fixture directories");
    };
    let fixtures = workspace.discover(&args.fixtures)?;
    if fixtures.is_empty() {
        warn!("No fixtures found; nothing to do.");
        return Ok(());
    }
    info!(
        "Summarizing {} fixture(s) with {} reader(s), chunk size {chunk_size}",
        fixtures.fixtures.len(),
        workspace.readers.len()
    );
    let outcome = batch::run_batch(
        &fixtures,
        &workspace.readers,
        output,
        Artifact::Summary,
        |reader, fixture| reader.summarize(fixture, chunk_size),
    )?;
    finish_batch(&outcome)
}

fn handle_compare(args: &cli::CompareArgs) -> Result<()> {
    let config = HarnessConfig::load_optional(args.config.as_deref())?;
    let tolerance = config.tolerance(args.tolerance, args.rel_tol, args.abs_tol);
    let left = DatasetSummary::load(&args.left)?;
    let right = DatasetSummary::load(&args.right)?;
    debug!("Comparing with rel={} abs={}", tolerance.rel, tolerance.abs);

    let report = compare_summaries(&left, &right, tolerance);
    print!("{}", report.render(&args.left_label, &args.right_label));
    if args.fail_on_mismatch && !report.is_match() {
        return Err(HarnessError::Mismatches(report.mismatch_count().max(1)).into());
    }
    Ok(())
}

fn handle_diff(args: &cli::DiffArgs) -> Result<()> {
    let actual = SnapshotDocument::load(&args.actual)?;
    let expected = SnapshotDocument::load(&args.expected)?;
    let options = DiffOptions {
        max_differences: args.max_differences,
        ..DiffOptions::default()
    };
    let diff = diff_snapshots(&actual, &expected, &options);
    print!("{}", diff.render());
    if args.fail_on_mismatch && !diff.is_match() {
        return Err(HarnessError::Mismatches(diff.total).into());
    }
    Ok(())
}
