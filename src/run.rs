//! The end-to-end pipeline.
//!
//! ```text
//! discover ──► read (blocking task) ──► batches ──► PublishWorkerPool
//!                                                         │
//!                                   exit code ◄── fallback scan (on failure)
//! ```
//!
//! Files are read on a blocking task and batched as they stream, so
//! publishing starts before the last file has been read. When no result
//! file exists a single placeholder result is published instead, so the
//! remote run is never left empty.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::discovery::{self, ResultFile};
use crate::exit_codes::ExitCode;
use crate::fallback::{self, FallbackVerdict};
use crate::format::Format;
use crate::model::{CanonicalResult, Outcome};
use crate::publish::StoreFactory;
use crate::publish::pool::{PoolReport, PublishWorkerPool};

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub roots: Vec<PathBuf>,
    /// Name of the placeholder result.
    pub work_item: String,
    pub batch_size: usize,
    /// Exit code of the step that produced the result files.
    pub upstream_exit_code: i32,
}

/// Per-file reading statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub path: PathBuf,
    pub format: Format,
    pub read: usize,
    pub dropped: usize,
    /// `false` if the file could not be opened at all.
    pub opened: bool,
}

/// Outcome counts over everything read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Skip => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// What reading produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub files: Vec<FileStats>,
    pub outcomes: OutcomeCounts,
    pub batches: usize,
}

impl ReadStats {
    pub fn dropped(&self) -> usize {
        self.files.iter().map(|f| f.dropped).sum()
    }
}

/// Reads every file in order and hands out batches of at most `batch_size`
/// results.
///
/// `sink` returns `false` to stop reading (for example when the consumer has
/// gone away). A file that cannot be opened is logged and skipped.
pub fn read_batches<S>(files: &[ResultFile], batch_size: usize, mut sink: S) -> ReadStats
where
    S: FnMut(Vec<CanonicalResult>) -> bool,
{
    let batch_size = batch_size.max(1);
    let mut stats = ReadStats::default();
    let mut batch = Vec::new();

    'files: for file in files {
        let mut stream = match file.format.read(&file.path) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open {}: {}", file.path.display(), e);
                stats.files.push(FileStats {
                    path: file.path.clone(),
                    format: file.format,
                    read: 0,
                    dropped: 0,
                    opened: false,
                });
                continue;
            }
        };

        while let Some(result) = stream.next() {
            stats.outcomes.add(result.outcome);
            batch.push(result);
            if batch.len() == batch_size {
                stats.batches += 1;
                if !sink(std::mem::take(&mut batch)) {
                    warn!("Batch consumer went away; stopping reading");
                    stats.files.push(file_stats(file, &stream));
                    break 'files;
                }
            }
        }
        stats.files.push(file_stats(file, &stream));
    }

    if !batch.is_empty() {
        stats.batches += 1;
        sink(batch);
    }
    stats
}

fn file_stats(file: &ResultFile, stream: &crate::format::ResultStream) -> FileStats {
    FileStats {
        path: file.path.clone(),
        format: file.format,
        read: stream.read_count(),
        dropped: stream.dropped_count(),
        opened: true,
    }
}

/// The result published when no result files were found.
///
/// Passes if the upstream step exited 0, fails otherwise.
///
/// ```
/// use testpost::model::Outcome;
/// use testpost::run::placeholder_result;
///
/// assert_eq!(placeholder_result("Nightly", 0).outcome, Outcome::Pass);
///
/// let failed = placeholder_result("Nightly", 3);
/// assert_eq!(failed.outcome, Outcome::Fail);
/// assert!(failed.failure_message.unwrap().contains("exit code 3"));
/// ```
pub fn placeholder_result(work_item: &str, upstream_exit_code: i32) -> CanonicalResult {
    let result = CanonicalResult::new(work_item, Format::XUnit, Outcome::Pass)
        .with_type_name(work_item)
        .with_method(work_item);
    if upstream_exit_code == 0 {
        return result;
    }
    let mut result = result.with_failure_message(format!(
        "No test results were found for work item '{}' and it finished with exit code {}",
        work_item, upstream_exit_code
    ));
    result.outcome = Outcome::Fail;
    result
}

/// Why the run ended with its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every batch was published.
    Published,
    /// Only the placeholder was published; carries the upstream exit code.
    NoResults { upstream_exit_code: i32 },
    /// Some batch failed; the fallback scan decided.
    Fallback(FallbackVerdict),
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Published => ExitCode::OK,
            Verdict::NoResults {
                upstream_exit_code: 0,
            } => ExitCode::OK,
            Verdict::NoResults { .. } => ExitCode::RUN_FAILED,
            Verdict::Fallback(FallbackVerdict::AllPassed { .. }) => ExitCode::OK,
            Verdict::Fallback(FallbackVerdict::FailuresFound { .. }) => ExitCode::FAILURES_FOUND,
            Verdict::Fallback(FallbackVerdict::NoResultFiles) => ExitCode::RUN_FAILED,
        }
    }
}

/// Everything a publish run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub read: ReadStats,
    pub pool: PoolReport,
    pub verdict: Verdict,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }
}

/// Discovers, reads, and publishes, then decides the exit code.
pub async fn publish<F: StoreFactory>(
    pool: &PublishWorkerPool<F>,
    options: &RunOptions,
) -> anyhow::Result<RunSummary> {
    let files = discovery::discover(&options.roots);
    info!("Found {} result files", files.len());

    let (tx, rx) = mpsc::unbounded_channel();
    let reader = if files.is_empty() {
        warn!(
            "No result files found; publishing a placeholder for '{}'",
            options.work_item
        );
        let placeholder = placeholder_result(&options.work_item, options.upstream_exit_code);
        let mut stats = ReadStats::default();
        stats.outcomes.add(placeholder.outcome);
        stats.batches = 1;
        tx.send(vec![placeholder])
            .context("Batch queue closed before publishing started")?;
        drop(tx);
        tokio::spawn(async move { stats })
    } else {
        let files = files.clone();
        let batch_size = options.batch_size;
        tokio::task::spawn_blocking(move || {
            read_batches(&files, batch_size, |batch| tx.send(batch).is_ok())
        })
    };

    let pool_report = pool.run(rx).await;
    let read = reader.await.context("Result reader task failed")?;

    let verdict = if pool_report.failed {
        warn!(
            "{} of {} batches failed to publish; checking local xUnit totals",
            pool_report.failed_batches, pool_report.batches
        );
        let verdict = fallback::check(&discovery::xunit_paths(&files))
            .context("Failed to run the fallback scan")?;
        Verdict::Fallback(verdict)
    } else if files.is_empty() {
        Verdict::NoResults {
            upstream_exit_code: options.upstream_exit_code,
        }
    } else {
        Verdict::Published
    };

    info!("Exiting with code {} ({:?})", verdict.exit_code(), verdict);
    Ok(RunSummary {
        read,
        pool: pool_report,
        verdict,
    })
}

/// Discovers and reads every file without publishing anything.
pub fn scan(roots: &[PathBuf], batch_size: usize) -> ReadStats {
    let files = discovery::discover(roots);
    read_batches(&files, batch_size, |_| true)
}

/// Reads a single file, regardless of where it lives.
pub fn scan_file(path: &Path) -> Option<ReadStats> {
    let format = Format::detect_path(path)?;
    let file = ResultFile {
        path: path.to_path_buf(),
        format,
    };
    Some(read_batches(std::slice::from_ref(&file), usize::MAX, |_| true))
}
