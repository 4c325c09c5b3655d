//! Result file formats and their readers.
//!
//! Each supported schema is a variant of [`Format`]. A file is assigned a
//! format purely by its name suffix, and [`Format::read`] returns a lazy
//! [`ResultStream`] of canonical results.
//!
//! # Supported Formats
//!
//! | Format | File name suffixes | Reader |
//! |--------|--------------------|--------|
//! | xUnit  | `testResults.xml`, `test-results.xml`, `test_results.xml` | [`xunit`] |
//! | JUnit  | `junit-results.xml`, `junitresults.xml` | [`junit`] |
//! | TRX    | `.trx` | [`trx`] |
//! | YAML   | `testResults.yml`, `test-results.yml`, `test_results.yml` | [`yaml`] |
//!
//! # Failure Policy
//!
//! Readers never abort a file because of one bad record. A record that is
//! missing required fields, or whose outcome does not map onto
//! [`Outcome`](crate::model::Outcome), is yielded as an `Err` item;
//! [`ResultStream`] logs it and moves on. Only a document-level failure
//! (unreadable file, broken XML syntax) ends the stream early.

pub mod element;
pub mod junit;
pub mod trx;
pub mod xunit;
pub mod yaml;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::CanonicalResult;

/// Result type for reader operations.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Errors produced while reading a result file.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The file could not be opened or read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The XML document is syntactically broken; nothing after this point can be read.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The YAML document could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A single record is missing data or carries unparsable values.
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// A record's outcome is outside {Pass, Fail, Skip}.
    #[error("Unmapped outcome '{outcome}' for test '{test}'")]
    UnmappedOutcome { test: String, outcome: String },
}

impl ReaderError {
    /// Returns `true` if the error only affects one record and the stream
    /// can continue past it.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ReaderError::Malformed(_) | ReaderError::UnmappedOutcome { .. }
        )
    }
}

/// The closed set of result schemas this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    XUnit,
    JUnit,
    Trx,
    Yaml,
}

/// Suffix table consulted in order; the first matching entry wins.
const SUFFIXES: &[(Format, &[&str])] = &[
    (
        Format::XUnit,
        &["testResults.xml", "test-results.xml", "test_results.xml"],
    ),
    (Format::JUnit, &["junit-results.xml", "junitresults.xml"]),
    (Format::Trx, &[".trx"]),
    (
        Format::Yaml,
        &["testResults.yml", "test-results.yml", "test_results.yml"],
    ),
];

impl Format {
    /// Every format, in suffix-table order.
    pub const ALL: [Format; 4] = [Format::XUnit, Format::JUnit, Format::Trx, Format::Yaml];

    /// Short name used in logs and published as `automatedTestType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::XUnit => "xunit",
            Format::JUnit => "junit",
            Format::Trx => "trx",
            Format::Yaml => "yaml",
        }
    }

    /// File name suffixes recognized for this format.
    pub fn suffixes(&self) -> &'static [&'static str] {
        SUFFIXES
            .iter()
            .find(|(format, _)| format == self)
            .map(|(_, suffixes)| *suffixes)
            .unwrap_or(&[])
    }

    /// Returns `true` if `file_name` ends with one of this format's suffixes.
    pub fn matches(&self, file_name: &str) -> bool {
        self.suffixes().iter().any(|s| file_name.ends_with(s))
    }

    /// Picks the format for a bare file name.
    ///
    /// ```
    /// use testpost::format::Format;
    ///
    /// assert_eq!(Format::detect("MyTests.testResults.xml"), Some(Format::XUnit));
    /// assert_eq!(Format::detect("junit-results.xml"), Some(Format::JUnit));
    /// assert_eq!(Format::detect("run.trx"), Some(Format::Trx));
    /// assert_eq!(Format::detect("results.json"), None);
    /// ```
    pub fn detect(file_name: &str) -> Option<Format> {
        SUFFIXES
            .iter()
            .find(|(_, suffixes)| suffixes.iter().any(|s| file_name.ends_with(s)))
            .map(|(format, _)| *format)
    }

    /// Picks the format for a path by looking at its file name.
    pub fn detect_path(path: &Path) -> Option<Format> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Format::detect)
    }

    /// Opens `path` and returns a lazy stream of its results.
    ///
    /// The file is opened eagerly so that a missing or unreadable file is
    /// reported here. Everything else is read on demand. Restarting a stream
    /// means calling `read` again.
    pub fn read(&self, path: &Path) -> ReaderResult<ResultStream> {
        let records: RecordIter = match self {
            Format::XUnit => Box::new(xunit::XUnitReader::open(path)?),
            Format::JUnit => Box::new(junit::JUnitReader::open(path)?),
            Format::Trx => Box::new(trx::TrxReader::open(path)?),
            Format::Yaml => Box::new(yaml::YamlReader::open(path)?),
        };
        Ok(ResultStream::new(path.to_path_buf(), *self, records))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Raw per-record output of a format reader.
pub type RecordIter = Box<dyn Iterator<Item = ReaderResult<CanonicalResult>> + Send>;

/// A lazy sequence of canonical results read from one file.
///
/// Record-level errors are logged and skipped. A document-level error is
/// logged and ends the stream. When the stream is exhausted a one-line
/// summary is logged.
pub struct ResultStream {
    path: PathBuf,
    format: Format,
    records: RecordIter,
    read: usize,
    dropped: usize,
    finished: bool,
}

impl ResultStream {
    pub fn new(path: PathBuf, format: Format, records: RecordIter) -> Self {
        Self {
            path,
            format,
            records,
            read: 0,
            dropped: 0,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of results yielded so far.
    pub fn read_count(&self) -> usize {
        self.read
    }

    /// Number of records dropped so far.
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            info!(
                "Read {} results from {} ({} dropped)",
                self.read,
                self.path.display(),
                self.dropped
            );
        }
    }
}

impl Iterator for ResultStream {
    type Item = CanonicalResult;

    fn next(&mut self) -> Option<CanonicalResult> {
        if self.finished {
            return None;
        }
        loop {
            match self.records.next() {
                Some(Ok(result)) => {
                    self.read += 1;
                    return Some(result);
                }
                Some(Err(e @ ReaderError::UnmappedOutcome { .. })) => {
                    self.dropped += 1;
                    warn!("Dropping record in {}: {}", self.path.display(), e);
                }
                Some(Err(e)) if e.is_record_level() => {
                    self.dropped += 1;
                    warn!("Skipping record in {}: {}", self.path.display(), e);
                }
                Some(Err(e)) => {
                    error!(
                        "Failed to read {} ({} format), stopping after {} results: {}",
                        self.path.display(),
                        self.format,
                        self.read,
                        e
                    );
                    self.finish();
                    return None;
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
    }
}

/// Parses a floating point seconds value, treating an absent value as zero.
pub(crate) fn parse_seconds(test: &str, value: Option<&str>) -> ReaderResult<f64> {
    match value.map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(raw) => raw.parse::<f64>().map_err(|_| {
            ReaderError::Malformed(format!("test '{}' has invalid time '{}'", test, raw))
        }),
    }
}
