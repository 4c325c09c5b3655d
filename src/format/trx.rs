//! Visual Studio TRX result reader.
//!
//! A TRX file lists results (`UnitTestResult`) and test definitions
//! (`UnitTest`) in separate sections, and results refer to their definition
//! by id only. Results usually come first, so the reader makes two streaming
//! passes: the first collects `id -> (className, method)` from the
//! definitions, the second yields one result per `UnitTestResult`.
//!
//! Outcomes translate as `NotExecuted` -> Skip, `Failed` -> Fail, and
//! anything else -> Pass.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use super::element::{Element, ElementStream};
use super::{Format, ReaderError, ReaderResult};
use crate::model::{CONSOLE_ERROR, CONSOLE_OUTPUT, CanonicalResult, Outcome};

/// Definition data looked up by test id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestDefinition {
    pub class_name: String,
    pub method: String,
}

/// Streaming reader for TRX files.
pub struct TrxReader<R> {
    definitions: HashMap<String, TestDefinition>,
    results: ElementStream<R>,
}

impl TrxReader<BufReader<File>> {
    /// Runs the definition pass over `path`, then reopens it for results.
    pub fn open(path: &Path) -> ReaderResult<Self> {
        let definitions = collect_definitions(ElementStream::open(path)?);
        Ok(Self {
            definitions,
            results: ElementStream::open(path)?,
        })
    }
}

impl<R: BufRead> TrxReader<R> {
    /// Builds a reader from two independent views of the same document.
    pub fn from_readers(definitions: R, results: R) -> Self {
        Self {
            definitions: collect_definitions(ElementStream::from_reader(definitions)),
            results: ElementStream::from_reader(results),
        }
    }
}

impl<R: BufRead> Iterator for TrxReader<R> {
    type Item = ReaderResult<CanonicalResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let definitions = &self.definitions;
        self.results
            .next_element(&["UnitTestResult"])
            .map(|element| element.and_then(|e| convert(&e, definitions)))
    }
}

fn collect_definitions<R: BufRead>(mut stream: ElementStream<R>) -> HashMap<String, TestDefinition> {
    let mut definitions = HashMap::new();
    while let Some(next) = stream.next_element(&["UnitTest"]) {
        match next {
            Ok(unit_test) => {
                let Some(id) = unit_test.attr("id") else {
                    continue;
                };
                let method = unit_test.child("TestMethod");
                let definition = TestDefinition {
                    class_name: method
                        .and_then(|m| m.attr("className"))
                        .unwrap_or_default()
                        .to_string(),
                    method: method
                        .and_then(|m| m.attr("name"))
                        .or_else(|| unit_test.attr("name"))
                        .unwrap_or_default()
                        .to_string(),
                };
                definitions.insert(id.to_string(), definition);
            }
            Err(e) => {
                warn!(
                    "Stopped reading TRX test definitions after {}: {}",
                    definitions.len(),
                    e
                );
                break;
            }
        }
    }
    definitions
}

fn convert(
    result: &Element,
    definitions: &HashMap<String, TestDefinition>,
) -> ReaderResult<CanonicalResult> {
    let name = result
        .attr("testName")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReaderError::Malformed("UnitTestResult without testName".to_string()))?;

    let duration = match result.attr("duration") {
        None => 0.0,
        Some(raw) => parse_duration(raw).ok_or_else(|| {
            ReaderError::Malformed(format!("test '{}' has invalid duration '{}'", name, raw))
        })?,
    };

    let outcome = match result.attr("outcome") {
        Some("NotExecuted") => Outcome::Skip,
        Some("Failed") => Outcome::Fail,
        _ => Outcome::Pass,
    };

    let definition = result
        .attr("testId")
        .and_then(|id| definitions.get(id))
        .cloned()
        .unwrap_or_default();
    let method = if definition.method.is_empty() {
        name.to_string()
    } else {
        definition.method
    };

    let mut canonical = CanonicalResult::new(name, Format::Trx, outcome)
        .with_type_name(definition.class_name)
        .with_method(method)
        .with_duration(duration);

    let message = result.text_at(&["Output", "ErrorInfo", "Message"]);
    match outcome {
        Outcome::Fail => {
            if let Some(message) = message {
                canonical = canonical.with_failure_message(message);
            }
            if let Some(trace) = result.content_at(&["Output", "ErrorInfo", "StackTrace"]) {
                canonical = canonical.with_stack_trace(trace);
            }
        }
        Outcome::Skip => {
            canonical = canonical.with_skip_reason(message.unwrap_or_default());
        }
        Outcome::Pass => {}
    }

    if let Some(out) = result.content_at(&["Output", "StdOut"]) {
        canonical = canonical.with_attachment(CONSOLE_OUTPUT, out);
    }
    if let Some(err) = result.content_at(&["Output", "StdErr"]) {
        canonical = canonical.with_attachment(CONSOLE_ERROR, err);
    }

    Ok(canonical)
}

/// Converts a TRX duration (`H:MM:SS[.fraction]`) to seconds.
///
/// This is a pure conversion: `hours * 3600 + minutes * 60 + seconds`.
///
/// ```
/// use testpost::format::trx::parse_duration;
///
/// let secs = parse_duration("00:01:05.250").unwrap();
/// assert!((secs - 65.25).abs() < 1e-6);
/// assert_eq!(parse_duration("1:00:00"), Some(3600.0));
/// assert_eq!(parse_duration("65.25"), None);
/// ```
pub fn parse_duration(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}
