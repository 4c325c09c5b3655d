//! JUnit XML result reader.
//!
//! JUnit has no outcome attribute; the outcome is implied by the children of
//! each `<testcase>`:
//!
//! | Child | Outcome |
//! |-------|---------|
//! | `<failure>` or `<error>` | Fail |
//! | `<skipped>` | Skip |
//! | none of the above | Pass |
//!
//! `<system-out>` and `<system-err>` become attachments.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::element::{Element, ElementStream};
use super::{Format, ReaderError, ReaderResult, parse_seconds};
use crate::model::{CONSOLE_ERROR, CONSOLE_OUTPUT, CanonicalResult, Outcome};

/// Streaming reader for JUnit XML.
pub struct JUnitReader<R> {
    elements: ElementStream<R>,
}

impl JUnitReader<BufReader<File>> {
    pub fn open(path: &Path) -> ReaderResult<Self> {
        Ok(Self {
            elements: ElementStream::open(path)?,
        })
    }
}

impl<R: BufRead> JUnitReader<R> {
    pub fn from_reader(source: R) -> Self {
        Self {
            elements: ElementStream::from_reader(source),
        }
    }
}

impl<R: BufRead> Iterator for JUnitReader<R> {
    type Item = ReaderResult<CanonicalResult>;

    fn next(&mut self) -> Option<Self::Item> {
        self.elements
            .next_element(&["testcase"])
            .map(|element| element.and_then(|e| convert(&e)))
    }
}

fn convert(testcase: &Element) -> ReaderResult<CanonicalResult> {
    let method = testcase
        .attr("name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReaderError::Malformed("<testcase> without a name".to_string()))?;
    let classname = testcase.attr("classname").unwrap_or_default();

    let name = if classname.is_empty() {
        method.to_string()
    } else {
        format!("{}.{}", classname, method)
    };

    let duration = parse_seconds(&name, testcase.attr("time"))?;

    let failure = testcase
        .child("failure")
        .or_else(|| testcase.child("error"));
    let skipped = testcase.child("skipped");

    let outcome = match (failure, skipped) {
        (Some(_), _) => Outcome::Fail,
        (None, Some(_)) => Outcome::Skip,
        (None, None) => Outcome::Pass,
    };

    let mut result = CanonicalResult::new(name, Format::JUnit, outcome)
        .with_type_name(classname)
        .with_method(method)
        .with_duration(duration);

    if let Some(failure) = failure {
        if let Some(kind) = failure.attr("type") {
            result = result.with_exception_type(kind);
        }
        let message = failure
            .attr("message")
            .filter(|m| !m.is_empty())
            .unwrap_or(failure.scalar());
        result = result.with_failure_message(message);
        if !failure.scalar().is_empty() {
            result = result.with_stack_trace(failure.text.as_str());
        }
    } else if let Some(skipped) = skipped {
        let reason = skipped
            .attr("message")
            .filter(|m| !m.is_empty())
            .unwrap_or(skipped.scalar());
        result = result.with_skip_reason(reason);
    }

    if let Some(out) = testcase.content_at(&["system-out"]) {
        result = result.with_attachment(CONSOLE_OUTPUT, out);
    }
    if let Some(err) = testcase.content_at(&["system-err"]) {
        result = result.with_attachment(CONSOLE_ERROR, err);
    }

    Ok(result)
}
