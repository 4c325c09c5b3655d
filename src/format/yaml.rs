//! YAML result reader.
//!
//! The document is a sequence of records (or a mapping with a `tests`
//! sequence) using the same fields as the xUnit reader:
//!
//! ```yaml
//! - name: Ns.Tests.Foo(1)
//!   type: Ns.Tests
//!   method: Foo
//!   time: 0.5
//!   result: Pass
//! - name: Ns.Tests.Bar
//!   result: Fail
//!   exception_type: System.Exception
//!   failure_message: boom
//!   stack_trace: at Bar()
//!   output: console text
//!   attachments:
//!     - name: extra.log
//!       text: more text
//! ```
//!
//! Unlike the XML readers the whole document is parsed up front; each record
//! is then converted lazily so one bad record does not affect the rest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use super::{Format, ReaderError, ReaderResult};
use crate::model::{Attachment, CONSOLE_OUTPUT, CanonicalResult, Outcome};

#[derive(Debug, Deserialize)]
struct YamlRecord {
    name: String,
    #[serde(default, rename = "type")]
    type_name: String,
    #[serde(default)]
    method: String,
    #[serde(default, alias = "duration")]
    time: Option<f64>,
    result: String,
    #[serde(default)]
    exception_type: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default)]
    skip_reason: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

/// Reader for YAML result documents.
pub struct YamlReader {
    records: std::vec::IntoIter<Value>,
    pending_error: Option<ReaderError>,
}

impl YamlReader {
    pub fn open(path: &Path) -> ReaderResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: Read>(mut source: R) -> Self {
        let mut text = String::new();
        if let Err(e) = source.read_to_string(&mut text) {
            return Self::failed(e.into());
        }
        if text.trim().is_empty() {
            return Self {
                records: Vec::new().into_iter(),
                pending_error: None,
            };
        }
        match serde_yaml::from_str::<Value>(&text) {
            Ok(document) => match into_records(document) {
                Ok(records) => Self {
                    records: records.into_iter(),
                    pending_error: None,
                },
                Err(e) => Self::failed(e),
            },
            Err(e) => Self::failed(e.into()),
        }
    }

    fn failed(error: ReaderError) -> Self {
        Self {
            records: Vec::new().into_iter(),
            pending_error: Some(error),
        }
    }
}

impl Iterator for YamlReader {
    type Item = ReaderResult<CanonicalResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        self.records.next().map(convert)
    }
}

fn into_records(document: Value) -> ReaderResult<Vec<Value>> {
    match document {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(records) => Ok(records),
        Value::Mapping(mut map) => match map.remove("tests") {
            Some(Value::Sequence(records)) => Ok(records),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(ReaderError::Malformed(
                "'tests' is not a sequence".to_string(),
            )),
        },
        _ => Err(ReaderError::Malformed(
            "document is neither a sequence nor a mapping".to_string(),
        )),
    }
}

fn convert(value: Value) -> ReaderResult<CanonicalResult> {
    let record: YamlRecord = serde_yaml::from_value(value)
        .map_err(|e| ReaderError::Malformed(format!("invalid YAML record: {}", e)))?;

    if record.name.is_empty() {
        return Err(ReaderError::Malformed("record with empty name".to_string()));
    }

    let outcome = Outcome::parse(&record.result).ok_or_else(|| ReaderError::UnmappedOutcome {
        test: record.name.clone(),
        outcome: record.result.clone(),
    })?;

    let mut result = CanonicalResult::new(record.name, Format::Yaml, outcome)
        .with_type_name(record.type_name)
        .with_method(record.method)
        .with_duration(record.time.unwrap_or(0.0));

    result.exception_type = record.exception_type;
    result.failure_message = record.failure_message;
    result.stack_trace = record.stack_trace;
    result.skip_reason = match outcome {
        Outcome::Skip => Some(record.skip_reason.unwrap_or_default()),
        _ => record.skip_reason,
    };

    if let Some(output) = record.output.filter(|o| !o.is_empty()) {
        result = result.with_attachment(CONSOLE_OUTPUT, output);
    }
    result.attachments.extend(record.attachments);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(doc: &str) -> Vec<ReaderResult<CanonicalResult>> {
        YamlReader::from_reader(doc.as_bytes()).collect()
    }

    #[test]
    fn test_reads_sequence_document() {
        let doc = r#"
- name: Ns.T.Foo(1)
  type: Ns.T
  method: Foo
  time: 0.5
  result: Pass
- name: Ns.T.Bar
  result: Fail
  exception_type: System.Exception
  failure_message: boom
  stack_trace: at Bar()
  output: console
  attachments:
    - name: extra.log
      text: more
"#;
        let results: Vec<_> = read(doc).into_iter().map(Result::unwrap).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].type_name, "Ns.T");
        assert_eq!(results[0].duration_seconds, 0.5);
        assert_eq!(results[0].kind, Format::Yaml);

        let bar = &results[1];
        assert_eq!(bar.outcome, Outcome::Fail);
        assert_eq!(bar.failure_message.as_deref(), Some("boom"));
        let names: Vec<_> = bar.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![CONSOLE_OUTPUT, "extra.log"]);
    }

    #[test]
    fn test_reads_tests_mapping() {
        let doc = "tests:\n  - name: A\n    result: Skip\n";
        let result = read(doc).pop().unwrap().unwrap();
        assert_eq!(result.outcome, Outcome::Skip);
        assert_eq!(result.skip_reason.as_deref(), Some(""));
    }

    #[test]
    fn test_bad_records_are_isolated() {
        let doc = r#"
- name: A
  result: Maybe
- result: Pass
- name: C
  result: Pass
  time: 1.25
"#;
        let items = read(doc);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(ReaderError::UnmappedOutcome { .. })));
        assert!(matches!(items[1], Err(ReaderError::Malformed(_))));
        assert_eq!(items[2].as_ref().unwrap().duration_seconds, 1.25);
    }

    #[test]
    fn test_unparsable_document_yields_single_error() {
        let items = read("- name: [unclosed");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ReaderError::Yaml(_))));
    }

    #[test]
    fn test_empty_document() {
        assert!(read("").is_empty());
    }
}
