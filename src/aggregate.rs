//! Grouping of canonical results into publishable records.
//!
//! [`ResultAggregator`] turns one batch of [`CanonicalResult`]s into
//! [`PublishRecord`]s. Data-driven invocations (names ending in `)`) are
//! folded into a single parent record keyed by their base name, and the
//! order in which they were folded is kept in an [`OrderingIndex`].
//!
//! The remote store echoes sub-results back by position only, so the
//! ordering index is the sole way to recover which published sub-result
//! belongs to which original test:
//!
//! ```text
//!   input:   Foo(1)  Bar  Foo(2)  Foo(3)
//!
//!   records: Foo [dataDriven]            Bar
//!              ├─ Foo(1)
//!              ├─ Foo(2)
//!              └─ Foo(3)
//!
//!   ordering: "Foo" -> ["Foo(1)", "Foo(2)", "Foo(3)"]
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::model::{CanonicalResult, Outcome};

/// How a published record relates to its sub-results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupType {
    /// A standalone record with no sub-results.
    #[default]
    None,
    /// Parent of data-driven invocations sharing a base name.
    DataDriven,
}

/// Summary of one data-driven invocation nested under its parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubResult {
    pub display_name: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Outcome,
    pub duration_in_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// 1-based position within the parent.
    pub sequence_id: usize,
}

impl SubResult {
    fn from_result(result: &CanonicalResult, sequence_id: usize) -> Self {
        Self {
            display_name: result.name.clone(),
            outcome: result.outcome,
            duration_in_ms: result.duration_seconds * 1000.0,
            error_message: error_message(result),
            stack_trace: result.stack_trace.clone(),
            sequence_id,
        }
    }
}

/// The unit sent to the remote test-run store.
///
/// Serializes to the camelCase shape the store expects. A standalone record
/// mirrors one canonical result; a grouped record carries the invocations of
/// a data-driven test in `sub_results`, in encounter order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRecord {
    pub automated_test_name: String,
    pub test_case_title: String,
    pub automated_test_storage: String,
    pub automated_test_type: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Outcome,
    pub state: &'static str,
    pub duration_in_ms: f64,
    pub started_date: DateTime<Utc>,
    pub completed_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Skip reason, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub result_group_type: GroupType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<SubResult>,
}

impl PublishRecord {
    fn from_result(result: &CanonicalResult, name: &str, completed: DateTime<Utc>) -> Self {
        let duration_in_ms = result.duration_seconds * 1000.0;
        Self {
            automated_test_name: name.to_string(),
            test_case_title: name.to_string(),
            automated_test_storage: result.type_name.clone(),
            automated_test_type: result.kind.to_string(),
            outcome: result.outcome,
            state: "Completed",
            duration_in_ms,
            started_date: started_at(completed, duration_in_ms),
            completed_date: completed,
            error_message: error_message(result),
            stack_trace: result.stack_trace.clone(),
            comment: result.skip_reason.clone(),
            result_group_type: GroupType::None,
            sub_results: Vec::new(),
        }
    }

    /// Appends one invocation and promotes the parent to Fail if it failed.
    fn push_sub_result(&mut self, result: &CanonicalResult) {
        let sub = SubResult::from_result(result, self.sub_results.len() + 1);
        if sub.outcome.is_failure() {
            self.outcome = Outcome::Fail;
        }
        self.duration_in_ms += sub.duration_in_ms;
        self.started_date = started_at(self.completed_date, self.duration_in_ms);
        self.sub_results.push(sub);
    }

    pub fn is_grouped(&self) -> bool {
        self.result_group_type == GroupType::DataDriven
    }
}

fn started_at(completed: DateTime<Utc>, duration_in_ms: f64) -> DateTime<Utc> {
    completed
        .checked_sub_signed(Duration::milliseconds(duration_in_ms as i64))
        .unwrap_or(completed)
}

/// Failure text published for a result: the message, or the exception type
/// when there is no message.
fn error_message(result: &CanonicalResult) -> Option<String> {
    result
        .failure_message
        .clone()
        .or_else(|| result.exception_type.clone())
}

fn serialize_outcome<S: Serializer>(outcome: &Outcome, serializer: S) -> Result<S::Ok, S::Error> {
    let wire = match outcome {
        Outcome::Pass => "Passed",
        Outcome::Fail => "Failed",
        Outcome::Skip => "NotExecuted",
    };
    serializer.serialize_str(wire)
}

/// Base name -> original full names of its sub-results, in the order they
/// were appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderingIndex {
    entries: HashMap<String, Vec<String>>,
}

impl OrderingIndex {
    fn push(&mut self, base_name: &str, full_name: &str) {
        self.entries
            .entry(base_name.to_string())
            .or_default()
            .push(full_name.to_string());
    }

    /// Ordered sub-test names for `base_name`; empty for standalone records.
    pub fn get(&self, base_name: &str) -> &[String] {
        self.entries
            .get(base_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of grouped records indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of aggregating one batch.
#[derive(Debug, Clone)]
pub struct AggregatedBatch {
    /// Records in first-encounter order.
    pub records: Vec<PublishRecord>,
    pub ordering: OrderingIndex,
}

impl AggregatedBatch {
    /// Standalone records plus all sub-results; equals the number of
    /// canonical results that went in.
    pub fn result_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| {
                if r.is_grouped() {
                    r.sub_results.len()
                } else {
                    1
                }
            })
            .sum()
    }
}

/// Converts batches of canonical results into publish records.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    completed: DateTime<Utc>,
}

impl ResultAggregator {
    /// Creates an aggregator that stamps records as completed now.
    pub fn new() -> Self {
        Self::completed_at(Utc::now())
    }

    /// Creates an aggregator with a fixed completion timestamp.
    pub fn completed_at(completed: DateTime<Utc>) -> Self {
        Self { completed }
    }

    /// Groups `results` into publish records.
    ///
    /// A data-driven result either starts a new group (seeded from its own
    /// fields, renamed to its base name) or is appended to the existing one.
    /// A group with a single invocation is still emitted as data-driven.
    ///
    /// ```
    /// use testpost::aggregate::ResultAggregator;
    /// use testpost::format::Format;
    /// use testpost::model::{CanonicalResult, Outcome};
    ///
    /// let batch = vec![
    ///     CanonicalResult::new("Foo(1)", Format::XUnit, Outcome::Pass),
    ///     CanonicalResult::new("Foo(2)", Format::XUnit, Outcome::Fail),
    /// ];
    /// let aggregated = ResultAggregator::new().aggregate(&batch);
    ///
    /// assert_eq!(aggregated.records.len(), 1);
    /// assert_eq!(aggregated.records[0].outcome, Outcome::Fail);
    /// assert_eq!(aggregated.ordering.get("Foo"), ["Foo(1)", "Foo(2)"]);
    /// ```
    pub fn aggregate(&self, results: &[CanonicalResult]) -> AggregatedBatch {
        let mut records: Vec<PublishRecord> = Vec::with_capacity(results.len());
        let mut groups: HashMap<&str, usize> = HashMap::new();
        let mut ordering = OrderingIndex::default();

        for result in results {
            if !result.is_data_driven() {
                records.push(PublishRecord::from_result(
                    result,
                    &result.name,
                    self.completed,
                ));
                continue;
            }

            let base = result.base_name();
            match groups.get(base) {
                Some(&idx) => records[idx].push_sub_result(result),
                None => {
                    let mut parent = PublishRecord::from_result(result, base, self.completed);
                    parent.result_group_type = GroupType::DataDriven;
                    parent.duration_in_ms = 0.0;
                    parent.push_sub_result(result);
                    groups.insert(base, records.len());
                    records.push(parent);
                }
            }
            ordering.push(base, &result.name);
        }

        AggregatedBatch { records, ordering }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
