//! Publishing results to a remote test-run store.
//!
//! This module defines the boundary to the remote store and the per-batch
//! publish cycle that runs on every worker of the pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StoreFactory                           │
//! │  connect() ──────────────► TestRunStore (one per worker)     │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TestRunStore                           │
//! │  create_results(target, records) ──► Vec<PublishedRecord>    │
//! │  create_attachment(target, record, upload)                   │
//! │  create_sub_result_attachment(target, record, sub, upload)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! One batch goes through [`process_batch`]:
//!
//! 1. [`ResultAggregator`] groups data-driven results.
//! 2. [`TestRunStore::create_results`] publishes every record in one call.
//! 3. [`AttachmentCorrelator`](correlate::AttachmentCorrelator) uploads local
//!    attachments against the ids the store returned.
//!
//! Conditions worth reporting but not worth failing the batch for are
//! returned as [`TelemetryEvent`]s inside the [`BatchOutcome`].
//!
//! # Built-in Stores
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | Azure DevOps | [`http`] | Test results REST API over `reqwest` |

pub mod correlate;
pub mod http;
pub mod pool;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::aggregate::{PublishRecord, ResultAggregator};
use crate::model::{Attachment, CanonicalResult};
use correlate::{AttachmentCorrelator, AttachmentIndex};

/// Id the store assigns to a record it rejected.
pub const REJECTED_ID: i64 = -1;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`TestRunStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Failed to decode store response: {0}")]
    Decode(String),

    /// The store is not configured well enough to connect.
    #[error("Store configuration error: {0}")]
    Config(String),
}

/// Errors preparing one attachment for upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment has an empty file name")]
    EmptyName,

    #[error("Attachment '{name}' is {size} bytes, over the {limit} byte limit")]
    TooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
}

/// The test run results are published into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub project: String,
    pub run_id: u64,
}

impl fmt::Display for RunTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/runs/{}", self.project, self.run_id)
    }
}

/// Remote id of a published sub-result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PublishedSubResult {
    pub id: i64,
}

/// A record as echoed back by the store.
///
/// Sub-results carry ids only. Their order mirrors the order they were sent
/// in, which is what attachment correlation relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    pub id: i64,
    #[serde(default)]
    pub automated_test_name: String,
    #[serde(default)]
    pub sub_results: Vec<PublishedSubResult>,
}

impl PublishedRecord {
    pub fn is_rejected(&self) -> bool {
        self.id == REJECTED_ID
    }
}

/// An attachment ready to send: base64 payload plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub stream: String,
    pub file_name: String,
    pub comment: String,
    pub attachment_type: &'static str,
}

impl AttachmentUpload {
    /// Encodes `attachment` as base64, rejecting empty names and payloads
    /// larger than `max_bytes`.
    ///
    /// ```
    /// use testpost::model::Attachment;
    /// use testpost::publish::AttachmentUpload;
    ///
    /// let upload = AttachmentUpload::encode(&Attachment::new("out.log", "hi"), 1024).unwrap();
    /// assert_eq!(upload.stream, "aGk=");
    /// assert_eq!(upload.file_name, "out.log");
    /// ```
    pub fn encode(attachment: &Attachment, max_bytes: usize) -> Result<Self, AttachmentError> {
        if attachment.name.trim().is_empty() {
            return Err(AttachmentError::EmptyName);
        }
        let size = attachment.text.len();
        if size > max_bytes {
            return Err(AttachmentError::TooLarge {
                name: attachment.name.clone(),
                size,
                limit: max_bytes,
            });
        }
        Ok(Self {
            stream: BASE64.encode(attachment.text.as_bytes()),
            file_name: attachment.name.clone(),
            comment: String::new(),
            attachment_type: "GeneralAttachment",
        })
    }
}

/// The remote test-run store.
///
/// Implementations make no retries and apply no timeouts; a hung call
/// blocks only the worker that made it.
#[async_trait]
pub trait TestRunStore: Send + Sync {
    /// Adds `records` to the run and returns them with their remote ids, in
    /// the order they were sent.
    async fn create_results(
        &self,
        target: &RunTarget,
        records: &[PublishRecord],
    ) -> StoreResult<Vec<PublishedRecord>>;

    /// Attaches `upload` to a top-level record.
    async fn create_attachment(
        &self,
        target: &RunTarget,
        record_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()>;

    /// Attaches `upload` to one sub-result of a grouped record.
    async fn create_sub_result_attachment(
        &self,
        target: &RunTarget,
        record_id: i64,
        sub_result_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()>;
}

/// Creates store sessions; each pool worker connects its own.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    type Store: TestRunStore;

    async fn connect(&self) -> StoreResult<Self::Store>;
}

/// Something noteworthy that happened while publishing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// The store echoed back a different number of sub-results than were
    /// recorded locally for a grouped record.
    SubResultCountMismatch {
        record: String,
        expected: usize,
        actual: usize,
    },

    /// The worker's attachment budget ran out; these attachments were not sent.
    AttachmentBudgetExhausted { skipped: usize },

    /// The store rejected records by assigning them the sentinel id.
    RecordsRejected { count: usize },
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::SubResultCountMismatch {
                record,
                expected,
                actual,
            } => write!(
                f,
                "sub-result count mismatch for '{}': {} local, {} remote",
                record, expected, actual
            ),
            TelemetryEvent::AttachmentBudgetExhausted { skipped } => {
                write!(f, "attachment budget exhausted, {} not uploaded", skipped)
            }
            TelemetryEvent::RecordsRejected { count } => {
                write!(f, "{} records rejected by the store", count)
            }
        }
    }
}

/// Limits applied while publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishLimits {
    /// Attachments one worker may upload over its lifetime; `None` is unbounded.
    pub max_attachments: Option<usize>,
    /// Largest attachment text accepted, in bytes.
    pub max_attachment_bytes: usize,
}

impl Default for PublishLimits {
    fn default() -> Self {
        Self {
            max_attachments: None,
            max_attachment_bytes: crate::config::schema::default_max_attachment_bytes(),
        }
    }
}

/// Per-worker state threaded through every batch that worker publishes.
#[derive(Debug, Clone)]
pub struct PublishContext {
    limits: PublishLimits,
    attachments_uploaded: usize,
    results_uploaded: usize,
}

impl PublishContext {
    pub fn new(limits: PublishLimits) -> Self {
        Self {
            limits,
            attachments_uploaded: 0,
            results_uploaded: 0,
        }
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.limits.max_attachment_bytes
    }

    /// Whether another attachment may be uploaded.
    pub fn has_attachment_budget(&self) -> bool {
        self.limits
            .max_attachments
            .is_none_or(|max| self.attachments_uploaded < max)
    }

    pub fn record_attachment(&mut self) {
        self.attachments_uploaded += 1;
    }

    pub fn record_results(&mut self, count: usize) {
        self.results_uploaded += count;
    }

    /// Attachments uploaded by this worker so far.
    pub fn attachments_uploaded(&self) -> usize {
        self.attachments_uploaded
    }

    /// Canonical results published by this worker so far.
    pub fn results_uploaded(&self) -> usize {
        self.results_uploaded
    }
}

/// What publishing one batch produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Canonical results in the batch.
    pub results: usize,
    /// Top-level records sent to the store.
    pub records: usize,
    /// Records the store rejected.
    pub rejected: usize,
    pub attachments_uploaded: usize,
    pub attachments_failed: usize,
    pub telemetry: Vec<TelemetryEvent>,
}

/// Publishes one batch: aggregate, create results, correlate attachments.
///
/// A failing `create_results` call fails the whole batch. Attachment
/// failures are logged and counted but never fail the batch.
pub async fn process_batch<S: TestRunStore + ?Sized>(
    store: &S,
    target: &RunTarget,
    batch: &[CanonicalResult],
    ctx: &mut PublishContext,
) -> anyhow::Result<BatchOutcome> {
    let aggregated = ResultAggregator::new().aggregate(batch);
    let published = store
        .create_results(target, &aggregated.records)
        .await
        .with_context(|| {
            format!(
                "Failed to publish {} records to {}",
                aggregated.records.len(),
                target
            )
        })?;

    let mut outcome = BatchOutcome {
        results: batch.len(),
        records: aggregated.records.len(),
        ..Default::default()
    };

    outcome.rejected = published.iter().filter(|r| r.is_rejected()).count();
    if outcome.rejected > 0 {
        outcome.telemetry.push(TelemetryEvent::RecordsRejected {
            count: outcome.rejected,
        });
    }
    ctx.record_results(batch.len());

    let index = AttachmentIndex::build(batch);
    let correlation = AttachmentCorrelator::new(store, target)
        .correlate(&published, &aggregated.ordering, &index, ctx)
        .await;

    outcome.attachments_uploaded = correlation.uploaded;
    outcome.attachments_failed = correlation.failed;
    outcome.telemetry.extend(correlation.telemetry);

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::fake::FakeStore;
    use super::*;
    use crate::format::Format;
    use crate::model::Outcome;

    fn target() -> RunTarget {
        RunTarget {
            project: "proj".to_string(),
            run_id: 7,
        }
    }

    #[test]
    fn test_encode_rejects_empty_name() {
        let err = AttachmentUpload::encode(&Attachment::new("  ", "x"), 10).unwrap_err();
        assert_eq!(err, AttachmentError::EmptyName);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = AttachmentUpload::encode(&Attachment::new("big.log", "0123456789a"), 10)
            .unwrap_err();
        assert!(matches!(err, AttachmentError::TooLarge { size: 11, limit: 10, .. }));
    }

    #[test]
    fn test_upload_serializes_camel_case() {
        let upload = AttachmentUpload::encode(&Attachment::new("a.txt", "abc"), 10).unwrap();
        let json = serde_json::to_value(&upload).unwrap();
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["stream"], "YWJj");
        assert_eq!(json["attachmentType"], "GeneralAttachment");
    }

    #[test]
    fn test_published_record_decodes_without_optional_fields() {
        let record: PublishedRecord =
            serde_json::from_str(r#"{"id": 5, "subResults": [{"id": 9}, {"id": 10}]}"#).unwrap();
        assert_eq!(record.id, 5);
        assert_eq!(record.sub_results.len(), 2);
        assert!(!record.is_rejected());
    }

    #[test]
    fn test_context_budget() {
        let mut ctx = PublishContext::new(PublishLimits {
            max_attachments: Some(1),
            max_attachment_bytes: 10,
        });
        assert!(ctx.has_attachment_budget());
        ctx.record_attachment();
        assert!(!ctx.has_attachment_budget());

        let unbounded = PublishContext::new(PublishLimits::default());
        assert!(unbounded.has_attachment_budget());
    }

    #[tokio::test]
    async fn test_process_batch_reports_rejections() {
        let store = FakeStore::new().reject("Bad");
        let batch = vec![
            CanonicalResult::new("Good", Format::XUnit, Outcome::Pass)
                .with_attachment("Console_Output", "ok"),
            CanonicalResult::new("Bad", Format::XUnit, Outcome::Fail)
                .with_attachment("Console_Output", "never sent"),
        ];
        let mut ctx = PublishContext::new(PublishLimits::default());

        let outcome = process_batch(&store, &target(), &batch, &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome.results, 2);
        assert_eq!(outcome.records, 2);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.attachments_uploaded, 1);
        assert!(
            outcome
                .telemetry
                .contains(&TelemetryEvent::RecordsRejected { count: 1 })
        );
        assert_eq!(ctx.results_uploaded(), 2);
        assert_eq!(store.calls().attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_process_batch_reports_sub_result_mismatch() {
        let store = FakeStore::new().truncate_sub_results("Foo", 2);
        let batch: Vec<_> = (1..=3)
            .map(|i| {
                CanonicalResult::new(format!("Foo({})", i), Format::XUnit, Outcome::Pass)
                    .with_attachment("Console_Output", format!("out {}", i))
            })
            .collect();
        let mut ctx = PublishContext::new(PublishLimits::default());

        let outcome = process_batch(&store, &target(), &batch, &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome.records, 1);
        assert_eq!(
            outcome.telemetry,
            vec![TelemetryEvent::SubResultCountMismatch {
                record: "Foo".to_string(),
                expected: 3,
                actual: 2,
            }]
        );
        // Pairing is still attempted for the positions both sides have.
        assert_eq!(outcome.attachments_uploaded, 2);
        let attachments = store.calls().attachments;
        let sent: Vec<_> = attachments
            .iter()
            .map(|a| (a.sub_result_id, a.text.as_str()))
            .collect();
        assert_eq!(sent, vec![(Some(10001), "out 1"), (Some(10002), "out 2")]);
    }

    #[tokio::test]
    async fn test_process_batch_fails_when_store_fails() {
        let store = FakeStore::new().fail_on("Boom");
        let batch = vec![CanonicalResult::new("Boom", Format::XUnit, Outcome::Pass)];
        let mut ctx = PublishContext::new(PublishLimits::default());

        let err = process_batch(&store, &target(), &batch, &mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to publish 1 records"));
        assert_eq!(ctx.results_uploaded(), 0);
    }
}
