//! Matching local attachments to published records.
//!
//! The store returns an id for every top-level record and, for grouped
//! records, a list of sub-result ids with no names. Top-level records are
//! matched by exact name. Sub-results are matched by position against the
//! [`OrderingIndex`] recorded during aggregation:
//!
//! ```text
//!   ordering["Foo"]:  Foo(1)   Foo(2)   Foo(3)
//!                       │        │        │
//!   remote subs:      10001    10002    10003
//! ```
//!
//! Rejected records (id [`REJECTED_ID`](super::REJECTED_ID)) get no
//! attachment calls at all.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use super::{
    AttachmentUpload, PublishContext, PublishedRecord, RunTarget, TelemetryEvent, TestRunStore,
};
use crate::aggregate::OrderingIndex;
use crate::model::{Attachment, CanonicalResult};

/// Attachments of a batch keyed by the exact name of the result carrying
/// them. Results sharing a name contribute in encounter order.
#[derive(Debug, Default)]
pub struct AttachmentIndex<'a> {
    by_name: HashMap<&'a str, Vec<&'a Attachment>>,
}

impl<'a> AttachmentIndex<'a> {
    pub fn build(results: &'a [CanonicalResult]) -> Self {
        let mut by_name: HashMap<&str, Vec<&Attachment>> = HashMap::new();
        for result in results.iter().filter(|r| !r.attachments.is_empty()) {
            by_name
                .entry(result.name.as_str())
                .or_default()
                .extend(result.attachments.iter());
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> &[&'a Attachment] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct names with attachments.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Counts from one correlation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationReport {
    pub uploaded: usize,
    pub failed: usize,
    pub telemetry: Vec<TelemetryEvent>,
}

/// Where an attachment goes.
#[derive(Debug, Clone, Copy)]
enum Destination {
    Record(i64),
    SubResult { record: i64, sub_result: i64 },
}

/// Uploads attachments for one published batch.
pub struct AttachmentCorrelator<'a, S: ?Sized> {
    store: &'a S,
    target: &'a RunTarget,
}

impl<'a, S: TestRunStore + ?Sized> AttachmentCorrelator<'a, S> {
    pub fn new(store: &'a S, target: &'a RunTarget) -> Self {
        Self { store, target }
    }

    /// Uploads every attachment in `index` that belongs to a record in
    /// `published`.
    ///
    /// Failures are logged per attachment and counted; they never stop the
    /// remaining uploads.
    pub async fn correlate(
        &self,
        published: &[PublishedRecord],
        ordering: &OrderingIndex,
        index: &AttachmentIndex<'_>,
        ctx: &mut PublishContext,
    ) -> CorrelationReport {
        let mut report = CorrelationReport::default();
        let mut skipped = 0;

        if index.is_empty() {
            return report;
        }

        for record in published {
            if record.is_rejected() {
                debug!(
                    "Skipping attachments for rejected record '{}'",
                    record.automated_test_name
                );
                continue;
            }

            let direct = index.get(&record.automated_test_name);
            if !direct.is_empty() {
                let destination = Destination::Record(record.id);
                for attachment in direct {
                    self.upload(destination, attachment, ctx, &mut report, &mut skipped)
                        .await;
                }
                continue;
            }

            if record.sub_results.is_empty() {
                continue;
            }

            let names = ordering.get(&record.automated_test_name);
            if names.len() != record.sub_results.len() {
                warn!(
                    "Record '{}' has {} local sub-results but the store returned {}",
                    record.automated_test_name,
                    names.len(),
                    record.sub_results.len()
                );
                report.telemetry.push(TelemetryEvent::SubResultCountMismatch {
                    record: record.automated_test_name.clone(),
                    expected: names.len(),
                    actual: record.sub_results.len(),
                });
            }

            for (name, sub) in names.iter().zip(&record.sub_results) {
                let destination = Destination::SubResult {
                    record: record.id,
                    sub_result: sub.id,
                };
                for attachment in index.get(name) {
                    self.upload(destination, attachment, ctx, &mut report, &mut skipped)
                        .await;
                }
            }
        }

        if skipped > 0 {
            report
                .telemetry
                .push(TelemetryEvent::AttachmentBudgetExhausted { skipped });
        }
        report
    }

    async fn upload(
        &self,
        destination: Destination,
        attachment: &Attachment,
        ctx: &mut PublishContext,
        report: &mut CorrelationReport,
        skipped: &mut usize,
    ) {
        if !ctx.has_attachment_budget() {
            *skipped += 1;
            return;
        }

        let upload = match AttachmentUpload::encode(attachment, ctx.max_attachment_bytes()) {
            Ok(upload) => upload,
            Err(e) => {
                error!("Failed to encode attachment: {}", e);
                report.failed += 1;
                return;
            }
        };

        let sent = match destination {
            Destination::Record(id) => {
                self.store
                    .create_attachment(self.target, id, &upload)
                    .await
            }
            Destination::SubResult { record, sub_result } => {
                self.store
                    .create_sub_result_attachment(self.target, record, sub_result, &upload)
                    .await
            }
        };

        match sent {
            Ok(()) => {
                ctx.record_attachment();
                report.uploaded += 1;
            }
            Err(e) => {
                error!(
                    "Failed to upload attachment '{}' ({:?}): {}",
                    attachment.name, destination, e
                );
                report.failed += 1;
            }
        }
    }
}
