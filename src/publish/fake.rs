//! In-memory store used by tests.
//!
//! Records every call, assigns ids from counters, and can be told to reject,
//! fail, or panic on batches containing particular test names.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use super::{
    AttachmentUpload, PublishedRecord, PublishedSubResult, REJECTED_ID, RunTarget, StoreError,
    StoreFactory, StoreResult, TestRunStore,
};
use crate::aggregate::PublishRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttachmentCall {
    pub record_id: i64,
    pub sub_result_id: Option<i64>,
    pub file_name: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCalls {
    /// Top-level record names per `create_results` call.
    pub batches: Vec<Vec<String>>,
    /// Every record sent, in the order received.
    pub sent: Vec<PublishRecord>,
    pub published: Vec<PublishedRecord>,
    pub attachments: Vec<AttachmentCall>,
    pub connects: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    reject: HashSet<String>,
    fail: HashSet<String>,
    panic: HashSet<String>,
    fail_attachments: HashSet<String>,
    truncate_sub_results: HashMap<String, usize>,
    fail_connect: bool,
    next_record_id: i64,
    next_sub_result_id: i64,
    calls: FakeCalls,
}

/// Cloning shares state, so a clone handed to a worker reports into the
/// same call log.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut state = store.lock();
            state.next_record_id = 1;
            state.next_sub_result_id = 10_000;
        }
        store
    }

    /// Assigns the sentinel id to records with this name.
    pub fn reject(self, name: &str) -> Self {
        self.lock().reject.insert(name.to_string());
        self
    }

    /// Fails any `create_results` call containing this record name.
    pub fn fail_on(self, name: &str) -> Self {
        self.lock().fail.insert(name.to_string());
        self
    }

    /// Panics inside any `create_results` call containing this record name.
    pub fn panic_on(self, name: &str) -> Self {
        self.lock().panic.insert(name.to_string());
        self
    }

    /// Fails attachment uploads with this file name.
    pub fn fail_attachment(self, file_name: &str) -> Self {
        self.lock().fail_attachments.insert(file_name.to_string());
        self
    }

    /// Echoes back only `keep` sub-results for the named record.
    pub fn truncate_sub_results(self, name: &str, keep: usize) -> Self {
        self.lock()
            .truncate_sub_results
            .insert(name.to_string(), keep);
        self
    }

    pub fn fail_connect(self) -> Self {
        self.lock().fail_connect = true;
        self
    }

    pub fn calls(&self) -> FakeCalls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_attachment(
        &self,
        record_id: i64,
        sub_result_id: Option<i64>,
        upload: &AttachmentUpload,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        if state.fail_attachments.contains(&upload.file_name) {
            return Err(StoreError::Status {
                status: 500,
                body: format!("cannot store {}", upload.file_name),
            });
        }
        let bytes = BASE64
            .decode(&upload.stream)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        state.calls.attachments.push(AttachmentCall {
            record_id,
            sub_result_id,
            file_name: upload.file_name.clone(),
            text: String::from_utf8_lossy(&bytes).into_owned(),
        });
        Ok(())
    }
}

#[async_trait]
impl TestRunStore for FakeStore {
    async fn create_results(
        &self,
        _target: &RunTarget,
        records: &[PublishRecord],
    ) -> StoreResult<Vec<PublishedRecord>> {
        let names: Vec<String> = records
            .iter()
            .map(|r| r.automated_test_name.clone())
            .collect();

        let should_panic = {
            let state = self.lock();
            names.iter().any(|n| state.panic.contains(n))
        };
        if should_panic {
            panic!("fake store panicked on {:?}", names);
        }

        let mut state = self.lock();
        state.calls.batches.push(names.clone());
        state.calls.sent.extend(records.iter().cloned());
        if let Some(name) = names.iter().find(|n| state.fail.contains(*n)) {
            return Err(StoreError::Status {
                status: 503,
                body: format!("refusing batch with {}", name),
            });
        }

        let mut published = Vec::with_capacity(records.len());
        for record in records {
            let id = if state.reject.contains(&record.automated_test_name) {
                REJECTED_ID
            } else {
                state.next_record_id += 1;
                state.next_record_id
            };
            let sub_count = state
                .truncate_sub_results
                .get(&record.automated_test_name)
                .copied()
                .unwrap_or(record.sub_results.len())
                .min(record.sub_results.len());
            let sub_results = (0..sub_count)
                .map(|_| {
                    state.next_sub_result_id += 1;
                    PublishedSubResult {
                        id: state.next_sub_result_id,
                    }
                })
                .collect();
            published.push(PublishedRecord {
                id,
                automated_test_name: record.automated_test_name.clone(),
                sub_results,
            });
        }
        state.calls.published.extend(published.iter().cloned());
        Ok(published)
    }

    async fn create_attachment(
        &self,
        _target: &RunTarget,
        record_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()> {
        self.record_attachment(record_id, None, upload)
    }

    async fn create_sub_result_attachment(
        &self,
        _target: &RunTarget,
        record_id: i64,
        sub_result_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()> {
        self.record_attachment(record_id, Some(sub_result_id), upload)
    }
}

#[async_trait]
impl StoreFactory for FakeStore {
    type Store = FakeStore;

    async fn connect(&self) -> StoreResult<FakeStore> {
        let mut state = self.lock();
        state.calls.connects += 1;
        if state.fail_connect {
            return Err(StoreError::Config("fake store refuses connections".to_string()));
        }
        Ok(self.clone())
    }
}
