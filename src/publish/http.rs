//! Azure DevOps test results store over HTTP.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `create_results` | `POST {collection}{project}/_apis/test/Runs/{run}/results?api-version={v}` |
//! | `create_attachment` | `POST .../Results/{id}/attachments?api-version={v}-preview.1` |
//! | `create_sub_result_attachment` | same, plus `&testSubResultId={sub}` |
//!
//! Requests carry either a bearer token or basic credentials with an empty
//! user name and a personal access token. There are no retries and no
//! request timeout.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use super::{
    AttachmentUpload, PublishedRecord, RunTarget, StoreError, StoreFactory, StoreResult,
    TestRunStore,
};
use crate::aggregate::PublishRecord;
use crate::config::schema::{AuthKind, StoreConfig};

/// How requests authenticate.
#[derive(Clone)]
pub enum Credentials {
    Bearer(String),
    /// Personal access token sent as the basic-auth password.
    Basic(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
            Credentials::Basic(_) => f.write_str("Basic(***)"),
        }
    }
}

/// `{ "value": [...] }` envelope used by list responses.
#[derive(Debug, Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

/// Connects [`AzureDevOpsStore`] sessions for pool workers.
#[derive(Debug, Clone)]
pub struct AzureDevOpsFactory {
    collection: Url,
    api_version: String,
    credentials: Credentials,
}

impl AzureDevOpsFactory {
    pub fn new(
        collection_uri: &str,
        api_version: impl Into<String>,
        credentials: Credentials,
    ) -> StoreResult<Self> {
        let normalized = if collection_uri.ends_with('/') {
            collection_uri.to_string()
        } else {
            format!("{}/", collection_uri)
        };
        let collection = Url::parse(&normalized).map_err(|e| {
            StoreError::Config(format!("invalid collection URI '{}': {}", collection_uri, e))
        })?;
        if collection.cannot_be_a_base() {
            return Err(StoreError::Config(format!(
                "collection URI '{}' cannot hold a path",
                collection_uri
            )));
        }
        Ok(Self {
            collection,
            api_version: api_version.into(),
            credentials,
        })
    }

    /// Builds a factory from configuration, reading the token from the
    /// environment variable the configuration names.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let token = std::env::var(&config.auth.token_env).map_err(|_| {
            StoreError::Config(format!(
                "environment variable {} is not set",
                config.auth.token_env
            ))
        })?;
        let credentials = match config.auth.kind {
            AuthKind::Bearer => Credentials::Bearer(token),
            AuthKind::Basic => Credentials::Basic(token),
        };
        Self::new(&config.collection_uri, &config.api_version, credentials)
    }
}

#[async_trait]
impl StoreFactory for AzureDevOpsFactory {
    type Store = AzureDevOpsStore;

    async fn connect(&self) -> StoreResult<AzureDevOpsStore> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("testpost/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(AzureDevOpsStore {
            client,
            collection: self.collection.clone(),
            api_version: self.api_version.clone(),
            credentials: self.credentials.clone(),
        })
    }
}

/// One session against the Azure DevOps test results API.
#[derive(Debug, Clone)]
pub struct AzureDevOpsStore {
    client: reqwest::Client,
    collection: Url,
    api_version: String,
    credentials: Credentials,
}

impl AzureDevOpsStore {
    fn results_url(&self, target: &RunTarget) -> StoreResult<Url> {
        let run_id = target.run_id.to_string();
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config("collection URI cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend([
                target.project.as_str(),
                "_apis",
                "test",
                "Runs",
                run_id.as_str(),
                "results",
            ]);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn attachments_url(
        &self,
        target: &RunTarget,
        record_id: i64,
        sub_result_id: Option<i64>,
    ) -> StoreResult<Url> {
        let run_id = target.run_id.to_string();
        let record_id = record_id.to_string();
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config("collection URI cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend([
                target.project.as_str(),
                "_apis",
                "test",
                "Runs",
                run_id.as_str(),
                "Results",
                record_id.as_str(),
                "attachments",
            ]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", &format!("{}-preview.1", self.api_version));
            if let Some(sub) = sub_result_id {
                query.append_pair("testSubResultId", &sub.to_string());
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Bearer(token) => request.bearer_auth(token),
            Credentials::Basic(pat) => request.basic_auth("", Some(pat)),
        }
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> StoreResult<reqwest::Response> {
        debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn upload(&self, url: Url, upload: &AttachmentUpload) -> StoreResult<()> {
        self.post(url, upload).await?;
        Ok(())
    }
}

#[async_trait]
impl TestRunStore for AzureDevOpsStore {
    async fn create_results(
        &self,
        target: &RunTarget,
        records: &[PublishRecord],
    ) -> StoreResult<Vec<PublishedRecord>> {
        let response = self.post(self.results_url(target)?, records).await?;
        let text = response.text().await?;
        let list: ValueList<PublishedRecord> =
            serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(list.value)
    }

    async fn create_attachment(
        &self,
        target: &RunTarget,
        record_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()> {
        self.upload(self.attachments_url(target, record_id, None)?, upload)
            .await
    }

    async fn create_sub_result_attachment(
        &self,
        target: &RunTarget,
        record_id: i64,
        sub_result_id: i64,
        upload: &AttachmentUpload,
    ) -> StoreResult<()> {
        self.upload(
            self.attachments_url(target, record_id, Some(sub_result_id))?,
            upload,
        )
        .await
    }
}
