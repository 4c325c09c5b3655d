//! testpost: normalize test-runner result files and publish them.
//!
//! Result files from several runners (xUnit, JUnit, TRX, YAML) are read into
//! one canonical model, data-driven invocations are grouped under their
//! parent test, and the records are published concurrently to a remote
//! test-run store with their attachments.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Format**: Streaming readers, one per result schema
//! - **Aggregate**: Grouping of data-driven results into publish records
//! - **Publish**: The store boundary, attachment correlation, and the worker pool
//! - **Run**: Discovery, batching, and the exit-code decision
//!
//! # Example
//!
//! ```no_run
//! use testpost::config::load_config;
//! use testpost::publish::RunTarget;
//! use testpost::publish::http::AzureDevOpsFactory;
//! use testpost::publish::pool::PublishWorkerPool;
//! use testpost::run::{self, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testpost.toml"))?;
//!     let store = config.store.as_ref().expect("store configured");
//!     let factory = AzureDevOpsFactory::from_config(store)?;
//!     let target = RunTarget { project: store.team_project.clone(), run_id: 1 };
//!     let pool = PublishWorkerPool::new(factory, target, config.publish.workers);
//!     let options = RunOptions {
//!         roots: config.search.roots.clone(),
//!         work_item: config.search.work_item.clone(),
//!         batch_size: config.publish.batch_size,
//!         upstream_exit_code: 0,
//!     };
//!     let summary = run::publish(&pool, &options).await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod discovery;
pub mod exit_codes;
pub mod fallback;
pub mod format;
pub mod model;
pub mod publish;
pub mod report;
pub mod run;

// Re-export commonly used types
pub use aggregate::{PublishRecord, ResultAggregator};
pub use config::{Config, load_config};
pub use format::Format;
pub use model::{CanonicalResult, Outcome};
pub use publish::{StoreFactory, TestRunStore};
pub use run::RunSummary;
