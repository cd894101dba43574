//! Service layer for councildocs.
//!
//! This module contains the run pipeline separated from UI concerns:
//! discovery (cache or portal), filtering, downloading and reporting.

pub mod cache;
pub mod discovery;
pub mod download;
pub mod filter;
pub mod report;

pub use cache::{CacheError, CacheSnapshot, CacheStore};
pub use discovery::{Discovered, DiscoveryError, DiscoverySource, DocumentDiscovery};
pub use download::{DownloadConfig, DownloadEvent, DownloadService, ExecutionMode};
pub use filter::{FilterConfig, FilterOutcome};
pub use report::{FailureRecord, RunReport, RunSummary};
