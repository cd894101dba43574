//! councildocs - document discovery and download for council planning portals.
//!
//! A run reads a portal's search-results page, extracts the document list
//! embedded in it, filters it by document type and downloads each document,
//! sequentially or on a worker pool.

pub mod config;
pub mod models;
pub mod retry;
pub mod scrapers;
pub mod services;

pub use config::{Config, Settings};
pub use models::DocumentRecord;
