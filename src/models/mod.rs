//! Data models for councildocs.

mod document;

pub use document::DocumentRecord;
