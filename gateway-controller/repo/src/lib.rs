//! The configuration repository client and publisher.
//!
//! Compiled proxy documents are distributed through a content-addressed repo
//! server. Each proxy owns a codebase derived from a shared `defaults` parent;
//! a publish writes the document as a single-file batch at a version derived
//! from the document fingerprint, so the data plane observes either the
//! previous complete document or the new one, never a partial write.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod http;
mod memory;
mod publisher;

pub use self::{
    http::HttpRepo,
    memory::{Codebase, MemoryRepo},
    publisher::{Publisher, PublisherMetrics},
};

use anyhow::Result;

/// The file written into every codebase.
pub const CODEBASE_CONFIG: &str = "config.json";

/// One file of an atomic write-set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchFile {
    /// The codebase path the file belongs to.
    pub path: String,
    /// The file name within the codebase.
    pub file: String,
    pub bytes: Vec<u8>,
}

/// A content-addressed codebase store.
///
/// Implementations must be atomic per operation: a failed `batch` leaves no
/// partial write-set behind on the server, though the caller still deletes
/// the codebase to discard any derive that preceded it.
#[async_trait::async_trait]
pub trait Repo: Send + Sync {
    /// Creates or refreshes a codebase at `path`, derived from `parent` at
    /// `parent_version`.
    async fn derive(&self, path: &str, parent: &str, parent_version: u64) -> Result<()>;

    /// Writes a set of files atomically at `version`.
    async fn batch(&self, version: u64, files: Vec<BatchFile>) -> Result<()>;

    /// Removes a codebase and its files.
    async fn delete(&self, path: &str) -> Result<()>;
}
