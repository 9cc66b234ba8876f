//! External interfaces injected into the core: blob storage and the naming
//! service (spec §6.1, §6.2). The core does not interpret storage-backend
//! schemes (`fluree:memory://`, `fluree:file://…`, `fluree:ipfs://…`,
//! `fluree:s3://…`); it calls through these traits. `MemoryBlobStore` and the
//! `sqlite`-feature-gated adapter are the two concrete implementations this
//! crate exercises for tests — file/IPFS/S3 backends are named but out of
//! scope (spec §1).

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;

/// Options controlling a blob write (spec §6.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// When set, the store computes the content address internally rather than
    /// trusting a caller-supplied key.
    pub content_address: bool,
}

/// The outcome of a blob write: its storage-backend-specific locator and the
/// content-addressed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub address: String,
    pub key: String,
}

/// Content-addressed blob storage (spec §6.1). Every read/write is a potential
/// suspension point (spec §5).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(&self, prefix: &str, bytes: &[u8], options: WriteOptions) -> Result<WriteResult>;
    async fn read(&self, address: &str) -> Result<Vec<u8>>;
}

/// Naming service: single-writer-per-alias pointer to the latest commit address
/// (spec §6.2). The core performs no coordination across concurrent publishers.
#[async_trait]
pub trait NamingService: Send + Sync {
    async fn publish(&self, alias: &str, commit_address: &str) -> Result<()>;
    async fn resolve(&self, alias: &str) -> Result<Option<String>>;
}
