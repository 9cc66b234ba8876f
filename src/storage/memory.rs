//! In-memory blob store and naming service, sufficient for tests and the
//! `fluree:memory://` scheme (spec §6.1). Grounded on the content-addressed
//! `MemoryTier` pattern (hash-keyed `DashMap` over an `Arc<[u8]>`), adapted to
//! this crate's SHA-256 content-address scheme (spec §6.5) rather than BLAKE3.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::{BlobStore, NamingService, WriteOptions, WriteResult};
use crate::error::{DbError, Result};

fn content_address(prefix: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest);
    format!("{prefix}b{encoded}")
}

/// An in-memory, content-addressed blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Arc<[u8]>>,
    sequence_counter: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, prefix: &str, bytes: &[u8], options: WriteOptions) -> Result<WriteResult> {
        let key = if options.content_address {
            content_address(prefix, bytes)
        } else {
            let seq = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}{seq}")
        };
        let address = format!("fluree:memory://{key}");
        tracing::debug!(%address, bytes = bytes.len(), "blob write");
        self.blobs.insert(address.clone(), Arc::from(bytes));
        Ok(WriteResult { address, key })
    }

    async fn read(&self, address: &str) -> Result<Vec<u8>> {
        tracing::debug!(%address, "blob read");
        self.blobs
            .get(address)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| DbError::storage(format!("no blob at address {address}")))
    }
}

/// An in-memory naming service: single process, single writer per alias
/// (the core performs no cross-process coordination, spec §6.2).
#[derive(Debug, Default)]
pub struct MemoryNamingService {
    pointers: DashMap<String, String>,
}

impl MemoryNamingService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NamingService for MemoryNamingService {
    async fn publish(&self, alias: &str, commit_address: &str) -> Result<()> {
        tracing::debug!(%alias, %commit_address, "naming publish");
        self.pointers
            .insert(alias.to_string(), commit_address.to_string());
        Ok(())
    }

    async fn resolve(&self, alias: &str) -> Result<Option<String>> {
        let resolved = self.pointers.get(alias).map(|v| v.value().clone());
        tracing::debug!(%alias, found = resolved.is_some(), "naming resolve");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = MemoryBlobStore::new();
        let result = store
            .write("fluree:db:sha256:", b"hello", WriteOptions { content_address: true })
            .await
            .unwrap();
        let bytes = store.read(&result.address).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn content_address_is_deterministic() {
        let store = MemoryBlobStore::new();
        let a = store
            .write("fluree:db:sha256:", b"same bytes", WriteOptions { content_address: true })
            .await
            .unwrap();
        let b = store
            .write("fluree:db:sha256:", b"same bytes", WriteOptions { content_address: true })
            .await
            .unwrap();
        assert_eq!(a.address, b.address);
    }

    #[tokio::test]
    async fn read_missing_address_errors() {
        let store = MemoryBlobStore::new();
        assert!(store.read("fluree:memory://nope").await.is_err());
    }

    #[tokio::test]
    async fn naming_service_publish_then_resolve() {
        let naming = MemoryNamingService::new();
        naming.publish("my-ledger", "fluree:memory://abc").await.unwrap();
        let resolved = naming.resolve("my-ledger").await.unwrap();
        assert_eq!(resolved.as_deref(), Some("fluree:memory://abc"));
    }

    #[tokio::test]
    async fn naming_service_unknown_alias_resolves_none() {
        let naming = MemoryNamingService::new();
        assert_eq!(naming.resolve("missing").await.unwrap(), None);
    }
}
