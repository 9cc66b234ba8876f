//! SQLite-backed blob store / naming service (continuing the teacher's
//! planned `SqliteSnapshotStore`, RFC-102 lineage — `codegraph-storage`
//! shipped only a `todo!()` placeholder for this adapter; this module is its
//! full implementation against this crate's domain).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{BlobStore, NamingService, WriteOptions, WriteResult};
use crate::error::{DbError, Result};

fn content_address(prefix: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest);
    format!("{prefix}b{encoded}")
}

/// A SQLite-backed, content-addressed blob store.
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
    sequence_counter: Arc<AtomicU64>,
}

impl SqliteBlobStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                address TEXT PRIMARY KEY,
                bytes   BLOB NOT NULL
             )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sequence_counter: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn write(&self, prefix: &str, bytes: &[u8], options: WriteOptions) -> Result<WriteResult> {
        let key = if options.content_address {
            content_address(prefix, bytes)
        } else {
            let seq = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}{seq}")
        };
        let address = format!("fluree:file://{key}");
        tracing::debug!(%address, bytes = bytes.len(), "blob write");
        let conn = Arc::clone(&self.conn);
        let bytes = bytes.to_vec();
        let address_for_task = address.clone();
        let key_for_task = key.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO blobs (address, bytes) VALUES (?1, ?2)",
                params![address_for_task, bytes],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| DbError::storage(format!("blob write task panicked: {e}")))??;
        Ok(WriteResult { address, key: key_for_task })
    }

    async fn read(&self, address: &str) -> Result<Vec<u8>> {
        tracing::debug!(%address, "blob read");
        let conn = Arc::clone(&self.conn);
        let address = address.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT bytes FROM blobs WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::storage(format!("no blob at address {address}"))
                }
                other => other.into(),
            })
        })
        .await
        .map_err(|e| DbError::storage(format!("blob read task panicked: {e}")))?
    }
}

/// A SQLite-backed naming service.
pub struct SqliteNamingService {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNamingService {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS naming (
                alias           TEXT PRIMARY KEY,
                commit_address  TEXT NOT NULL
             )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl NamingService for SqliteNamingService {
    async fn publish(&self, alias: &str, commit_address: &str) -> Result<()> {
        tracing::debug!(%alias, %commit_address, "naming publish");
        let conn = Arc::clone(&self.conn);
        let alias = alias.to_string();
        let commit_address = commit_address.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO naming (alias, commit_address) VALUES (?1, ?2)
                 ON CONFLICT(alias) DO UPDATE SET commit_address = excluded.commit_address",
                params![alias, commit_address],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| DbError::storage(format!("naming publish task panicked: {e}")))?
    }

    async fn resolve(&self, alias: &str) -> Result<Option<String>> {
        tracing::debug!(%alias, "naming resolve");
        let conn = Arc::clone(&self.conn);
        let alias = alias.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT commit_address FROM naming WHERE alias = ?1")?;
            let mut rows = stmt.query(params![alias])?;
            if let Some(row) = rows.next()? {
                Ok(Some(row.get(0)?))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| DbError::storage(format!("naming resolve task panicked: {e}")))?
    }
}
