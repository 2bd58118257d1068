//! Transcriber Artifact
//!
//! This crate provides the artifact storage trait and implementations for
//! transcriber. Artifacts are the uploaded media, transcripts, subtitles and
//! archives that stages read and write. They live outside execution records.
//!
//! Keys are `/`-separated paths whose first segment names the bucket, e.g.
//! `uploads/lectures/week-1.mp3`. The trait uses async streaming for efficient
//! handling of large files; [`read_all`] and [`write_all`] cover small objects.

mod fs;

pub use fs::FsStore;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A boxed stream of bytes for artifact data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Error type for artifact storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested artifact was not found.
  #[error("artifact not found: {0}")]
  NotFound(String),

  /// The key is empty, absolute, or escapes the store root.
  #[error("invalid artifact key: {0}")]
  InvalidKey(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Artifact storage trait.
///
/// Implementations provide the actual storage backend (filesystem, object
/// storage, etc.).
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve an artifact by key.
  async fn get(&self, key: &str) -> Result<ByteStream, Error>;

  /// Store an artifact, replacing any existing one under `key`.
  async fn put(&self, key: &str, data: ByteStream, content_type: &str) -> Result<(), Error>;

  /// Delete an artifact by key.
  async fn delete(&self, key: &str) -> Result<(), Error>;

  /// Whether an artifact exists under `key`.
  async fn exists(&self, key: &str) -> Result<bool, Error>;

  /// All keys starting with `prefix`, sorted.
  async fn list(&self, prefix: &str) -> Result<Vec<String>, Error>;

  /// Copy an artifact to a new key.
  async fn copy(&self, from: &str, to: &str) -> Result<(), Error> {
    let data = self.get(from).await?;
    self.put(to, data, "application/octet-stream").await
  }
}

/// Read a whole artifact into memory.
pub async fn read_all(store: &dyn Store, key: &str) -> Result<Bytes, Error> {
  let mut stream = store.get(key).await?;
  let mut buf = BytesMut::new();
  while let Some(chunk) = stream.next().await {
    buf.extend_from_slice(&chunk?);
  }
  Ok(buf.freeze())
}

/// Store an in-memory buffer as an artifact.
pub async fn write_all(
  store: &dyn Store,
  key: &str,
  data: impl Into<Bytes>,
  content_type: &str,
) -> Result<(), Error> {
  let data: Bytes = data.into();
  let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));
  store.put(key, stream, content_type).await
}

/// Split a key into its bucket and the remainder.
pub fn split_bucket(key: &str) -> Option<(&str, &str)> {
  key
    .split_once('/')
    .filter(|(bucket, rest)| !bucket.is_empty() && !rest.is_empty())
}
