use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{ByteStream, Error, Store};

/// Filesystem-based artifact store.
///
/// Stores artifacts as files on the local filesystem. Each artifact is stored
/// at `{base_path}/{key}`. Parent directories are created automatically.
pub struct FsStore {
  base_path: PathBuf,
}

impl FsStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn key_to_path(&self, key: &str) -> Result<PathBuf, Error> {
    let relative = Path::new(key);
    let valid = !key.is_empty()
      && relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
      return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(self.base_path.join(relative))
  }

  /// Deepest directory fully named by `prefix`; listing walks only below it.
  fn list_root(&self, prefix: &str) -> Result<PathBuf, Error> {
    match prefix.rfind('/') {
      Some(end) if end > 0 => self
        .key_to_path(&prefix[..end])
        .map_err(|_| Error::InvalidKey(prefix.to_string())),
      _ => Ok(self.base_path.clone()),
    }
  }

  fn not_found(key: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
      Error::NotFound(key.to_string())
    } else {
      Error::Io(e)
    }
  }
}

#[async_trait]
impl Store for FsStore {
  async fn get(&self, key: &str) -> Result<ByteStream, Error> {
    let path = self.key_to_path(key)?;
    let file = File::open(&path)
      .await
      .map_err(|e| Self::not_found(key, e))?;
    let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
    Ok(Box::pin(stream))
  }

  async fn put(&self, key: &str, data: ByteStream, _content_type: &str) -> Result<(), Error> {
    let path = self.key_to_path(key)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(path).await?;
    let mut stream = std::pin::pin!(data);

    while let Some(chunk) = stream.next().await {
      let bytes = chunk?;
      file.write_all(&bytes).await?;
    }

    file.flush().await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    let path = self.key_to_path(key)?;
    fs::remove_file(&path)
      .await
      .map_err(|e| Self::not_found(key, e))
  }

  async fn exists(&self, key: &str) -> Result<bool, Error> {
    let path = self.key_to_path(key)?;
    Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
  }

  async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
    let mut keys = Vec::new();
    let mut pending = vec![self.list_root(prefix)?];

    while let Some(dir) = pending.pop() {
      let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(Error::Io(e)),
      };

      while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
          pending.push(path);
          continue;
        }
        let Ok(relative) = path.strip_prefix(&self.base_path) else {
          continue;
        };
        let key = relative
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");
        if key.starts_with(prefix) {
          keys.push(key);
        }
      }
    }

    keys.sort();
    Ok(keys)
  }
}
