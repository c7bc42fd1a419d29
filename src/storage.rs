//! Upload Storage
//!
//! Writes single-shot uploads into the uploads directory and appends streamed
//! bodies to the sink file.

use crate::config::StorageConfig;
use crate::error::UploadError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MAX_FILENAME_LEN: usize = 255;

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("filename pattern is valid")
    })
}

/// Reject names that could escape the uploads directory or are not plain file names
pub fn validate_filename(name: &str) -> Result<&str, UploadError> {
    if name.is_empty() {
        return Err(UploadError::MissingFilename);
    }

    if name.len() > MAX_FILENAME_LEN || name.contains("..") || !filename_pattern().is_match(name) {
        return Err(UploadError::InvalidFilename(name.to_string()));
    }

    Ok(name)
}

/// File-system backed upload store
#[derive(Debug, Clone)]
pub struct UploadStore {
    uploads_dir: PathBuf,
    sink_file: PathBuf,
}

impl UploadStore {
    pub fn new(uploads_dir: impl Into<PathBuf>, sink_file: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            sink_file: sink_file.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.uploads_dir.clone(), config.sink_file.clone())
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn sink_file(&self) -> &Path {
        &self.sink_file
    }

    /// Append `body` to the upload called `filename` in one write
    pub async fn append(&self, filename: &str, body: &[u8]) -> Result<PathBuf, UploadError> {
        let filename = validate_filename(filename)?;
        fs::create_dir_all(&self.uploads_dir).await?;

        let target = self.uploads_dir.join(filename);
        let mut file = open_append(&target).await?;
        file.write_all(body).await?;
        file.flush().await?;

        info!(path = %target.display(), bytes = body.len(), "Upload stored");
        Ok(target)
    }

    /// Append every chunk of `body` to the sink file as it arrives
    pub async fn append_stream<S, E>(&self, body: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        if let Some(parent) = self.sink_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = open_append(&self.sink_file).await?;
        futures::pin_mut!(body);

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                UploadError::Storage(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string()))
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = %self.sink_file.display(), bytes = written, "Streamed body stored");
        Ok(written)
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.csv").is_ok());
        assert!(validate_filename("data_2026-10-17.tar.gz").is_ok());

        assert!(matches!(validate_filename(""), Err(UploadError::MissingFilename)));
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("a..b").is_err());
        assert!(validate_filename(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = StorageConfig {
            uploads_dir: PathBuf::from("/srv/uploads"),
            sink_file: PathBuf::from("/srv/out"),
        };
        let store = UploadStore::from_config(&config);

        assert_eq!(store.uploads_dir(), Path::new("/srv/uploads"));
        assert_eq!(store.sink_file(), Path::new("/srv/out"));
    }

    #[tokio::test]
    async fn test_append_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), dir.path().join("out"));

        let path = store.append("file.bin", b"abc").await.unwrap();
        store.append("file.bin", b"def").await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_append_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), dir.path().join("sink").join("out"));

        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from("abc")),
            Ok(Bytes::from("defgh")),
        ]);
        let written = store.append_stream(chunks).await.unwrap();

        assert_eq!(written, 8);
        assert_eq!(std::fs::read(store.sink_file()).unwrap(), b"abcdefgh");
    }
}
