//! Content access for sharing sessions

use super::channel::{ContentReader, MediaError};
use crate::domain::content::ContentSource;
use crate::domain::MmContent;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Open a reader on the content at `url`
    async fn open(&self, url: &str) -> Result<ContentReader, MediaError>;

    /// Persist received content at its URL
    async fn store(&self, url: &str, data: Bytes) -> Result<(), MediaError>;
}

/// Reader over the content, whichever source it has
pub async fn open_content(
    resolver: &dyn ContentResolver,
    content: &MmContent,
) -> Result<ContentReader, MediaError> {
    match content.source() {
        ContentSource::Data(data) => Ok(Box::new(Cursor::new(data.clone()))),
        ContentSource::Url(url) => resolver.open(url).await,
    }
}

/// Local file system, `file://` URLs or plain paths
#[derive(Debug, Clone, Default)]
pub struct FileContentResolver {
    base_dir: Option<PathBuf>,
}

impl FileContentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths resolve against `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn path(&self, url: &str) -> PathBuf {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl ContentResolver for FileContentResolver {
    async fn open(&self, url: &str) -> Result<ContentReader, MediaError> {
        let path = self.path(url);
        debug!("Open content {}", path.display());
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| MediaError::Content(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(file))
    }

    async fn store(&self, url: &str, data: Bytes) -> Result<(), MediaError> {
        let path = self.path(url);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        debug!("Stored {} bytes in {}", data.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_store_then_open() {
        let dir = std::env::temp_dir().join(format!("rcs-ims-{}", uuid::Uuid::new_v4()));
        let resolver = FileContentResolver::with_base_dir(&dir);

        resolver
            .store("incoming/photo.jpg", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();

        let mut reader = resolver.open("incoming/photo.jpg").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"jpeg");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_file() {
        let resolver = FileContentResolver::new();
        assert!(matches!(
            resolver.open("file:///nonexistent/rcs-ims/none.jpg").await,
            Err(MediaError::Content(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_content() {
        let content = MmContent::from_bytes("note.txt", "text/plain", Bytes::from_static(b"hello"));
        let mut reader = open_content(&FileContentResolver::new(), &content).await.unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "hello");
    }
}
