//! Local filesystem implementations of the archive source and delivery sink,
//! used by the CLI and by tests. The Drive-backed equivalents live with the
//! Drive client, outside this crate; they implement the same traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::provider::{ArchiveImage, ImageLocation, ImageSource, OutputSink, ProviderError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "bmp", "tiff"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Streams image files out of one directory, one `next_image` at a time, so
/// large archives never sit in memory.
pub struct DirectorySource {
    entries: tokio::fs::ReadDir,
}

impl DirectorySource {
    pub async fn open(dir: &Path) -> Result<Self, ProviderError> {
        Ok(Self {
            entries: tokio::fs::read_dir(dir).await?,
        })
    }
}

#[async_trait]
impl ImageSource for DirectorySource {
    async fn next_image(&mut self) -> Result<Option<ArchiveImage>, ProviderError> {
        while let Some(entry) = self.entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !is_image(&path) {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(Some(ArchiveImage {
                id: path.display().to_string(),
                name,
                location: ImageLocation::Path(path),
            }));
        }
        Ok(None)
    }
}

/// Delivery into a local directory tree. Folder ids are paths; the "public
/// URL" is a file:// link to the created folder.
pub struct DirectorySink {
    base: PathBuf,
}

impl DirectorySink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl OutputSink for DirectorySink {
    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, ProviderError> {
        let dir = match parent {
            Some(parent) => PathBuf::from(parent).join(name),
            None => self.base.join(name),
        };
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.display().to_string())
    }

    async fn copy(&self, image_id: &str, folder_id: &str) -> Result<(), ProviderError> {
        let src = PathBuf::from(image_id);
        let file_name = src.file_name().ok_or_else(|| {
            ProviderError::Engine(format!("not a copyable file id: {image_id}"))
        })?;
        tokio::fs::copy(&src, PathBuf::from(folder_id).join(file_name)).await?;
        Ok(())
    }

    async fn set_public_permission(&self, folder_id: &str) -> Result<String, ProviderError> {
        Ok(format!("file://{folder_id}"))
    }
}
