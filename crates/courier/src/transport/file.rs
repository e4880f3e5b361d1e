//! Transport writing each message to its own `.eml` file.

use super::{FromUrl, Transport};
use crate::error::{Error, Result};
use crate::message::EmailMessage;
use crate::url::ConnectionDescriptor;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// Writes every message as `<UTC timestamp>_<uuid>.eml` into a directory.
///
/// The directory must already exist. Files are created exclusively, so two
/// sends never overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransport {
    directory: PathBuf,
}

impl FileTransport {
    /// Creates a transport writing into `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Target directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name() -> String {
        format!(
            "{}_{}.eml",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            Uuid::new_v4().simple()
        )
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let envelope = message.to_envelope()?;

        if !tokio::fs::metadata(&self.directory).await?.is_dir() {
            return Err(Error::Io(io::Error::other(format!(
                "{} is not a directory",
                self.directory.display()
            ))));
        }

        let path = self.directory.join(Self::file_name());
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&envelope).await?;
        file.flush().await?;

        info!(path = %path.display(), bytes = envelope.len(), "Message written to file");
        Ok(())
    }
}

impl FromUrl for FileTransport {
    /// Directory is the host followed by the path, so both
    /// `file:///var/mail` and `file://relative/dir` work.
    fn from_url(descriptor: &ConnectionDescriptor) -> Result<Option<Self>> {
        let directory = format!("{}{}", descriptor.host().unwrap_or(""), descriptor.path());
        Ok((!directory.is_empty()).then(|| Self::new(directory)))
    }

    fn try_default() -> Result<Self> {
        Err(Error::TransportInit {
            scheme: "file".into(),
            reason: "a directory path is required".into(),
        })
    }
}
