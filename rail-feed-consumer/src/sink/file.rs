use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{object_name, FlushSink};
use crate::error::SinkError;
use crate::normalize::CanonicalRecord;

/// Writes each window to `<dir>/<label>.json` as pretty-printed JSON.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Writing record batches to {}", dir.display());
        Ok(Self { dir })
    }
}

#[async_trait]
impl FlushSink for FileSink {
    async fn persist(&self, label: &str, records: &[CanonicalRecord]) -> Result<(), SinkError> {
        let contents = serde_json::to_vec_pretty(records)?;

        let path = self.dir.join(object_name(label));
        let tmp_path = self.dir.join(format!(".{}.tmp", object_name(label)));

        // Readers never see a partial batch under the real name
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;

        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path()).await.unwrap();

        sink.persist("2024-03-01T10:15:00", &[]).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("2024-03-01T10:15:00.json")).unwrap();
        assert_eq!(written, "[]");
        assert!(!dir.path().join(".2024-03-01T10:15:00.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("records").join("feed");
        let sink = FileSink::new(&nested).await.unwrap();

        sink.persist("label", &[]).await.unwrap();
        assert!(nested.join("label.json").exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path()).await.unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();

        let result = sink.persist("label", &[]).await;
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
