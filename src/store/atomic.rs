//! Atomic-replace primitive used by every store write: write to a temp
//! file in the target directory, fsync, then rename into place, so a
//! reader never observes a partial write.

use std::path::Path;

use tempfile::NamedTempFile;
use tokio::task;

use crate::error::AofError;

pub async fn write_atomic(path: &Path, contents: String) -> Result<(), AofError> {
    let dir = path
        .parent()
        .ok_or_else(|| AofError::Internal(anyhow::anyhow!("record path has no parent: {path:?}")))?
        .to_path_buf();
    let target = path.to_path_buf();
    task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            use std::io::Write;
            tmp.write_all(contents.as_bytes())?;
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&target)
            .map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| AofError::Internal(anyhow::anyhow!("atomic write join error: {e}")))??;
    Ok(())
}

/// Best-effort directory rename: a missing source (no companion directory
/// was ever created) is tolerated rather than treated as an error.
pub async fn rename_best_effort(from: &Path, to: &Path) {
    if tokio::fs::metadata(from).await.is_ok() {
        if let Some(parent) = to.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::rename(from, to).await;
    }
}
