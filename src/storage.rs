//! On-disk layout under the storage root: spooled uploads, in-progress
//! conversions, and the final per-dump database files.
//!
//! ```text
//! <root>/uploads/<uuid>      raw gzipped inputs awaiting conversion
//! <root>/tmp/<uuid>          dump databases being written
//! <root>/<dump-id>.lsif.db   converted dumps
//! <root>/id-based-filenames  marker: legacy filename migration done
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::xrepo::store::CrossRepoIndex;

const MIGRATION_MARKER: &str = "id-based-filenames";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: PathBuf) -> Self {
        StorageLayout { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn new_upload_path(&self) -> PathBuf {
        self.uploads_dir().join(Uuid::new_v4().to_string())
    }

    pub fn new_temp_db_path(&self) -> PathBuf {
        self.tmp_dir().join(Uuid::new_v4().to_string())
    }

    pub fn dump_path(&self, dump_id: i64) -> PathBuf {
        self.root.join(format!("{}.lsif.db", dump_id))
    }

    fn legacy_dump_path(&self, repository: &str, commit: &str) -> PathBuf {
        self.root
            .join(format!("{}@{}.lsif.db", repository.replace('/', "_"), commit))
    }

    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [self.root.clone(), self.uploads_dir(), self.tmp_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating storage directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// One-shot migration from the older `<repo>@<commit>.lsif.db` naming
    /// to id-based filenames. A marker file records completion so restarts
    /// skip the scan.
    pub async fn migrate_filenames(&self, xrepo: &CrossRepoIndex) -> Result<()> {
        let marker = self.root.join(MIGRATION_MARKER);
        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            return Ok(());
        }

        for dump in xrepo.all_dumps().await? {
            let legacy = self.legacy_dump_path(&dump.repository, &dump.commit);
            if !tokio::fs::try_exists(&legacy).await.unwrap_or(false) {
                continue;
            }
            let target = self.dump_path(dump.id);
            match tokio::fs::rename(&legacy, &target).await {
                Ok(()) => info!(
                    from = %legacy.display(),
                    to = %target.display(),
                    "migrated dump filename"
                ),
                Err(err) => warn!(?err, from = %legacy.display(), "filename migration failed"),
            }
        }

        tokio::fs::write(&marker, b"").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_the_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageLayout::new(dir.path().join("lsif-storage"));
        storage.ensure_layout().await.unwrap();

        assert!(storage.uploads_dir().is_dir());
        assert!(storage.tmp_dir().is_dir());

        let upload = storage.new_upload_path();
        assert_ne!(upload, storage.new_upload_path());
        assert_eq!(storage.dump_path(7).file_name().unwrap(), "7.lsif.db");
    }
}
