//! Pending replication packages.
//!
//! Packages (`*.rep`) and their release notes (`*.desc`) are dropped into
//! `<database>Replics/`, next to the loader executable by default. Packages
//! install in arrival order, oldest modification time first.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::error::{ReplicError, Result};
use crate::io;

pub const PACKAGE_EXTENSION: &str = "rep";
pub const DESCRIPTION_EXTENSION: &str = "desc";
const DIR_SUFFIX: &str = "Replics";

/// Separator between package descriptions in the report body.
const LINE_BREAK: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationItem {
    pub path: PathBuf,
    pub discovered_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct ReplicationQueue {
    dir: PathBuf,
}

impl ReplicationQueue {
    /// Open (creating if needed) `<base>/<database>Replics`.
    pub fn open(base: &Path, database: &str) -> Result<Self> {
        let database = database.trim();
        if database.is_empty() {
            return Err(ReplicError::Precondition(
                "the database name is not set; use --db-name".to_string(),
            ));
        }
        let dir = base.join(format!("{database}{DIR_SUFFIX}"));
        io::ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    /// Directory of the running executable, where queue folders live by
    /// default.
    pub fn default_base() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        Ok(exe.parent().unwrap_or(Path::new(".")).to_path_buf())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pending packages, oldest first.
    pub fn list_pending(&self) -> Result<Vec<ReplicationItem>> {
        let items = self
            .sorted(PACKAGE_EXTENSION)?
            .into_iter()
            .map(|(path, discovered_at)| ReplicationItem {
                path,
                discovered_at,
            })
            .collect();
        Ok(items)
    }

    /// Delete an installed package.
    pub fn remove(&self, item: &ReplicationItem) -> Result<()> {
        match std::fs::remove_file(&item.path) {
            Ok(()) => {
                info!(package = %item.path.display(), "replication file deleted from folder");
                Ok(())
            }
            Err(e) => Err(ReplicError::CleanupFailed {
                path: item.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Description files, oldest first.
    pub fn descriptions(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .sorted(DESCRIPTION_EXTENSION)?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }

    /// Concatenated contents of every description file.
    pub fn read_descriptions(&self) -> Result<String> {
        let mut parts = Vec::new();
        for path in self.descriptions()? {
            parts.push(std::fs::read_to_string(&path)?);
        }
        Ok(parts.join(LINE_BREAK))
    }

    /// Remove description files once they have been reported.
    pub fn discard_descriptions(&self) -> Result<()> {
        for path in self.descriptions()? {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to remove description file");
            }
        }
        Ok(())
    }

    fn sorted(&self, ext: &str) -> Result<Vec<(PathBuf, SystemTime)>> {
        let mut files = io::files_with_extension(&self.dir, ext)?;
        files.sort_by_key(|(_, modified)| *modified);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, age_secs: u64, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    #[test]
    fn open_creates_directory() {
        let base = TempDir::new().unwrap();
        let queue = ReplicationQueue::open(base.path(), "Prod").unwrap();
        assert_eq!(queue.dir(), base.path().join("ProdReplics"));
        assert!(queue.dir().is_dir());
    }

    #[test]
    fn open_requires_database_name() {
        let base = TempDir::new().unwrap();
        let err = ReplicationQueue::open(base.path(), "  ").unwrap_err();
        assert!(matches!(err, ReplicError::Precondition(_)));
    }

    #[test]
    fn pending_sorted_by_modification_time() {
        let base = TempDir::new().unwrap();
        let queue = ReplicationQueue::open(base.path(), "Prod").unwrap();
        touch(queue.dir(), "z.rep", 300, "");
        touch(queue.dir(), "a.rep", 100, "");
        touch(queue.dir(), "m.rep", 200, "");
        touch(queue.dir(), "notes.desc", 400, "");

        let names: Vec<String> = queue
            .list_pending()
            .unwrap()
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["z.rep", "m.rep", "a.rep"]);

        let items = queue.list_pending().unwrap();
        assert!(items.windows(2).all(|w| w[0].discovered_at <= w[1].discovered_at));
    }

    #[test]
    fn remove_deletes_file() {
        let base = TempDir::new().unwrap();
        let queue = ReplicationQueue::open(base.path(), "Prod").unwrap();
        touch(queue.dir(), "a.rep", 10, "");
        let item = queue.list_pending().unwrap().remove(0);
        queue.remove(&item).unwrap();
        assert!(!item.path.exists());
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn remove_missing_file_is_cleanup_failure() {
        let base = TempDir::new().unwrap();
        let queue = ReplicationQueue::open(base.path(), "Prod").unwrap();
        let item = ReplicationItem {
            path: queue.dir().join("gone.rep"),
            discovered_at: SystemTime::now(),
        };
        let err = queue.remove(&item).unwrap_err();
        assert!(matches!(err, ReplicError::CleanupFailed { .. }));
    }

    #[test]
    fn descriptions_join_in_order_and_discard() {
        let base = TempDir::new().unwrap();
        let queue = ReplicationQueue::open(base.path(), "Prod").unwrap();
        touch(queue.dir(), "second.desc", 10, "Fix B");
        touch(queue.dir(), "first.desc", 20, "Fix A");

        assert_eq!(queue.read_descriptions().unwrap(), "Fix A\r\nFix B");
        queue.discard_descriptions().unwrap();
        assert!(queue.descriptions().unwrap().is_empty());
    }
}
