use crate::snapshot::error::SnapshotError;
use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const STAGING_SUFFIX: &str = ".part";

/// Directory an entry lives in; bare relative names resolve to `.`.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) async fn ensure_dir_exists(path: &Path) -> Result<(), SnapshotError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(SnapshotError::DirectoryCreation(
                    path.to_path_buf(),
                    io::Error::new(io::ErrorKind::AlreadyExists, "path exists but is not a directory"),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| SnapshotError::DirectoryCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(SnapshotError::Metadata(path.to_path_buf(), e)),
    }
}

pub(crate) async fn exists(path: &Path) -> Result<bool, SnapshotError> {
    // symlink_metadata so a dangling alias still counts as present
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SnapshotError::Metadata(path.to_path_buf(), e)),
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool, SnapshotError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SnapshotError::Remove(path.to_path_buf(), e)),
    }
}

/// A uniquely named file in the destination directory that is removed when
/// dropped, unless [`Staged::commit`] renamed it into place first.
///
/// Staging in the destination directory keeps the final rename on one
/// filesystem, which is what makes the commit atomic.
pub(crate) struct Staged {
    pub(crate) file: File,
    path: TempPath,
    dir: PathBuf,
}

impl Staged {
    pub(crate) fn new_in(dir: &Path, label: &str) -> Result<Self, SnapshotError> {
        let named = tempfile::Builder::new()
            .prefix(&staging_prefix(label))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| SnapshotError::Staging(dir.to_path_buf(), e))?;
        let (file, path) = named.into_parts();
        debug!("Staging {}", path.display());
        Ok(Self {
            file: File::from_std(file),
            path,
            dir: dir.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and syncs the staged contents, then renames them to `to`.
    ///
    /// With `clobber == false` an existing file at `to` is never replaced; the
    /// commit fails instead and the staged file is discarded.
    pub(crate) async fn commit(self, to: &Path, clobber: bool) -> Result<(), SnapshotError> {
        let Staged { mut file, path, dir } = self;
        file.flush()
            .await
            .map_err(|e| SnapshotError::Staging(dir.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| SnapshotError::Staging(dir.clone(), e))?;
        drop(file);

        let persisted = if clobber {
            path.persist(to)
        } else {
            path.persist_noclobber(to)
        };
        // On failure the returned TempPath is dropped here, which removes it.
        persisted.map_err(|e| SnapshotError::Commit(to.to_path_buf(), e.error))?;
        sync_dir(&dir);
        Ok(())
    }
}

/// Writes `contents` next to `to` and atomically replaces `to` with it.
pub(crate) async fn replace_with_bytes(to: &Path, contents: &[u8]) -> Result<(), SnapshotError> {
    let dir = parent_dir(to);
    let mut staged = Staged::new_in(&dir, &file_name_of(to))?;
    staged
        .file
        .write_all(contents)
        .await
        .map_err(|e| SnapshotError::Staging(dir.clone(), e))?;
    staged.commit(to, true).await
}

pub(crate) fn staging_prefix(label: &str) -> String {
    format!(".{label}.")
}

pub(crate) fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(STAGING_SUFFIX)
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) {
    // Makes the rename itself durable. Failure here does not undo the commit.
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Could not sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn dropped_staging_file_leaves_nothing_behind() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut staged = Staged::new_in(dir.path(), "cases-2021-03-01")?;
            staged.file.write_all(b"partial").await.unwrap();
            staged.file.flush().await.unwrap();
            assert!(staged.path().exists());
            assert!(is_staging_name(&file_name_of(staged.path())));
        }
        assert!(entries(dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn noclobber_commit_keeps_existing_file() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cases-2021-03-01.csv");
        std::fs::write(&target, b"first").unwrap();

        let mut staged = Staged::new_in(dir.path(), "cases-2021-03-01")?;
        staged.file.write_all(b"second").await.unwrap();
        let result = staged.commit(&target, false).await;

        assert!(matches!(result, Err(SnapshotError::Commit(..))));
        assert_eq!(std::fs::read(&target).unwrap(), b"first");
        assert_eq!(entries(dir.path()), vec!["cases-2021-03-01.csv"]);
        Ok(())
    }

    #[tokio::test]
    async fn replace_with_bytes_overwrites_atomically() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cases.marker");
        replace_with_bytes(&target, b"one").await?;
        replace_with_bytes(&target, b"two").await?;

        assert_eq!(std::fs::read(&target).unwrap(), b"two");
        assert_eq!(entries(dir.path()), vec!["cases.marker"]);
        Ok(())
    }

    #[test]
    fn parent_of_bare_name_is_current_dir() {
        assert_eq!(parent_dir(Path::new("cases.csv.gz")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("data/cases.csv.gz")), PathBuf::from("data"));
    }
}
