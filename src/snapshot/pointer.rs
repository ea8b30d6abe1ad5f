//! The canonical "latest" alias of a dataset.
//!
//! On unix the alias is a relative symlink `{prefix}.{ext}` -> `{prefix}-{date}.{ext}`,
//! replaced by renaming a freshly created symlink over it. Elsewhere the alias is a
//! small record file holding the target name, replaced the same way.

use crate::snapshot::error::SnapshotError;
use crate::snapshot::identity::date_from_file_name;
use crate::utils::{exists, file_name_of, parent_dir};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Snapshot the canonical pointer currently references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSnapshot {
    /// Target file name, e.g. `cases-2021-03-01.csv.gz`. This is the value a marker records.
    pub name: String,
    /// Full path of the target file.
    pub path: PathBuf,
    /// Date parsed from `name`, if it carries one.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPointer {
    path: PathBuf,
}

impl CanonicalPointer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the file the alias references, or `None` if there is no alias yet.
    pub async fn resolve(&self) -> Result<Option<String>, SnapshotError> {
        match read_alias(&self.path).await {
            Ok(name) => Ok(Some(name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SnapshotError::PointerRead(self.path.clone(), e)),
        }
    }

    /// Like [`resolve`](Self::resolve), but also checks that the target exists.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::DanglingPointer`] if the alias references a file that is gone.
    pub async fn resolve_snapshot(&self) -> Result<Option<ResolvedSnapshot>, SnapshotError> {
        let Some(name) = self.resolve().await? else {
            return Ok(None);
        };
        let path = parent_dir(&self.path).join(&name);
        if !exists(&path).await? {
            return Err(SnapshotError::DanglingPointer {
                pointer: self.path.clone(),
                target: name,
            });
        }
        Ok(Some(ResolvedSnapshot {
            date: date_from_file_name(&name),
            name,
            path,
        }))
    }

    /// Atomically points the alias at `target_name`, a file in the same directory.
    ///
    /// Readers observe either the previous target or the new one, never a missing alias.
    pub async fn repoint(&self, target_name: &str) -> Result<(), SnapshotError> {
        let dir = parent_dir(&self.path);
        let target = dir.join(target_name);
        if !exists(&target).await? {
            return Err(SnapshotError::PointerWrite(
                self.path.clone(),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("target '{}' does not exist", target_name),
                ),
            ));
        }

        let pointer = self.path.clone();
        let target_name_owned = target_name.to_string();
        tokio::task::spawn_blocking(move || replace_alias(&dir, &pointer, &target_name_owned))
            .await?
            .map_err(|e| SnapshotError::PointerWrite(self.path.clone(), e))?;
        info!("Pointed {} at {}", self.path.display(), target_name);
        Ok(())
    }
}

#[cfg(unix)]
async fn read_alias(path: &Path) -> io::Result<String> {
    let target = tokio::fs::read_link(path).await?;
    Ok(file_name_of(&target))
}

#[cfg(not(unix))]
async fn read_alias(path: &Path) -> io::Result<String> {
    let record = tokio::fs::read_to_string(path).await?;
    Ok(record.trim().to_string())
}

#[cfg(unix)]
fn replace_alias(dir: &Path, pointer: &Path, target_name: &str) -> io::Result<()> {
    let staged = tempfile::Builder::new()
        .prefix(&crate::utils::staging_prefix(&file_name_of(pointer)))
        .suffix(".part")
        .make_in(dir, |p| std::os::unix::fs::symlink(target_name, p))?;
    staged.persist(pointer).map_err(|e| e.error)?;
    crate::utils::sync_dir(dir);
    Ok(())
}

#[cfg(not(unix))]
fn replace_alias(dir: &Path, pointer: &Path, target_name: &str) -> io::Result<()> {
    use std::io::Write;
    let mut staged = tempfile::Builder::new()
        .prefix(&crate::utils::staging_prefix(&file_name_of(pointer)))
        .suffix(".part")
        .tempfile_in(dir)?;
    staged.write_all(target_name.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(pointer).map_err(|e| e.error)?;
    Ok(())
}
