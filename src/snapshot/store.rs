use crate::snapshot::error::SnapshotError;
use crate::snapshot::identity::{
    parse_strict_date, validate_prefix, SnapshotFormat, SnapshotIdentity, DATE_LEN,
};
use crate::snapshot::pointer::{CanonicalPointer, ResolvedSnapshot};
use crate::utils::{ensure_dir_exists, exists, is_staging_name};
use async_compression::tokio::bufread::GzipDecoder;
use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, BufReader};

/// Which dated files exist on disk for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Missing,
    Raw,
    Sealed,
    RawAndSealed,
}

impl SnapshotState {
    pub fn is_sealed(&self) -> bool {
        matches!(self, SnapshotState::Sealed | SnapshotState::RawAndSealed)
    }
}

/// Owns the dated snapshot files and the canonical pointer of one dataset
/// prefix inside one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    prefix: String,
    format: SnapshotFormat,
    pointer: CanonicalPointer,
}

impl SnapshotStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        format: SnapshotFormat,
    ) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        let pointer = CanonicalPointer::new(
            dir.join(format!("{}.{}", prefix, format.sealed_extension())),
        );
        Ok(Self {
            dir,
            prefix,
            format,
            pointer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn format(&self) -> &SnapshotFormat {
        &self.format
    }

    pub fn pointer(&self) -> &CanonicalPointer {
        &self.pointer
    }

    pub fn identity(&self, date: NaiveDate) -> SnapshotIdentity {
        SnapshotIdentity::from_validated(self.prefix.clone(), date)
    }

    pub fn raw_path(&self, id: &SnapshotIdentity) -> PathBuf {
        self.dir.join(id.raw_file_name(&self.format))
    }

    /// Path of the permanent form. Equals [`raw_path`](Self::raw_path) when compression is off.
    pub fn sealed_path(&self, id: &SnapshotIdentity) -> PathBuf {
        self.dir.join(id.sealed_file_name(&self.format))
    }

    pub async fn ensure_dir(&self) -> Result<(), SnapshotError> {
        ensure_dir_exists(&self.dir).await
    }

    pub async fn state(&self, id: &SnapshotIdentity) -> Result<SnapshotState, SnapshotError> {
        let sealed = exists(&self.sealed_path(id)).await?;
        if !self.format.is_compressed() {
            return Ok(if sealed {
                SnapshotState::Sealed
            } else {
                SnapshotState::Missing
            });
        }
        let raw = exists(&self.raw_path(id)).await?;
        Ok(match (raw, sealed) {
            (false, false) => SnapshotState::Missing,
            (true, false) => SnapshotState::Raw,
            (false, true) => SnapshotState::Sealed,
            (true, true) => SnapshotState::RawAndSealed,
        })
    }

    /// Sealed snapshots of this prefix, oldest first.
    pub async fn history(&self) -> Result<Vec<SnapshotIdentity>, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::DirectoryRead(self.dir.clone(), e)),
        };
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::DirectoryRead(self.dir.clone(), e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = SnapshotIdentity::from_sealed_file_name(&self.prefix, &self.format, &name) {
                found.push(id);
            }
        }
        found.sort();
        Ok(found)
    }

    pub async fn current(&self) -> Result<Option<ResolvedSnapshot>, SnapshotError> {
        self.pointer.resolve_snapshot().await
    }

    /// Opens the snapshot behind the canonical pointer, decompressing it if it is sealed as gzip.
    pub async fn open_current(
        &self,
    ) -> Result<Option<Box<dyn AsyncRead + Unpin + Send>>, SnapshotError> {
        let Some(current) = self.current().await? else {
            return Ok(None);
        };
        let file = tokio::fs::File::open(&current.path)
            .await
            .map_err(|e| SnapshotError::Open(current.path.clone(), e))?;
        if current.name.ends_with(".gz") {
            Ok(Some(Box::new(GzipDecoder::new(BufReader::new(file)))))
        } else {
            Ok(Some(Box::new(file)))
        }
    }

    /// Points the alias at `id`'s sealed file unless it already references that
    /// file or a newer one. A missing or dangling alias is always repaired.
    ///
    /// Returns whether the alias changed.
    pub async fn advance_pointer(&self, id: &SnapshotIdentity) -> Result<bool, SnapshotError> {
        let target = id.sealed_file_name(&self.format);
        let current = match self.pointer.resolve_snapshot().await {
            Ok(current) => current,
            Err(SnapshotError::DanglingPointer { target, .. }) => {
                info!("Canonical pointer references missing {}, repairing", target);
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(current) = current {
            if current.name == target {
                debug!("Canonical pointer already at {}", target);
                return Ok(false);
            }
            let current_id =
                SnapshotIdentity::from_sealed_file_name(&self.prefix, &self.format, &current.name);
            if current_id.is_some_and(|c| c.date() > id.date()) {
                info!(
                    "Canonical pointer stays at newer {} (sealed older {})",
                    current.name, target
                );
                return Ok(false);
            }
        }
        self.pointer.repoint(&target).await?;
        Ok(true)
    }

    /// Staging files are `.{label}.XXXXXX.part`, labelled either with the alias name
    /// `{prefix}.{ext}` or with a dated name starting `{prefix}-YYYY-MM-DD.`.
    fn owns_staging_name(&self, name: &str) -> bool {
        if !is_staging_name(name) {
            return false;
        }
        let Some(label) = name.strip_prefix('.') else {
            return false;
        };
        let alias = format!("{}.{}.", self.prefix, self.format.sealed_extension());
        if label.starts_with(&alias) {
            return true;
        }
        label
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.get(..DATE_LEN + 1))
            .and_then(|dated| dated.strip_suffix('.'))
            .and_then(parse_strict_date)
            .is_some()
    }

    /// Removes staging files of this prefix left behind by a killed process.
    pub async fn sweep_staging(&self) -> Result<usize, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SnapshotError::DirectoryRead(self.dir.clone(), e)),
        };
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::DirectoryRead(self.dir.clone(), e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if self.owns_staging_name(&name) {
                info!("Removing stale staging file {}", name);
                crate::utils::remove_if_exists(&entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
