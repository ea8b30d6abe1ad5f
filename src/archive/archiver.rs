use crate::snapshot::error::SnapshotError;
use crate::snapshot::identity::SnapshotIdentity;
use crate::snapshot::store::SnapshotStore;
use crate::utils::{exists, remove_if_exists, Staged};
use async_compression::tokio::write::GzipEncoder;
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SealOutcome {
    /// The sealed file was written during this call.
    Sealed {
        path: PathBuf,
        raw_bytes: u64,
        sealed_bytes: u64,
        pointer_moved: bool,
    },
    /// The sealed file existed beforehand and was left as is.
    AlreadySealed { path: PathBuf, pointer_moved: bool },
}

impl SealOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SealOutcome::Sealed { path, .. } | SealOutcome::AlreadySealed { path, .. } => path,
        }
    }
}

/// Turns a validated raw snapshot into its permanent form and advances the canonical pointer.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    keep_raw: bool,
}

impl Archiver {
    pub fn new(keep_raw: bool) -> Self {
        Self { keep_raw }
    }

    /// Seals `id` exactly once.
    ///
    /// With compression enabled the raw file is gzipped into a staging file that is
    /// renamed to `{prefix}-{date}.{ext}.gz`; the raw file is removed afterwards unless
    /// `keep_raw` is set. With compression disabled the raw file already is the sealed
    /// form. In both cases the pointer is only advanced after the sealed file is complete.
    ///
    /// Calling this again for a sealed identity does not rewrite anything, but it does
    /// finish work an interrupted earlier call left behind (stray raw file, stale pointer).
    pub async fn seal(
        &self,
        store: &SnapshotStore,
        id: &SnapshotIdentity,
    ) -> Result<SealOutcome, SnapshotError> {
        let raw = store.raw_path(id);
        let sealed = store.sealed_path(id);

        if !store.format().is_compressed() {
            if !exists(&sealed).await? {
                return Err(SnapshotError::RawMissing(raw));
            }
            let pointer_moved = store.advance_pointer(id).await?;
            return Ok(SealOutcome::AlreadySealed {
                path: sealed,
                pointer_moved,
            });
        }

        if exists(&sealed).await? {
            info!("{} is already sealed", sealed.display());
            if !self.keep_raw && remove_if_exists(&raw).await? {
                info!("Removed leftover raw snapshot {}", raw.display());
            }
            let pointer_moved = store.advance_pointer(id).await?;
            return Ok(SealOutcome::AlreadySealed {
                path: sealed,
                pointer_moved,
            });
        }

        if !exists(&raw).await? {
            return Err(SnapshotError::RawMissing(raw));
        }

        let raw_bytes = compress_into(store.dir(), &raw, &sealed).await?;
        let sealed_bytes = tokio::fs::metadata(&sealed)
            .await
            .map_err(|e| SnapshotError::Metadata(sealed.clone(), e))?
            .len();
        info!(
            "Sealed {} ({} -> {} bytes)",
            sealed.display(),
            raw_bytes,
            sealed_bytes
        );

        if !self.keep_raw {
            remove_if_exists(&raw).await?;
        }
        let pointer_moved = store.advance_pointer(id).await?;
        Ok(SealOutcome::Sealed {
            path: sealed,
            raw_bytes,
            sealed_bytes,
            pointer_moved,
        })
    }
}

async fn compress_into(dir: &Path, raw: &Path, sealed: &Path) -> Result<u64, SnapshotError> {
    let mut input = tokio::fs::File::open(raw)
        .await
        .map_err(|e| SnapshotError::Compression(raw.to_path_buf(), e))?;
    let mut staged = Staged::new_in(dir, &crate::utils::file_name_of(sealed))?;

    let mut encoder = GzipEncoder::new(&mut staged.file);
    let copied = tokio::io::copy(&mut input, &mut encoder)
        .await
        .map_err(|e| SnapshotError::Compression(raw.to_path_buf(), e))?;
    // finishes the gzip trailer
    encoder
        .shutdown()
        .await
        .map_err(|e| SnapshotError::Compression(raw.to_path_buf(), e))?;
    drop(encoder);

    staged.commit(sealed, false).await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::identity::SnapshotFormat;
    use async_compression::tokio::bufread::GzipDecoder;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, BufReader};

    fn store(dir: &Path) -> SnapshotStore {
        SnapshotStore::new(dir, "cases", SnapshotFormat::default()).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
    }

    async fn gunzip(path: &Path) -> Vec<u8> {
        let file = tokio::fs::File::open(path).await.unwrap();
        let mut decoder = GzipDecoder::new(BufReader::new(file));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn seals_raw_snapshot_and_points_at_it() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(date(1));
        std::fs::write(store.raw_path(&id), b"IdLandkreis,AnzahlFall\n1001,3\n").unwrap();

        let outcome = Archiver::default().seal(&store, &id).await?;

        assert!(matches!(
            outcome,
            SealOutcome::Sealed {
                raw_bytes: 30,
                pointer_moved: true,
                ..
            }
        ));
        assert!(!store.raw_path(&id).exists());
        assert_eq!(gunzip(&store.sealed_path(&id)).await, b"IdLandkreis,AnzahlFall\n1001,3\n");
        assert_eq!(
            store.pointer().resolve().await?.as_deref(),
            Some("cases-2021-03-01.csv.gz")
        );
        Ok(())
    }

    #[tokio::test]
    async fn sealed_file_is_never_rewritten() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(date(1));
        std::fs::write(store.raw_path(&id), b"first").unwrap();
        let archiver = Archiver::default();
        archiver.seal(&store, &id).await?;
        let sealed_before = std::fs::read(store.sealed_path(&id)).unwrap();

        std::fs::write(store.raw_path(&id), b"second").unwrap();
        let outcome = archiver.seal(&store, &id).await?;

        assert!(matches!(
            outcome,
            SealOutcome::AlreadySealed {
                pointer_moved: false,
                ..
            }
        ));
        assert_eq!(std::fs::read(store.sealed_path(&id)).unwrap(), sealed_before);
        assert!(!store.raw_path(&id).exists());
        Ok(())
    }

    #[tokio::test]
    async fn keep_raw_retains_the_uncompressed_file() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(date(1));
        std::fs::write(store.raw_path(&id), b"payload").unwrap();

        Archiver::new(true).seal(&store, &id).await?;
        assert!(store.raw_path(&id).exists());
        assert!(store.sealed_path(&id).exists());
        Ok(())
    }

    #[tokio::test]
    async fn repairs_pointer_after_interrupted_seal() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let old = store.identity(date(1));
        let new = store.identity(date(2));
        std::fs::write(store.raw_path(&old), b"old").unwrap();
        Archiver::default().seal(&store, &old).await?;

        // sealed file committed, process died before the pointer moved
        std::fs::write(store.raw_path(&new), b"new").unwrap();
        compress_into(store.dir(), &store.raw_path(&new), &store.sealed_path(&new)).await?;

        let outcome = Archiver::default().seal(&store, &new).await?;
        assert!(matches!(
            outcome,
            SealOutcome::AlreadySealed {
                pointer_moved: true,
                ..
            }
        ));
        assert_eq!(
            store.pointer().resolve().await?.as_deref(),
            Some("cases-2021-03-02.csv.gz")
        );
        assert!(!store.raw_path(&new).exists());
        Ok(())
    }

    #[tokio::test]
    async fn uncompressed_format_only_moves_pointer() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "tests", SnapshotFormat::new("csv", false))?;
        let id = store.identity(date(1));
        std::fs::write(store.raw_path(&id), b"plain").unwrap();

        let outcome = Archiver::default().seal(&store, &id).await?;
        assert_eq!(outcome.path(), store.raw_path(&id));
        assert_eq!(std::fs::read(store.raw_path(&id)).unwrap(), b"plain");
        assert_eq!(
            store.pointer().resolve().await?.as_deref(),
            Some("tests-2021-03-01.csv")
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_raw_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(date(1));
        let result = Archiver::default().seal(&store, &id).await;
        assert!(matches!(result, Err(SnapshotError::RawMissing(_))));
        assert!(store.pointer().resolve().await.unwrap().is_none());
    }
}
