use crate::fetch::source::Source;
use crate::snapshot::error::SnapshotError;
use crate::snapshot::identity::SnapshotIdentity;
use crate::snapshot::store::{SnapshotState, SnapshotStore};
use crate::utils::Staged;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// The source was contacted and its payload committed as the raw snapshot.
    Fetched { path: PathBuf, bytes: u64 },
    /// A dated file already existed; the source was not contacted.
    AlreadyPresent { state: SnapshotState },
}

impl EnsureOutcome {
    pub fn fetched(&self) -> bool {
        matches!(self, EnsureOutcome::Fetched { .. })
    }
}

/// Retrieves each dated snapshot at most once.
pub struct Fetcher<S> {
    source: S,
}

impl<S: Source> Fetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Makes sure a raw or sealed file exists for `id`, downloading it if neither does.
    ///
    /// The payload is written to a staging file in the dataset directory and renamed to
    /// `{prefix}-{date}.{ext}` only once complete. Any failure, including the returned
    /// future being dropped, removes the staging file.
    pub async fn ensure_snapshot(
        &self,
        store: &SnapshotStore,
        id: &SnapshotIdentity,
    ) -> Result<EnsureOutcome, SnapshotError> {
        let state = store.state(id).await?;
        if state != SnapshotState::Missing {
            info!("Snapshot {} already present ({:?}), not fetching", id, state);
            return Ok(EnsureOutcome::AlreadyPresent { state });
        }

        store.ensure_dir().await?;
        let raw_path = store.raw_path(id);
        let mut staged = Staged::new_in(store.dir(), &id.stem())?;
        let bytes = match self.source.fetch_into(&mut staged.file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Fetching {} from {} failed: {}", id, self.source.describe(), e);
                return Err(e);
            }
        };
        staged.commit(&raw_path, false).await?;
        info!(
            "Fetched {} bytes from {} into {}",
            bytes,
            self.source.describe(),
            raw_path.display()
        );
        Ok(EnsureOutcome::Fetched {
            path: raw_path,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::identity::SnapshotFormat;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    struct CountingSource {
        payload: &'static [u8],
        calls: AtomicUsize,
        fail_after_partial_write: bool,
    }

    impl CountingSource {
        fn new(payload: &'static [u8]) -> Self {
            Self {
                payload,
                calls: AtomicUsize::new(0),
                fail_after_partial_write: false,
            }
        }
    }

    impl Source for CountingSource {
        fn describe(&self) -> String {
            "counting-source".to_string()
        }

        async fn fetch_into<W>(&self, sink: &mut W) -> Result<u64, SnapshotError>
        where
            W: AsyncWrite + Unpin,
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let half = self.payload.len() / 2;
            sink.write_all(&self.payload[..half]).await.unwrap();
            if self.fail_after_partial_write {
                return Err(SnapshotError::Transfer(
                    self.describe(),
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"),
                ));
            }
            sink.write_all(&self.payload[half..]).await.unwrap();
            Ok(self.payload.len() as u64)
        }
    }

    fn store(dir: &std::path::Path) -> SnapshotStore {
        SnapshotStore::new(dir, "cases", SnapshotFormat::default()).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn second_ensure_does_not_touch_the_source() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(day());
        let fetcher = Fetcher::new(CountingSource::new(b"IdLandkreis\n1001\n"));

        let first = fetcher.ensure_snapshot(&store, &id).await?;
        assert!(first.fetched());
        let contents = std::fs::read(store.raw_path(&id)).unwrap();

        let second = fetcher.ensure_snapshot(&store, &id).await?;
        assert_eq!(
            second,
            EnsureOutcome::AlreadyPresent {
                state: SnapshotState::Raw
            }
        );
        assert_eq!(fetcher.source().calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(store.raw_path(&id)).unwrap(), contents);
        Ok(())
    }

    #[tokio::test]
    async fn sealed_snapshot_also_prevents_fetch() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(day());
        std::fs::write(store.sealed_path(&id), b"sealed").unwrap();
        let fetcher = Fetcher::new(CountingSource::new(b"fresh"));

        let outcome = fetcher.ensure_snapshot(&store, &id).await?;
        assert!(!outcome.fetched());
        assert_eq!(fetcher.source().calls.load(Ordering::SeqCst), 0);
        assert!(!store.raw_path(&id).exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.identity(day());
        let mut source = CountingSource::new(b"IdLandkreis\n1001\n");
        source.fail_after_partial_write = true;
        let fetcher = Fetcher::new(source);

        let result = fetcher.ensure_snapshot(&store, &id).await;

        assert!(matches!(result, Err(SnapshotError::Transfer(..))));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[tokio::test]
    async fn creates_missing_dataset_directory() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("rki").join("cases");
        let store = store(&nested);
        let id = store.identity(day());

        Fetcher::new(CountingSource::new(b"x,y\n"))
            .ensure_snapshot(&store, &id)
            .await?;
        assert_eq!(std::fs::read(store.raw_path(&id)).unwrap(), b"x,y\n");
        Ok(())
    }
}
