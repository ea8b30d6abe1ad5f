//! This module provides the main entry point: a pipeline that acquires one dated
//! snapshot of a dataset (fetch, validate, seal) and then hands the current snapshot
//! to downstream processing through the idempotency gate.

use crate::archive::archiver::{Archiver, SealOutcome};
use crate::archive::validator::IntegrityValidator;
use crate::error::SnapfeedError;
use crate::fetch::fetcher::{EnsureOutcome, Fetcher};
use crate::fetch::source::Source;
use crate::gate::error::GateError;
use crate::gate::marker::{Marker, MarkerState};
use crate::gate::marker_gate::{GateOutcome, GateState, MarkerGate};
use crate::snapshot::identity::{SnapshotFormat, SnapshotIdentity};
use crate::snapshot::pointer::ResolvedSnapshot;
use crate::snapshot::store::{SnapshotState, SnapshotStore};
use bon::bon;
use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

const MARKER_EXTENSION: &str = "marker";

/// Marker location used when none is configured: `{dir}/{prefix}.marker`.
pub fn default_marker_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}.{}", prefix, MARKER_EXTENSION))
}

/// What [`Pipeline::acquire`] did for one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireOutcome {
    pub identity: SnapshotIdentity,
    pub fetch: EnsureOutcome,
    pub seal: SealOutcome,
    /// Pointer target after sealing.
    pub current: Option<String>,
}

/// Result of a full [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub acquire: AcquireOutcome,
    pub gate: GateOutcome,
}

/// Read-only view of a dataset directory and its gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub prefix: String,
    pub history: Vec<NaiveDate>,
    pub current: Option<String>,
    pub marker: MarkerState,
    pub gate: Option<GateState>,
}

impl StatusReport {
    pub async fn collect(store: &SnapshotStore, gate: &MarkerGate) -> Result<Self, SnapfeedError> {
        let history = store.history().await?.iter().map(|id| id.date()).collect();
        let current = store.pointer().resolve().await?;
        let marker = gate.marker().read().await?;
        let gate_state = match gate.state().await {
            Ok(state) => Some(state),
            Err(GateError::PointerMissing(_)) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            prefix: store.prefix().to_string(),
            history,
            current,
            marker,
            gate: gate_state,
        })
    }
}

/// Acquisition and gating for one dataset prefix in one directory.
///
/// The pipeline assumes it is the only writer of its directory. Re-running it is the
/// retry mechanism: every step is a no-op when its output already exists, and
/// interrupted steps leave nothing behind under a final name.
///
/// # Examples
///
/// ```rust,no_run
/// # use snapfeed::{Pipeline, HttpSource, SnapfeedError};
/// # use chrono::NaiveDate;
/// # async fn run() -> Result<(), SnapfeedError> {
/// let pipeline = Pipeline::builder()
///     .dir("/var/lib/covid/rki")
///     .prefix("cases")
///     .source(HttpSource::new("https://example.org/RKI_COVID19.csv"))
///     .required_substring("2021/03/01")
///     .build()
///     .await?;
///
/// let today = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
/// let report = pipeline
///     .run(today, |snapshot| async move {
///         println!("diffing {}", snapshot.path.display());
///         Ok::<(), std::io::Error>(())
///     })
///     .await?;
/// println!("{:?}", report.gate);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<S> {
    store: SnapshotStore,
    fetcher: Fetcher<S>,
    validator: IntegrityValidator,
    archiver: Archiver,
    gate: MarkerGate,
}

#[bon]
impl<S: Source> Pipeline<S> {
    /// Creates a pipeline, creating the dataset directory if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `.dir(PathBuf)`: **Required.** Dataset directory holding snapshots and the pointer.
    /// * `.prefix(String)`: **Required.** Dataset prefix used in every file name.
    /// * `.source(S)`: **Required.** Where snapshot bytes come from.
    /// * `.required_substring(String)`: Optional. Payloads lacking it are quarantined.
    /// * `.extension(String)`: Optional. Raw file extension. Defaults to `csv`.
    /// * `.compress(bool)`: Optional. Gzip sealed snapshots. Defaults to `true`.
    /// * `.keep_raw(bool)`: Optional. Keep the raw file after sealing. Defaults to `false`.
    /// * `.marker(PathBuf)`: Optional. Marker file of the gate. Defaults to [`default_marker_path`].
    ///
    /// # Errors
    ///
    /// Returns [`SnapfeedError::Snapshot`] if the prefix is invalid or the directory cannot be created.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        #[builder(into)] dir: PathBuf,
        #[builder(into)] prefix: String,
        source: S,
        #[builder(into)] required_substring: Option<String>,
        #[builder(into)] extension: Option<String>,
        compress: Option<bool>,
        keep_raw: Option<bool>,
        #[builder(into)] marker: Option<PathBuf>,
    ) -> Result<Self, SnapfeedError> {
        // Note: defaults are applied here when the builder methods were not called.
        let format = SnapshotFormat::new(
            extension.unwrap_or_else(|| "csv".to_string()),
            compress.unwrap_or(true),
        );
        let marker = marker.unwrap_or_else(|| default_marker_path(&dir, &prefix));
        let store = SnapshotStore::new(dir, prefix, format)?;
        store.ensure_dir().await?;

        let gate = MarkerGate::new(store.pointer().clone(), Marker::new(marker));
        Ok(Self {
            store,
            fetcher: Fetcher::new(source),
            validator: IntegrityValidator::new(required_substring),
            archiver: Archiver::new(keep_raw.unwrap_or(false)),
            gate,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn gate(&self) -> &MarkerGate {
        &self.gate
    }

    /// Fetches, validates and seals the snapshot for `date`, then advances the pointer.
    ///
    /// Nothing is fetched when a dated file already exists. A raw file that is not yet
    /// sealed is (re)validated before sealing. Compressed snapshots are trusted once
    /// sealed; an uncompressed one is trusted only once the pointer references it.
    ///
    /// # Errors
    ///
    /// A payload failing validation yields [`SnapshotError::Quarantined`](crate::SnapshotError::Quarantined)
    /// wrapped in [`SnapfeedError::Snapshot`]; the pointer is left untouched in that case.
    pub async fn acquire(&self, date: NaiveDate) -> Result<AcquireOutcome, SnapfeedError> {
        let identity = self.store.identity(date);
        let swept = self.store.sweep_staging().await?;
        if swept > 0 {
            info!("Removed {} stale staging file(s) for {}", swept, self.store.prefix());
        }

        let fetch = self.fetcher.ensure_snapshot(&self.store, &identity).await?;
        let needs_validation = match &fetch {
            EnsureOutcome::Fetched { .. } => true,
            EnsureOutcome::AlreadyPresent { state } if *state == SnapshotState::Raw => true,
            // Uncompressed formats fetch straight to the sealed name, so a run killed before
            // validation leaves an unchecked "sealed" file. Only the pointer target is trusted.
            EnsureOutcome::AlreadyPresent { .. } if !self.store.format().is_compressed() => {
                let sealed_name = identity.sealed_file_name(self.store.format());
                self.store.pointer().resolve().await?.as_deref() != Some(sealed_name.as_str())
            }
            EnsureOutcome::AlreadyPresent { .. } => false,
        };
        if needs_validation {
            self.validator
                .validate(&self.store.raw_path(&identity))
                .await?;
        } else {
            debug!("{} already sealed, skipping integrity check", identity);
        }

        let seal = self.archiver.seal(&self.store, &identity).await?;
        let current = self.store.pointer().resolve().await?;
        Ok(AcquireOutcome {
            identity,
            fetch,
            seal,
            current,
        })
    }

    /// [`acquire`](Self::acquire)s `date`, then runs `downstream` if the pointer moved
    /// since the last successful downstream run.
    pub async fn run<F, Fut, E>(
        &self,
        date: NaiveDate,
        downstream: F,
    ) -> Result<PipelineReport, SnapfeedError>
    where
        F: FnOnce(ResolvedSnapshot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let acquire = self.acquire(date).await?;
        let gate = self.gate.run_if_changed(downstream).await?;
        Ok(PipelineReport { acquire, gate })
    }

    pub async fn status(&self) -> Result<StatusReport, SnapfeedError> {
        StatusReport::collect(&self.store, &self.gate).await
    }
}
