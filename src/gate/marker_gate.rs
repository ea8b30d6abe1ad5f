//! The idempotency gate in front of non-idempotent downstream processing.
//!
//! ```text
//! NoMarker  --downstream ok------------> Current(C)
//! Stale(M)  --C == M-------------------> Current(M)   (skip)
//! Stale(M)  --C != M, downstream ok----> Current(C)
//! Stale(M)  --C != M, downstream fails-> Stale(M)     (retried next run)
//! ```

use crate::gate::error::GateError;
use crate::gate::marker::{Marker, MarkerState};
use crate::snapshot::pointer::{CanonicalPointer, ResolvedSnapshot};
use log::{info, warn};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;

/// Relation between the canonical pointer and the marker, before any processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateState {
    /// Nothing has been processed yet.
    NoMarker { current: String },
    /// The pointer moved since the last successful run.
    Stale { marker: String, current: String },
    /// The last successful run consumed the current snapshot.
    Current { current: String },
}

impl GateState {
    pub fn needs_run(&self) -> bool {
        !matches!(self, GateState::Current { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Downstream processing was not invoked because the marker already equals the pointer.
    Skipped { current: String, marker: PathBuf },
    /// Downstream processing succeeded and the marker now records `current`.
    Ran {
        previous: Option<String>,
        current: String,
    },
}

impl GateOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, GateOutcome::Ran { .. })
    }
}

/// Invokes downstream processing at most once per distinct pointer target.
#[derive(Debug, Clone)]
pub struct MarkerGate {
    pointer: CanonicalPointer,
    marker: Marker,
}

impl MarkerGate {
    pub fn new(pointer: CanonicalPointer, marker: Marker) -> Self {
        Self { pointer, marker }
    }

    pub fn pointer(&self) -> &CanonicalPointer {
        &self.pointer
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub async fn state(&self) -> Result<GateState, GateError> {
        let (current, marker) = self.inputs().await?;
        Ok(classify(current.name, marker))
    }

    /// Runs `downstream` against the pointer's current snapshot unless the marker
    /// shows it was already processed. The marker is updated only when `downstream`
    /// succeeds, so a failure is retried on the next call.
    pub async fn run_if_changed<F, Fut, E>(&self, downstream: F) -> Result<GateOutcome, GateError>
    where
        F: FnOnce(ResolvedSnapshot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.run(downstream, false).await
    }

    /// Like [`run_if_changed`](Self::run_if_changed) but ignores an up-to-date marker.
    pub async fn run_forced<F, Fut, E>(&self, downstream: F) -> Result<GateOutcome, GateError>
    where
        F: FnOnce(ResolvedSnapshot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.run(downstream, true).await
    }

    async fn run<F, Fut, E>(&self, downstream: F, force: bool) -> Result<GateOutcome, GateError>
    where
        F: FnOnce(ResolvedSnapshot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (current, marker) = self.inputs().await?;
        let name = current.name.clone();

        if !force && marker.value() == Some(name.as_str()) {
            warn!(
                "{} was already processed; delete {} to force recomputation",
                name,
                self.marker.path().display()
            );
            return Ok(GateOutcome::Skipped {
                current: name,
                marker: self.marker.path().to_path_buf(),
            });
        }

        let previous = marker.into_value();
        info!(
            "Running downstream processing for {} (last processed: {})",
            name,
            previous.as_deref().unwrap_or("none")
        );
        if let Err(e) = downstream(current).await {
            let source = e.into();
            warn!("Downstream processing of {} failed: {}; marker left unchanged", name, source);
            return Err(GateError::Downstream { name, source });
        }

        self.marker.write(&name).await?;
        info!("Recorded {} in {}", name, self.marker.path().display());
        Ok(GateOutcome::Ran {
            previous,
            current: name,
        })
    }

    async fn inputs(&self) -> Result<(ResolvedSnapshot, MarkerState), GateError> {
        let current = self
            .pointer
            .resolve_snapshot()
            .await?
            .ok_or_else(|| GateError::PointerMissing(self.pointer.path().to_path_buf()))?;
        let marker = self.marker.read().await?;
        Ok((current, marker))
    }
}

fn classify(current: String, marker: MarkerState) -> GateState {
    match marker {
        MarkerState::Absent => GateState::NoMarker { current },
        MarkerState::Present(m) if m == current => GateState::Current { current },
        MarkerState::Present(marker) => GateState::Stale { marker, current },
    }
}
