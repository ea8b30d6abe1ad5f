use crate::gate::error::GateError;
use crate::snapshot::error::SnapshotError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapfeedError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

/// Failure classes callers branch on. Each maps to a distinct process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or HTTP failure while fetching. No partial file is visible.
    TransportFailure,
    /// The payload failed its integrity check and was quarantined.
    ValidationFailure,
    /// The downstream tool failed. The marker is unchanged, so re-running retries it.
    DownstreamFailure,
    /// Staging, rename, pointer or marker I/O failed.
    FilesystemFailure,
}

impl ErrorKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::ValidationFailure => 2,
            ErrorKind::TransportFailure => 3,
            ErrorKind::FilesystemFailure => 4,
            ErrorKind::DownstreamFailure => 5,
        }
    }
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::NetworkRequest(..)
            | SnapshotError::HttpStatus { .. }
            | SnapshotError::Transfer(..)
            | SnapshotError::SourceOpen(..) => ErrorKind::TransportFailure,
            SnapshotError::Quarantined { .. } => ErrorKind::ValidationFailure,
            _ => ErrorKind::FilesystemFailure,
        }
    }
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Snapshot(e) => e.kind(),
            GateError::Downstream { .. } => ErrorKind::DownstreamFailure,
            GateError::PointerMissing(_) | GateError::MarkerRead(..) | GateError::MarkerWrite(..) => {
                ErrorKind::FilesystemFailure
            }
        }
    }
}

impl SnapfeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapfeedError::Snapshot(e) => e.kind(),
            SnapfeedError::Gate(e) => e.kind(),
        }
    }
}
