use crate::snapshot::error::SnapshotError;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Canonical pointer '{0}' does not exist, nothing to process")]
    PointerMissing(PathBuf),

    #[error("Failed to read marker '{0}'")]
    MarkerRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to write marker '{0}'")]
    MarkerWrite(PathBuf, #[source] SnapshotError),

    #[error("Downstream processing of '{name}' failed")]
    Downstream {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("Failed to launch downstream tool '{0}'")]
    Spawn(PathBuf, #[source] std::io::Error),

    #[error("No downstream command given")]
    EmptyCommand,

    #[error("Downstream tool '{program}' exited with {status}")]
    ExitStatus { program: PathBuf, status: ExitStatus },
}
