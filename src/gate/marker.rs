use crate::gate::error::GateError;
use crate::utils::{ensure_dir_exists, parent_dir, replace_with_bytes};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Persisted value of a marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MarkerState {
    /// No downstream run has completed yet.
    Absent,
    /// Pointer target consumed by the last successful downstream run.
    Present(String),
}

impl MarkerState {
    pub fn value(&self) -> Option<&str> {
        match self {
            MarkerState::Absent => None,
            MarkerState::Present(v) => Some(v),
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            MarkerState::Absent => None,
            MarkerState::Present(v) => Some(v),
        }
    }
}

/// A single-value plain text file recording what downstream processing last consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<MarkerState, GateError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim();
                if value.is_empty() {
                    Ok(MarkerState::Absent)
                } else {
                    Ok(MarkerState::Present(value.to_string()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MarkerState::Absent),
            Err(e) => Err(GateError::MarkerRead(self.path.clone(), e)),
        }
    }

    /// Replaces the marker value atomically; readers see the old or the new value only.
    pub async fn write(&self, value: &str) -> Result<(), GateError> {
        ensure_dir_exists(&parent_dir(&self.path))
            .await
            .map_err(|e| GateError::MarkerWrite(self.path.clone(), e))?;
        replace_with_bytes(&self.path, value.as_bytes())
            .await
            .map_err(|e| GateError::MarkerWrite(self.path.clone(), e))
    }
}
