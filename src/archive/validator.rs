use crate::snapshot::error::SnapshotError;
use crate::utils::{file_name_of, parent_dir};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const SCAN_CHUNK: usize = 64 * 1024;
const QUARANTINE_EXTENSION: &str = "scheckfail";
const QUARANTINE_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// Content sanity check applied to a fresh raw snapshot before it is sealed.
///
/// Upstream providers occasionally publish truncated, empty or stale payloads. A
/// payload lacking the configured marker string (for example the expected date, or a
/// header column) is moved aside instead of entering the archive.
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    required: Option<String>,
}

impl IntegrityValidator {
    /// An empty `required` string disables the check, like `None`.
    pub fn new(required: Option<String>) -> Self {
        Self {
            required: required.filter(|s| !s.is_empty()),
        }
    }

    pub fn required_substring(&self) -> Option<&str> {
        self.required.as_deref()
    }

    /// Checks `raw` for the required substring.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Quarantined`] after renaming `raw` to
    /// `{stem}-q{timestamp}.scheckfail` if the substring is absent.
    pub async fn validate(&self, raw: &Path) -> Result<(), SnapshotError> {
        let Some(needle) = self.required.clone() else {
            return Ok(());
        };

        let path = raw.to_path_buf();
        let found = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&path)
                .and_then(|file| contains_substring(file, needle.as_bytes()))
                .map_err(|e| SnapshotError::ValidationRead(path, e))
        })
        .await??;

        if found {
            debug!("{} passed the integrity check", raw.display());
            return Ok(());
        }

        let quarantine = quarantine(raw).await?;
        warn!(
            "{} does not contain {:?}, quarantined as {}",
            raw.display(),
            self.required.as_deref().unwrap_or_default(),
            quarantine.display()
        );
        Err(SnapshotError::Quarantined {
            original: raw.to_path_buf(),
            quarantine,
        })
    }
}

/// Streams `reader` looking for `needle`, keeping memory bounded regardless of input size.
pub fn contains_substring<R: Read>(mut reader: R, needle: &[u8]) -> io::Result<bool> {
    if needle.is_empty() {
        return Ok(true);
    }
    // bytes carried over so matches spanning two reads are seen
    let keep = needle.len() - 1;
    let mut window: Vec<u8> = Vec::with_capacity(SCAN_CHUNK + keep);
    let mut chunk = vec![0u8; SCAN_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        window.extend_from_slice(&chunk[..n]);
        if window.windows(needle.len()).any(|w| w == needle) {
            return Ok(true);
        }
        if window.len() > keep {
            window.drain(..window.len() - keep);
        }
    }
}

pub(crate) fn quarantine_path(raw: &Path, at: DateTime<Utc>) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name_of(raw));
    parent_dir(raw).join(format!(
        "{}-q{}.{}",
        stem,
        at.format(QUARANTINE_TIMESTAMP),
        QUARANTINE_EXTENSION
    ))
}

async fn quarantine(raw: &Path) -> Result<PathBuf, SnapshotError> {
    let mut target = quarantine_path(raw, Utc::now());
    // never reuse a quarantine name
    while crate::utils::exists(&target).await? {
        target = quarantine_path(raw, Utc::now());
    }
    tokio::fs::rename(raw, &target)
        .await
        .map_err(|e| SnapshotError::QuarantineRename(raw.to_path_buf(), e))?;
    Ok(target)
}
