//! Naming of dated snapshots.
//!
//! A snapshot is identified by a dataset prefix and the calendar date it was
//! acquired for. Every file the store manages derives its name from that pair:
//! `{prefix}-{YYYY-MM-DD}.{ext}` for dated files and `{prefix}.{ext}` for the
//! canonical pointer.

use crate::snapshot::error::SnapshotError;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Date format used inside snapshot file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Length of a date formatted with [`DATE_FORMAT`].
pub(crate) const DATE_LEN: usize = 10;

const COMPRESSED_SUFFIX: &str = "gz";

/// File naming parameters shared by every snapshot of a dataset.
///
/// # Examples
///
/// ```
/// use snapfeed::SnapshotFormat;
///
/// let format = SnapshotFormat::default();
/// assert_eq!(format.raw_extension(), "csv");
/// assert_eq!(format.sealed_extension(), "csv.gz");
///
/// let plain = SnapshotFormat::new("json", false);
/// assert_eq!(plain.sealed_extension(), "json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotFormat {
    extension: String,
    compressed: bool,
}

impl SnapshotFormat {
    pub fn new(extension: impl Into<String>, compressed: bool) -> Self {
        let extension = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            compressed,
        }
    }

    pub fn raw_extension(&self) -> &str {
        &self.extension
    }

    pub fn sealed_extension(&self) -> String {
        if self.compressed {
            format!("{}.{}", self.extension, COMPRESSED_SUFFIX)
        } else {
            self.extension.clone()
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }
}

impl Default for SnapshotFormat {
    fn default() -> Self {
        Self::new("csv", true)
    }
}

/// Logical name of one dated instance of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnapshotIdentity {
    prefix: String,
    date: NaiveDate,
}

impl SnapshotIdentity {
    /// Creates an identity after checking that `prefix` is usable as a file name component.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidPrefix`] if the prefix is empty, starts with a dot,
    /// or contains path separators or NUL bytes.
    pub fn new(prefix: impl Into<String>, date: NaiveDate) -> Result<Self, SnapshotError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self { prefix, date })
    }

    pub(crate) fn from_validated(prefix: String, date: NaiveDate) -> Self {
        Self { prefix, date }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// `{prefix}-{YYYY-MM-DD}`, the part shared by the raw, sealed and quarantined names.
    pub fn stem(&self) -> String {
        format!("{}-{}", self.prefix, self.date.format(DATE_FORMAT))
    }

    pub fn raw_file_name(&self, format: &SnapshotFormat) -> String {
        format!("{}.{}", self.stem(), format.raw_extension())
    }

    pub fn sealed_file_name(&self, format: &SnapshotFormat) -> String {
        format!("{}.{}", self.stem(), format.sealed_extension())
    }

    /// Parses a sealed snapshot file name back into its identity.
    ///
    /// Names belonging to another prefix, another extension or carrying a
    /// malformed date yield `None`.
    pub fn from_sealed_file_name(prefix: &str, format: &SnapshotFormat, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
        let date_part = rest.strip_suffix(format.sealed_extension().as_str())?.strip_suffix('.')?;
        let date = parse_strict_date(date_part)?;
        Some(Self {
            prefix: prefix.to_string(),
            date,
        })
    }
}

impl fmt::Display for SnapshotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

pub(crate) fn validate_prefix(prefix: &str) -> Result<(), SnapshotError> {
    let bad = prefix.is_empty()
        || prefix.starts_with('.')
        || prefix.contains(['/', '\\', '\0']);
    if bad {
        return Err(SnapshotError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Extracts the date embedded in a dated snapshot file name, e.g.
/// `cases-2021-03-01.csv.gz` -> `2021-03-01`.
///
/// The prefix may itself contain dots or dashes; the last `-YYYY-MM-DD` that is
/// followed by an extension (or ends the name) wins.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    name.match_indices('-').rev().find_map(|(dash, _)| {
        let start = dash + 1;
        let candidate = name.get(start..start + DATE_LEN)?;
        match name.as_bytes().get(start + DATE_LEN) {
            None | Some(b'.') => parse_strict_date(candidate),
            Some(_) => None,
        }
    })
}

pub(crate) fn parse_strict_date(s: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(s, DATE_FORMAT).ok()?;
    // chrono accepts unpadded fields; file names must round-trip exactly
    (date.format(DATE_FORMAT).to_string() == s).then_some(date)
}
