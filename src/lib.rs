mod archive;
mod error;
mod fetch;
mod gate;
mod pipeline;
mod snapshot;
mod utils;

pub use error::{ErrorKind, SnapfeedError};
pub use pipeline::*;

pub use snapshot::error::SnapshotError;
pub use snapshot::identity::{date_from_file_name, SnapshotFormat, SnapshotIdentity, DATE_FORMAT};
pub use snapshot::pointer::{CanonicalPointer, ResolvedSnapshot};
pub use snapshot::store::{SnapshotState, SnapshotStore};

pub use fetch::fetcher::{EnsureOutcome, Fetcher};
pub use fetch::source::{FileSource, HttpSource, Source, SourceDescriptor};

pub use archive::archiver::{Archiver, SealOutcome};
pub use archive::validator::{contains_substring, IntegrityValidator};

pub use gate::downstream::{
    CommandProcessor, ToolResolver, PROFILE_ENV, TARGET_DIR_ENV, TOOL_ENV,
};
pub use gate::error::{DownstreamError, GateError};
pub use gate::marker::{Marker, MarkerState};
pub use gate::marker_gate::{GateOutcome, GateState, MarkerGate};
