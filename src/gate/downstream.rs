//! External downstream tools (diff engines, time-series loaders) run behind the gate.
//!
//! The gate only needs a success or failure signal. Tools are expected to either
//! succeed completely or fail without leaving partial, unflagged output. Time-series
//! loaders are expected to be idempotent upserts so that a retried run is harmless.
//!
//! Known gap: loaders do not re-send zero-valued samples. A revision that drops every
//! value of a historical period to zero is therefore not reflected downstream. This is
//! accepted to bound processing cost and is not detected here.

use crate::gate::error::DownstreamError;
use crate::snapshot::identity::DATE_FORMAT;
use crate::snapshot::pointer::ResolvedSnapshot;
use log::info;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Replaces the downstream executable outright.
pub const TOOL_ENV: &str = "SNAPFEED_TOOL";
/// Build profile directory bare program names are looked up in, e.g. `release`.
pub const PROFILE_ENV: &str = "SNAPFEED_PROFILE";
/// Root of the build output tree used together with [`PROFILE_ENV`]. Defaults to `target`.
pub const TARGET_DIR_ENV: &str = "SNAPFEED_TARGET_DIR";

const DEFAULT_TARGET_DIR: &str = "target";

/// Decides which executable actually runs for a configured program name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResolver {
    tool_override: Option<PathBuf>,
    profile: Option<String>,
    target_dir: Option<PathBuf>,
}

impl ToolResolver {
    pub fn new(
        tool_override: Option<PathBuf>,
        profile: Option<String>,
        target_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            tool_override,
            profile: profile.filter(|p| !p.is_empty()),
            target_dir,
        }
    }

    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty());
        Self::new(
            non_empty(TOOL_ENV).map(PathBuf::from),
            non_empty(PROFILE_ENV).map(|p| p.to_string_lossy().into_owned()),
            non_empty(TARGET_DIR_ENV).map(PathBuf::from),
        )
    }

    /// `SNAPFEED_TOOL` wins; otherwise a bare name (no path separator) is resolved
    /// inside `{target_dir}/{profile}/` when a profile is set; otherwise `program`
    /// is used as given and looked up on `PATH`.
    pub fn resolve(&self, program: &str) -> PathBuf {
        if let Some(tool) = &self.tool_override {
            return tool.clone();
        }
        let bare = !program.contains(std::path::MAIN_SEPARATOR) && !program.contains('/');
        match &self.profile {
            Some(profile) if bare => self
                .target_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR))
                .join(profile)
                .join(program),
            _ => PathBuf::from(program),
        }
    }
}

/// Runs an external program against the current snapshot.
///
/// Arguments may contain the placeholders `{snapshot}` (path of the sealed file),
/// `{name}` (pointer target name, the marker value) and `{date}` (snapshot date,
/// empty if the name carries none).
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandProcessor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds a processor from `program args...`, resolving the program through `resolver`.
    pub fn from_command_line(
        command: &[String],
        resolver: &ToolResolver,
    ) -> Result<Self, DownstreamError> {
        let (program, args) = command.split_first().ok_or(DownstreamError::EmptyCommand)?;
        Ok(Self::new(resolver.resolve(program), args.to_vec()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn expanded_args(&self, snapshot: &ResolvedSnapshot) -> Vec<OsString> {
        let date = snapshot
            .date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default();
        let path = snapshot.path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                OsString::from(
                    arg.replace("{snapshot}", &path)
                        .replace("{name}", &snapshot.name)
                        .replace("{date}", &date),
                )
            })
            .collect()
    }

    pub async fn process(&self, snapshot: &ResolvedSnapshot) -> Result<(), DownstreamError> {
        let args = self.expanded_args(snapshot);
        info!("Launching {} {:?}", self.program.display(), args);
        let mut command = Command::new(&self.program);
        command.args(&args).kill_on_drop(true);
        let status = command
            .status()
            .await
            .map_err(|e| DownstreamError::Spawn(self.program.clone(), e))?;
        if !status.success() {
            return Err(DownstreamError::ExitStatus {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}
