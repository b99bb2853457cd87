use std::io;
use std::path::PathBuf;

use libmtp::MtpError;
use thiserror::Error;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no MTP device found (filter {pattern:?})")]
    NoDeviceFound { pattern: String },

    #[error(
        "{count} devices match, narrow the selection with --dev: {list}",
        count = .candidates.len(),
        list = .candidates.join(", ")
    )]
    MultipleDevicesMatched { candidates: Vec<String> },

    #[error("enumerating USB devices failed: {0}")]
    EnumerationFailed(#[source] MtpError),

    #[error("opening {descriptor} failed: {source}")]
    OpenFailed {
        descriptor: String,
        #[source]
        source: MtpError,
    },
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error(
        "no storage matches {pattern:?}, available: {list}",
        list = .available.join(", ")
    )]
    NoStorageMatched {
        pattern: String,
        available: Vec<String>,
    },

    #[error("enumerating storages failed: {0}")]
    EnumerationFailed(#[source] MtpError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no storage to expose")]
    NoStorages,

    #[error("storage {0:#010x} selected twice")]
    DuplicateStorage(u32),
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount point {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("mount point {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("{} is already a mount point", .0.display())]
    AlreadyMounted(PathBuf),

    #[error("FUSE mount on {} failed: {source}", .path.display())]
    Fuse {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of one stage of a run. Everything before the dispatch loop is
/// fatal; per-request errors inside the loop never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Discovery(#[from] LocateError),

    #[error("configuring {descriptor} failed: {source}")]
    Configuration {
        descriptor: String,
        #[source]
        source: MtpError,
    },

    #[error(transparent)]
    Selection(#[from] SelectError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("dispatch loop failed: {0}")]
    Dispatch(#[source] io::Error),
}

impl RunError {
    pub fn stage(&self) -> &'static str {
        match self {
            RunError::Usage(_) => "usage",
            RunError::Discovery(_) => "discovery",
            RunError::Configuration { .. } => "configuration",
            RunError::Selection(_) => "selection",
            RunError::Build(_) => "build",
            RunError::Mount(_) => "mount",
            RunError::Dispatch(_) => "dispatch",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Usage(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_stage() {
        assert_eq!(RunError::Usage("bad".into()).exit_code(), EXIT_USAGE);
        let err = RunError::from(LocateError::NoDeviceFound {
            pattern: String::new(),
        });
        assert_eq!(err.stage(), "discovery");
        assert_eq!(err.exit_code(), EXIT_FAILURE);
        let err = RunError::from(MountError::AlreadyMounted("/mnt".into()));
        assert_eq!(err.stage(), "mount");
    }

    #[test]
    fn multiple_devices_lists_candidates() {
        let err = LocateError::MultipleDevicesMatched {
            candidates: vec!["A Phone 1".into(), "B Player 2".into()],
        };
        assert_eq!(
            err.to_string(),
            "2 devices match, narrow the selection with --dev: A Phone 1, B Player 2"
        );
    }
}
