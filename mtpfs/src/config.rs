//! Run configuration, built once from the command line.

use std::path::PathBuf;
use std::time::Duration;

use libmtp::DebugFlags;

use crate::args::Args;
use crate::error::RunError;
use crate::filter::FilterPattern;

/// Parameters applied to the protocol session before the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub mtp_debug: bool,
    pub data_debug: bool,
}

impl SessionSettings {
    pub fn debug_flags(&self) -> DebugFlags {
        DebugFlags {
            mtp: self.mtp_debug,
            data: self.data_debug,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: libmtp::DEFAULT_TIMEOUT,
            mtp_debug: false,
            data_debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFsOptions {
    /// Rewrite names on removable storages to what VFAT accepts.
    pub removable_vfat: bool,
    /// Use the Android extension operations when the device has them.
    pub android: bool,
}

impl Default for DeviceFsOptions {
    fn default() -> Self {
        Self {
            removable_vfat: true,
            android: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub allow_other: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub device_pattern: FilterPattern,
    pub storage_pattern: FilterPattern,
    pub session: SessionSettings,
    pub fs: DeviceFsOptions,
    pub mount: MountOptions,
    pub fs_debug: bool,
    pub mountpoint: PathBuf,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, RunError> {
        let device_pattern = FilterPattern::new(&args.dev)
            .map_err(|e| RunError::Usage(format!("invalid --dev pattern: {e}")))?;
        let storage_pattern = FilterPattern::new(&args.storage)
            .map_err(|e| RunError::Usage(format!("invalid --storage pattern: {e}")))?;

        Ok(Config {
            device_pattern,
            storage_pattern,
            session: SessionSettings {
                timeout: Duration::from_millis(args.usb_timeout),
                mtp_debug: args.mtp_debug,
                data_debug: args.data_debug,
            },
            fs: DeviceFsOptions {
                removable_vfat: args.vfat,
                android: args.android,
            },
            mount: MountOptions {
                allow_other: args.allow_other,
            },
            fs_debug: args.fs_debug,
            mountpoint: args.mountpoint,
        })
    }
}
