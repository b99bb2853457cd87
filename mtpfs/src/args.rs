use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mtpfs",
    version,
    about = "Mount the storages of an MTP device through FUSE"
)]
pub struct Args {
    /// Log every filesystem request
    #[arg(long)]
    pub fs_debug: bool,

    /// Log every MTP request and response
    #[arg(long)]
    pub mtp_debug: bool,

    /// Hex dump MTP data phases
    #[arg(long)]
    pub data_debug: bool,

    /// Timeout for a single USB transfer, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub usb_timeout: u64,

    /// Assume removable RAM media uses VFAT and rewrite names accordingly
    #[arg(
        long,
        value_name = "BOOL",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub vfat: bool,

    /// Allow other users to access the mounted filesystem
    #[arg(long)]
    pub allow_other: bool,

    /// Regular expression selecting the device by its descriptor
    #[arg(long, value_name = "REGEX", default_value = "")]
    pub dev: String,

    /// Regular expression selecting storages by their description
    #[arg(long, value_name = "REGEX", default_value = "")]
    pub storage: String,

    /// Use Android extensions when the device offers them
    #[arg(
        long,
        value_name = "BOOL",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub android: bool,

    /// Directory to mount the device on
    pub mountpoint: PathBuf,
}
