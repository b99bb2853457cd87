//! Mount the storages of an MTP device as a FUSE filesystem.
//!
//! A run goes through [`lifecycle::run`]: find the device, open its session,
//! pick the storages, build the [`fs::MtpFs`] tree and serve it until
//! unmounted.

pub mod args;
pub mod config;
pub mod error;
pub mod filter;
pub mod fs;
pub mod gate;
pub mod lifecycle;
pub mod locate;
pub mod logging;
pub mod mount;
pub mod session;
pub mod storage;
