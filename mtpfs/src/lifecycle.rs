//! One run from device discovery to unmount.
//!
//! Stages run strictly in order: locate, configure, select storages, build
//! the filesystem, serve. The device is held by a [`DeviceGuard`] from the
//! moment it is opened, so every exit path releases it exactly once.

use std::future::Future;

use libmtp::DeviceBus;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{RunError, SelectError};
use crate::fs::MtpFs;
use crate::gate::DeviceGate;
use crate::locate::locate;
use crate::mount::{DispatchStack, LoopExit, serve};
use crate::session;
use crate::storage::select_storages;

/// Owns the open device; closes it when dropped.
pub struct DeviceGuard {
    gate: DeviceGate,
}

impl DeviceGuard {
    pub fn new(device: Box<dyn libmtp::MtpDevice>) -> Self {
        Self {
            gate: DeviceGate::new(device),
        }
    }

    pub fn gate(&self) -> &DeviceGate {
        &self.gate
    }

    /// Closes the device now.
    pub fn close(self) {
        if self.gate.close() {
            info!("device closed");
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if self.gate.close() {
            debug!("device released on early exit");
        }
    }
}

/// Runs every stage. A failure is logged with its stage before it is
/// returned.
pub async fn run<S, F>(
    config: &Config,
    bus: &dyn DeviceBus,
    stack: &S,
    shutdown: F,
) -> Result<(), RunError>
where
    S: DispatchStack + ?Sized,
    F: Future<Output = ()>,
{
    let result = run_stages(config, bus, stack, shutdown).await;
    if let Err(e) = &result {
        error!(stage = e.stage(), "{e}");
    }
    result
}

async fn run_stages<S, F>(
    config: &Config,
    bus: &dyn DeviceBus,
    stack: &S,
    shutdown: F,
) -> Result<(), RunError>
where
    S: DispatchStack + ?Sized,
    F: Future<Output = ()>,
{
    let guard = DeviceGuard::new(locate(bus, &config.device_pattern)?);
    let descriptor = guard.gate().descriptor().unwrap_or_default();

    guard
        .gate()
        .with(|d| session::configure(d, &config.session))
        .map_err(|source| RunError::Configuration {
            descriptor: descriptor.clone(),
            source,
        })?;

    let storages = guard
        .gate()
        .with(|d| Ok(select_storages(d, &config.storage_pattern)))
        .map_err(SelectError::EnumerationFailed)??;

    let fs = MtpFs::build(guard.gate().clone(), storages, config.fs)?;

    // a mount failure drops the guard here; the loop never ran, so no teardown
    let exit = serve(
        stack,
        fs.clone(),
        &config.mountpoint,
        &config.mount,
        config.fs_debug,
        shutdown,
    )
    .await?;

    fs.on_unmount().await;
    guard.close();
    info!("{descriptor} unmounted from {}", config.mountpoint.display());

    match exit {
        LoopExit::Failed(e) => Err(RunError::Dispatch(e)),
        LoopExit::Unmounted | LoopExit::Shutdown => Ok(()),
    }
}
