//! Exclusive access to the device.
//!
//! USB transfers block, so asynchronous callers go through
//! [`DeviceGate::call`], which runs the closure on the blocking pool while
//! holding the gate.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libmtp::{MtpDevice, MtpError};
use tracing::{debug, warn};

type Slot = Option<Box<dyn MtpDevice>>;

#[derive(Clone)]
pub struct DeviceGate {
    slot: Arc<Mutex<Slot>>,
}

impl DeviceGate {
    pub fn new(device: Box<dyn MtpDevice>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(device))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the device from the current thread.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut dyn MtpDevice) -> libmtp::Result<R>,
    ) -> libmtp::Result<R> {
        let mut slot = self.lock();
        match slot.as_mut() {
            Some(device) => f(&mut **device),
            None => Err(MtpError::Closed),
        }
    }

    /// Runs `f` on the device from the blocking pool.
    pub async fn call<R, F>(&self, f: F) -> libmtp::Result<R>
    where
        F: FnOnce(&mut dyn MtpDevice) -> libmtp::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let gate = self.clone();
        tokio::task::spawn_blocking(move || gate.with(f))
            .await
            .map_err(|e| MtpError::Io(io::Error::other(e)))?
    }

    pub fn descriptor(&self) -> Option<String> {
        self.lock().as_ref().map(|d| d.descriptor().to_string())
    }

    /// Closes the device. Returns false if it had been closed already.
    pub fn close(&self) -> bool {
        let Some(mut device) = self.lock().take() else {
            return false;
        };
        debug!("closing {}", device.descriptor());
        if let Err(e) = device.close() {
            warn!("closing {} failed: {e}", device.descriptor());
        }
        true
    }
}
