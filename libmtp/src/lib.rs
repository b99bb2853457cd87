//! MTP (Media Transfer Protocol) sessions over USB.
//!
//! [`usb::UsbBus`] finds attached devices, [`Candidate::open`] claims one and
//! returns an [`MtpDevice`] ready for [`MtpDevice::configure`].

pub mod codec;
pub mod codes;
pub mod container;
pub mod device;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;
pub mod types;
pub mod usb;

pub use device::{
    Candidate, DEFAULT_TIMEOUT, DebugFlags, Device, DeviceBus, MtpDevice, ObjectLocation,
};
pub use error::{MtpError, Result};
pub use transport::Transport;
pub use types::{DeviceInfo, ObjectInfo, ObjectProp, PropValue, StorageInfo};
