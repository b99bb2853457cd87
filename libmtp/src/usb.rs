//! Linux usbfs backend: sysfs enumeration and bulk transfers through ioctls on
//! `/dev/bus/usb/BBB/DDD`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::device::{Candidate, Device, DeviceBus, MtpDevice};
use crate::error::{MtpError, Result};
use crate::transport::Transport;

pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
pub const USBFS_ROOT: &str = "/dev/bus/usb";

const CLASS_IMAGE: u8 = 0x06;
const CLASS_VENDOR: u8 = 0xff;

mod ioctl {
    use libc::{c_uint, c_void};

    #[repr(C)]
    pub struct BulkTransfer {
        pub ep: c_uint,
        pub len: c_uint,
        /// Milliseconds, 0 waits forever.
        pub timeout: c_uint,
        pub data: *mut c_void,
    }

    nix::ioctl_readwrite!(bulk, b'U', 2, BulkTransfer);
    nix::ioctl_read!(claim_interface, b'U', 15, c_uint);
    nix::ioctl_read!(release_interface, b'U', 16, c_uint);
    nix::ioctl_read!(clear_halt, b'U', 21, c_uint);
}

fn transfer_error(e: Errno) -> MtpError {
    match e {
        Errno::ETIMEDOUT => MtpError::Timeout,
        Errno::ENODEV => MtpError::Closed,
        other => MtpError::Io(io::Error::from(other)),
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    // 0 would mean "no timeout" to the kernel
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Claimed MTP interface on an open usbfs node.
pub struct UsbTransport {
    file: Option<File>,
    interface: u32,
    ep_in: u8,
    ep_out: u8,
    max_packet: usize,
}

impl UsbTransport {
    pub fn open(node: &Path, endpoints: &Endpoints) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(node)?;
        let mut interface = endpoints.interface as libc::c_uint;
        // SAFETY: the fd is open and `interface` outlives the call.
        unsafe { ioctl::claim_interface(file.as_raw_fd(), &mut interface) }
            .map_err(|e| MtpError::Io(io::Error::from(e)))?;
        debug!(
            "claimed interface {} on {}",
            endpoints.interface,
            node.display()
        );
        Ok(Self {
            file: Some(file),
            interface: endpoints.interface,
            ep_in: endpoints.bulk_in,
            ep_out: endpoints.bulk_out,
            max_packet: endpoints.max_packet,
        })
    }

    fn fd(&self) -> Result<i32> {
        self.file.as_ref().map(|f| f.as_raw_fd()).ok_or(MtpError::Closed)
    }

    fn bulk(&self, ep: u8, ptr: *mut libc::c_void, len: usize, timeout: Duration) -> Result<usize> {
        let fd = self.fd()?;
        let mut xfer = ioctl::BulkTransfer {
            ep: ep as libc::c_uint,
            len: len as libc::c_uint,
            timeout: timeout_ms(timeout),
            data: ptr,
        };
        // SAFETY: `ptr` addresses `len` bytes owned by the caller for the
        // duration of the call.
        let n = unsafe { ioctl::bulk(fd, &mut xfer) }.map_err(transfer_error)?;
        Ok(n as usize)
    }

    fn clear_halt(&self, ep: u8) {
        if let Ok(fd) = self.fd() {
            let mut ep = ep as libc::c_uint;
            // SAFETY: fd is open, `ep` outlives the call.
            if let Err(e) = unsafe { ioctl::clear_halt(fd, &mut ep) } {
                debug!("clear halt on endpoint {ep:#x}: {e}");
            }
        }
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let result = self.bulk(
            self.ep_out,
            buf.as_ptr() as *mut libc::c_void,
            buf.len(),
            timeout,
        );
        if let Err(MtpError::Io(e)) = &result {
            if e.raw_os_error() == Some(libc::EPIPE) {
                self.clear_halt(self.ep_out);
            }
        }
        result
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let result = self.bulk(
            self.ep_in,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            timeout,
        );
        if let Err(MtpError::Io(e)) = &result {
            if e.raw_os_error() == Some(libc::EPIPE) {
                self.clear_halt(self.ep_in);
            }
        }
        result
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet
    }

    fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let mut interface = self.interface as libc::c_uint;
        // SAFETY: fd is still open here, the file is dropped afterwards.
        if let Err(e) = unsafe { ioctl::release_interface(file.as_raw_fd(), &mut interface) } {
            warn!("release interface {}: {e}", self.interface);
        }
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Bulk pipes of one MTP interface as read from sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub interface: u32,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub max_packet: usize,
}

/// An MTP interface found in sysfs.
#[derive(Debug, Clone)]
pub struct UsbCandidate {
    descriptor: String,
    node: PathBuf,
    endpoints: Endpoints,
}

impl UsbCandidate {
    pub fn node(&self) -> &Path {
        &self.node
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

impl Candidate for UsbCandidate {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn open(self: Box<Self>) -> Result<Box<dyn MtpDevice>> {
        let this = *self;
        let transport = UsbTransport::open(&this.node, &this.endpoints)?;
        Ok(Box::new(Device::new(transport, this.descriptor)))
    }
}

/// Attached USB devices, discovered through sysfs.
#[derive(Debug, Clone)]
pub struct UsbBus {
    sysfs: PathBuf,
    usbfs: PathBuf,
}

impl Default for UsbBus {
    fn default() -> Self {
        Self::with_roots(SYSFS_USB_DEVICES, USBFS_ROOT)
    }
}

impl UsbBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(sysfs: impl Into<PathBuf>, usbfs: impl Into<PathBuf>) -> Self {
        Self {
            sysfs: sysfs.into(),
            usbfs: usbfs.into(),
        }
    }

    /// Every MTP interface currently attached, sorted by sysfs name.
    pub fn scan(&self) -> Result<Vec<UsbCandidate>> {
        let mut names: Vec<String> = fs::read_dir(&self.sysfs)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(':'))
            .collect();
        names.sort();

        let mut found = Vec::new();
        for name in names {
            let iface_dir = self.sysfs.join(&name);
            if !is_mtp_interface(&iface_dir) {
                continue;
            }
            let Some((device, _)) = name.split_once(':') else {
                continue;
            };
            let device_dir = self.sysfs.join(device);
            match self.candidate(&device_dir, &iface_dir) {
                Some(c) => {
                    debug!("found MTP interface {name}: {}", c.descriptor);
                    found.push(c);
                }
                None => debug!("skipping {name}: incomplete sysfs entry"),
            }
        }
        Ok(found)
    }

    fn candidate(&self, device_dir: &Path, iface_dir: &Path) -> Option<UsbCandidate> {
        let bus: u32 = read_attr(device_dir, "busnum")?.parse().ok()?;
        let dev: u32 = read_attr(device_dir, "devnum")?.parse().ok()?;
        let endpoints = endpoints(iface_dir)?;

        let descriptor = ["manufacturer", "product", "serial"]
            .iter()
            .filter_map(|attr| read_attr(device_dir, attr))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let descriptor = if descriptor.is_empty() {
            format!("usb {bus:03}:{dev:03}")
        } else {
            descriptor
        };

        Some(UsbCandidate {
            descriptor,
            node: self.usbfs.join(format!("{bus:03}")).join(format!("{dev:03}")),
            endpoints,
        })
    }
}

impl DeviceBus for UsbBus {
    fn candidates(&self) -> Result<Vec<Box<dyn Candidate>>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Candidate>)
            .collect())
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_hex(dir: &Path, name: &str) -> Option<u32> {
    u32::from_str_radix(&read_attr(dir, name)?, 16).ok()
}

fn is_mtp_interface(dir: &Path) -> bool {
    let class = read_hex(dir, "bInterfaceClass");
    let subclass = read_hex(dir, "bInterfaceSubClass");
    let protocol = read_hex(dir, "bInterfaceProtocol");
    match (class, subclass, protocol) {
        (Some(c), Some(1), Some(1)) if c == CLASS_IMAGE as u32 => true,
        (Some(c), _, _) if c == CLASS_VENDOR as u32 => read_attr(dir, "interface")
            .map(|name| name.contains("MTP"))
            .unwrap_or(false),
        _ => false,
    }
}

fn endpoints(iface_dir: &Path) -> Option<Endpoints> {
    let interface = read_hex(iface_dir, "bInterfaceNumber")?;
    let mut bulk_in = None;
    let mut bulk_out = None;
    let mut max_packet = 0;

    for entry in fs::read_dir(iface_dir).ok()?.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("ep_") {
            continue;
        }
        let dir = entry.path();
        if read_attr(&dir, "type").as_deref() != Some("Bulk") {
            continue;
        }
        let address = read_hex(&dir, "bEndpointAddress")? as u8;
        match read_attr(&dir, "direction").as_deref() {
            Some("in") => bulk_in = Some(address),
            Some("out") => {
                bulk_out = Some(address);
                max_packet = read_hex(&dir, "wMaxPacketSize").unwrap_or(512) as usize;
            }
            _ => {}
        }
    }

    Some(Endpoints {
        interface,
        bulk_in: bulk_in?,
        bulk_out: bulk_out?,
        max_packet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, value: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), format!("{value}\n")).unwrap();
    }

    fn endpoint(iface: &Path, ep: &str, address: &str, direction: &str, kind: &str) {
        let dir = iface.join(ep);
        write(&dir, "bEndpointAddress", address);
        write(&dir, "direction", direction);
        write(&dir, "type", kind);
        write(&dir, "wMaxPacketSize", "0200");
    }

    fn fake_device(root: &Path, name: &str, bus: &str, dev: &str, product: &str, class: &str) {
        let device = root.join(name);
        write(&device, "busnum", bus);
        write(&device, "devnum", dev);
        write(&device, "manufacturer", "ACME");
        write(&device, "product", product);
        write(&device, "serial", "0123");

        let iface = root.join(format!("{name}:1.0"));
        write(&iface, "bInterfaceNumber", "00");
        write(&iface, "bInterfaceClass", class);
        write(&iface, "bInterfaceSubClass", "01");
        write(&iface, "bInterfaceProtocol", "01");
        endpoint(&iface, "ep_81", "81", "in", "Bulk");
        endpoint(&iface, "ep_02", "02", "out", "Bulk");
        endpoint(&iface, "ep_83", "83", "in", "Interrupt");
    }

    #[test]
    fn scan_finds_still_image_interfaces() {
        let tmp = tempfile::tempdir().unwrap();
        fake_device(tmp.path(), "1-2", "1", "7", "Phone", "06");
        fake_device(tmp.path(), "1-3", "1", "9", "Keyboard", "03");

        let bus = UsbBus::with_roots(tmp.path(), "/dev/bus/usb");
        let found = bus.scan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].descriptor(), "ACME Phone 0123");
        assert_eq!(found[0].node(), Path::new("/dev/bus/usb/001/007"));
        assert_eq!(
            found[0].endpoints(),
            &Endpoints {
                interface: 0,
                bulk_in: 0x81,
                bulk_out: 0x02,
                max_packet: 512,
            }
        );
    }

    #[test]
    fn vendor_interfaces_need_an_mtp_name() {
        let tmp = tempfile::tempdir().unwrap();
        fake_device(tmp.path(), "2-1", "2", "3", "Tablet", "ff");
        let bus = UsbBus::with_roots(tmp.path(), "/dev/bus/usb");
        assert!(bus.scan().unwrap().is_empty());

        write(&tmp.path().join("2-1:1.0"), "interface", "MTP");
        assert_eq!(bus.scan().unwrap().len(), 1);
    }

    #[test]
    fn missing_sysfs_is_an_error() {
        let bus = UsbBus::with_roots("/nonexistent/sysfs", "/dev/bus/usb");
        assert!(matches!(bus.candidates(), Err(MtpError::Io(_))));
    }

    #[test]
    fn timeouts_round_to_at_least_one_millisecond() {
        assert_eq!(timeout_ms(Duration::ZERO), 1);
        assert_eq!(timeout_ms(Duration::from_secs(2)), 2000);
        assert!(matches!(transfer_error(Errno::ETIMEDOUT), MtpError::Timeout));
    }

    // Talks to real hardware; gated like the FUSE smoke test.
    #[test]
    fn open_first_attached_device() {
        if std::env::var("MTPFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip usb test: set MTPFS_FUSE_TEST=1 to enable");
            return;
        }
        let bus = UsbBus::new();
        let mut candidates = bus.candidates().unwrap();
        let Some(first) = candidates.pop() else {
            return;
        };
        let mut dev = first.open().unwrap();
        dev.configure().unwrap();
        assert!(!dev.storage_ids().unwrap().is_empty());
        dev.close().unwrap();
    }
}
