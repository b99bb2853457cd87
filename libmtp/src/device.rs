//! MTP session on top of a [`Transport`].

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::codes::{self, op, prop, response, ResponseCode};
use crate::codec::Encoder;
use crate::container::{self, HEADER_LEN, Header, Response};
use crate::error::{MtpError, Result};
use crate::transport::Transport;
use crate::types::{DeviceInfo, ObjectInfo, ObjectProp, StorageInfo, decode_prop_list};

/// Largest single bulk transfer handed to the transport.
pub const TRANSFER_CHUNK: usize = 16 * 1024;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

const SESSION_ID: u32 = 1;

/// Bytes of payload shown per data-phase trace line.
const DATA_TRACE_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Log every request and response.
    pub mtp: bool,
    /// Hex dump data phases.
    pub data: bool,
}

/// Where a newly announced object ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation {
    pub storage_id: u32,
    pub parent: u32,
    pub handle: u32,
}

/// Operations the filesystem layer needs from a device session.
///
/// Implementations are not safe for concurrent use; callers serialize access.
pub trait MtpDevice: Send {
    /// Human readable identity used for device selection.
    fn descriptor(&self) -> &str;

    fn set_timeout(&mut self, timeout: Duration);

    fn set_debug(&mut self, flags: DebugFlags);

    /// Opens the session and fetches the device info.
    fn configure(&mut self) -> Result<()>;

    /// Available after a successful [`MtpDevice::configure`].
    fn device_info(&self) -> Option<&DeviceInfo>;

    fn storage_ids(&mut self) -> Result<Vec<u32>>;

    fn storage_info(&mut self, storage_id: u32) -> Result<StorageInfo>;

    /// Children of `parent` ([`codes::ROOT_PARENT`] for the storage root).
    fn object_handles(&mut self, storage_id: u32, parent: u32) -> Result<Vec<u32>>;

    fn object_info(&mut self, handle: u32) -> Result<ObjectInfo>;

    /// 64-bit size of an object, for objects whose info overflowed.
    fn object_size(&mut self, handle: u32) -> Result<u64>;

    /// All properties of the immediate children of `parent`, in one request.
    fn object_prop_list(&mut self, parent: u32) -> Result<Vec<ObjectProp>>;

    fn get_object(&mut self, handle: u32) -> Result<Vec<u8>>;

    fn get_partial_object(&mut self, handle: u32, offset: u32, len: u32) -> Result<Vec<u8>>;

    fn get_partial_object_64(&mut self, handle: u32, offset: u64, len: u32) -> Result<Vec<u8>>;

    fn send_object_info(
        &mut self,
        storage_id: u32,
        parent: u32,
        info: &ObjectInfo,
    ) -> Result<ObjectLocation>;

    /// Payload for the object announced by the preceding
    /// [`MtpDevice::send_object_info`].
    fn send_object(&mut self, data: &[u8]) -> Result<()>;

    fn delete_object(&mut self, handle: u32) -> Result<()>;

    fn set_object_file_name(&mut self, handle: u32, name: &str) -> Result<()>;

    fn move_object(&mut self, handle: u32, storage_id: u32, parent: u32) -> Result<()>;

    fn send_partial_object(&mut self, handle: u32, offset: u64, data: &[u8]) -> Result<()>;

    fn truncate_object(&mut self, handle: u32, size: u64) -> Result<()>;

    fn begin_edit_object(&mut self, handle: u32) -> Result<()>;

    fn end_edit_object(&mut self, handle: u32) -> Result<()>;

    /// Ends the session and releases the transport.
    fn close(&mut self) -> Result<()>;
}

/// A device found on the bus but not opened yet.
pub trait Candidate: Send {
    fn descriptor(&self) -> &str;

    fn open(self: Box<Self>) -> Result<Box<dyn MtpDevice>>;
}

/// Enumerates attached MTP devices.
pub trait DeviceBus {
    fn candidates(&self) -> Result<Vec<Box<dyn Candidate>>>;
}

enum DataIn<'a> {
    None,
    Collect(&'a mut Vec<u8>),
}

pub struct Device<T: Transport> {
    transport: T,
    descriptor: String,
    timeout: Duration,
    debug: DebugFlags,
    transaction_id: u32,
    session_open: bool,
    closed: bool,
    info: Option<DeviceInfo>,
    scratch: Vec<u8>,
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T, descriptor: impl Into<String>) -> Self {
        Self {
            transport,
            descriptor: descriptor.into(),
            timeout: DEFAULT_TIMEOUT,
            debug: DebugFlags::default(),
            transaction_id: 0,
            session_open: false,
            closed: false,
            info: None,
            scratch: vec![0; TRANSFER_CHUNK],
        }
    }

    fn next_transaction(&mut self) -> u32 {
        let id = self.transaction_id;
        // 0 is reserved for OpenSession and 0xFFFFFFFF is invalid
        self.transaction_id = match self.transaction_id.wrapping_add(1) {
            0 | 0xFFFF_FFFF => 1,
            n => n,
        };
        id
    }

    fn trace_data(&self, direction: &str, code: u16, data: &[u8]) {
        if self.debug.data {
            let shown = &data[..data.len().min(DATA_TRACE_LIMIT)];
            trace!(
                target: "libmtp::data",
                "{direction} {} {} bytes: {}{}",
                codes::operation_name(code),
                data.len(),
                hex::encode(shown),
                if data.len() > shown.len() { "..." } else { "" }
            );
        }
    }

    fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < buf.len() {
            let end = (sent + TRANSFER_CHUNK).min(buf.len());
            let n = self.transport.write(&buf[sent..end], self.timeout)?;
            if n == 0 {
                return Err(MtpError::Protocol("bulk write made no progress".into()));
            }
            sent += n;
        }
        Ok(())
    }

    /// Writes one container, terminated by a zero length packet when its
    /// length is a multiple of the packet size.
    fn send_container(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        let mut first = Vec::with_capacity(TRANSFER_CHUNK);
        first.extend_from_slice(header);
        let head = payload.len().min(TRANSFER_CHUNK - header.len());
        first.extend_from_slice(&payload[..head]);
        self.send_all(&first)?;
        self.send_all(&payload[head..])?;

        let packet = self.transport.max_packet_size();
        if packet > 0 && (header.len() + payload.len()) % packet == 0 {
            self.transport.write(&[], self.timeout)?;
        }
        Ok(())
    }

    /// Reads the next container. Data payloads are appended to `sink`.
    fn read_container(&mut self, sink: &mut Vec<u8>) -> Result<Header> {
        let mut buf = std::mem::take(&mut self.scratch);
        let result = self.read_container_into(&mut buf, sink);
        self.scratch = buf;
        result
    }

    fn read_container_into(&mut self, buf: &mut [u8], sink: &mut Vec<u8>) -> Result<Header> {
        let mut n = self.transport.read(buf, self.timeout)?;
        if n == 0 {
            // trailing zero length packet of the previous container
            n = self.transport.read(buf, self.timeout)?;
        }
        if n < HEADER_LEN {
            return Err(MtpError::Protocol(format!("short container of {n} bytes")));
        }
        let header = Header::decode(&buf[..HEADER_LEN])?;
        sink.extend_from_slice(&buf[HEADER_LEN..n]);

        // 0xFFFFFFFF announces an unknown length: read until a short packet
        let unbounded = header.length == u32::MAX;
        let expected = header.payload_len();
        let mut last = n;
        while (unbounded && last == buf.len()) || (!unbounded && sink.len() < expected) {
            last = self.transport.read(buf, self.timeout)?;
            sink.extend_from_slice(&buf[..last]);
            if last < buf.len() && !unbounded && sink.len() < expected {
                return Err(MtpError::Protocol(format!(
                    "container ended after {} of {expected} bytes",
                    sink.len()
                )));
            }
        }
        if !unbounded {
            sink.truncate(expected);
        }
        Ok(header)
    }

    fn transact(
        &mut self,
        code: u16,
        params: &[u32],
        data_out: Option<&[u8]>,
        data_in: DataIn<'_>,
    ) -> Result<Response> {
        if self.closed {
            return Err(MtpError::Closed);
        }
        let operation = codes::operation_name(code);
        let tid = if code == op::OPEN_SESSION {
            0
        } else {
            self.next_transaction()
        };
        if self.debug.mtp {
            debug!(target: "libmtp", "request {operation} tid={tid} params={params:x?}");
        }

        let cmd = container::command(code, tid, params)?;
        self.send_all(&cmd)?;

        if let Some(payload) = data_out {
            self.trace_data("send", code, payload);
            let header = container::data_header(code, tid, payload.len());
            self.send_container(&header, payload)?;
        }

        let mut received = Vec::new();
        let mut header = self.read_container(&mut received)?;
        if header.kind == codes::container::DATA {
            self.trace_data("recv", code, &received);
            match data_in {
                DataIn::Collect(out) => *out = std::mem::take(&mut received),
                DataIn::None => {
                    warn!(target: "libmtp", "{operation}: discarding unexpected data phase")
                }
            }
            received.clear();
            header = self.read_container(&mut received)?;
        }

        let resp = Response::decode(&header, &received)?;
        if self.debug.mtp {
            debug!(
                target: "libmtp",
                "response {operation} tid={} {} params={:x?}",
                resp.transaction_id,
                ResponseCode(resp.code),
                resp.params
            );
        }
        if resp.transaction_id != tid {
            return Err(MtpError::Protocol(format!(
                "{operation}: response for transaction {} while waiting for {tid}",
                resp.transaction_id
            )));
        }
        if resp.code != response::OK {
            return Err(MtpError::Response {
                operation,
                code: ResponseCode(resp.code),
            });
        }
        Ok(resp)
    }

    fn run(&mut self, code: u16, params: &[u32]) -> Result<Response> {
        self.transact(code, params, None, DataIn::None)
    }

    fn fetch(&mut self, code: u16, params: &[u32]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.transact(code, params, None, DataIn::Collect(&mut out))?;
        Ok(out)
    }

    fn open_session(&mut self) -> Result<()> {
        self.transaction_id = 1;
        self.run(op::OPEN_SESSION, &[SESSION_ID])?;
        self.session_open = true;
        Ok(())
    }

    fn close_session(&mut self) -> Result<()> {
        let result = self.run(op::CLOSE_SESSION, &[]);
        self.session_open = false;
        result.map(|_| ())
    }
}

impl<T: Transport> MtpDevice for Device<T> {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn set_debug(&mut self, flags: DebugFlags) {
        self.debug = flags;
    }

    fn configure(&mut self) -> Result<()> {
        match self.open_session() {
            Ok(()) => {}
            Err(e) if e.response_code() == Some(response::SESSION_ALREADY_OPEN) => {
                debug!(target: "libmtp", "{}: session already open, reopening", self.descriptor);
                self.session_open = true;
                if let Err(e) = self.close_session() {
                    debug!(target: "libmtp", "closing stale session: {e}");
                }
                self.open_session()?;
            }
            Err(e) => return Err(e),
        }

        let info = DeviceInfo::decode(&self.fetch(op::GET_DEVICE_INFO, &[])?)?;
        if !info.has_mtp_extension() {
            return Err(MtpError::Protocol(format!(
                "{} does not advertise the MTP extension (\"{}\")",
                self.descriptor, info.mtp_extension
            )));
        }
        debug!(
            target: "libmtp",
            "{} {} {}: {} operations supported",
            info.manufacturer,
            info.model,
            info.device_version,
            info.operations_supported.len()
        );
        self.info = Some(info);
        Ok(())
    }

    fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    fn storage_ids(&mut self) -> Result<Vec<u32>> {
        let data = self.fetch(op::GET_STORAGE_IDS, &[])?;
        crate::codec::Decoder::new(&data, "StorageIDs").u32_array()
    }

    fn storage_info(&mut self, storage_id: u32) -> Result<StorageInfo> {
        StorageInfo::decode(&self.fetch(op::GET_STORAGE_INFO, &[storage_id])?)
    }

    fn object_handles(&mut self, storage_id: u32, parent: u32) -> Result<Vec<u32>> {
        // format 0: all formats
        let data = self.fetch(op::GET_OBJECT_HANDLES, &[storage_id, 0, parent])?;
        crate::codec::Decoder::new(&data, "ObjectHandles").u32_array()
    }

    fn object_info(&mut self, handle: u32) -> Result<ObjectInfo> {
        ObjectInfo::decode(&self.fetch(op::GET_OBJECT_INFO, &[handle])?)
    }

    fn object_size(&mut self, handle: u32) -> Result<u64> {
        let data = self.fetch(op::GET_OBJECT_PROP_VALUE, &[handle, prop::OBJECT_SIZE as u32])?;
        crate::codec::Decoder::new(&data, "ObjectSize").u64()
    }

    fn object_prop_list(&mut self, parent: u32) -> Result<Vec<ObjectProp>> {
        // format 0, every property, no group, depth 1 (immediate children)
        let data = self.fetch(op::GET_OBJECT_PROP_LIST, &[parent, 0, prop::ALL, 0, 1])?;
        decode_prop_list(&data)
    }

    fn get_object(&mut self, handle: u32) -> Result<Vec<u8>> {
        self.fetch(op::GET_OBJECT, &[handle])
    }

    fn get_partial_object(&mut self, handle: u32, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.fetch(op::GET_PARTIAL_OBJECT, &[handle, offset, len])
    }

    fn get_partial_object_64(&mut self, handle: u32, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.fetch(
            op::GET_PARTIAL_OBJECT_64,
            &[handle, offset as u32, (offset >> 32) as u32, len],
        )
    }

    fn send_object_info(
        &mut self,
        storage_id: u32,
        parent: u32,
        info: &ObjectInfo,
    ) -> Result<ObjectLocation> {
        let payload = info.encode();
        let resp = self.transact(
            op::SEND_OBJECT_INFO,
            &[storage_id, parent],
            Some(&payload),
            DataIn::None,
        )?;
        match resp.params.as_slice() {
            [storage_id, parent, handle, ..] => Ok(ObjectLocation {
                storage_id: *storage_id,
                parent: *parent,
                handle: *handle,
            }),
            other => Err(MtpError::Protocol(format!(
                "SendObjectInfo returned {} parameters",
                other.len()
            ))),
        }
    }

    fn send_object(&mut self, data: &[u8]) -> Result<()> {
        self.transact(op::SEND_OBJECT, &[], Some(data), DataIn::None)
            .map(|_| ())
    }

    fn delete_object(&mut self, handle: u32) -> Result<()> {
        // second parameter 0: delete regardless of format
        self.run(op::DELETE_OBJECT, &[handle, 0]).map(|_| ())
    }

    fn set_object_file_name(&mut self, handle: u32, name: &str) -> Result<()> {
        let mut e = Encoder::new();
        e.string(name);
        let payload = e.finish();
        self.transact(
            op::SET_OBJECT_PROP_VALUE,
            &[handle, prop::OBJECT_FILE_NAME as u32],
            Some(&payload),
            DataIn::None,
        )
        .map(|_| ())
    }

    fn move_object(&mut self, handle: u32, storage_id: u32, parent: u32) -> Result<()> {
        self.run(op::MOVE_OBJECT, &[handle, storage_id, parent])
            .map(|_| ())
    }

    fn send_partial_object(&mut self, handle: u32, offset: u64, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| MtpError::Protocol("partial write larger than 4GiB".into()))?;
        self.transact(
            op::SEND_PARTIAL_OBJECT,
            &[handle, offset as u32, (offset >> 32) as u32, len],
            Some(data),
            DataIn::None,
        )
        .map(|_| ())
    }

    fn truncate_object(&mut self, handle: u32, size: u64) -> Result<()> {
        self.run(op::TRUNCATE_OBJECT, &[handle, size as u32, (size >> 32) as u32])
            .map(|_| ())
    }

    fn begin_edit_object(&mut self, handle: u32) -> Result<()> {
        self.run(op::BEGIN_EDIT_OBJECT, &[handle]).map(|_| ())
    }

    fn end_edit_object(&mut self, handle: u32) -> Result<()> {
        self.run(op::END_EDIT_OBJECT, &[handle]).map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.session_open {
            if let Err(e) = self.close_session() {
                warn!(target: "libmtp", "{}: CloseSession failed: {e}", self.descriptor);
            }
        }
        self.closed = true;
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{filesystem_type, storage_type};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned device answers and records what the host sent.
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Scripted {
        fn reply(&self, bytes: Vec<u8>) {
            self.replies.lock().unwrap().push_back(bytes);
        }

        fn respond(&self, code: u16, tid: u32, params: &[u32]) {
            self.reply(
                Response {
                    code,
                    transaction_id: tid,
                    params: params.to_vec(),
                }
                .encode(),
            );
        }

        fn data(&self, code: u16, tid: u32, payload: &[u8]) {
            let mut bytes = container::data_header(code, tid, payload.len());
            bytes.extend_from_slice(payload);
            self.reply(bytes);
        }

        fn sent_codes(&self) -> Vec<u16> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.len() >= HEADER_LEN)
                .map(|b| Header::decode(b).unwrap())
                .filter(|h| h.kind == codes::container::COMMAND)
                .map(|h| h.code)
                .collect()
        }
    }

    impl Transport for Scripted {
        fn write(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize> {
            self.sent.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let next = self.replies.lock().unwrap().pop_front();
            let bytes = next.ok_or(MtpError::Timeout)?;
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        }

        fn max_packet_size(&self) -> usize {
            512
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn mtp_info() -> DeviceInfo {
        DeviceInfo {
            vendor_extension_id: codes::MTP_VENDOR_EXTENSION_ID,
            mtp_extension: "microsoft.com: 1.0;".into(),
            manufacturer: "ACME".into(),
            model: "Phone".into(),
            ..Default::default()
        }
    }

    #[test]
    fn configure_reopens_a_stale_session() {
        let t = Scripted::default();
        t.respond(response::SESSION_ALREADY_OPEN, 0, &[]);
        t.respond(response::OK, 1, &[]);
        t.respond(response::OK, 0, &[]);
        t.data(op::GET_DEVICE_INFO, 1, &mtp_info().encode());
        t.respond(response::OK, 1, &[]);

        let mut dev = Device::new(t.clone(), "ACME Phone");
        dev.configure().unwrap();
        assert_eq!(dev.device_info().unwrap().model, "Phone");
        assert_eq!(
            t.sent_codes(),
            vec![
                op::OPEN_SESSION,
                op::CLOSE_SESSION,
                op::OPEN_SESSION,
                op::GET_DEVICE_INFO
            ]
        );
    }

    #[test]
    fn configure_rejects_plain_ptp_cameras() {
        let t = Scripted::default();
        t.respond(response::OK, 0, &[]);
        let camera = DeviceInfo {
            manufacturer: "Camera Co".into(),
            ..Default::default()
        };
        t.data(op::GET_DEVICE_INFO, 1, &camera.encode());
        t.respond(response::OK, 1, &[]);

        let mut dev = Device::new(t, "Camera");
        assert!(matches!(dev.configure(), Err(MtpError::Protocol(_))));
    }

    #[test]
    fn storage_info_round_trip_through_data_phase() {
        let t = Scripted::default();
        let info = StorageInfo {
            storage_type: storage_type::FIXED_RAM,
            filesystem_type: filesystem_type::GENERIC_HIERARCHICAL,
            storage_description: "Internal Storage".into(),
            ..Default::default()
        };
        t.data(op::GET_STORAGE_INFO, 0, &info.encode());
        t.respond(response::OK, 0, &[]);

        let mut dev = Device::new(t, "ACME");
        assert_eq!(dev.storage_info(0x10001).unwrap(), info);
    }

    #[test]
    fn error_responses_carry_the_operation() {
        let t = Scripted::default();
        t.respond(response::INVALID_OBJECT_HANDLE, 0, &[]);
        let mut dev = Device::new(t, "ACME");
        let err = dev.delete_object(77).unwrap_err();
        assert_eq!(err.response_code(), Some(response::INVALID_OBJECT_HANDLE));
        assert!(err.to_string().starts_with("DeleteObject"));
    }

    #[test]
    fn mismatched_transaction_is_a_protocol_error() {
        let t = Scripted::default();
        t.respond(response::OK, 5, &[]);
        let mut dev = Device::new(t, "ACME");
        assert!(matches!(dev.delete_object(1), Err(MtpError::Protocol(_))));
    }

    #[test]
    fn send_object_info_reports_new_handle() {
        let t = Scripted::default();
        t.respond(response::OK, 0, &[0x10001, 0xFFFF_FFFF, 42]);
        let mut dev = Device::new(t.clone(), "ACME");
        let loc = dev
            .send_object_info(0x10001, codes::ROOT_PARENT, &ObjectInfo::file("a.txt", 3, ""))
            .unwrap();
        assert_eq!(loc.handle, 42);
        // command, then the data container
        let sent = t.sent.lock().unwrap();
        let data = Header::decode(&sent[1]).unwrap();
        assert_eq!(data.kind, codes::container::DATA);
        assert_eq!(data.code, op::SEND_OBJECT_INFO);
    }

    #[test]
    fn timeout_fails_the_operation() {
        let t = Scripted::default();
        let mut dev = Device::new(t, "ACME");
        assert!(matches!(dev.storage_ids(), Err(MtpError::Timeout)));
    }

    #[test]
    fn close_ends_session_once() {
        let t = Scripted::default();
        t.respond(response::OK, 0, &[]);
        t.data(op::GET_DEVICE_INFO, 1, &mtp_info().encode());
        t.respond(response::OK, 1, &[]);
        t.respond(response::OK, 2, &[]);

        let mut dev = Device::new(t.clone(), "ACME");
        dev.configure().unwrap();
        dev.close().unwrap();
        dev.close().unwrap();
        assert!(*t.closed.lock().unwrap());
        assert_eq!(t.sent_codes().last(), Some(&op::CLOSE_SESSION));
        assert!(matches!(dev.storage_ids(), Err(MtpError::Closed)));
    }
}
