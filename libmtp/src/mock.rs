//! In-memory MTP device and bus for tests.
//!
//! A [`MockDevice`] is a cheap clone over shared state, so a test can hand one
//! clone to the code under test and keep another to inspect what happened.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::codes::{
    self, access, filesystem_type, format, op, prop, response, storage_type, ResponseCode,
};
use crate::device::{Candidate, DebugFlags, DeviceBus, MtpDevice, ObjectLocation};
use crate::error::{MtpError, Result};
use crate::types::{DeviceInfo, ObjectInfo, ObjectProp, PropValue, StorageInfo};

const FIRST_HANDLE: u32 = 1;

const BASELINE_OPS: &[u16] = &[
    op::GET_DEVICE_INFO,
    op::OPEN_SESSION,
    op::CLOSE_SESSION,
    op::GET_STORAGE_IDS,
    op::GET_STORAGE_INFO,
    op::GET_OBJECT_HANDLES,
    op::GET_OBJECT_INFO,
    op::GET_OBJECT,
    op::DELETE_OBJECT,
    op::SEND_OBJECT_INFO,
    op::SEND_OBJECT,
    op::MOVE_OBJECT,
    op::GET_PARTIAL_OBJECT,
    op::GET_OBJECT_PROP_VALUE,
    op::SET_OBJECT_PROP_VALUE,
];

const ANDROID_OPS: &[u16] = &[
    op::GET_OBJECT_PROP_LIST,
    op::GET_PARTIAL_OBJECT_64,
    op::SEND_PARTIAL_OBJECT,
    op::TRUNCATE_OBJECT,
    op::BEGIN_EDIT_OBJECT,
    op::END_EDIT_OBJECT,
];

#[derive(Debug, Clone)]
struct Object {
    storage: u32,
    /// 0 for objects at the storage root.
    parent: u32,
    info: ObjectInfo,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    storages: Vec<(u32, StorageInfo)>,
    objects: BTreeMap<u32, Object>,
    next_handle: u32,
    pending: Option<u32>,
    editing: HashSet<u32>,

    android: bool,
    ptp_only: bool,
    unadvertised: HashSet<u16>,
    rejected: HashSet<u16>,
    fail_configure: bool,
    fail_storage_ids: bool,
    fail_open: bool,

    session_open: bool,
    closed: bool,
    close_calls: usize,
    configure_calls: usize,
    timeout: Option<Duration>,
    debug: DebugFlags,
    calls: Vec<&'static str>,
}

/// Counters recorded by a [`MockDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub close_calls: usize,
    pub configure_calls: usize,
    pub session_open: bool,
    pub timeout: Option<Duration>,
    pub debug: DebugFlags,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    descriptor: String,
    info: Option<DeviceInfo>,
    state: Arc<Mutex<State>>,
}

fn fail(operation: &'static str, code: u16) -> MtpError {
    MtpError::Response {
        operation,
        code: ResponseCode(code),
    }
}

fn root_parent(parent: u32) -> u32 {
    if parent == codes::ROOT_PARENT { 0 } else { parent }
}

impl MockDevice {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            info: None,
            state: Arc::new(Mutex::new(State {
                next_handle: FIRST_HANDLE,
                android: true,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// StorageInfo of a read-write, hierarchical storage.
    pub fn storage(description: &str, removable: bool) -> StorageInfo {
        StorageInfo {
            storage_type: if removable {
                storage_type::REMOVABLE_RAM
            } else {
                storage_type::FIXED_RAM
            },
            filesystem_type: filesystem_type::GENERIC_HIERARCHICAL,
            access_capability: access::READ_WRITE,
            max_capacity: 32 << 30,
            free_space_in_bytes: 8 << 30,
            free_space_in_objects: u32::MAX,
            storage_description: description.to_string(),
            volume_identifier: String::new(),
        }
    }

    pub fn with_storage(self, id: u32, info: StorageInfo) -> Self {
        self.lock().storages.push((id, info));
        self
    }

    /// Whether the Android extension operations are advertised.
    pub fn with_android(self, android: bool) -> Self {
        self.lock().android = android;
        self
    }

    /// Drops the MTP vendor extension from DeviceInfo, like a plain camera.
    pub fn ptp_only(self) -> Self {
        self.lock().ptp_only = true;
        self
    }

    /// Removes `operation` from the advertised operation list.
    pub fn without(self, operation: u16) -> Self {
        self.lock().unadvertised.insert(operation);
        self
    }

    /// Keeps `operation` advertised but answers OperationNotSupported.
    pub fn rejecting(self, operation: u16) -> Self {
        self.lock().rejected.insert(operation);
        self
    }

    pub fn failing_configure(self) -> Self {
        self.lock().fail_configure = true;
        self
    }

    pub fn failing_storage_ids(self) -> Self {
        self.lock().fail_storage_ids = true;
        self
    }

    pub fn failing_open(self) -> Self {
        self.lock().fail_open = true;
        self
    }

    fn insert(&self, storage: u32, parent: u32, info: ObjectInfo, data: Vec<u8>) -> u32 {
        let mut st = self.lock();
        let handle = st.next_handle;
        st.next_handle += 1;
        let parent = root_parent(parent);
        st.objects.insert(
            handle,
            Object {
                storage,
                parent,
                info,
                data,
            },
        );
        handle
    }

    /// Adds a folder; `parent` 0 places it at the storage root.
    pub fn add_folder(&self, storage: u32, parent: u32, name: &str) -> u32 {
        self.insert(storage, parent, ObjectInfo::folder(name, ""), Vec::new())
    }

    pub fn add_file(&self, storage: u32, parent: u32, name: &str, data: &[u8]) -> u32 {
        self.add_file_dated(storage, parent, name, data, "")
    }

    pub fn add_file_dated(
        &self,
        storage: u32,
        parent: u32,
        name: &str,
        data: &[u8],
        modified: &str,
    ) -> u32 {
        let info = ObjectInfo::file(name, data.len() as u64, modified);
        self.insert(storage, parent, info, data.to_vec())
    }

    pub fn stats(&self) -> MockStats {
        let st = self.lock();
        MockStats {
            close_calls: st.close_calls,
            configure_calls: st.configure_calls,
            session_open: st.session_open,
            timeout: st.timeout,
            debug: st.debug,
        }
    }

    /// Names of the operations invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Handle of the child called `name`; `parent` 0 searches the storage root.
    pub fn find(&self, storage: u32, parent: u32, name: &str) -> Option<u32> {
        let parent = root_parent(parent);
        self.lock()
            .objects
            .iter()
            .find(|(_, o)| o.storage == storage && o.parent == parent && o.info.filename == name)
            .map(|(h, _)| *h)
    }

    pub fn contents(&self, handle: u32) -> Option<Vec<u8>> {
        self.lock().objects.get(&handle).map(|o| o.data.clone())
    }

    pub fn name_of(&self, handle: u32) -> Option<String> {
        self.lock()
            .objects
            .get(&handle)
            .map(|o| o.info.filename.clone())
    }

    pub fn parent_of(&self, handle: u32) -> Option<u32> {
        self.lock().objects.get(&handle).map(|o| o.parent)
    }

    pub fn is_editing(&self, handle: u32) -> bool {
        self.lock().editing.contains(&handle)
    }

    fn advertised(st: &State) -> DeviceInfo {
        let mut ops: Vec<u16> = BASELINE_OPS.to_vec();
        if st.android {
            ops.extend_from_slice(ANDROID_OPS);
        }
        ops.retain(|o| !st.unadvertised.contains(o));
        DeviceInfo {
            standard_version: 100,
            vendor_extension_id: if st.ptp_only {
                0
            } else {
                codes::MTP_VENDOR_EXTENSION_ID
            },
            vendor_extension_version: 100,
            mtp_extension: if st.ptp_only {
                String::new()
            } else if st.android {
                "microsoft.com: 1.0; android.com: 1.0;".into()
            } else {
                "microsoft.com: 1.0;".into()
            },
            operations_supported: ops,
            manufacturer: "Mock".into(),
            model: "MTP device".into(),
            device_version: "1.0".into(),
            ..Default::default()
        }
    }

    /// Common prologue: refuses calls after close, records the call and
    /// applies the advertised/rejected operation sets.
    fn enter(&self, code: u16) -> Result<MutexGuard<'_, State>> {
        let mut st = self.lock();
        if st.closed {
            return Err(MtpError::Closed);
        }
        let name = codes::operation_name(code);
        st.calls.push(name);
        let advertised = Self::advertised(&st).operations_supported.contains(&code);
        if !advertised || st.rejected.contains(&code) {
            return Err(fail(name, response::OPERATION_NOT_SUPPORTED));
        }
        Ok(st)
    }

    fn info_of(obj: &Object) -> ObjectInfo {
        let mut info = obj.info.clone();
        info.storage_id = obj.storage;
        info.parent_object = obj.parent;
        if !info.is_folder() {
            info.compressed_size = u32::try_from(obj.data.len()).unwrap_or(u32::MAX);
        }
        info
    }
}

fn object<'a>(st: &'a mut State, operation: &'static str, handle: u32) -> Result<&'a mut Object> {
    st.objects
        .get_mut(&handle)
        .ok_or_else(|| fail(operation, response::INVALID_OBJECT_HANDLE))
}

impl MtpDevice for MockDevice {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.lock().timeout = Some(timeout);
    }

    fn set_debug(&mut self, flags: DebugFlags) {
        self.lock().debug = flags;
    }

    fn configure(&mut self) -> Result<()> {
        let info = {
            let mut st = self.lock();
            st.configure_calls += 1;
            if st.closed {
                return Err(MtpError::Closed);
            }
            if st.fail_configure {
                return Err(fail("OpenSession", response::GENERAL_ERROR));
            }
            st.session_open = true;
            Self::advertised(&st)
        };
        if !info.has_mtp_extension() {
            return Err(MtpError::Protocol(format!(
                "{} does not advertise the MTP extension",
                self.descriptor
            )));
        }
        self.info = Some(info);
        Ok(())
    }

    fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    fn storage_ids(&mut self) -> Result<Vec<u32>> {
        let st = self.enter(op::GET_STORAGE_IDS)?;
        if st.fail_storage_ids {
            return Err(fail("GetStorageIDs", response::GENERAL_ERROR));
        }
        Ok(st.storages.iter().map(|(id, _)| *id).collect())
    }

    fn storage_info(&mut self, storage_id: u32) -> Result<StorageInfo> {
        let st = self.enter(op::GET_STORAGE_INFO)?;
        st.storages
            .iter()
            .find(|(id, _)| *id == storage_id)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| fail("GetStorageInfo", response::INVALID_STORAGE_ID))
    }

    fn object_handles(&mut self, storage_id: u32, parent: u32) -> Result<Vec<u32>> {
        let st = self.enter(op::GET_OBJECT_HANDLES)?;
        let parent = root_parent(parent);
        Ok(st
            .objects
            .iter()
            .filter(|(_, o)| {
                (storage_id == codes::ROOT_PARENT || o.storage == storage_id) && o.parent == parent
            })
            .map(|(h, _)| *h)
            .collect())
    }

    fn object_info(&mut self, handle: u32) -> Result<ObjectInfo> {
        let mut st = self.enter(op::GET_OBJECT_INFO)?;
        let obj = object(&mut st, "GetObjectInfo", handle)?;
        Ok(Self::info_of(obj))
    }

    fn object_size(&mut self, handle: u32) -> Result<u64> {
        let mut st = self.enter(op::GET_OBJECT_PROP_VALUE)?;
        Ok(object(&mut st, "GetObjectPropValue", handle)?.data.len() as u64)
    }

    fn object_prop_list(&mut self, parent: u32) -> Result<Vec<ObjectProp>> {
        let st = self.enter(op::GET_OBJECT_PROP_LIST)?;
        let parent = root_parent(parent);
        let mut props = Vec::new();
        for (handle, obj) in st.objects.iter().filter(|(_, o)| o.parent == parent) {
            let info = Self::info_of(obj);
            let mut push = |code, value| {
                props.push(ObjectProp {
                    handle: *handle,
                    code,
                    value,
                })
            };
            push(prop::STORAGE_ID, PropValue::Uint(obj.storage as u64));
            push(prop::PARENT_OBJECT, PropValue::Uint(obj.parent as u64));
            push(prop::OBJECT_FORMAT, PropValue::Uint(info.object_format as u64));
            push(prop::OBJECT_FILE_NAME, PropValue::Str(info.filename.clone()));
            push(prop::OBJECT_SIZE, PropValue::Uint(obj.data.len() as u64));
            push(
                prop::DATE_MODIFIED,
                PropValue::Str(info.modification_date.clone()),
            );
        }
        Ok(props)
    }

    fn get_object(&mut self, handle: u32) -> Result<Vec<u8>> {
        let mut st = self.enter(op::GET_OBJECT)?;
        Ok(object(&mut st, "GetObject", handle)?.data.clone())
    }

    fn get_partial_object(&mut self, handle: u32, offset: u32, len: u32) -> Result<Vec<u8>> {
        let mut st = self.enter(op::GET_PARTIAL_OBJECT)?;
        let data = &object(&mut st, "GetPartialObject", handle)?.data;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn get_partial_object_64(&mut self, handle: u32, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut st = self.enter(op::GET_PARTIAL_OBJECT_64)?;
        let data = &object(&mut st, "GetPartialObject64", handle)?.data;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn send_object_info(
        &mut self,
        storage_id: u32,
        parent: u32,
        info: &ObjectInfo,
    ) -> Result<ObjectLocation> {
        let mut st = self.enter(op::SEND_OBJECT_INFO)?;
        let storage = st
            .storages
            .iter()
            .find(|(id, _)| *id == storage_id)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| fail("SendObjectInfo", response::INVALID_STORAGE_ID))?;
        if storage.is_read_only() {
            return Err(fail("SendObjectInfo", response::STORE_READ_ONLY));
        }
        let parent = root_parent(parent);
        if parent != 0 {
            match st.objects.get(&parent) {
                Some(p) if p.info.is_folder() => {}
                _ => return Err(fail("SendObjectInfo", response::INVALID_PARENT_OBJECT)),
            }
        }
        let handle = st.next_handle;
        st.next_handle += 1;
        let mut stored = info.clone();
        if stored.object_format == format::ASSOCIATION {
            stored.compressed_size = 0;
        } else {
            st.pending = Some(handle);
        }
        st.objects.insert(
            handle,
            Object {
                storage: storage_id,
                parent,
                info: stored,
                data: Vec::new(),
            },
        );
        Ok(ObjectLocation {
            storage_id,
            parent,
            handle,
        })
    }

    fn send_object(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.enter(op::SEND_OBJECT)?;
        let handle = st
            .pending
            .take()
            .ok_or_else(|| fail("SendObject", response::GENERAL_ERROR))?;
        object(&mut st, "SendObject", handle)?.data = data.to_vec();
        Ok(())
    }

    fn delete_object(&mut self, handle: u32) -> Result<()> {
        let mut st = self.enter(op::DELETE_OBJECT)?;
        object(&mut st, "DeleteObject", handle)?;
        let mut doomed = vec![handle];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i];
            doomed.extend(
                st.objects
                    .iter()
                    .filter(|(_, o)| o.parent == current)
                    .map(|(h, _)| *h),
            );
            i += 1;
        }
        for h in doomed {
            st.objects.remove(&h);
            st.editing.remove(&h);
        }
        Ok(())
    }

    fn set_object_file_name(&mut self, handle: u32, name: &str) -> Result<()> {
        let mut st = self.enter(op::SET_OBJECT_PROP_VALUE)?;
        object(&mut st, "SetObjectPropValue", handle)?.info.filename = name.to_string();
        Ok(())
    }

    fn move_object(&mut self, handle: u32, storage_id: u32, parent: u32) -> Result<()> {
        let mut st = self.enter(op::MOVE_OBJECT)?;
        let parent = root_parent(parent);
        if parent != 0 && !st.objects.contains_key(&parent) {
            return Err(fail("MoveObject", response::INVALID_PARENT_OBJECT));
        }
        let obj = object(&mut st, "MoveObject", handle)?;
        obj.storage = storage_id;
        obj.parent = parent;
        Ok(())
    }

    fn send_partial_object(&mut self, handle: u32, offset: u64, data: &[u8]) -> Result<()> {
        let mut st = self.enter(op::SEND_PARTIAL_OBJECT)?;
        if !st.editing.contains(&handle) {
            return Err(fail("SendPartialObject", response::GENERAL_ERROR));
        }
        let obj = object(&mut st, "SendPartialObject", handle)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        if obj.data.len() < end {
            obj.data.resize(end, 0);
        }
        obj.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn truncate_object(&mut self, handle: u32, size: u64) -> Result<()> {
        let mut st = self.enter(op::TRUNCATE_OBJECT)?;
        if !st.editing.contains(&handle) {
            return Err(fail("TruncateObject", response::GENERAL_ERROR));
        }
        let obj = object(&mut st, "TruncateObject", handle)?;
        obj.data.resize(usize::try_from(size).unwrap_or(usize::MAX), 0);
        Ok(())
    }

    fn begin_edit_object(&mut self, handle: u32) -> Result<()> {
        let mut st = self.enter(op::BEGIN_EDIT_OBJECT)?;
        object(&mut st, "BeginEditObject", handle)?;
        st.editing.insert(handle);
        Ok(())
    }

    fn end_edit_object(&mut self, handle: u32) -> Result<()> {
        let mut st = self.enter(op::END_EDIT_OBJECT)?;
        if !st.editing.remove(&handle) {
            return Err(fail("EndEditObject", response::GENERAL_ERROR));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut st = self.lock();
        st.close_calls += 1;
        st.session_open = false;
        st.closed = true;
        Ok(())
    }
}

struct MockCandidate {
    device: MockDevice,
    opened: Arc<Mutex<Vec<String>>>,
}

impl Candidate for MockCandidate {
    fn descriptor(&self) -> &str {
        &self.device.descriptor
    }

    fn open(self: Box<Self>) -> Result<Box<dyn MtpDevice>> {
        if self.device.lock().fail_open {
            return Err(MtpError::Io(std::io::Error::from_raw_os_error(libc::EACCES)));
        }
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.device.descriptor.clone());
        Ok(Box::new(self.device))
    }
}

/// A bus with a fixed set of attached [`MockDevice`]s.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    devices: Vec<MockDevice>,
    fail: bool,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockBus {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    /// Enumeration itself fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Descriptors of the devices opened through this bus.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeviceBus for MockBus {
    fn candidates(&self) -> Result<Vec<Box<dyn Candidate>>> {
        if self.fail {
            return Err(MtpError::Io(std::io::Error::from_raw_os_error(libc::EACCES)));
        }
        Ok(self
            .devices
            .iter()
            .map(|d| {
                Box::new(MockCandidate {
                    device: d.clone(),
                    opened: Arc::clone(&self.opened),
                }) as Box<dyn Candidate>
            })
            .collect())
    }
}
