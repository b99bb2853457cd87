//! The device as a filesystem tree.
//!
//! The root directory holds one subdirectory per selected storage. Below
//! that, directories are listed from the device the first time they are
//! looked into and cached for the rest of the mount. Every device call goes
//! through the [`DeviceGate`], so requests are serialized on the USB link.
//!
//! Writes take one of two paths. With the Android edit extension the bytes
//! go straight to the device object; without it the whole file is buffered
//! in memory and re-uploaded when the handle is flushed or released.

pub mod capability;
pub mod fuse;
pub mod handle;
pub mod node;
pub mod vfat;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use libmtp::codes::{format, prop};
use libmtp::{MtpError, ObjectInfo, ObjectProp};
use nix::unistd::{getgid, getuid};
use rfuse3::raw::reply::{FileAttr, ReplyStatFs};
use rfuse3::{Errno, FileType, Result as FuseResult, Timestamp};
use tracing::{debug, info, warn};

use crate::config::DeviceFsOptions;
use crate::error::BuildError;
use crate::gate::DeviceGate;
use crate::storage::StorageArea;

use capability::{Capabilities, Extension};
use handle::{HandleTable, OpenFile, SharedFile, read_at, write_at};
use node::{Listed, Node, NodeKind, NodeTable, ROOT_INO};

/// How long the kernel may cache entries and attributes.
pub const TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 4096;

/// Date layout of MTP DateTime strings, without tenths or zone.
const MTP_TIME: &str = "%Y%m%dT%H%M%S";

fn errno(operation: &'static str, e: MtpError) -> Errno {
    debug!(target: "mtpfs::fs", "{operation}: {e}");
    Errno::from(e.errno())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wants_write(flags: u32) -> bool {
    (flags as i32 & libc::O_ACCMODE) != libc::O_RDONLY
}

fn now_stamp() -> String {
    Local::now().format(MTP_TIME).to_string()
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let sign = match zone.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = zone.get(1..5)?;
    let hours: i32 = digits.get(..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parses an MTP DateTime ("YYYYMMDDThhmmss", optionally followed by tenths
/// and a zone). Strings without a zone are local time.
pub fn parse_mtp_time(s: &str) -> Option<SystemTime> {
    let head = s.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(head, MTP_TIME).ok()?;
    let zone = s[15..].trim_start_matches(|c: char| c == '.' || c.is_ascii_digit());
    if zone.starts_with('Z') {
        return Some(SystemTime::from(Utc.from_utc_datetime(&naive)));
    }
    if let Some(offset) = parse_offset(zone) {
        return offset.from_local_datetime(&naive).single().map(SystemTime::from);
    }
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

#[derive(Default)]
struct PropEntry {
    storage: Option<u64>,
    format: Option<u64>,
    name: Option<String>,
    size: Option<u64>,
    modified: Option<String>,
}

/// Folds a property list into one entry per object, keeping the objects of
/// `storage_id`.
fn listed_from_props(props: Vec<ObjectProp>, storage_id: u32) -> Vec<Listed> {
    let mut objects: BTreeMap<u32, PropEntry> = BTreeMap::new();
    for p in props {
        let entry = objects.entry(p.handle).or_default();
        match p.code {
            prop::STORAGE_ID => entry.storage = p.value.as_u64(),
            prop::OBJECT_FORMAT => entry.format = p.value.as_u64(),
            prop::OBJECT_FILE_NAME => entry.name = p.value.as_str().map(str::to_string),
            prop::OBJECT_SIZE => entry.size = p.value.as_u64(),
            prop::DATE_MODIFIED => entry.modified = p.value.as_str().map(str::to_string),
            _ => {}
        }
    }
    objects
        .into_iter()
        .filter(|(_, e)| e.storage.is_none_or(|s| s == u64::from(storage_id)))
        .filter_map(|(handle, e)| {
            let folder = e.format == Some(u64::from(format::ASSOCIATION));
            Some(Listed {
                handle,
                name: e.name?,
                folder,
                size: if folder { 0 } else { e.size.unwrap_or(0) },
                mtime: e
                    .modified
                    .as_deref()
                    .and_then(parse_mtp_time)
                    .unwrap_or(UNIX_EPOCH),
            })
        })
        .collect()
}

struct Inner {
    gate: DeviceGate,
    storages: Vec<StorageArea>,
    options: DeviceFsOptions,
    caps: Capabilities,
    nodes: Mutex<NodeTable>,
    handles: Mutex<HandleTable>,
    uid: u32,
    gid: u32,
    debug: AtomicBool,
    torn_down: AtomicBool,
}

/// Filesystem adapter over one configured device.
#[derive(Clone)]
pub struct MtpFs {
    inner: Arc<Inner>,
}

impl MtpFs {
    /// Builds the tree for `storages`. The device must already be configured,
    /// since the advertised operations decide which extensions get used.
    pub fn build(
        gate: DeviceGate,
        storages: Vec<StorageArea>,
        options: DeviceFsOptions,
    ) -> Result<Self, BuildError> {
        if storages.is_empty() {
            return Err(BuildError::NoStorages);
        }
        let mut seen = HashSet::new();
        for s in &storages {
            if !seen.insert(s.id) {
                return Err(BuildError::DuplicateStorage(s.id));
            }
        }

        let device_info = gate.with(|d| Ok(d.device_info().cloned())).ok().flatten();
        let caps = Capabilities::detect(device_info.as_ref(), options.android);
        // the root is not on the device, so storage names only need to be path-safe
        let names = vfat::expose_all(storages.iter().map(StorageArea::description), false);
        info!("exposing storages: {}", names.join(", "));

        Ok(Self {
            inner: Arc::new(Inner {
                gate,
                storages,
                options,
                caps,
                nodes: Mutex::new(NodeTable::new(&names)),
                handles: Mutex::new(HandleTable::new()),
                uid: getuid().as_raw(),
                gid: getgid().as_raw(),
                debug: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }),
        })
    }

    /// Enables per-request logging.
    pub fn set_debug(&self, on: bool) {
        self.inner.debug.store(on, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.caps
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.handles().len()
    }

    fn nodes(&self) -> MutexGuard<'_, NodeTable> {
        lock(&self.inner.nodes)
    }

    fn handles(&self) -> MutexGuard<'_, HandleTable> {
        lock(&self.inner.handles)
    }

    fn node(&self, ino: u64) -> FuseResult<Node> {
        self.nodes()
            .get(ino)
            .cloned()
            .ok_or_else(|| Errno::from(libc::ENOENT))
    }

    fn file(&self, fh: u64) -> FuseResult<SharedFile> {
        self.handles()
            .get(fh)
            .ok_or_else(|| Errno::from(libc::EBADF))
    }

    fn storage(&self, node: &Node) -> &StorageArea {
        &self.inner.storages[node.storage]
    }

    fn read_only(&self, node: &Node) -> bool {
        node.kind != NodeKind::Root && self.storage(node).read_only()
    }

    /// Whether names below `dir` follow the VFAT rules.
    fn is_vfat(&self, dir: &Node) -> bool {
        dir.kind != NodeKind::Root
            && self.inner.options.removable_vfat
            && self.storage(dir).removable()
    }

    /// Name to store on the device for an entry created in `dir`.
    fn device_name(&self, dir: &Node, name: &str) -> FuseResult<String> {
        let name = if self.is_vfat(dir) {
            vfat::sanitize(name)
        } else {
            name.to_string()
        };
        if vfat::utf16_len(&name) > vfat::MAX_NAME_UNITS {
            return Err(libc::ENAMETOOLONG.into());
        }
        Ok(name)
    }

    fn attr(&self, node: &Node) -> FileAttr {
        let read_only = self.read_only(node);
        let (kind, perm, nlink) = match node.kind {
            NodeKind::File => (
                FileType::RegularFile,
                if read_only { 0o444 } else { 0o644 },
                1,
            ),
            _ => (
                FileType::Directory,
                if read_only { 0o555 } else { 0o755 },
                2,
            ),
        };
        let mtime = Timestamp::from(node.mtime);
        FileAttr {
            ino: node.ino,
            size: node.size,
            blocks: node.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            #[cfg(target_os = "macos")]
            crtime: mtime,
            kind,
            perm,
            nlink,
            uid: self.inner.uid,
            gid: self.inner.gid,
            rdev: 0,
            #[cfg(target_os = "macos")]
            flags: 0,
            blksize: BLOCK_SIZE,
        }
    }

    pub fn attr_of(&self, ino: u64) -> FuseResult<FileAttr> {
        Ok(self.attr(&self.node(ino)?))
    }

    pub fn parent_of(&self, ino: u64) -> u64 {
        self.nodes().get(ino).map_or(ROOT_INO, |n| n.parent)
    }

    fn set_size(&self, ino: u64, size: u64) {
        if let Some(node) = self.nodes().get_mut(ino) {
            node.size = size;
            node.mtime = SystemTime::now();
        }
    }

    fn grow(&self, ino: u64, end: u64) {
        if let Some(node) = self.nodes().get_mut(ino) {
            node.size = node.size.max(end);
            node.mtime = SystemTime::now();
        }
    }

    /// Lists `ino` from the device unless it has been listed already.
    async fn ensure_listed(&self, ino: u64) -> FuseResult<()> {
        let dir = self.node(ino)?;
        if !dir.kind.is_dir() {
            return Err(libc::ENOTDIR.into());
        }
        if dir.children.is_some() {
            return Ok(());
        }
        let mut entries = self.fetch_children(&dir).await?;
        entries.sort_by_key(|e| e.handle);
        let names = vfat::expose_all(entries.iter().map(|e| e.name.as_str()), self.is_vfat(&dir));
        debug!(target: "mtpfs::fs", "listed {} entries under {:?}", entries.len(), dir.name);
        self.nodes().fill(ino, entries, names);
        Ok(())
    }

    async fn fetch_children(&self, dir: &Node) -> FuseResult<Vec<Listed>> {
        let storage_id = self.storage(dir).id;
        let caps = &self.inner.caps;
        if caps.usable(Extension::PropList) {
            // handle 0 with depth 1 lists the storage root
            let parent = dir.handle;
            match self
                .inner
                .gate
                .call(move |d| d.object_prop_list(parent))
                .await
            {
                Ok(props) => {
                    caps.confirm(Extension::PropList);
                    return Ok(listed_from_props(props, storage_id));
                }
                Err(e) if e.is_unsupported() => caps.reject(Extension::PropList),
                Err(e) => return Err(errno("list", e)),
            }
        }

        let parent = dir.object_parent();
        self.inner
            .gate
            .call(move |d| {
                let handles = d.object_handles(storage_id, parent)?;
                let mut listed = Vec::with_capacity(handles.len());
                for handle in handles {
                    let info = d.object_info(handle)?;
                    let folder = info.is_folder();
                    let size = if folder {
                        0
                    } else if info.size_is_exact() {
                        u64::from(info.compressed_size)
                    } else {
                        d.object_size(handle)?
                    };
                    listed.push(Listed {
                        handle,
                        folder,
                        size,
                        mtime: parse_mtp_time(&info.modification_date).unwrap_or(UNIX_EPOCH),
                        name: info.filename,
                    });
                }
                Ok(listed)
            })
            .await
            .map_err(|e| errno("list", e))
    }

    /// Finds `name` in `parent`. A name the listing rewrote also resolves
    /// through the spelling the device stores.
    async fn resolve(&self, parent: u64, name: &str) -> FuseResult<u64> {
        self.ensure_listed(parent).await?;
        self.nodes()
            .find(parent, name)
            .ok_or_else(|| Errno::from(libc::ENOENT))
    }

    pub async fn lookup_name(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
        let ino = self.resolve(parent, name).await?;
        self.attr_of(ino)
    }

    /// Entries of a directory, without "." and "..".
    pub async fn list_dir(&self, ino: u64) -> FuseResult<Vec<(String, FileAttr)>> {
        self.ensure_listed(ino).await?;
        let nodes = self.nodes();
        let children = nodes
            .children(ino)
            .ok_or_else(|| Errno::from(libc::ENOENT))?;
        Ok(children
            .into_iter()
            .map(|n| (n.name.clone(), self.attr(n)))
            .collect())
    }

    pub fn open_dir(&self, ino: u64) -> FuseResult<()> {
        if self.node(ino)?.kind.is_dir() {
            Ok(())
        } else {
            Err(libc::ENOTDIR.into())
        }
    }

    pub fn open_file(&self, ino: u64, flags: u32) -> FuseResult<u64> {
        let node = self.node(ino)?;
        if node.kind.is_dir() {
            return Err(libc::EISDIR.into());
        }
        let writable = wants_write(flags);
        if writable && self.read_only(&node) {
            return Err(libc::EROFS.into());
        }
        Ok(self.handles().open(ino, writable))
    }

    pub async fn read_file(&self, ino: u64, fh: u64, offset: u64, size: u32) -> FuseResult<Bytes> {
        let shared = self.file(fh)?;
        let mut file = shared.lock().await;
        if let Some(buf) = &file.buffer {
            return Ok(Bytes::copy_from_slice(read_at(buf, offset, size)));
        }

        let node = self.node(ino)?;
        if offset >= node.size || size == 0 {
            return Ok(Bytes::new());
        }
        let len = (node.size - offset).min(u64::from(size)) as u32;
        let handle = node.handle;
        let caps = &self.inner.caps;

        if caps.usable(Extension::Partial64) {
            match self
                .inner
                .gate
                .call(move |d| d.get_partial_object_64(handle, offset, len))
                .await
            {
                Ok(data) => {
                    caps.confirm(Extension::Partial64);
                    return Ok(Bytes::from(data));
                }
                Err(e) if e.is_unsupported() => caps.reject(Extension::Partial64),
                Err(e) => return Err(errno("read", e)),
            }
        }

        if offset + u64::from(len) <= u64::from(u32::MAX) {
            let start = offset as u32;
            let data = self
                .inner
                .gate
                .call(move |d| d.get_partial_object(handle, start, len))
                .await
                .map_err(|e| errno("read", e))?;
            return Ok(Bytes::from(data));
        }

        // past 4 GiB the 32-bit offset cannot address the range
        let data = self.load(&node).await?;
        let out = Bytes::copy_from_slice(read_at(&data, offset, size));
        file.buffer = Some(data);
        Ok(out)
    }

    /// Whole contents of a file object.
    async fn load(&self, node: &Node) -> FuseResult<Vec<u8>> {
        if node.handle == 0 || node.size == 0 {
            return Ok(Vec::new());
        }
        let handle = node.handle;
        self.inner
            .gate
            .call(move |d| d.get_object(handle))
            .await
            .map_err(|e| errno("read", e))
    }

    /// Opens an in-place edit for `file` if the device supports one.
    async fn edit_in_place(&self, file: &mut OpenFile, handle: u32) -> FuseResult<bool> {
        if file.editing.is_some() {
            return Ok(true);
        }
        let caps = &self.inner.caps;
        if handle == 0 || !caps.usable(Extension::Edit) {
            return Ok(false);
        }
        match self
            .inner
            .gate
            .call(move |d| d.begin_edit_object(handle))
            .await
        {
            Ok(()) => {
                caps.confirm(Extension::Edit);
                file.editing = Some(handle);
                Ok(true)
            }
            Err(e) if e.is_unsupported() => {
                caps.reject(Extension::Edit);
                Ok(false)
            }
            Err(e) => Err(errno("begin edit", e)),
        }
    }

    async fn end_edit(&self, file: &mut OpenFile) -> FuseResult<()> {
        let Some(handle) = file.editing.take() else {
            return Ok(());
        };
        self.inner
            .gate
            .call(move |d| d.end_edit_object(handle))
            .await
            .map_err(|e| errno("end edit", e))
    }

    pub async fn write_file(&self, ino: u64, fh: u64, offset: u64, data: &[u8]) -> FuseResult<u32> {
        let shared = self.file(fh)?;
        let mut file = shared.lock().await;
        if !file.writable {
            return Err(libc::EBADF.into());
        }
        let node = self.node(ino)?;
        let end = offset + data.len() as u64;

        if file.buffer.is_none() && self.edit_in_place(&mut file, node.handle).await? {
            let handle = node.handle;
            let payload = data.to_vec();
            match self
                .inner
                .gate
                .call(move |d| d.send_partial_object(handle, offset, &payload))
                .await
            {
                Ok(()) => {
                    self.grow(ino, end);
                    return Ok(data.len() as u32);
                }
                Err(e) if e.is_unsupported() => {
                    self.inner.caps.reject(Extension::Edit);
                    if let Err(e) = self.end_edit(&mut file).await {
                        debug!(target: "mtpfs::fs", "ending rejected edit: {e:?}");
                    }
                }
                Err(e) => return Err(errno("write", e)),
            }
        }

        let mut buf = match file.buffer.take() {
            Some(buf) => buf,
            None => self.load(&node).await?,
        };
        write_at(&mut buf, offset, data);
        let size = buf.len() as u64;
        file.buffer = Some(buf);
        file.dirty = true;
        self.set_size(ino, size);
        Ok(data.len() as u32)
    }

    /// Replaces the device object behind `ino` with `data`.
    async fn upload(&self, ino: u64, data: Vec<u8>) -> FuseResult<()> {
        let node = self.node(ino)?;
        let dir = self.node(node.parent)?;
        let storage_id = self.storage(&node).id;
        let parent = dir.object_parent();

        let old = node.handle;
        if old != 0 {
            self.inner
                .gate
                .call(move |d| d.delete_object(old))
                .await
                .map_err(|e| errno("upload", e))?;
            self.nodes().rebind(ino, 0);
        }

        let size = data.len() as u64;
        let info = ObjectInfo::file(&node.original, size, &now_stamp());
        let location = self
            .inner
            .gate
            .call(move |d| {
                let location = d.send_object_info(storage_id, parent, &info)?;
                d.send_object(&data)?;
                Ok(location)
            })
            .await
            .map_err(|e| errno("upload", e))?;
        debug!(
            target: "mtpfs::fs",
            "uploaded {:?} ({size} bytes) as {:#x}", node.name, location.handle
        );
        self.nodes().rebind(ino, location.handle);
        self.set_size(ino, size);
        Ok(())
    }

    /// Pushes buffered data to the device and closes any open edit.
    async fn sync_file(&self, file: &mut OpenFile) -> FuseResult<()> {
        if file.dirty {
            let data = file.buffer.clone().unwrap_or_default();
            self.upload(file.ino, data).await?;
            file.dirty = false;
        }
        self.end_edit(file).await
    }

    pub async fn flush_handle(&self, fh: u64) -> FuseResult<()> {
        let Some(shared) = self.handles().get(fh) else {
            return Ok(());
        };
        let mut file = shared.lock().await;
        self.sync_file(&mut file).await
    }

    pub async fn release_handle(&self, fh: u64) -> FuseResult<()> {
        let Some(shared) = self.handles().release(fh) else {
            return Ok(());
        };
        let mut file = shared.lock().await;
        let result = self.sync_file(&mut file).await;
        if let Err(e) = &result {
            warn!("writing back inode {} failed: {e:?}", file.ino);
        }
        result
    }

    pub async fn truncate(&self, ino: u64, fh: Option<u64>, size: u64) -> FuseResult<()> {
        let node = self.node(ino)?;
        if node.kind.is_dir() {
            return Err(libc::EISDIR.into());
        }
        if self.read_only(&node) {
            return Err(libc::EROFS.into());
        }

        let mut open = self.handles().for_ino(ino, fh);
        if let Some(own) = fh.and_then(|fh| self.handles().get(fh)) {
            open.insert(0, own);
        }
        let mut in_edit = false;
        for shared in &open {
            let mut file = shared.lock().await;
            // a buffer owns the contents until it is written back
            if let Some(buf) = file.buffer.as_mut() {
                buf.resize(size as usize, 0);
                file.dirty = true;
                self.set_size(ino, size);
                return Ok(());
            }
            in_edit |= file.editing.is_some();
        }
        if node.size == size {
            return Ok(());
        }

        let handle = node.handle;
        let caps = &self.inner.caps;
        if handle != 0 && caps.usable(Extension::Edit) {
            let result = self
                .inner
                .gate
                .call(move |d| {
                    if in_edit {
                        return d.truncate_object(handle, size);
                    }
                    d.begin_edit_object(handle)?;
                    let truncated = d.truncate_object(handle, size);
                    let ended = d.end_edit_object(handle);
                    truncated.and(ended)
                })
                .await;
            match result {
                Ok(()) => {
                    caps.confirm(Extension::Edit);
                    self.set_size(ino, size);
                    return Ok(());
                }
                Err(e) if e.is_unsupported() => caps.reject(Extension::Edit),
                Err(e) => return Err(errno("truncate", e)),
            }
        }

        let mut data = self.load(&node).await?;
        data.resize(size as usize, 0);
        self.upload(ino, data).await
    }

    /// Checks that an entry called `name` may be created in `parent` and
    /// returns the directory with the name to store.
    async fn prepare_entry(&self, parent: u64, name: &str) -> FuseResult<(Node, String)> {
        self.ensure_listed(parent).await?;
        let dir = self.node(parent)?;
        if dir.kind == NodeKind::Root {
            return Err(libc::EPERM.into());
        }
        if self.read_only(&dir) {
            return Err(libc::EROFS.into());
        }
        let name = self.device_name(&dir, name)?;
        if self.nodes().child(parent, &name).is_some() {
            return Err(libc::EEXIST.into());
        }
        Ok((dir, name))
    }

    pub async fn create_file(
        &self,
        parent: u64,
        name: &str,
        flags: u32,
    ) -> FuseResult<(FileAttr, u64)> {
        let (dir, name) = self.prepare_entry(parent, name).await?;
        let storage_id = self.storage(&dir).id;
        let object_parent = dir.object_parent();
        let info = ObjectInfo::file(&name, 0, &now_stamp());
        let location = self
            .inner
            .gate
            .call(move |d| {
                let location = d.send_object_info(storage_id, object_parent, &info)?;
                d.send_object(&[])?;
                Ok(location)
            })
            .await
            .map_err(|e| errno("create", e))?;

        let ino = self.nodes().insert(Node {
            ino: 0,
            parent,
            original: name.clone(),
            name,
            kind: NodeKind::File,
            storage: dir.storage,
            handle: location.handle,
            size: 0,
            mtime: SystemTime::now(),
            children: None,
        });
        let fh = self.handles().open(ino, wants_write(flags));
        Ok((self.attr_of(ino)?, fh))
    }

    pub async fn make_dir(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
        let (dir, name) = self.prepare_entry(parent, name).await?;
        let storage_id = self.storage(&dir).id;
        let object_parent = dir.object_parent();
        let info = ObjectInfo::folder(&name, &now_stamp());
        let location = self
            .inner
            .gate
            .call(move |d| d.send_object_info(storage_id, object_parent, &info))
            .await
            .map_err(|e| errno("mkdir", e))?;

        let ino = self.nodes().insert(Node {
            ino: 0,
            parent,
            original: name.clone(),
            name,
            kind: NodeKind::Folder,
            storage: dir.storage,
            handle: location.handle,
            size: 0,
            mtime: SystemTime::now(),
            children: Some(BTreeMap::new()),
        });
        self.attr_of(ino)
    }

    /// Drops pending writes on `ino` so a later release does not bring a
    /// deleted object back.
    async fn forget_writes(&self, ino: u64) {
        let open = self.handles().for_ino(ino, None);
        for shared in open {
            let mut file = shared.lock().await;
            file.buffer = None;
            file.dirty = false;
            file.editing = None;
        }
    }

    async fn delete(&self, node: &Node, operation: &'static str) -> FuseResult<()> {
        let handle = node.handle;
        if handle != 0 {
            self.inner
                .gate
                .call(move |d| d.delete_object(handle))
                .await
                .map_err(|e| errno(operation, e))?;
        }
        self.nodes().remove(node.ino);
        self.forget_writes(node.ino).await;
        Ok(())
    }

    pub async fn remove_file(&self, parent: u64, name: &str) -> FuseResult<()> {
        let ino = self.resolve(parent, name).await?;
        let node = self.node(ino)?;
        if node.kind.is_dir() {
            return Err(libc::EISDIR.into());
        }
        if self.read_only(&node) {
            return Err(libc::EROFS.into());
        }
        self.delete(&node, "unlink").await
    }

    pub async fn remove_dir(&self, parent: u64, name: &str) -> FuseResult<()> {
        let ino = self.resolve(parent, name).await?;
        let node = self.node(ino)?;
        match node.kind {
            NodeKind::File => return Err(libc::ENOTDIR.into()),
            NodeKind::Root | NodeKind::Storage => return Err(libc::EPERM.into()),
            NodeKind::Folder => {}
        }
        if self.read_only(&node) {
            return Err(libc::EROFS.into());
        }
        self.ensure_listed(ino).await?;
        if self.nodes().children(ino).is_some_and(|c| !c.is_empty()) {
            return Err(libc::ENOTEMPTY.into());
        }
        self.delete(&node, "rmdir").await
    }

    fn is_ancestor(&self, ancestor: u64, mut ino: u64) -> bool {
        let nodes = self.nodes();
        loop {
            if ino == ancestor {
                return true;
            }
            match nodes.get(ino) {
                Some(n) if n.ino != ROOT_INO => ino = n.parent,
                _ => return false,
            }
        }
    }

    /// Removes the entry a rename is about to replace.
    async fn replace_target(&self, source: &Node, target: u64) -> FuseResult<()> {
        let victim = self.node(target)?;
        match (source.kind.is_dir(), victim.kind.is_dir()) {
            (false, true) => return Err(libc::EISDIR.into()),
            (true, false) => return Err(libc::ENOTDIR.into()),
            _ => {}
        }
        if victim.kind.is_dir() {
            self.ensure_listed(target).await?;
            if self.nodes().children(target).is_some_and(|c| !c.is_empty()) {
                return Err(libc::ENOTEMPTY.into());
            }
        }
        self.delete(&victim, "rename").await
    }

    pub async fn rename_entry(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> FuseResult<()> {
        let ino = self.resolve(parent, name).await?;
        let node = self.node(ino)?;
        if matches!(node.kind, NodeKind::Root | NodeKind::Storage) {
            return Err(libc::EPERM.into());
        }
        self.ensure_listed(new_parent).await?;
        let dst = self.node(new_parent)?;
        if dst.kind == NodeKind::Root {
            return Err(libc::EPERM.into());
        }
        if self.read_only(&node) || self.read_only(&dst) {
            return Err(libc::EROFS.into());
        }
        if node.kind.is_dir() && self.is_ancestor(ino, new_parent) {
            return Err(libc::EINVAL.into());
        }

        let target = self.device_name(&dst, new_name)?;
        // the entry the user named is replaced; one that merely shares the
        // rewritten name is not
        let named = self.nodes().find(new_parent, new_name);
        let taken = self.nodes().child(new_parent, &target);
        if taken.is_some_and(|t| t != ino && Some(t) != named) {
            return Err(libc::EEXIST.into());
        }
        if let Some(existing) = named {
            if existing == ino {
                return Ok(());
            }
            self.replace_target(&node, existing).await?;
        }

        let handle = node.handle;
        if new_parent != parent {
            let storage_id = self.storage(&dst).id;
            let object_parent = dst.object_parent();
            match self
                .inner
                .gate
                .call(move |d| d.move_object(handle, storage_id, object_parent))
                .await
            {
                Ok(()) => {}
                // lets `mv` fall back to copy and delete
                Err(e) if e.is_unsupported() => return Err(libc::EXDEV.into()),
                Err(e) => return Err(errno("rename", e)),
            }
        }
        if target != node.original {
            let name = target.clone();
            self.inner
                .gate
                .call(move |d| d.set_object_file_name(handle, &name))
                .await
                .map_err(|e| errno("rename", e))?;
        }

        let mut nodes = self.nodes();
        nodes.rename(ino, new_parent, target);
        if dst.storage != node.storage {
            nodes.set_storage(ino, dst.storage);
        }
        Ok(())
    }

    /// Space figures for the storage holding `ino`, or the sum over all
    /// storages at the root. Falls back to the figures read at startup when
    /// the device does not answer.
    pub async fn stat_fs(&self, ino: u64) -> FuseResult<ReplyStatFs> {
        let node = self.node(ino)?;
        let indices: Vec<usize> = if node.kind == NodeKind::Root {
            (0..self.inner.storages.len()).collect()
        } else {
            vec![node.storage]
        };

        let (mut capacity, mut free, mut objects) = (0u64, 0u64, 0u64);
        for index in indices {
            let cached = &self.inner.storages[index];
            let id = cached.id;
            let info = match self.inner.gate.call(move |d| d.storage_info(id)).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(target: "mtpfs::fs", "storage info for {id:#010x}: {e}");
                    cached.info.clone()
                }
            };
            capacity += info.max_capacity;
            free += info.free_space_in_bytes;
            objects += u64::from(info.free_space_in_objects);
        }

        let bsize = u64::from(BLOCK_SIZE);
        Ok(ReplyStatFs {
            blocks: capacity / bsize,
            bfree: free / bsize,
            bavail: free / bsize,
            files: 0,
            ffree: objects,
            bsize: BLOCK_SIZE,
            namelen: vfat::MAX_NAME_UNITS as u32,
            frsize: BLOCK_SIZE,
        })
    }

    /// Writes back every open handle. Runs once, however often it is called;
    /// returns false on repeated calls.
    pub async fn on_unmount(&self) -> bool {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        let open = self.handles().drain();
        let count = open.len();
        for (fh, shared) in open {
            let mut file = shared.lock().await;
            if let Err(e) = self.sync_file(&mut file).await {
                warn!("writing back handle {fh} failed: {e:?}");
            }
        }
        info!("filesystem torn down, {count} open handle(s) written back");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use libmtp::MtpDevice;
    use libmtp::codes::op;
    use libmtp::mock::MockDevice;

    const INTERNAL: u32 = 0x0001_0001;
    const SD: u32 = 0x0002_0001;

    fn phone() -> MockDevice {
        MockDevice::new("Mock Phone")
            .with_storage(INTERNAL, MockDevice::storage("Internal Storage", false))
            .with_storage(SD, MockDevice::storage("SD Card", true))
    }

    fn mount(dev: &MockDevice, options: DeviceFsOptions) -> MtpFs {
        let mut configured = dev.clone();
        configured.configure().unwrap();
        let storages = vec![
            StorageArea {
                id: INTERNAL,
                info: MockDevice::storage("Internal Storage", false),
            },
            StorageArea {
                id: SD,
                info: MockDevice::storage("SD Card", true),
            },
        ];
        MtpFs::build(DeviceGate::new(Box::new(configured)), storages, options).unwrap()
    }

    async fn storage_ino(fs: &MtpFs, name: &str) -> u64 {
        fs.lookup_name(ROOT_INO, name).await.unwrap().ino
    }

    async fn names(fs: &MtpFs, ino: u64) -> Vec<String> {
        fs.list_dir(ino)
            .await
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect()
    }

    #[test]
    fn mtp_times() {
        let utc = parse_mtp_time("20240102T030405Z").unwrap();
        let expected = SystemTime::from(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(utc, expected);

        let shifted = parse_mtp_time("20240102T050405.0+0200").unwrap();
        assert_eq!(shifted, expected);

        assert!(parse_mtp_time("20240102T0304").is_none());
        assert!(parse_mtp_time("").is_none());
        assert!(parse_mtp_time("garbage-garbage-").is_none());
    }

    #[test]
    fn props_fold_into_entries() {
        use libmtp::PropValue;
        let p = |handle, code, value| ObjectProp {
            handle,
            code,
            value,
        };
        let props = vec![
            p(3, prop::STORAGE_ID, PropValue::Uint(u64::from(INTERNAL))),
            p(3, prop::OBJECT_FILE_NAME, PropValue::Str("b.txt".into())),
            p(3, prop::OBJECT_SIZE, PropValue::Uint(7)),
            p(2, prop::STORAGE_ID, PropValue::Uint(u64::from(INTERNAL))),
            p(2, prop::OBJECT_FORMAT, PropValue::Uint(u64::from(format::ASSOCIATION))),
            p(2, prop::OBJECT_FILE_NAME, PropValue::Str("DCIM".into())),
            p(4, prop::STORAGE_ID, PropValue::Uint(u64::from(SD))),
            p(4, prop::OBJECT_FILE_NAME, PropValue::Str("other".into())),
            p(5, prop::OBJECT_SIZE, PropValue::Uint(1)),
        ];
        let listed = listed_from_props(props, INTERNAL);
        let summary: Vec<(u32, &str, bool, u64)> = listed
            .iter()
            .map(|l| (l.handle, l.name.as_str(), l.folder, l.size))
            .collect();
        assert_eq!(summary, vec![(2, "DCIM", true, 0), (3, "b.txt", false, 7)]);
    }

    #[test]
    fn build_rejects_bad_storage_sets() {
        let dev = phone();
        let gate = DeviceGate::new(Box::new(dev.clone()));
        assert!(matches!(
            MtpFs::build(gate.clone(), Vec::new(), DeviceFsOptions::default()),
            Err(BuildError::NoStorages)
        ));
        let area = StorageArea {
            id: INTERNAL,
            info: MockDevice::storage("Internal Storage", false),
        };
        assert!(matches!(
            MtpFs::build(gate, vec![area.clone(), area], DeviceFsOptions::default()),
            Err(BuildError::DuplicateStorage(INTERNAL))
        ));
    }

    #[tokio::test]
    async fn root_lists_storages() {
        let fs = mount(&phone(), DeviceFsOptions::default());
        assert_eq!(names(&fs, ROOT_INO).await, vec!["Internal Storage", "SD Card"]);
        let attr = fs.attr_of(ROOT_INO).unwrap();
        assert_eq!(attr.kind, FileType::Directory);
    }

    #[tokio::test]
    async fn removable_names_are_rewritten() {
        let dev = phone();
        dev.add_file(SD, 0, "a:b.txt", b"1");
        dev.add_file(SD, 0, "a?b.txt", b"2");
        dev.add_file(INTERNAL, 0, "a:b.txt", b"3");
        let fs = mount(&dev, DeviceFsOptions::default());

        let sd = storage_ino(&fs, "SD Card").await;
        assert_eq!(names(&fs, sd).await, vec!["a_b.txt", "a_b~1.txt"]);
        let internal = storage_ino(&fs, "Internal Storage").await;
        assert_eq!(names(&fs, internal).await, vec!["a:b.txt"]);

        // the original spelling still resolves on the VFAT storage
        assert!(fs.lookup_name(sd, "a:b.txt").await.is_ok());
    }

    #[tokio::test]
    async fn original_spellings_reach_their_own_object() {
        let dev = phone();
        let first = dev.add_file(SD, 0, "a:b.txt", b"1");
        let second = dev.add_file(SD, 0, "a?b.txt", b"2");
        let third = dev.add_file(SD, 0, "a*b.txt", b"3");
        let fs = mount(&dev, DeviceFsOptions::default());
        let sd = storage_ino(&fs, "SD Card").await;

        let exposed = fs.lookup_name(sd, "a_b~1.txt").await.unwrap();
        let by_original = fs.lookup_name(sd, "a?b.txt").await.unwrap();
        assert_eq!(by_original.ino, exposed.ino);

        fs.remove_file(sd, "a?b.txt").await.unwrap();
        assert!(dev.name_of(second).is_none());
        assert_eq!(dev.name_of(first).as_deref(), Some("a:b.txt"));
        assert_eq!(names(&fs, sd).await, vec!["a_b.txt", "a_b~2.txt"]);

        fs.rename_entry(sd, "a*b.txt", sd, "c.txt").await.unwrap();
        assert_eq!(dev.name_of(third).as_deref(), Some("c.txt"));
        assert_eq!(dev.name_of(first).as_deref(), Some("a:b.txt"));
        assert_eq!(names(&fs, sd).await, vec!["a_b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn rename_onto_a_shared_rewritten_name_is_refused() {
        let dev = phone();
        let first = dev.add_file(SD, 0, "a:b.txt", b"1");
        dev.add_file(SD, 0, "c.txt", b"2");
        let fs = mount(&dev, DeviceFsOptions::default());
        let sd = storage_ino(&fs, "SD Card").await;

        // "a|b.txt" is stored as "a_b.txt", which another object shows as
        assert_eq!(
            fs.rename_entry(sd, "c.txt", sd, "a|b.txt")
                .await
                .unwrap_err(),
            Errno::from(libc::EEXIST)
        );
        assert_eq!(dev.name_of(first).as_deref(), Some("a:b.txt"));
    }

    #[tokio::test]
    async fn names_longer_than_a_ptp_string() {
        let dev = phone();
        let fs = mount(&dev, DeviceFsOptions::default());
        let long = "n".repeat(vfat::MAX_NAME_UNITS + 1);
        let cut = &long[..vfat::MAX_NAME_UNITS];

        let internal = storage_ino(&fs, "Internal Storage").await;
        assert_eq!(
            fs.make_dir(internal, &long).await.unwrap_err(),
            Errno::from(libc::ENAMETOOLONG)
        );
        assert_eq!(
            fs.create_file(internal, &long, libc::O_WRONLY as u32)
                .await
                .unwrap_err(),
            Errno::from(libc::ENAMETOOLONG)
        );

        let sd = storage_ino(&fs, "SD Card").await;
        fs.make_dir(sd, &long).await.unwrap();
        assert!(dev.find(SD, 0, cut).is_some());
        assert_eq!(names(&fs, sd).await, vec![cut.to_string()]);
    }

    #[tokio::test]
    async fn storage_directories_are_only_made_path_safe() {
        let mut configured = phone();
        configured.configure().unwrap();
        let storages = vec![
            StorageArea {
                id: INTERNAL,
                info: MockDevice::storage("Phone: Main", false),
            },
            StorageArea {
                id: SD,
                info: MockDevice::storage("Card/Slot?", true),
            },
        ];
        let fs = MtpFs::build(
            DeviceGate::new(Box::new(configured)),
            storages,
            DeviceFsOptions::default(),
        )
        .unwrap();
        assert_eq!(names(&fs, ROOT_INO).await, vec!["Card_Slot?", "Phone: Main"]);
    }

    #[tokio::test]
    async fn vfat_rewriting_can_be_turned_off() {
        let dev = phone();
        dev.add_file(SD, 0, "a:b.txt", b"1");
        let fs = mount(
            &dev,
            DeviceFsOptions {
                removable_vfat: false,
                android: true,
            },
        );
        let sd = storage_ino(&fs, "SD Card").await;
        assert_eq!(names(&fs, sd).await, vec!["a:b.txt"]);
    }

    #[tokio::test]
    async fn listing_falls_back_when_prop_list_is_rejected() {
        let dev = phone().rejecting(op::GET_OBJECT_PROP_LIST);
        let dcim = dev.add_folder(INTERNAL, 0, "DCIM");
        dev.add_file(INTERNAL, dcim, "p.jpg", b"jpeg");
        let fs = mount(&dev, DeviceFsOptions::default());

        let internal = storage_ino(&fs, "Internal Storage").await;
        let dcim_ino = fs.lookup_name(internal, "DCIM").await.unwrap().ino;
        let listed = fs.list_dir(dcim_ino).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.size, 4);
        assert!(!fs.capabilities().usable(Extension::PropList));
        assert!(dev.calls().contains(&"GetObjectHandles"));
    }

    #[tokio::test]
    async fn reads_use_partial_transfers() {
        let dev = phone();
        dev.add_file(INTERNAL, 0, "hello.txt", b"hello world");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let ino = fs.lookup_name(internal, "hello.txt").await.unwrap().ino;
        let fh = fs.open_file(ino, libc::O_RDONLY as u32).unwrap();

        let data = fs.read_file(ino, fh, 6, 100).await.unwrap();
        assert_eq!(&data[..], b"world");
        assert!(dev.calls().contains(&"GetPartialObject64"));
        assert!(fs.read_file(ino, fh, 50, 10).await.unwrap().is_empty());
        fs.release_handle(fh).await.unwrap();
    }

    #[tokio::test]
    async fn reads_without_android_use_32_bit_partials() {
        let dev = phone().with_android(false);
        dev.add_file(INTERNAL, 0, "hello.txt", b"hello world");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let ino = fs.lookup_name(internal, "hello.txt").await.unwrap().ino;
        let fh = fs.open_file(ino, libc::O_RDONLY as u32).unwrap();
        assert_eq!(&fs.read_file(ino, fh, 0, 5).await.unwrap()[..], b"hello");
        assert!(dev.calls().contains(&"GetPartialObject"));
        assert!(!dev.calls().contains(&"GetPartialObject64"));
    }

    #[tokio::test]
    async fn buffered_write_uploads_on_release() {
        let dev = phone().with_android(false);
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;

        let (attr, fh) = fs
            .create_file(internal, "notes.txt", libc::O_WRONLY as u32)
            .await
            .unwrap();
        assert_eq!(fs.write_file(attr.ino, fh, 0, b"draft").await.unwrap(), 5);
        assert_eq!(fs.attr_of(attr.ino).unwrap().size, 5);
        fs.release_handle(fh).await.unwrap();

        let handle = dev.find(INTERNAL, 0, "notes.txt").unwrap();
        assert_eq!(dev.contents(handle).unwrap(), b"draft");
        assert_eq!(fs.open_handles(), 0);
    }

    #[tokio::test]
    async fn edits_go_straight_to_the_device() {
        let dev = phone();
        let h = dev.add_file(INTERNAL, 0, "log.txt", b"0123456789");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let ino = fs.lookup_name(internal, "log.txt").await.unwrap().ino;

        let fh = fs.open_file(ino, libc::O_RDWR as u32).unwrap();
        fs.write_file(ino, fh, 8, b"ABCD").await.unwrap();
        assert!(dev.is_editing(h));
        assert_eq!(dev.contents(h).unwrap(), b"01234567ABCD");
        assert_eq!(fs.attr_of(ino).unwrap().size, 12);

        fs.release_handle(fh).await.unwrap();
        assert!(!dev.is_editing(h));
        // same object, nothing re-uploaded
        assert_eq!(dev.find(INTERNAL, 0, "log.txt"), Some(h));
    }

    #[tokio::test]
    async fn truncate_in_place_and_by_upload() {
        let dev = phone();
        let h = dev.add_file(INTERNAL, 0, "a.bin", b"abcdef");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let ino = fs.lookup_name(internal, "a.bin").await.unwrap().ino;
        fs.truncate(ino, None, 2).await.unwrap();
        assert_eq!(dev.contents(h).unwrap(), b"ab");

        let plain = phone().with_android(false);
        plain.add_file(INTERNAL, 0, "a.bin", b"abcdef");
        let fs = mount(&plain, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let ino = fs.lookup_name(internal, "a.bin").await.unwrap().ino;
        fs.truncate(ino, None, 3).await.unwrap();
        let h = plain.find(INTERNAL, 0, "a.bin").unwrap();
        assert_eq!(plain.contents(h).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn mkdir_rmdir_and_unlink() {
        let dev = phone();
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;

        let dir = fs.make_dir(internal, "Music").await.unwrap();
        assert_eq!(dir.kind, FileType::Directory);
        assert_eq!(
            fs.make_dir(internal, "Music").await.unwrap_err(),
            Errno::from(libc::EEXIST)
        );
        let (file, fh) = fs
            .create_file(dir.ino, "a.mp3", libc::O_WRONLY as u32)
            .await
            .unwrap();
        fs.release_handle(fh).await.unwrap();
        assert_eq!(file.size, 0);

        assert_eq!(
            fs.remove_dir(internal, "Music").await.unwrap_err(),
            Errno::from(libc::ENOTEMPTY)
        );
        fs.remove_file(dir.ino, "a.mp3").await.unwrap();
        fs.remove_dir(internal, "Music").await.unwrap();
        assert!(dev.find(INTERNAL, 0, "Music").is_none());
        assert_eq!(
            fs.lookup_name(internal, "Music").await.unwrap_err(),
            Errno::from(libc::ENOENT)
        );
    }

    #[tokio::test]
    async fn storages_cannot_be_removed_or_renamed() {
        let fs = mount(&phone(), DeviceFsOptions::default());
        assert_eq!(
            fs.remove_dir(ROOT_INO, "SD Card").await.unwrap_err(),
            Errno::from(libc::EPERM)
        );
        assert_eq!(
            fs.rename_entry(ROOT_INO, "SD Card", ROOT_INO, "Card")
                .await
                .unwrap_err(),
            Errno::from(libc::EPERM)
        );
        assert_eq!(
            fs.make_dir(ROOT_INO, "new").await.unwrap_err(),
            Errno::from(libc::EPERM)
        );
    }

    #[tokio::test]
    async fn rename_within_and_across_directories() {
        let dev = phone();
        let music = dev.add_folder(INTERNAL, 0, "Music");
        let song = dev.add_file(INTERNAL, 0, "song.mp3", b"la");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let music_ino = fs.lookup_name(internal, "Music").await.unwrap().ino;

        fs.rename_entry(internal, "song.mp3", internal, "tune.mp3")
            .await
            .unwrap();
        assert_eq!(dev.name_of(song).as_deref(), Some("tune.mp3"));

        fs.rename_entry(internal, "tune.mp3", music_ino, "tune.mp3")
            .await
            .unwrap();
        assert_eq!(dev.parent_of(song), Some(music));
        assert_eq!(names(&fs, music_ino).await, vec!["tune.mp3"]);
    }

    #[tokio::test]
    async fn rename_without_move_support_is_cross_device() {
        let dev = phone().rejecting(op::MOVE_OBJECT);
        dev.add_folder(INTERNAL, 0, "Music");
        dev.add_file(INTERNAL, 0, "song.mp3", b"la");
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let music = fs.lookup_name(internal, "Music").await.unwrap().ino;
        assert_eq!(
            fs.rename_entry(internal, "song.mp3", music, "song.mp3")
                .await
                .unwrap_err(),
            Errno::from(libc::EXDEV)
        );
    }

    #[tokio::test]
    async fn statfs_reports_storage_space() {
        let fs = mount(&phone(), DeviceFsOptions::default());
        let one = fs.stat_fs(storage_ino(&fs, "SD Card").await).await.unwrap();
        let all = fs.stat_fs(ROOT_INO).await.unwrap();
        assert!(one.blocks > 0);
        assert_eq!(all.blocks, one.blocks * 2);
        assert_eq!(all.bsize, BLOCK_SIZE);
    }

    #[tokio::test]
    async fn unmount_writes_back_once() {
        let dev = phone().with_android(false);
        let fs = mount(&dev, DeviceFsOptions::default());
        let internal = storage_ino(&fs, "Internal Storage").await;
        let (attr, fh) = fs
            .create_file(internal, "open.txt", libc::O_WRONLY as u32)
            .await
            .unwrap();
        fs.write_file(attr.ino, fh, 0, b"pending").await.unwrap();

        assert!(fs.on_unmount().await);
        assert!(!fs.on_unmount().await);
        assert!(fs.is_torn_down());
        let h = dev.find(INTERNAL, 0, "open.txt").unwrap();
        assert_eq!(dev.contents(h).unwrap(), b"pending");
    }
}
