//! Open file handles and their write buffers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Debug)]
pub struct OpenFile {
    pub ino: u64,
    pub writable: bool,
    /// Whole object contents, once loaded or written.
    pub buffer: Option<Vec<u8>>,
    /// The buffer differs from the device copy.
    pub dirty: bool,
    /// Object handle with an open in-place edit.
    pub editing: Option<u32>,
}

impl OpenFile {
    pub fn new(ino: u64, writable: bool) -> Self {
        Self {
            ino,
            writable,
            buffer: None,
            dirty: false,
            editing: None,
        }
    }
}

pub type SharedFile = Arc<Mutex<OpenFile>>;

#[derive(Debug)]
pub struct HandleTable {
    next_fh: u64,
    /// fh -> (inode, file)
    files: HashMap<u64, (u64, SharedFile)>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: 1,
            files: HashMap::new(),
        }
    }

    pub fn open(&mut self, ino: u64, writable: bool) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        let file = Arc::new(Mutex::new(OpenFile::new(ino, writable)));
        self.files.insert(fh, (ino, file));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<SharedFile> {
        self.files.get(&fh).map(|(_, f)| Arc::clone(f))
    }

    pub fn release(&mut self, fh: u64) -> Option<SharedFile> {
        self.files.remove(&fh).map(|(_, f)| f)
    }

    /// Open handles on `ino`, other than `except`.
    pub fn for_ino(&self, ino: u64, except: Option<u64>) -> Vec<SharedFile> {
        self.files
            .iter()
            .filter(|(fh, (i, _))| *i == ino && Some(**fh) != except)
            .map(|(_, (_, f))| Arc::clone(f))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(u64, SharedFile)> {
        let mut all: Vec<_> = self.files.drain().map(|(fh, (_, f))| (fh, f)).collect();
        all.sort_by_key(|(fh, _)| *fh);
        all
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Copies `data` into `buf` at `offset`, growing it as needed.
pub fn write_at(buf: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let start = offset as usize;
    let end = start + data.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[start..end].copy_from_slice(data);
}

/// The part of `buf` covered by `[offset, offset + size)`.
pub fn read_at(buf: &[u8], offset: u64, size: u32) -> &[u8] {
    let start = (offset as usize).min(buf.len());
    let end = start.saturating_add(size as usize).min(buf.len());
    &buf[start..end]
}
