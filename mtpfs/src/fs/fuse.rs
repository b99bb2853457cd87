//! FUSE request handling.
//!
//! Translates kernel requests into [`MtpFs`] operations. Per-request logging
//! is switched on with `--fs-debug`.

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, ReplyAttr, ReplyCreated, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use rfuse3::{FileType, Result as FuseResult, SetAttr};
use tracing::info;

use super::{MtpFs, TTL};

/// Largest write the kernel hands over in one request.
const MAX_WRITE: u32 = 1024 * 1024;

macro_rules! trace_req {
    ($fs:expr, $($arg:tt)+) => {
        if $fs.debug_enabled() {
            tracing::debug!(target: "mtpfs::fs", $($arg)+);
        }
    };
}

fn utf8(name: &OsStr) -> FuseResult<&str> {
    name.to_str().ok_or_else(|| libc::EINVAL.into())
}

impl Filesystem for MtpFs {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(MAX_WRITE).ok_or(libc::EINVAL)?;
        info!("FUSE session initialized");
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        self.on_unmount().await;
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        trace_req!(self, "lookup parent={parent} name={name:?}");
        let attr = self.lookup_name(parent, utf8(name)?).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr,
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        trace_req!(self, "getattr ino={ino}");
        Ok(ReplyAttr {
            ttl: TTL,
            attr: self.attr_of(ino)?,
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        trace_req!(self, "setattr ino={ino} size={:?}", set_attr.size);
        // only the size can be changed; the device keeps its own times and modes
        if let Some(size) = set_attr.size {
            self.truncate(ino, fh, size).await?;
        }
        Ok(ReplyAttr {
            ttl: TTL,
            attr: self.attr_of(ino)?,
        })
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        trace_req!(self, "open ino={ino} flags={flags:#x}");
        let fh = self.open_file(ino, flags)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        trace_req!(self, "opendir ino={ino}");
        self.open_dir(ino)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        trace_req!(self, "read ino={ino} fh={fh} offset={offset} size={size}");
        let data: Bytes = self.read_file(ino, fh, offset, size).await?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        trace_req!(self, "write ino={ino} fh={fh} offset={offset} len={}", data.len());
        let written = self.write_file(ino, fh, offset, data).await?;
        Ok(ReplyWrite { written })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        trace_req!(self, "readdir ino={ino} offset={offset}");
        let children = self.list_dir(ino).await?;

        let mut all: Vec<DirectoryEntry> = Vec::with_capacity(children.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: self.parent_of(ino),
            kind: FileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, (name, attr)) in children.into_iter().enumerate() {
            all.push(DirectoryEntry {
                inode: attr.ino,
                kind: attr.kind,
                name: OsString::from(name),
                offset: (i as i64) + 3,
            });
        }

        let start = if offset <= 0 { 0 } else { offset as usize };
        let slice = all.into_iter().skip(start).map(Ok).collect::<Vec<_>>();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(slice));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        trace_req!(self, "readdirplus ino={ino} offset={offset}");
        let children = self.list_dir(ino).await?;
        let parent = self.parent_of(ino);

        let mut all: Vec<DirectoryEntryPlus> = Vec::with_capacity(children.len() + 2);
        for (offset, name, inode) in [(1, ".", ino), (2, "..", parent)] {
            all.push(DirectoryEntryPlus {
                inode,
                generation: 0,
                kind: FileType::Directory,
                name: OsString::from(name),
                offset,
                attr: self.attr_of(inode)?,
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }
        for (i, (name, attr)) in children.into_iter().enumerate() {
            all.push(DirectoryEntryPlus {
                inode: attr.ino,
                generation: 0,
                kind: attr.kind,
                name: OsString::from(name),
                offset: (i as i64) + 3,
                attr,
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }

        let slice = all
            .into_iter()
            .skip(offset as usize)
            .map(Ok)
            .collect::<Vec<_>>();
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(slice));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn statfs(&self, _req: Request, ino: u64) -> FuseResult<ReplyStatFs> {
        trace_req!(self, "statfs ino={ino}");
        self.stat_fs(ino).await
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        trace_req!(self, "mkdir parent={parent} name={name:?}");
        let attr = self.make_dir(parent, utf8(name)?).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr,
            generation: 0,
        })
    }

    async fn create(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        trace_req!(self, "create parent={parent} name={name:?} flags={flags:#x}");
        let (attr, fh) = self.create_file(parent, utf8(name)?, flags).await?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr,
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        trace_req!(self, "unlink parent={parent} name={name:?}");
        self.remove_file(parent, utf8(name)?).await
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        trace_req!(self, "rmdir parent={parent} name={name:?}");
        self.remove_dir(parent, utf8(name)?).await
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        trace_req!(
            self,
            "rename parent={parent} name={name:?} new_parent={new_parent} new_name={new_name:?}"
        );
        self.rename_entry(parent, utf8(name)?, new_parent, utf8(new_name)?)
            .await
    }

    async fn release(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        trace_req!(self, "release ino={inode} fh={fh}");
        self.release_handle(fh).await
    }

    async fn flush(&self, _req: Request, inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        trace_req!(self, "flush ino={inode} fh={fh}");
        self.flush_handle(fh).await
    }

    async fn fsync(&self, _req: Request, inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        trace_req!(self, "fsync ino={inode} fh={fh}");
        self.flush_handle(fh).await
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}
