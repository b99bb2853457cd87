//! Mounting the adapter and running the FUSE dispatch loop.
//!
//! Notes:
//! - Only Linux is supported. As root the session mounts directly, otherwise
//!   it goes through fusermount3.
//! - The dispatch stack sits behind [`DispatchStack`] so the lifecycle can be
//!   exercised without a kernel.

use std::future::Future;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use nix::unistd::{geteuid, getgid, getuid};
use rfuse3::raw::{MountHandle, Session};
use tracing::{debug, info};

use crate::config::MountOptions;
use crate::error::MountError;
use crate::fs::MtpFs;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mounts an adapter and hands back its running dispatch loop.
#[async_trait]
pub trait DispatchStack: Send + Sync {
    /// Completes when the filesystem is unmounted.
    type Loop: Future<Output = io::Result<()>> + Unpin + Send;

    async fn mount(
        &self,
        fs: MtpFs,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> io::Result<Self::Loop>;

    /// Unmounts and waits for the loop to finish.
    async fn unmount(&self, running: Self::Loop) -> io::Result<()>;
}

/// The rfuse3 session.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseStack;

fn session_options(options: &MountOptions) -> rfuse3::MountOptions {
    let mut mo = rfuse3::MountOptions::default();
    mo.fs_name("mtpfs")
        .force_readdir_plus(true)
        .uid(getuid().as_raw())
        .gid(getgid().as_raw())
        .allow_other(options.allow_other);
    mo
}

#[async_trait]
impl DispatchStack for FuseStack {
    type Loop = MountHandle;

    async fn mount(
        &self,
        fs: MtpFs,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> io::Result<MountHandle> {
        let session = Session::new(session_options(options));
        if geteuid().is_root() {
            debug!("mounting {} directly", mountpoint.display());
            session.mount(fs, mountpoint).await
        } else {
            debug!("mounting {} through fusermount3", mountpoint.display());
            session.mount_with_unprivileged(fs, mountpoint).await
        }
    }

    async fn unmount(&self, running: MountHandle) -> io::Result<()> {
        running.unmount().await
    }
}

/// Decodes the octal escapes (`\040` for a space) mountinfo uses in paths.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = bytes
                .get(i + 1..i + 4)
                .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
                .and_then(|d| std::str::from_utf8(d).ok())
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points listed in a mountinfo table.
pub fn mount_points(mountinfo: &str) -> impl Iterator<Item = String> + '_ {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(unescape)
}

pub fn is_mounted(mountinfo: &str, path: &Path) -> bool {
    mount_points(mountinfo).any(|m| Path::new(&m) == path)
}

/// The mount point must be an existing directory that nothing is mounted on.
pub fn check_mountpoint(path: &Path) -> Result<(), MountError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        // a FUSE mount whose daemon died
        Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => {
            return Err(MountError::AlreadyMounted(path.to_path_buf()));
        }
        Err(_) => return Err(MountError::Missing(path.to_path_buf())),
    };
    if !meta.is_dir() {
        return Err(MountError::NotADirectory(path.to_path_buf()));
    }
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let table = std::fs::read_to_string(MOUNTINFO).unwrap_or_default();
    if is_mounted(&table, &canonical) {
        return Err(MountError::AlreadyMounted(path.to_path_buf()));
    }
    Ok(())
}

/// How the dispatch loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// Unmounted from outside, e.g. with `fusermount3 -u`.
    Unmounted,
    /// Unmounted by us after a shutdown signal.
    Shutdown,
    /// The dispatch stack reported an error.
    Failed(io::Error),
}

/// Mounts `fs` on `mountpoint` and runs until the filesystem goes away or
/// `shutdown` completes. Errors before the loop starts are returned as
/// [`MountError`]; once mounted, the outcome is a [`LoopExit`].
pub async fn serve<S, F>(
    stack: &S,
    fs: MtpFs,
    mountpoint: &Path,
    options: &MountOptions,
    fs_debug: bool,
    shutdown: F,
) -> Result<LoopExit, MountError>
where
    S: DispatchStack + ?Sized,
    F: Future<Output = ()>,
{
    check_mountpoint(mountpoint)?;
    fs.set_debug(fs_debug);

    let mut running = stack
        .mount(fs, mountpoint, options)
        .await
        .map_err(|source| MountError::Fuse {
            path: mountpoint.to_path_buf(),
            source,
        })?;
    info!("mounted on {}", mountpoint.display());

    let handle = &mut running;
    let exit = tokio::select! {
        res = handle => match res {
            Ok(()) => LoopExit::Unmounted,
            Err(e) => LoopExit::Failed(e),
        },
        _ = shutdown => {
            info!("shutting down, unmounting {}", mountpoint.display());
            match stack.unmount(running).await {
                Ok(()) => LoopExit::Shutdown,
                Err(e) => LoopExit::Failed(e),
            }
        }
    };
    info!("dispatch loop ended: {exit:?}");
    Ok(exit)
}
