//! Dispatch through a pinned kernel XSKMAP
//!
//! The map is created and pinned by whoever loads the redirect program; this
//! side only opens it by path and writes `queue_id -> socket fd` entries.

use std::{
    ffi::CString,
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
};

use log::debug;
use nix::errno::Errno;

use crate::{
    error::{FrameRingError, Result},
    socket::SocketHandle,
};

use super::DispatchTable;

const BPF_MAP_UPDATE_ELEM: libc::c_long = 2;
const BPF_MAP_DELETE_ELEM: libc::c_long = 3;
const BPF_OBJ_GET: libc::c_long = 7;
const BPF_ANY: u64 = 0;

#[repr(C)]
#[derive(Default)]
struct ObjGetAttr {
    pathname: u64,
    bpf_fd: u32,
    file_flags: u32,
}

#[repr(C)]
#[derive(Default)]
struct MapElemAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    value: u64,
    flags: u64,
}

unsafe fn bpf<T>(cmd: libc::c_long, attr: &mut T) -> std::result::Result<libc::c_long, Errno> {
    let ret = libc::syscall(
        libc::SYS_bpf,
        cmd,
        attr as *mut T as *mut libc::c_void,
        std::mem::size_of::<T>() as libc::c_uint,
    );
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

/// A pinned XSKMAP opened from bpffs
#[derive(Debug)]
pub struct PinnedXskMap {
    path: PathBuf,
    name: String,
    fd: OwnedFd,
}

impl PinnedXskMap {
    /// Open the map pinned at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            FrameRingError::invalid_parameter("map_path", "Path contains a NUL byte")
        })?;

        let mut attr = ObjGetAttr {
            pathname: c_path.as_ptr() as u64,
            ..Default::default()
        };
        let fd = unsafe { bpf(BPF_OBJ_GET, &mut attr) }.map_err(|errno| {
            FrameRingError::platform(format!(
                "Failed to open pinned map {}: {}",
                path.display(),
                errno
            ))
        })?;

        debug!("Opened pinned map {} as fd {}", path.display(), fd);
        Ok(Self {
            name: path.display().to_string(),
            path,
            fd: unsafe { OwnedFd::from_raw_fd(fd as i32) },
        })
    }

    /// Pin path the map was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DispatchTable for PinnedXskMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, queue_id: u32, handle: SocketHandle) -> Result<()> {
        let key = queue_id;
        let value = handle.0 as u32;
        let mut attr = MapElemAttr {
            map_fd: self.fd.as_raw_fd() as u32,
            key: &key as *const u32 as u64,
            value: &value as *const u32 as u64,
            flags: BPF_ANY,
            ..Default::default()
        };
        unsafe { bpf(BPF_MAP_UPDATE_ELEM, &mut attr) }
            .map(|_| ())
            .map_err(|errno| {
                FrameRingError::registration(queue_id, format!("{} update rejected: {}", self.name, errno))
            })
    }

    // The kernel does not expose XSKMAP values to lookups, so the entry is
    // cleared without checking which socket it routes to.
    fn remove(&self, queue_id: u32, _handle: SocketHandle) -> Result<()> {
        let key = queue_id;
        let mut attr = MapElemAttr {
            map_fd: self.fd.as_raw_fd() as u32,
            key: &key as *const u32 as u64,
            ..Default::default()
        };
        match unsafe { bpf(BPF_MAP_DELETE_ELEM, &mut attr) } {
            Ok(_) | Err(Errno::ENOENT) => Ok(()),
            Err(errno) => Err(FrameRingError::registration(
                queue_id,
                format!("{} delete failed: {}", self.name, errno),
            )),
        }
    }
}
