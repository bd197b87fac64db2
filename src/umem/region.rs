//! Page-aligned memory region backing the frame pool

use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    path::Path,
    ptr::NonNull,
};

use memmap2::{MmapMut, MmapOptions};
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::{ftruncate, sysconf, SysconfVar},
};

use crate::{
    config::BackingType,
    error::{FrameRingError, Result},
};

const FALLBACK_PAGE_SIZE: usize = 4096;

/// System page size
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// A page-aligned mapping that owns its backing storage
#[derive(Debug)]
pub struct FrameRegion {
    /// Memory mapping; unmapped on drop
    mmap: MmapMut,
    /// Base pointer captured at map time
    base: NonNull<u8>,
    /// Backing file for file and memfd regions
    backing_fd: Option<OwnedFd>,
    /// Backing kind
    backing: BackingType,
}

impl FrameRegion {
    /// Map `size` bytes of page-aligned memory
    pub fn new(size: usize, backing: &BackingType) -> Result<Self> {
        if size == 0 {
            return Err(FrameRingError::allocation("Region size must be greater than 0"));
        }

        let (mut mmap, backing_fd) = match backing {
            BackingType::Anonymous => {
                let mmap = MmapOptions::new()
                    .len(size)
                    .map_anon()
                    .map_err(|e| FrameRingError::allocation(format!("Anonymous mapping failed: {}", e)))?;
                (mmap, None)
            }
            #[cfg(target_os = "linux")]
            BackingType::MemFd => {
                let fd = Self::create_memfd(size)?;
                let mmap = Self::map_fd(&fd, size)?;
                (mmap, Some(fd))
            }
            BackingType::File { path } => {
                let fd = Self::create_file(path, size)?;
                let mmap = Self::map_fd(&fd, size)?;
                (mmap, Some(fd))
            }
        };

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| FrameRingError::allocation("Mapping returned a null pointer"))?;

        let page = page_size();
        if base.as_ptr() as usize % page != 0 {
            return Err(FrameRingError::allocation(format!(
                "Region base {:p} is not aligned to the page size {}",
                base.as_ptr(),
                page
            )));
        }

        Ok(Self {
            mmap,
            base,
            backing_fd,
            backing: backing.clone(),
        })
    }

    #[cfg(target_os = "linux")]
    fn create_memfd(size: usize) -> Result<OwnedFd> {
        let name = CString::new("framering-umem")
            .map_err(|_| FrameRingError::allocation("Invalid memfd name"))?;

        let fd = memfd_create(&name, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| FrameRingError::allocation(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&fd, size as i64)
            .map_err(|e| FrameRingError::allocation(format!("Failed to set memfd size: {}", e)))?;

        Ok(fd)
    }

    fn create_file(path: &Path, size: usize) -> Result<OwnedFd> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| FrameRingError::from_io(e, "Failed to create/open frame region file"))?;

        file.set_len(size as u64)
            .map_err(|e| FrameRingError::from_io(e, "Failed to set frame region file size"))?;

        Ok(OwnedFd::from(file))
    }

    fn map_fd(fd: &OwnedFd, size: usize) -> Result<MmapMut> {
        let file = File::from(
            fd.try_clone()
                .map_err(|e| FrameRingError::from_io(e, "Failed to duplicate backing fd"))?,
        );
        unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| FrameRingError::allocation(format!("Failed to map backing file: {}", e)))
        }
    }

    /// Base pointer of the region
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the region is empty (never true for a constructed region)
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Backing file descriptor, for handing the region to a peer
    pub fn backing_fd(&self) -> Option<BorrowedFd<'_>> {
        self.backing_fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Backing kind
    pub fn backing(&self) -> &BackingType {
        &self.backing
    }
}

// The base pointer is only dereferenced under the frame ownership protocol.
unsafe impl Send for FrameRegion {}
unsafe impl Sync for FrameRegion {}
