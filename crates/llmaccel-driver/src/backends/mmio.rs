//! Memory-mapped control block
//!
//! Maps the accelerator's AXI-Lite window through a UIO node (`/dev/uioN`,
//! map 0) or any file that exposes the window at offset 0 with `rustix::mm`.
//! Every access is bounds-checked and volatile.

use crate::backend::{BackendType, RegisterBackend};
use crate::error::{AccelError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Memory-mapped register window
#[derive(Debug)]
pub struct MmioBackend {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MmioBackend {
    /// Map a UIO device's first memory region
    ///
    /// The region size is read from `/sys/class/uio/<name>/maps/map0/size`.
    ///
    /// # Errors
    ///
    /// Returns error if the node does not exist, the size cannot be read, or
    /// the mapping fails.
    pub fn open_uio(device: &Path) -> Result<Self> {
        if !device.exists() {
            return Err(AccelError::device_not_found(device));
        }

        let name = device
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AccelError::device_not_found(device))?;
        let size_path = format!("/sys/class/uio/{name}/maps/map0/size");
        let raw = std::fs::read_to_string(&size_path)
            .map_err(|e| AccelError::transfer_failed(format!("Cannot read {size_path}: {e}")))?;
        let size = parse_hex(raw.trim()).ok_or_else(|| {
            AccelError::transfer_failed(format!("Malformed map size in {size_path}: {raw:?}"))
        })?;

        Self::open(device, size)
    }

    /// Map `size` bytes of `path` starting at offset 0
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, `size` is zero, or mmap fails.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        tracing::debug!("Mapping register window: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                AccelError::transfer_failed(format!("Cannot open {}: {e}", path.display()))
            })?;

        if size == 0 {
            return Err(AccelError::transfer_failed(
                "Register window size is 0 (device not bound?)",
            ));
        }

        // SAFETY: mmap of a device window.
        // - file was just opened read/write and is kept alive in the struct
        // - size is non-zero (checked above)
        // - MAP_SHARED so stores reach the device, offset 0 selects UIO map0
        // - the mapping is released exactly once in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| AccelError::transfer_failed(format!("mmap failed: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| AccelError::transfer_failed("mmap returned a null mapping"))?;

        tracing::info!(
            "Mapped {} ({size:#x} bytes at {ptr:p})",
            path.display()
        );

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > self.size {
            return Err(AccelError::OutOfBounds {
                offset,
                limit: self.size,
            });
        }
        Ok(())
    }

    /// Get window size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get mapped path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterBackend for MmioBackend {
    fn read32(&self, offset: usize) -> Result<u32> {
        self.check(offset)?;

        // SAFETY: volatile load from the mapped window.
        // - offset + 4 <= size and offset is 4-byte aligned (checked above)
        // - ptr comes from a successful mmap of at least `size` bytes
        // - volatile: the device changes these values and reads may clear bits
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.check(offset)?;

        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");

        // SAFETY: volatile store to the mapped window.
        // - offset + 4 <= size and offset is 4-byte aligned (checked above)
        // - ptr comes from a successful mmap of at least `size` bytes
        // - volatile: stores trigger device side effects and must not be elided
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmio
    }
}

impl Drop for MmioBackend {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {}", self.path.display());

        // SAFETY: ptr/size are exactly what mmap returned in open(); Drop runs once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: Send - the struct owns the mapping; moving it between threads does not
// invalidate a process-wide mapping.
unsafe impl Send for MmioBackend {}

// SAFETY: Sync - every access is a single aligned volatile u32 load or store on a
// bounds-checked offset. Which thread may touch which register is a convention
// of the callers (scheduler: config/control, interrupt thread: ISR), and the
// window holds no other mutable state.
unsafe impl Sync for MmioBackend {}

/// Parse `0x`-prefixed or bare hexadecimal as sysfs prints it
fn parse_hex(s: &str) -> Option<usize> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    usize::from_str_radix(digits, 16).ok()
}
