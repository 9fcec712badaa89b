use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;

use mand_common::mmio::{DEV_MEM_PATH, WRITE_SETTLE_NS};
use mand_core::error::{BridgeError, Result as BridgeResult};
use mand_core::regs::{RegisterBlock, check_bounds};
use thiserror::Error;

/// Failures acquiring or releasing the bridge window.
#[derive(Debug, Error)]
pub enum MapError {
    /// The process may not open the physical memory device.
    #[error("access to {} denied (mapping physical memory needs root): {source}", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The physical memory device cannot be opened.
    #[error("cannot open {}: {source}", path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The window could not be mapped.
    #[error("mmap of {span:#x} bytes at {base:#x} failed: {source}")]
    MapFailed {
        base: u64,
        span: usize,
        #[source]
        source: io::Error,
    },

    /// The window could not be unmapped.
    #[error("munmap of the bridge window failed: {source}")]
    UnmapFailed {
        #[source]
        source: io::Error,
    },

    /// The device file descriptor could not be closed.
    #[error("closing {} failed: {source}", path.display())]
    CloseFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MapError {
    /// Whether the failure happened while acquiring the window.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            MapError::AccessDenied { .. }
                | MapError::DeviceUnavailable { .. }
                | MapError::MapFailed { .. }
        )
    }
}

fn classify_open_error(path: &Path, source: io::Error) -> MapError {
    let path = path.to_path_buf();
    match source.kind() {
        io::ErrorKind::PermissionDenied => MapError::AccessDenied { path, source },
        _ => MapError::DeviceUnavailable { path, source },
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EBUSY))
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
}

struct Mapping {
    /// Start of the page-aligned mapping.
    map_ptr: NonNull<u8>,
    map_len: usize,
    /// First byte of the bridge window inside the mapping.
    window: NonNull<u8>,
}

struct OpenWindow {
    mapping: Mapping,
    file: File,
}

/// The bridge window mapped from the physical memory device.
///
/// Every access is a volatile load or store of naturally aligned chunks, so
/// a 32-bit register is accessed with one 32-bit bus transaction. The window
/// is released exactly once: by [`DevMem::close`], or on drop if it was not
/// closed explicitly.
pub struct DevMem {
    open: Option<OpenWindow>,
    path: PathBuf,
    base: u64,
    span: usize,
}

// SAFETY: the mapping is owned by this value alone and every access goes
// through &self or &mut self. Not Sync: one owner drives the protocol.
unsafe impl Send for DevMem {}

impl DevMem {
    /// Maps `span` bytes of physical memory at `base`.
    pub fn open(base: u64, span: usize) -> Result<Self, MapError> {
        Self::open_path(DEV_MEM_PATH, base, span)
    }

    /// Maps `span` bytes at offset `base` of the file at `path`.
    ///
    /// `base` does not have to be page aligned.
    pub fn open_path(path: impl AsRef<Path>, base: u64, span: usize) -> Result<Self, MapError> {
        let path = path.as_ref();
        tracing::debug!("Opening {} for bridge window {base:#x}+{span:#x}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| classify_open_error(path, e))?;

        let mapping = match map_window(&file, base, span) {
            Ok(mapping) => mapping,
            Err(err) if is_transient(&err) => {
                tracing::warn!("mmap of {base:#x} busy ({err}), retrying once");
                map_window(&file, base, span)
                    .map_err(|source| MapError::MapFailed { base, span, source })?
            }
            Err(source) => return Err(MapError::MapFailed { base, span, source }),
        };

        tracing::info!(
            "Mapped bridge window {base:#x}+{span:#x} at {:p}",
            mapping.window
        );

        Ok(Self {
            open: Some(OpenWindow { mapping, file }),
            path: path.to_path_buf(),
            base,
            span,
        })
    }

    /// Physical address of the first register.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Unmaps the window and closes the device.
    ///
    /// Calling it again after it returned, successfully or not, does
    /// nothing. If unmapping fails the descriptor is still closed.
    pub fn close(&mut self) -> Result<(), MapError> {
        let Some(OpenWindow { mapping, file }) = self.open.take() else {
            return Ok(());
        };
        tracing::debug!("Releasing bridge window {:#x}+{:#x}", self.base, self.span);

        // SAFETY: map_ptr and map_len come from the successful mmap in
        // map_window and the mapping was taken out of self, so no access can
        // use it afterwards.
        let unmapped = unsafe { libc::munmap(mapping.map_ptr.as_ptr().cast(), mapping.map_len) };
        let unmap_error = (unmapped != 0).then(io::Error::last_os_error);

        let fd = file.into_raw_fd();
        // SAFETY: fd was just released from the File, so it is closed once.
        let closed = unsafe { libc::close(fd) };
        let close_error = (closed != 0).then(io::Error::last_os_error);

        if let Some(source) = unmap_error {
            return Err(MapError::UnmapFailed { source });
        }
        if let Some(source) = close_error {
            return Err(MapError::CloseFailed {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    fn window(&self) -> BridgeResult<NonNull<u8>> {
        self.open
            .as_ref()
            .map(|open| open.mapping.window)
            .ok_or(BridgeError::OutOfBounds {
                offset: 0,
                len: 0,
                span: 0,
            })
    }
}

fn map_window(file: &File, base: u64, span: usize) -> io::Result<Mapping> {
    if span == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty bridge window"));
    }

    let page = page_size() as u64;
    let page_offset = (base % page) as usize;
    let map_base = base - page_offset as u64;
    let map_len = span + page_offset;

    // Offsets above the signed range of off_t are passed with their bits
    // unchanged; the kernel treats the offset as unsigned.
    let offset = map_base as libc::off_t;

    // SAFETY: the descriptor is open for reading and writing, map_len is
    // non-zero and the kernel picks the address. The result is checked
    // against MAP_FAILED before use.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            offset,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    let map_ptr = NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
    // SAFETY: page_offset < map_len, so the window starts inside the mapping.
    let window = unsafe { map_ptr.add(page_offset) };

    Ok(Mapping {
        map_ptr,
        map_len,
        window,
    })
}

/// Largest naturally aligned access width that fits at `addr` with `left`
/// bytes remaining.
fn chunk_width(addr: usize, left: usize) -> usize {
    [8, 4, 2, 1]
        .into_iter()
        .find(|&w| left >= w && addr % w == 0)
        .unwrap_or(1)
}

fn le_array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&chunk[..N]);
    bytes
}

impl RegisterBlock for DevMem {
    fn span(&self) -> usize {
        if self.is_open() { self.span } else { 0 }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> BridgeResult<()> {
        check_bounds(offset, buf.len(), self.span())?;
        let window = self.window()?;

        let mut done = 0;
        while done < buf.len() {
            // SAFETY: offset + buf.len() <= span was checked above, so every
            // byte touched lies inside the mapping.
            let src = unsafe { window.as_ptr().add(offset + done) };
            let width = chunk_width(src as usize, buf.len() - done);
            let out = &mut buf[done..done + width];
            // SAFETY: src is aligned to width and in bounds; volatile keeps
            // the access a single bus transaction of that width.
            unsafe {
                match width {
                    8 => out.copy_from_slice(&src.cast::<u64>().read_volatile().to_le_bytes()),
                    4 => out.copy_from_slice(&src.cast::<u32>().read_volatile().to_le_bytes()),
                    2 => out.copy_from_slice(&src.cast::<u16>().read_volatile().to_le_bytes()),
                    _ => out[0] = src.read_volatile(),
                }
            }
            done += width;
        }

        tracing::trace!("Read {} bytes @ {offset:#x} = {buf:02x?}", buf.len());
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> BridgeResult<()> {
        check_bounds(offset, data.len(), self.span())?;
        let window = self.window()?;
        tracing::trace!("Write {} bytes @ {offset:#x} = {data:02x?}", data.len());

        let mut done = 0;
        while done < data.len() {
            // SAFETY: bounds checked above.
            let dst = unsafe { window.as_ptr().add(offset + done) };
            let width = chunk_width(dst as usize, data.len() - done);
            let chunk = &data[done..done + width];
            // SAFETY: dst is aligned to width and in bounds.
            unsafe {
                match width {
                    8 => dst.cast::<u64>().write_volatile(u64::from_le_bytes(le_array(chunk))),
                    4 => dst.cast::<u32>().write_volatile(u32::from_le_bytes(le_array(chunk))),
                    2 => dst.cast::<u16>().write_volatile(u16::from_le_bytes(le_array(chunk))),
                    _ => dst.write_volatile(chunk[0]),
                }
            }
            done += width;
        }
        Ok(())
    }

    fn write_settle(&self) -> Duration {
        Duration::from_nanos(WRITE_SETTLE_NS)
    }
}

impl Drop for DevMem {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!("Releasing bridge window failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_are_access_denied() {
        let err = classify_open_error(
            Path::new("/dev/mem"),
            io::Error::from_raw_os_error(libc::EACCES),
        );
        assert!(matches!(err, MapError::AccessDenied { .. }));
        let err = classify_open_error(
            Path::new("/dev/mem"),
            io::Error::from_raw_os_error(libc::EPERM),
        );
        assert!(matches!(err, MapError::AccessDenied { .. }));
        let err = classify_open_error(
            Path::new("/dev/mem"),
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert!(matches!(err, MapError::DeviceUnavailable { .. }));
        assert!(err.is_acquisition());
    }

    #[test]
    fn transient_mmap_errors() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EBUSY)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EINVAL)));
    }

    #[test]
    fn chunks_follow_alignment() {
        assert_eq!(chunk_width(0x1000, 16), 8);
        assert_eq!(chunk_width(0x1004, 16), 4);
        assert_eq!(chunk_width(0x1002, 4), 2);
        assert_eq!(chunk_width(0x1001, 4), 1);
        assert_eq!(chunk_width(0x1000, 3), 2);
    }
}
