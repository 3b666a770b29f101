use std::fmt;
use std::mem;
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::Error;

const HUGE_PAGE: usize = 2 * 1024 * 1024;

/// Backend hook that tears down the device-side mapping of a buffer.
pub(crate) trait DmaUnmap: Send + Sync {
    fn unmap(&self, iova: u64, size: usize);
}

/// Memory shared between the host and the AFU.
///
/// The host sees it through `slice()` and the volatile accessors, the AFU
/// through `iova()`. The device mapping and the host mapping are both
/// released on drop.
pub struct DmaBuffer {
    len: usize,
    size: usize,
    iova: u64,
    buffer: *mut libc::c_void,
    huge: bool,
    mapper: Arc<dyn DmaUnmap>,
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DmaBuffer")?;
        writeln!(f, "  len: {:#x?}", &self.len)?;
        writeln!(f, "  size: {:#x?}", &self.size)?;
        writeln!(f, "  iova: {:#x?}", &self.iova)?;
        writeln!(f, "  buffer: {:?}", &self.buffer)?;
        write!(f, "  huge: {:?}", &self.huge)
    }
}

/// Host memory mapping that has not been handed to a device yet.
pub(crate) struct HostMapping {
    pub(crate) buffer: *mut libc::c_void,
    pub(crate) size: usize,
    pub(crate) huge: bool,
}

impl HostMapping {
    /// Map `bytes` of zeroed, page-aligned anonymous memory. Requests of a
    /// huge page or more try huge pages first, so the AFU sees fewer
    /// translations.
    pub(crate) fn anonymous(bytes: usize) -> Result<HostMapping, Error> {
        let page = page_size();
        let bytes = bytes.max(1);

        let too_big = || Error::AllocSize {
            count: bytes,
            elem: 1,
        };

        if bytes >= HUGE_PAGE {
            let size = bytes.checked_next_multiple_of(HUGE_PAGE).ok_or_else(too_big)?;
            match Self::mmap(size, libc::MAP_HUGETLB) {
                Ok(buffer) => {
                    return Ok(HostMapping {
                        buffer,
                        size,
                        huge: true,
                    })
                }
                Err(e) => {
                    tracing::debug!("huge page mapping of {:#x} bytes failed: {}", size, e);
                }
            }
        }

        let size = bytes.checked_next_multiple_of(page).ok_or_else(too_big)?;
        let buffer = Self::mmap(size, 0)?;
        Ok(HostMapping {
            buffer,
            size,
            huge: false,
        })
    }

    fn mmap(size: usize, extra_flags: libc::c_int) -> Result<*mut libc::c_void, Error> {
        unsafe {
            let buffer = libc::mmap(
                ptr::null_mut::<libc::c_void>(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE | extra_flags,
                -1,
                0,
            );
            if buffer == libc::MAP_FAILED {
                return Err(Error::mmap("dma buffer"));
            }
            Ok(buffer)
        }
    }

    /// Release the memory without a device mapping, e.g. when the device
    /// refused to map it.
    pub(crate) fn release(self) {
        unsafe {
            libc::munmap(self.buffer, self.size);
        }
    }
}

pub(crate) fn page_size() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}

impl DmaBuffer {
    pub(crate) fn new(
        mapping: HostMapping,
        len: usize,
        iova: u64,
        mapper: Arc<dyn DmaUnmap>,
    ) -> DmaBuffer {
        debug_assert!(len <= mapping.size);
        DmaBuffer {
            len,
            size: mapping.size,
            iova,
            buffer: mapping.buffer,
            huge: mapping.huge,
            mapper,
        }
    }

    pub fn slice<T: Copy>(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.buffer as *const T, self.len::<T>()) }
    }

    pub fn slice_mut<T: Copy>(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.buffer as *mut T, self.len::<T>()) }
    }

    /// Number of `T` elements the buffer was requested for.
    pub fn len<T>(&self) -> usize {
        self.len / mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read element `i`, bypassing any value the compiler may have cached.
    /// Use this for memory the AFU writes.
    pub fn read_volatile<T: Copy>(&self, i: usize) -> T {
        assert!(i < self.len::<T>(), "DMA buffer index out of bounds");
        unsafe { ptr::read_volatile((self.buffer as *const T).add(i)) }
    }

    pub fn write_volatile<T: Copy>(&mut self, i: usize, value: T) {
        assert!(i < self.len::<T>(), "DMA buffer index out of bounds");
        unsafe { ptr::write_volatile((self.buffer as *mut T).add(i), value) }
    }

    pub fn fill<T: Copy>(&mut self, value: T) {
        for i in 0..self.len::<T>() {
            self.write_volatile(i, value);
        }
    }

    pub fn iova(&self) -> u64 {
        self.iova
    }

    /// Mapped size in bytes, rounded up to the page size.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn buffer(&self) -> *mut libc::c_void {
        self.buffer
    }

    pub fn huge(&self) -> bool {
        self.huge
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        self.mapper.unmap(self.iova, self.size);
        unsafe {
            libc::munmap(self.buffer, self.size);
        }
    }
}

unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}
