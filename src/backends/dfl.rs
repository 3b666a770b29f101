use std::fmt;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use crate::afu::AfuBackend;
use crate::dma_buffer::DmaUnmap;
use crate::dma_buffer::HostMapping;
use crate::AfuId;
use crate::DmaBuffer;
use crate::Error;
use crate::Result;

/// Where the DFL driver lists its FPGA regions.
pub const SYSFS_REGIONS: &str = "/sys/class/fpga_region";
const DEV_DIR: &str = "/dev";

// ioctls of the DFL port device, all _IO(DFL_FPGA_MAGIC, DFL_PORT_BASE + n)
const DFL_FPGA_PORT_RESET: u64 = 0xB640;
const DFL_FPGA_PORT_GET_REGION_INFO: u64 = 0xB642;
const DFL_FPGA_PORT_DMA_MAP: u64 = 0xB643;
const DFL_FPGA_PORT_DMA_UNMAP: u64 = 0xB644;

const DFL_PORT_REGION_INDEX_AFU: u32 = 0;
const DFL_PORT_REGION_MMAP: u32 = 1 << 2;

#[repr(C)]
#[derive(Debug, Default)]
struct RegionInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    padding: u32,
    size: u64,
    offset: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaMap {
    argsz: u32,
    flags: u32,
    user_addr: u64,
    length: u64,
    iova: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaUnmapArgs {
    argsz: u32,
    flags: u32,
    iova: u64,
}

/// A port the driver lists in sysfs, with the id of the AFU behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub afu_id: AfuId,
    pub dev: PathBuf,
}

/// List all DFL ports below `root` (normally `/sys/class/fpga_region`).
///
/// A missing `root` means the driver is not loaded. Ports whose `afu_id`
/// cannot be read are skipped.
pub fn scan_ports(root: &Path) -> Result<Vec<PortInfo>> {
    let regions = match fs::read_dir(root) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NoDriver),
        Err(e) => return Err(e.into()),
    };

    let mut ports = Vec::new();
    for region in regions.flatten() {
        let Ok(entries) = fs::read_dir(region.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("dfl-port.") {
                continue;
            }
            let id_path = entry.path().join("afu_id");
            let afu_id = match fs::read_to_string(&id_path) {
                Ok(s) => match s.parse::<AfuId>() {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::warn!("{}", Error::Sysfs { path: id_path, value: s });
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!("cannot read {}: {}", id_path.display(), e);
                    continue;
                }
            };
            tracing::debug!("found {} with AFU {}", name, afu_id);
            ports.push(PortInfo {
                dev: Path::new(DEV_DIR).join(&name),
                name,
                afu_id,
            });
        }
    }

    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

struct PortFd {
    file: File,
}

impl PortFd {
    fn ioctl(&self, op: &'static str, request: u64, arg: *mut libc::c_void) -> Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if ret < 0 {
            return Err(Error::ioctl(op));
        }
        Ok(())
    }
}

impl DmaUnmap for PortFd {
    fn unmap(&self, iova: u64, _size: usize) {
        let mut args = DmaUnmapArgs {
            argsz: std::mem::size_of::<DmaUnmapArgs>() as u32,
            flags: 0,
            iova,
        };
        let arg = &mut args as *mut DmaUnmapArgs as *mut libc::c_void;
        if let Err(e) = self.ioctl("DFL_FPGA_PORT_DMA_UNMAP", DFL_FPGA_PORT_DMA_UNMAP, arg) {
            tracing::warn!("{}", e);
        }
    }
}

/// AFU behind a port of the Linux DFL driver (`/dev/dfl-port.N`).
pub struct DflPort {
    info: PortInfo,
    port: Arc<PortFd>,
    base: *mut u8,
    size: usize,
}

impl fmt::Debug for DflPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DflPort ({})", &self.info.name)?;
        writeln!(f, "  afu_id: {}", &self.info.afu_id)?;
        writeln!(f, "  file: {:?}", &self.port.file)?;
        writeln!(f, "  base: {:?}", &self.base)?;
        write!(f, "  size: {:#x?}", &self.size)
    }
}

impl DflPort {
    /// Open the first port whose AFU reports `id`.
    pub fn open(id: AfuId) -> Result<DflPort> {
        Self::open_in(Path::new(SYSFS_REGIONS), id)
    }

    /// Like [`DflPort::open`], with the fpga_region sysfs class at `root`.
    pub fn open_in(root: &Path, id: AfuId) -> Result<DflPort> {
        Self::open_with(root, id, |dev| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_EXCL)
                .open(dev)
        })
    }

    fn open_with<F>(root: &Path, id: AfuId, mut open: F) -> Result<DflPort>
    where
        F: FnMut(&Path) -> std::io::Result<File>,
    {
        let candidates: Vec<PortInfo> = scan_ports(root)?
            .into_iter()
            .filter(|p| p.afu_id == id)
            .collect();
        if candidates.is_empty() {
            return Err(Error::NotFound { id });
        }

        for info in candidates {
            let file = match open(&info.dev) {
                Ok(f) => f,
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                    tracing::info!("{} is busy", info.name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            return Self::from_file(info, file);
        }

        Err(Error::Busy)
    }

    fn from_file(info: PortInfo, file: File) -> Result<DflPort> {
        let port = PortFd { file };

        // start from a clean AFU, as the vendor runtime does on open
        port.ioctl("DFL_FPGA_PORT_RESET", DFL_FPGA_PORT_RESET, ptr::null_mut())?;

        let mut region = RegionInfo {
            argsz: std::mem::size_of::<RegionInfo>() as u32,
            index: DFL_PORT_REGION_INDEX_AFU,
            ..Default::default()
        };
        port.ioctl(
            "DFL_FPGA_PORT_GET_REGION_INFO",
            DFL_FPGA_PORT_GET_REGION_INFO,
            &mut region as *mut RegionInfo as *mut libc::c_void,
        )?;
        if region.flags & DFL_PORT_REGION_MMAP == 0 {
            return Err(Error::Mmap {
                what: "AFU MMIO region",
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        let size = region.size as usize;
        let base = unsafe {
            let base = libc::mmap(
                ptr::null_mut::<libc::c_void>(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                port.file.as_raw_fd(),
                region.offset as libc::off_t,
            );
            if base == libc::MAP_FAILED {
                return Err(Error::mmap("AFU MMIO region"));
            }
            base as *mut u8
        };

        tracing::info!(
            "opened {} (AFU {}), MMIO at {:?}, size {:#x}",
            info.name,
            info.afu_id,
            base,
            size
        );

        Ok(DflPort {
            info,
            port: Arc::new(port),
            base,
            size,
        })
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    fn check(&self, offset: u64) -> Result<()> {
        if offset % 8 != 0 || offset.saturating_add(8) > self.size as u64 {
            return Err(Error::MmioRange {
                offset,
                size: self.size,
            });
        }
        Ok(())
    }
}

impl AfuBackend for DflPort {
    fn afu_id(&self) -> AfuId {
        self.info.afu_id
    }

    fn mmio_size(&self) -> usize {
        self.size
    }

    fn mmio_read64(&self, offset: u64) -> Result<u64> {
        self.check(offset)?;
        unsafe { Ok(ptr::read_volatile(self.base.add(offset as usize) as *const u64)) }
    }

    fn mmio_write64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.check(offset)?;
        unsafe { ptr::write_volatile(self.base.add(offset as usize) as *mut u64, value) };
        Ok(())
    }

    fn alloc(&mut self, bytes: usize) -> Result<DmaBuffer> {
        let mapping = HostMapping::anonymous(bytes)?;
        let mut map = DmaMap {
            argsz: std::mem::size_of::<DmaMap>() as u32,
            flags: 0,
            user_addr: mapping.buffer as u64,
            length: mapping.size as u64,
            iova: 0,
        };
        let arg = &mut map as *mut DmaMap as *mut libc::c_void;
        if let Err(e) = self.port.ioctl("DFL_FPGA_PORT_DMA_MAP", DFL_FPGA_PORT_DMA_MAP, arg) {
            mapping.release();
            return Err(e);
        }
        tracing::debug!("mapped {:#x} bytes at iova {:#x}", mapping.size, map.iova);
        Ok(DmaBuffer::new(mapping, bytes, map.iova, self.port.clone()))
    }
}

impl Drop for DflPort {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

unsafe impl Send for DflPort {}
