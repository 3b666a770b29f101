//! Software model of the DMA pipeline AFU.
//!
//! The model owns its own IOVA space. Buffers it allocates get IOVAs that
//! differ from their host addresses, so code that hands the AFU a host
//! pointer instead of [`DmaBuffer::iova`] fails here the same way it would
//! on hardware.

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::afu::AfuBackend;
use crate::dma_buffer::DmaUnmap;
use crate::dma_buffer::HostMapping;
use crate::regs;
use crate::AfuId;
use crate::DmaBuffer;
use crate::Error;
use crate::Result;

const MMIO_SIZE: usize = 0x1000;
const IOVA_BASE: u64 = 0x1_0000_0000;
// AFU feature header: type AFU, end of list
const DFH: u64 = (1 << 60) | (1 << 40);

#[derive(Debug, Clone, Copy)]
struct Region {
    iova: u64,
    size: u64,
    host: usize,
}

#[derive(Debug)]
struct SimMemory {
    regions: Mutex<Vec<Region>>,
}

impl SimMemory {
    /// Host address backing `[iova, iova + len)`, if one buffer covers all of it.
    fn translate(&self, iova: u64, len: u64) -> Result<usize> {
        let regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        regions
            .iter()
            .find(|r| iova >= r.iova && iova.saturating_add(len) <= r.iova + r.size)
            .map(|r| r.host + (iova - r.iova) as usize)
            .ok_or(Error::InvalidDmaAddress { iova, len })
    }
}

impl DmaUnmap for SimMemory {
    fn unmap(&self, iova: u64, _size: usize) {
        let mut regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        regions.retain(|r| r.iova != iova);
    }
}

/// In-process stand-in for the pipeline AFU.
///
/// Writing `GO` reads `SIZE` cache lines from `RD_ADDR`, sums every 16
/// consecutive inputs into one output and stores the outputs at `WR_ADDR`.
/// `DONE` then reads zero for `latency` polls before it reads one.
pub struct SimAfu {
    id: AfuId,
    regs: HashMap<u64, u64>,
    latency: u32,
    pending: AtomicU32,
    memory: Arc<SimMemory>,
    next_iova: u64,
}

impl fmt::Debug for SimAfu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SimAfu ({})", &self.id)?;
        writeln!(f, "  latency: {:?}", &self.latency)?;
        write!(f, "  regions: {:?}", &self.memory.regions)
    }
}

impl SimAfu {
    pub fn new(id: AfuId) -> SimAfu {
        SimAfu {
            id,
            regs: HashMap::new(),
            latency: 0,
            pending: AtomicU32::new(0),
            memory: Arc::new(SimMemory {
                regions: Mutex::new(Vec::new()),
            }),
            next_iova: IOVA_BASE,
        }
    }

    /// Number of `DONE` reads that return zero after a start.
    pub fn with_latency(mut self, polls: u32) -> SimAfu {
        self.latency = polls;
        self
    }

    fn reg(&self, word: u64) -> u64 {
        self.regs
            .get(&regs::word_to_byte(word))
            .copied()
            .unwrap_or(0)
    }

    fn start(&mut self) -> Result<()> {
        let rd = self.reg(regs::MMIO_RD_ADDR);
        let wr = self.reg(regs::MMIO_WR_ADDR);
        let lines = self.reg(regs::MMIO_SIZE);

        let too_long = Error::InvalidDmaAddress {
            iova: rd,
            len: u64::MAX,
        };
        let in_bytes = usize::try_from(lines)
            .ok()
            .and_then(|l| l.checked_mul(regs::CL_BYTES))
            .ok_or(too_long)?;
        let inputs = in_bytes / 8;
        let outputs = inputs.div_ceil(regs::INPUTS_PER_OUTPUT);
        tracing::debug!(
            "sim: {} cache lines from {:#x}, {} outputs to {:#x}",
            lines,
            rd,
            outputs,
            wr
        );

        let src = self.memory.translate(rd, in_bytes as u64)? as *const u64;
        let dst = self.memory.translate(wr, (outputs * 8) as u64)? as *mut u64;

        for o in 0..outputs {
            let first = o * regs::INPUTS_PER_OUTPUT;
            let last = (first + regs::INPUTS_PER_OUTPUT).min(inputs);
            let sum = (first..last)
                .map(|i| unsafe { ptr::read_volatile(src.add(i)) })
                .fold(0u64, u64::wrapping_add);
            unsafe { ptr::write_volatile(dst.add(o), sum) };
        }

        self.regs.insert(regs::word_to_byte(regs::MMIO_DONE), 1);
        self.pending.store(self.latency, Ordering::SeqCst);
        Ok(())
    }

    fn check(offset: u64) -> Result<()> {
        if offset % 8 != 0 || offset.saturating_add(8) > MMIO_SIZE as u64 {
            return Err(Error::MmioRange {
                offset,
                size: MMIO_SIZE,
            });
        }
        Ok(())
    }
}

impl AfuBackend for SimAfu {
    fn afu_id(&self) -> AfuId {
        self.id
    }

    fn mmio_size(&self) -> usize {
        MMIO_SIZE
    }

    fn mmio_read64(&self, offset: u64) -> Result<u64> {
        Self::check(offset)?;
        let value = match offset {
            regs::AFU_DFH => DFH,
            regs::AFU_ID_L => self.id.low(),
            regs::AFU_ID_H => self.id.high(),
            o if o == regs::word_to_byte(regs::MMIO_DONE) => {
                let busy = self
                    .pending
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1))
                    .is_ok();
                if busy {
                    0
                } else {
                    self.regs.get(&o).copied().unwrap_or(0)
                }
            }
            o => self.regs.get(&o).copied().unwrap_or(0),
        };
        Ok(value)
    }

    fn mmio_write64(&mut self, offset: u64, value: u64) -> Result<()> {
        Self::check(offset)?;
        if offset == regs::word_to_byte(regs::MMIO_GO) {
            if value != 0 {
                self.regs.insert(regs::word_to_byte(regs::MMIO_DONE), 0);
                self.start()?;
            }
            return Ok(());
        }
        self.regs.insert(offset, value);
        Ok(())
    }

    fn alloc(&mut self, bytes: usize) -> Result<DmaBuffer> {
        let mapping = HostMapping::anonymous(bytes)?;
        let iova = self.next_iova;
        // leave a hole between buffers so overruns are not silently absorbed
        self.next_iova += mapping.size as u64 + 0x1000;

        self.memory
            .regions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Region {
                iova,
                size: mapping.size as u64,
                host: mapping.buffer as usize,
            });
        Ok(DmaBuffer::new(mapping, bytes, iova, self.memory.clone()))
    }
}
