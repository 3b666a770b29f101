use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::backends::DflPort;
use crate::backends::SimAfu;
use crate::dmb;
use crate::regs;
use crate::AfuId;
use crate::DmaBuffer;
use crate::Error;
use crate::Result;

#[cfg(feature = "async")]
mod afu_async;

mod sealed {
    pub trait Sealed {}

    impl Sealed for crate::backends::DflPort {}
    impl Sealed for crate::backends::SimAfu {}
}

/// Device access an [`Afu`] is built on: the AFU's MMIO space and a way to
/// allocate memory it can reach.
///
/// Sealed: buffers returned by `alloc` carry a backend-specific unmap hook,
/// so only [`DflPort`] and [`SimAfu`] implement it.
pub trait AfuBackend: sealed::Sealed + Send {
    fn afu_id(&self) -> AfuId;

    /// Size of the MMIO region in bytes.
    fn mmio_size(&self) -> usize;

    /// Read the 64-bit register at byte `offset`.
    fn mmio_read64(&self, offset: u64) -> Result<u64>;

    /// Write the 64-bit register at byte `offset`.
    fn mmio_write64(&mut self, offset: u64, value: u64) -> Result<()>;

    /// Allocate `bytes` of memory shared with the AFU.
    fn alloc(&mut self, bytes: usize) -> Result<DmaBuffer>;
}

/// How to wait for a register to become nonzero.
#[derive(Debug, Clone, Default)]
pub struct PollConfig {
    /// Sleep between reads. `None` spins.
    pub sleep: Option<Duration>,
}

impl PollConfig {
    pub fn spin() -> PollConfig {
        PollConfig { sleep: None }
    }

    pub fn sleep(sleep: Duration) -> PollConfig {
        PollConfig { sleep: Some(sleep) }
    }
}

/// An opened accelerator functional unit.
pub struct Afu {
    backend: Box<dyn AfuBackend>,
}

impl fmt::Debug for Afu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Afu ({})", &self.backend.afu_id())?;
        write!(f, "  mmio size: {:#x?}", &self.backend.mmio_size())
    }
}

impl Afu {
    /// Find an FPGA whose AFU reports `id` and open it exclusively.
    pub fn open(id: AfuId) -> Result<Afu> {
        Ok(Afu::from_backend(DflPort::open(id)?))
    }

    /// Like [`Afu::open`], looking the AFU up below `root` instead of
    /// `/sys/class/fpga_region`.
    pub fn open_in(root: &Path, id: AfuId) -> Result<Afu> {
        Ok(Afu::from_backend(DflPort::open_in(root, id)?))
    }

    /// A software model of the DMA pipeline AFU.
    pub fn simulated() -> Afu {
        Afu::from_backend(SimAfu::new(regs::PIPELINE_AFU_ID))
    }

    pub fn from_backend<B: AfuBackend + 'static>(backend: B) -> Afu {
        Afu {
            backend: Box::new(backend),
        }
    }

    pub fn id(&self) -> AfuId {
        self.backend.afu_id()
    }

    /// Read the register at word address `addr`.
    pub fn read(&self, addr: u64) -> Result<u64> {
        let value = self.backend.mmio_read64(regs::word_to_byte(addr))?;
        tracing::trace!("mmio read  {:#06x} -> {:#x}", addr, value);
        Ok(value)
    }

    /// Write the register at word address `addr`.
    pub fn write(&mut self, addr: u64, value: u64) -> Result<()> {
        tracing::debug!("mmio write {:#06x} <- {:#x}", addr, value);
        self.backend.mmio_write64(regs::word_to_byte(addr), value)
    }

    /// Allocate room for `count` elements of `T` in memory the AFU can
    /// access. The memory is zeroed and freed when the buffer is dropped.
    pub fn malloc<T: Copy>(&mut self, count: usize) -> Result<DmaBuffer> {
        let elem = std::mem::size_of::<T>();
        let bytes = count
            .checked_mul(elem)
            .ok_or(Error::AllocSize { count, elem })?;
        let buffer = self.backend.alloc(bytes)?;
        tracing::debug!(
            "allocated {} bytes at iova {:#x} ({:?})",
            bytes,
            buffer.iova(),
            buffer.buffer()
        );
        Ok(buffer)
    }

    /// Poll the register at word address `addr` until it reads nonzero and
    /// return that value. There is no timeout.
    pub fn wait_until_nonzero(&self, addr: u64, poll: &PollConfig) -> Result<u64> {
        let mut polls = 0u64;
        loop {
            let value = self.read(addr)?;
            if value != 0 {
                // the flag acts as an acquire for the AFU's writes
                dmb();
                tracing::debug!("{:#06x} set after {} polls", addr, polls);
                return Ok(value);
            }
            polls += 1;
            if let Some(sleep) = poll.sleep {
                thread::sleep(sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_addressing() {
        let mut afu = Afu::simulated();
        afu.write(regs::MMIO_SIZE, 12).unwrap();
        assert_eq!(afu.read(regs::MMIO_SIZE).unwrap(), 12);
        assert_eq!(afu.id(), regs::PIPELINE_AFU_ID);
    }

    #[test]
    fn malloc_is_zeroed() {
        let mut afu = Afu::simulated();
        let buf = afu.malloc::<u64>(300).unwrap();
        assert_eq!(buf.len::<u64>(), 300);
        assert!(buf.slice::<u64>().iter().all(|v| *v == 0));
    }

    #[test]
    fn malloc_size_overflow() {
        let mut afu = Afu::simulated();
        match afu.malloc::<u64>(usize::MAX / 4) {
            Err(Error::AllocSize { count, elem }) => {
                assert_eq!(count, usize::MAX / 4);
                assert_eq!(elem, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wait_sleeps_between_polls() {
        let mut afu = Afu::from_backend(SimAfu::new(regs::PIPELINE_AFU_ID).with_latency(3));
        let input = afu.malloc::<u64>(128).unwrap();
        let output = afu.malloc::<u64>(8).unwrap();
        afu.write(regs::MMIO_RD_ADDR, input.iova()).unwrap();
        afu.write(regs::MMIO_WR_ADDR, output.iova()).unwrap();
        afu.write(regs::MMIO_SIZE, 16).unwrap();
        afu.write(regs::MMIO_GO, 1).unwrap();

        let poll = PollConfig::sleep(Duration::from_millis(1));
        let start = std::time::Instant::now();
        assert_eq!(afu.wait_until_nonzero(regs::MMIO_DONE, &poll).unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_millis(3));
    }
}
