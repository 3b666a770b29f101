use std::path::PathBuf;
use thiserror::Error;

use crate::AfuId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("All FPGAs busy.")]
    Busy,
    #[error("FPGA with accelerator {id} not found.")]
    NotFound { id: AfuId },
    #[error("No FPGA driver found.")]
    NoDriver,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        source: std::io::Error,
    },
    #[error("mapping {what} into virtual memory failed: {source}")]
    Mmap {
        what: &'static str,
        source: std::io::Error,
    },
    #[error("malformed sysfs value in {}: {value:?}", .path.display())]
    Sysfs { path: PathBuf, value: String },
    #[error("invalid AFU id {0:?}")]
    InvalidAfuId(String),
    #[error("DMA access to {iova:#x} (+{len:#x}) is outside of any mapped buffer")]
    InvalidDmaAddress { iova: u64, len: u64 },
    #[error("cannot allocate {count} elements of {elem} bytes")]
    AllocSize { count: usize, elem: usize },
    #[error("MMIO offset {offset:#x} out of range (region size {size:#x})")]
    MmioRange { offset: u64, size: usize },
}

impl Error {
    pub(crate) fn ioctl(op: &'static str) -> Self {
        Error::Ioctl {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    pub(crate) fn mmap(what: &'static str) -> Self {
        Error::Mmap {
            what,
            source: std::io::Error::last_os_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_messages() {
        assert_eq!(Error::Busy.to_string(), "All FPGAs busy.");
        assert_eq!(Error::NoDriver.to_string(), "No FPGA driver found.");

        let id: AfuId = "c000c966-0d82-4272-9aef-fe5f84570612".parse().unwrap();
        assert_eq!(
            Error::NotFound { id }.to_string(),
            "FPGA with accelerator c000c966-0d82-4272-9aef-fe5f84570612 not found."
        );
    }

    #[test]
    fn alloc_size_message() {
        let e = Error::AllocSize {
            count: usize::MAX,
            elem: 8,
        };
        assert_eq!(
            e.to_string(),
            format!("cannot allocate {} elements of 8 bytes", usize::MAX)
        );
    }

    #[test]
    fn dma_address_message() {
        let e = Error::InvalidDmaAddress {
            iova: 0x1000,
            len: 0x80,
        };
        assert_eq!(
            e.to_string(),
            "DMA access to 0x1000 (+0x80) is outside of any mapped buffer"
        );
    }
}
