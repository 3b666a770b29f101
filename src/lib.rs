//! Userspace access to an FPGA accelerator functional unit (AFU): find it,
//! program its registers and share DMA buffers with it.
//!
//! ```no_run
//! use afu_dma::regs::PIPELINE_AFU_ID;
//! use afu_dma::{Afu, Pipeline, PollConfig};
//!
//! # fn main() -> afu_dma::Result<()> {
//! let mut afu = Afu::open(PIPELINE_AFU_ID)?;
//! let outputs = Pipeline::run(&mut afu, 1024, &PollConfig::default())?;
//! assert_eq!(outputs.len(), 64);
//! # Ok(())
//! # }
//! ```

mod afu;
mod afu_id;
pub mod backends;
mod dma_buffer;
mod dmb;
mod error;
pub mod pipeline;
pub mod regs;

pub use afu::Afu;
pub use afu::AfuBackend;
pub use afu::PollConfig;
pub use afu_id::AfuId;
pub use dma_buffer::DmaBuffer;
pub use dmb::dmb;
pub use error::Error;
pub use error::Result;
pub use pipeline::Pipeline;
