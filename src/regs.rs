//! Register map of the DMA pipeline AFU.
//!
//! Application registers are addressed in 32-bit words, as the CCI-P MMIO
//! space is; every register is 64 bits wide, so consecutive registers are
//! two words apart.

use crate::AfuId;

/// Id the DMA pipeline AFU is built with. A rebuilt AFU with a different
/// JSON description reports a different id.
pub const PIPELINE_AFU_ID: AfuId = AfuId::from_u128(0x331d_b30c_9885_41ea_9081_f88b_8f65_5caa);

/// Start trigger. Writing 1 starts the transfer.
pub const MMIO_GO: u64 = 0x0050;
/// IOVA of the input array.
pub const MMIO_RD_ADDR: u64 = 0x0052;
/// IOVA of the output array.
pub const MMIO_WR_ADDR: u64 = 0x0054;
/// Input size in cache lines.
pub const MMIO_SIZE: u64 = 0x0056;
/// Nonzero once the last output cache line has been written.
pub const MMIO_DONE: u64 = 0x0058;

/// Device feature header, byte offset.
pub const AFU_DFH: u64 = 0x00;
/// Lower half of the AFU id, byte offset.
pub const AFU_ID_L: u64 = 0x08;
/// Upper half of the AFU id, byte offset.
pub const AFU_ID_H: u64 = 0x10;

/// Smallest unit the AFU transfers.
pub const CL_BYTES: usize = 64;
/// The pipeline reduces this many inputs into one output.
pub const INPUTS_PER_OUTPUT: usize = 16;
/// Input counts must be a multiple of this so the outputs fill whole lines.
pub const INPUT_MULTIPLE: u64 = 128;

#[inline]
pub const fn word_to_byte(word: u64) -> u64 {
    word * 4
}

#[inline]
pub const fn cache_lines(bytes: usize) -> usize {
    bytes.div_ceil(CL_BYTES)
}
