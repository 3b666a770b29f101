//! Device access behind [`crate::Afu`].
//!
//! - [`DflPort`]: an AFU behind a port of the Linux DFL FPGA driver.
//! - [`SimAfu`]: an in-process model of the DMA pipeline AFU.

mod dfl;
mod sim;

pub use dfl::scan_ports;
pub use dfl::DflPort;
pub use dfl::PortInfo;
pub use dfl::SYSFS_REGIONS;
pub use sim::SimAfu;
