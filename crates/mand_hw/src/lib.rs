//! Physical access to the mandelbrot cluster.
//!
//! Maps the HPS-to-FPGA bridge window through the physical memory device and
//! exposes it as a [`mand_core::regs::RegisterBlock`], so that the register
//! bridge can drive real hardware. Also provides the host clock and delay
//! used to bound busy polls.

/// Host time source and pause strategies for the poll loop.
pub mod clock;

/// `/dev/mem` mapping of the bridge window.
pub mod devmem;

pub use clock::{MonotonicClock, SleepDelay, SpinWait};
pub use devmem::{DevMem, MapError};
