//! Register bridge for the mandelbrot cluster accelerator.
//!
//! This crate describes the cluster's register file for every known revision
//! and implements the command/poll protocol used to drive its cores. It does
//! not know how the register file is reached: everything runs over the
//! [`regs::RegisterBlock`] seam, which is implemented by the `/dev/mem`
//! mapping on the target, by a plain memory buffer for offline inspection and
//! by the simulated cluster used in tests.

#![no_std]

extern crate alloc;

/// Little-endian field packing and per-core bit-vector helpers.
///
/// The status registers carry one bit per core. These helpers extract and
/// update individual bits from the raw register bytes and convert between
/// register bytes and integer values.
pub mod bit_utils;

/// Command/poll protocol over a register block.
///
/// [`bridge::RegisterBridge`] pairs a register block with a layout version
/// and exposes typed reads and writes of every register plus the
/// select/start/poll/load sequence that drives one core.
pub mod bridge;

/// Error type returned by every bridge operation.
pub mod error;

/// Register file layouts.
///
/// One offset table per hardware revision. The revision is selected by the
/// operator; the hardware carries no version tag.
pub mod layout;

/// Software reference model of a cluster core.
///
/// Computes the escape-time iteration count with the same fixed-point
/// formulation the cores implement. Used by the simulator and to verify
/// hardware results.
pub mod mandelbrot;

/// Bounded busy-flag polling.
///
/// Polling is parameterized by an interval, an optional timeout and an
/// optional cancellation flag, so that a hardware fault cannot hang the
/// caller forever.
pub mod poll;

/// The register block seam and an in-memory implementation of it.
pub mod regs;

/// Simulated cluster implementing the register block seam.
///
/// Reacts to command writes like the control block does and completes
/// computations after a configurable number of busy polls.
pub mod sim;
