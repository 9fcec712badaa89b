//! I/O utilities for driving the mandelbrot cluster from the host.
//!
//! Parses the numeric literals accepted on the command line, reads point
//! lists for batch runs and stores register file snapshots so that a capture
//! taken on the board can be decoded elsewhere.

/// Register file snapshots.
///
/// A snapshot is the raw register file of one layout revision, prefixed with
/// a small header naming that revision. Snapshots can be taken from any
/// register block and turned back into a [`mand_core::regs::MemoryBlock`].
pub mod loader;

/// Parsers for numbers, fixed-point coordinates and point files.
pub mod parser;
