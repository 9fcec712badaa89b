use core::time::Duration;

use mand_common::protocol::{Command, CommandStatus};
use thiserror::Error;

use crate::layout::{Field, LayoutVersion};

pub type Result<T> = core::result::Result<T, BridgeError>;

/// Failures detected by the register bridge.
///
/// Register accesses themselves cannot fail at the hardware level: a wrong
/// layout or a faulty core produces garbage values, not errors. What is
/// reported here is misuse caught at the API boundary and polls that did not
/// see the core finish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The mapped window cannot hold the selected register file.
    #[error("span {span:#x} is smaller than the {version} register file ({required:#x} bytes)")]
    SpanTooSmall {
        version: LayoutVersion,
        span: usize,
        required: usize,
    },

    /// An access reaches past the end of the mapped window.
    #[error("access of {len} bytes at offset {offset:#x} exceeds span {span:#x}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        span: usize,
    },

    /// The register does not exist in the selected revision.
    #[error("{field} is not part of the {version} register file")]
    FieldNotInLayout { field: Field, version: LayoutVersion },

    /// A core index at or past the number of cores.
    #[error("core {core} does not exist (cluster has {count} cores)")]
    InvalidCore { core: usize, count: u64 },

    /// The value does not fit the register.
    #[error("value {value:#x} does not fit the {bits}-bit {field} register")]
    ValueOutOfRange { field: Field, value: u128, bits: u32 },

    /// The metadata reports a coordinate format no core is built with.
    #[error("no {fixed_size}-bit coordinate format with {integer_size} integer bits")]
    UnsupportedFormat { fixed_size: u64, integer_size: u64 },

    /// The command is not enabled in this build.
    #[error("command {0:?} is not enabled in this build")]
    UnsupportedCommand(Command),

    /// The control block did not acknowledge a command.
    #[error("command {command:?} rejected by the control block: {status:?}")]
    CommandRejected {
        command: Command,
        status: CommandStatus,
    },

    /// The core was still busy when the poll budget ran out.
    #[error("core {core} still busy after {polls} polls ({elapsed:?})")]
    TimedOut {
        core: usize,
        polls: u64,
        elapsed: Duration,
    },

    /// The poll was cancelled through its cancellation flag.
    #[error("poll of core {core} cancelled after {polls} polls")]
    Cancelled { core: usize, polls: u64 },
}
