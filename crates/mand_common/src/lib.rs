//! Common definitions shared across the mandelbrot cluster tooling.
//!
//! This crate provides the physical memory map of the HPS-to-FPGA bridge the
//! cluster sits behind and the register-level command protocol understood by
//! the cluster's control block. It is `no_std` so that the same constants can
//! be used by the register bridge, the simulator and the host tools.

#![no_std]

// Physical address space definitions for the HPS-to-FPGA bridge.
//
// The cluster register file is exposed at a fixed physical address. There is
// no discovery and no self-describing header, so these values must match the
// FPGA design that is loaded.
pub mod mmio {
    /// Physical base address of the HPS-to-FPGA bridge.
    ///
    /// The cluster's register file starts at offset zero of the bridge window.
    /// The address is page aligned, which lets it be used directly as an mmap
    /// offset into the physical memory device.
    pub const BRIDGE_BASE: u64 = 0xC000_0000;

    /// Bridge window span used by the first revision of the register file.
    ///
    /// The first revision mapped a generous window that covers far more than
    /// the 58-byte register file.
    pub const BRIDGE_SPAN_V1: usize = 0x03FF;

    /// Bridge window span used by the 128-bit status vector revision.
    pub const BRIDGE_SPAN_V2: usize = 0x0080;

    /// Bridge window span used by the 64-bit revision.
    ///
    /// The 64-bit register file is 144 bytes long and does not fit the
    /// 0x80 window of the previous revision.
    pub const BRIDGE_SPAN_V3: usize = 0x0100;

    /// Nanoseconds the control block needs to latch a register write.
    ///
    /// Every write to the bridge window is followed by a pause of this length
    /// before the next access, so that a read of `command_status` right after
    /// a `command` write sees the new acknowledgement.
    pub const WRITE_SETTLE_NS: u64 = 20;

    /// Character device giving access to physical memory.
    pub const DEV_MEM_PATH: &str = "/dev/mem";
}

/// Register-level command protocol of the cluster control block.
///
/// A command is issued by writing its code to the `command` register. The
/// control block answers by updating `command_status`, which acknowledges the
/// command itself and says nothing about the completion of the work it
/// started. Completion is only observable through the busy flags.
pub mod protocol {
    /// Command codes accepted by the `command` register.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Command {
        /// No operation. Exercises the control block's acknowledgement.
        Nop = 0,

        /// Copy the selected core's output into the result registers.
        ///
        /// After the control block acknowledges the command, `core_result`,
        /// `core_busy` and `core_valid` mirror the core selected by
        /// `core_address`.
        LoadResult = 1,

        /// Start a computation on the selected core.
        ///
        /// The core latches `core_x`, `core_y` and `core_max_iterations` and
        /// raises its busy bit. The command returns immediately; the caller
        /// polls `cores_busy_flag` to learn when the core is done.
        Start = 2,

        /// Reset the selected core.
        ///
        /// The hardware contract of this command is not confirmed. The
        /// register bridge only issues it when built with the
        /// `reset_command` feature.
        Reset = 3,
    }

    impl Command {
        /// Returns the raw code written to the `command` register.
        pub const fn code(self) -> u8 {
            self as u8
        }

        /// Decodes a raw command register value.
        pub const fn from_code(code: u128) -> Option<Self> {
            match code {
                0 => Some(Self::Nop),
                1 => Some(Self::LoadResult),
                2 => Some(Self::Start),
                3 => Some(Self::Reset),
                _ => None,
            }
        }
    }

    /// Acknowledgement codes reported through `command_status`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum CommandStatus {
        /// The command was accepted.
        Success,
        /// The cluster as a whole could not accept a command.
        ClusterBusy,
        /// The command code is not known to the control block.
        InvalidCommand,
        /// `core_address` does not name an existing core.
        InvalidCore,
        /// The selected core is still computing.
        CoreBusy,
        /// The core was reset since the last command.
        AfterReset,
        /// The control block reported an unspecified error.
        UnknownError,
        /// A status value outside the documented range.
        Unrecognized(UnrecognizedStatus),
    }

    /// A `command_status` value above [`CommandStatus::UnknownError`].
    ///
    /// Only [`CommandStatus::from_raw`] builds one, so a documented code is
    /// never wrapped here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UnrecognizedStatus(u128);

    impl UnrecognizedStatus {
        pub const fn value(self) -> u128 {
            self.0
        }
    }

    impl CommandStatus {
        /// Decodes a raw `command_status` register value.
        pub const fn from_raw(raw: u128) -> Self {
            match raw {
                0 => Self::Success,
                1 => Self::ClusterBusy,
                2 => Self::InvalidCommand,
                3 => Self::InvalidCore,
                4 => Self::CoreBusy,
                5 => Self::AfterReset,
                6 => Self::UnknownError,
                other => Self::Unrecognized(UnrecognizedStatus(other)),
            }
        }

        /// Returns the raw register value for this status.
        pub const fn raw(self) -> u128 {
            match self {
                Self::Success => 0,
                Self::ClusterBusy => 1,
                Self::InvalidCommand => 2,
                Self::InvalidCore => 3,
                Self::CoreBusy => 4,
                Self::AfterReset => 5,
                Self::UnknownError => 6,
                Self::Unrecognized(other) => other.0,
            }
        }

        pub const fn is_success(self) -> bool {
            matches!(self, Self::Success)
        }
    }

}
