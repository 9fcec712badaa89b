use core::fmt;
use core::str::FromStr;

use mand_common::mmio::{BRIDGE_SPAN_V1, BRIDGE_SPAN_V2, BRIDGE_SPAN_V3};

/// Revision of the cluster register file.
///
/// The hardware does not report which revision it implements. Selecting a
/// version that does not match the loaded FPGA design is not detected: reads
/// return garbage and writes land in the wrong registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutVersion {
    /// Packed 32-bit registers with single-byte status vectors (8 cores).
    V1,
    /// 32-bit registers with 128-bit status vectors.
    V2,
    /// 64-bit registers, 128-bit status vectors and 128-bit coordinates.
    V3,
}

/// A register of the cluster control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CoresCount,
    FixedSize,
    FixedIntegerSize,
    IterationsSize,
    CoresStatusSize,
    Command,
    CommandStatus,
    CoreAddress,
    CoresBusyFlag,
    CoresValidFlag,
    CoreX,
    CoreY,
    CoreMaxIterations,
    CoreResult,
    CoreBusy,
    CoreValid,
}

impl Field {
    pub const ALL: [Field; 16] = [
        Field::CoresCount,
        Field::FixedSize,
        Field::FixedIntegerSize,
        Field::IterationsSize,
        Field::CoresStatusSize,
        Field::Command,
        Field::CommandStatus,
        Field::CoreAddress,
        Field::CoresBusyFlag,
        Field::CoresValidFlag,
        Field::CoreX,
        Field::CoreY,
        Field::CoreMaxIterations,
        Field::CoreResult,
        Field::CoreBusy,
        Field::CoreValid,
    ];

    /// Register name as printed by the diagnostic tools.
    pub const fn name(self) -> &'static str {
        match self {
            Field::CoresCount => "cores_count",
            Field::FixedSize => "fixed_size",
            Field::FixedIntegerSize => "fixed_integer_size",
            Field::IterationsSize => "iterations_size",
            Field::CoresStatusSize => "cores_status_size",
            Field::Command => "command",
            Field::CommandStatus => "command_status",
            Field::CoreAddress => "core_address",
            Field::CoresBusyFlag => "cores_busy_flag",
            Field::CoresValidFlag => "cores_valid_flag",
            Field::CoreX => "core_x",
            Field::CoreY => "core_y",
            Field::CoreMaxIterations => "core_max_iterations",
            Field::CoreResult => "core_result",
            Field::CoreBusy => "core_busy",
            Field::CoreValid => "core_valid",
        }
    }

    /// Whether software may write this register.
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Field::Command
                | Field::CoreAddress
                | Field::CoreX
                | Field::CoreY
                | Field::CoreMaxIterations
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of one register inside the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    /// Byte offset from the start of the bridge window.
    pub offset: usize,
    /// Width in bytes.
    pub width: usize,
}

impl FieldSpec {
    const fn new(field: Field, offset: usize, width: usize) -> Self {
        Self {
            field,
            offset,
            width,
        }
    }

    /// One past the last byte of the register.
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }

    pub const fn bits(&self) -> u32 {
        (self.width * 8) as u32
    }

    /// Whether the byte range `offset..offset + len` touches this register.
    pub const fn overlaps(&self, offset: usize, len: usize) -> bool {
        len > 0 && offset < self.end() && self.offset < offset + len
    }
}

// First revision: a packed structure of 32-bit registers with one status
// byte per vector.
const V1_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(Field::CoresCount, 0, 4),
    FieldSpec::new(Field::FixedSize, 4, 4),
    FieldSpec::new(Field::FixedIntegerSize, 8, 4),
    FieldSpec::new(Field::IterationsSize, 12, 4),
    FieldSpec::new(Field::CoresStatusSize, 16, 4),
    FieldSpec::new(Field::Command, 20, 4),
    FieldSpec::new(Field::CommandStatus, 24, 4),
    FieldSpec::new(Field::CoreAddress, 28, 4),
    FieldSpec::new(Field::CoresBusyFlag, 32, 1),
    FieldSpec::new(Field::CoresValidFlag, 33, 1),
    FieldSpec::new(Field::CoreX, 34, 4),
    FieldSpec::new(Field::CoreY, 38, 4),
    FieldSpec::new(Field::CoreMaxIterations, 42, 4),
    FieldSpec::new(Field::CoreResult, 46, 4),
    FieldSpec::new(Field::CoreBusy, 50, 4),
    FieldSpec::new(Field::CoreValid, 54, 4),
];

const V2_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(Field::CoresCount, 0, 4),
    FieldSpec::new(Field::FixedSize, 4, 4),
    FieldSpec::new(Field::FixedIntegerSize, 8, 4),
    FieldSpec::new(Field::IterationsSize, 12, 4),
    FieldSpec::new(Field::CoresStatusSize, 16, 4),
    FieldSpec::new(Field::Command, 20, 4),
    FieldSpec::new(Field::CommandStatus, 24, 4),
    FieldSpec::new(Field::CoreAddress, 28, 4),
    FieldSpec::new(Field::CoresBusyFlag, 32, 16),
    FieldSpec::new(Field::CoresValidFlag, 48, 16),
    FieldSpec::new(Field::CoreX, 64, 4),
    FieldSpec::new(Field::CoreY, 68, 4),
    FieldSpec::new(Field::CoreMaxIterations, 72, 4),
    FieldSpec::new(Field::CoreResult, 76, 4),
    FieldSpec::new(Field::CoreBusy, 80, 4),
    FieldSpec::new(Field::CoreValid, 84, 4),
];

// The 64-bit revision drops the iteration and status size descriptors and
// moves the core inputs behind the outputs.
const V3_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(Field::CoresCount, 0, 8),
    FieldSpec::new(Field::FixedSize, 8, 8),
    FieldSpec::new(Field::FixedIntegerSize, 16, 8),
    FieldSpec::new(Field::Command, 24, 8),
    FieldSpec::new(Field::CommandStatus, 32, 8),
    FieldSpec::new(Field::CoreAddress, 40, 8),
    FieldSpec::new(Field::CoresBusyFlag, 48, 16),
    FieldSpec::new(Field::CoresValidFlag, 64, 16),
    FieldSpec::new(Field::CoreResult, 80, 8),
    FieldSpec::new(Field::CoreBusy, 88, 8),
    FieldSpec::new(Field::CoreValid, 96, 8),
    FieldSpec::new(Field::CoreMaxIterations, 104, 8),
    FieldSpec::new(Field::CoreX, 112, 16),
    FieldSpec::new(Field::CoreY, 128, 16),
];

impl LayoutVersion {
    pub const ALL: [LayoutVersion; 3] = [LayoutVersion::V1, LayoutVersion::V2, LayoutVersion::V3];

    /// Offset table of this revision, in ascending offset order.
    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            LayoutVersion::V1 => V1_FIELDS,
            LayoutVersion::V2 => V2_FIELDS,
            LayoutVersion::V3 => V3_FIELDS,
        }
    }

    /// Looks up a register, or `None` if this revision does not have it.
    pub fn spec(self, field: Field) -> Option<FieldSpec> {
        self.fields().iter().copied().find(|spec| spec.field == field)
    }

    /// Size of the register file in bytes.
    pub fn size(self) -> usize {
        self.fields().iter().map(FieldSpec::end).max().unwrap_or(0)
    }

    /// Bridge window span the revision was deployed with.
    pub const fn default_span(self) -> usize {
        match self {
            LayoutVersion::V1 => BRIDGE_SPAN_V1,
            LayoutVersion::V2 => BRIDGE_SPAN_V2,
            LayoutVersion::V3 => BRIDGE_SPAN_V3,
        }
    }

    /// Number of cores the status vectors can describe.
    pub fn max_cores(self) -> usize {
        self.spec(Field::CoresBusyFlag)
            .map_or(0, |spec| spec.width * 8)
    }

    pub const fn name(self) -> &'static str {
        match self {
            LayoutVersion::V1 => "v1",
            LayoutVersion::V2 => "v2",
            LayoutVersion::V3 => "v3",
        }
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a layout name is not one of `v1`, `v2`, `v3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown register layout (expected v1, v2 or v3)")]
pub struct UnknownLayout;

impl FromStr for LayoutVersion {
    type Err = UnknownLayout;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        LayoutVersion::ALL
            .into_iter()
            .find(|version| {
                s.eq_ignore_ascii_case(version.name()) || s == &version.name()[1..]
            })
            .ok_or(UnknownLayout)
    }
}

/// Layout version persisted in register snapshots.
impl From<LayoutVersion> for u8 {
    fn from(version: LayoutVersion) -> Self {
        match version {
            LayoutVersion::V1 => 1,
            LayoutVersion::V2 => 2,
            LayoutVersion::V3 => 3,
        }
    }
}

impl TryFrom<u8> for LayoutVersion {
    type Error = UnknownLayout;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(LayoutVersion::V1),
            2 => Ok(LayoutVersion::V2),
            3 => Ok(LayoutVersion::V3),
            _ => Err(UnknownLayout),
        }
    }
}
