use core::time::Duration;

use mand_common::protocol::{Command, CommandStatus};

use crate::bit_utils::{FlagVector, MAX_FIELD_WIDTH, low_mask, read_le, write_le};
use crate::error::{BridgeError, Result};
use crate::layout::{Field, FieldSpec, LayoutVersion};
use crate::mandelbrot::CoordFormat;
use crate::poll::{Clock, Delay, PollReport, Poller, SpinDelay};
use crate::regs::RegisterBlock;

/// Descriptors reported by the cluster's metadata registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreMetadata {
    pub cores_count: u64,
    /// Total width of the fixed-point coordinates, in bits.
    pub fixed_size: u64,
    /// Integer bits of the fixed-point coordinates, sign included.
    pub fixed_integer_size: u64,
    /// Width of the iteration counters. Not reported by every revision.
    pub iterations_size: Option<u64>,
    /// Width of the per-core status vectors. Not reported by every revision.
    pub cores_status_size: Option<u64>,
}

impl CoreMetadata {
    /// Coordinate format of the cores, if it is one the reference model
    /// knows.
    pub fn coord_format(&self) -> Result<CoordFormat> {
        CoordFormat::from_sizes(self.fixed_size, self.fixed_integer_size)
    }
}

/// Inputs of one computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreParams {
    /// Real part, raw two's-complement fixed-point bits.
    pub x: i128,
    /// Imaginary part, raw two's-complement fixed-point bits.
    pub y: i128,
    pub max_iterations: u64,
}

/// The result registers of the selected core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreResult {
    pub result: u64,
    pub busy: bool,
    pub valid: bool,
}

/// A completed computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRun {
    pub result: CoreResult,
    pub poll: PollReport,
}

/// Typed access to the cluster register file.
///
/// Owns the register block for as long as the bridge lives. Dropping the
/// bridge drops the block, which for a physical mapping releases it.
///
/// Every register write is followed by a pause of the block's
/// [`write_settle`](RegisterBlock::write_settle) time through `D`, so the
/// control block has latched the write before the next access. The default
/// [`SpinDelay`] only hints the CPU; hosts driving real hardware install a
/// delay that actually waits.
pub struct RegisterBridge<B, D = SpinDelay> {
    block: B,
    version: LayoutVersion,
    settle: Duration,
    delay: D,
}

impl<B: RegisterBlock> RegisterBridge<B> {
    /// Lays `version` over `block`.
    ///
    /// Fails if the block's span cannot hold the register file. Whether the
    /// hardware behind the block actually implements `version` cannot be
    /// checked.
    pub fn new(block: B, version: LayoutVersion) -> Result<Self> {
        let required = version.size();
        let span = block.span();
        if span < required {
            return Err(BridgeError::SpanTooSmall {
                version,
                span,
                required,
            });
        }
        let settle = block.write_settle();
        Ok(Self {
            block,
            version,
            settle,
            delay: SpinDelay,
        })
    }
}

impl<B: RegisterBlock, D: Delay> RegisterBridge<B, D> {
    /// Replaces the delay used to wait out the write settle time.
    pub fn with_delay<E: Delay>(self, delay: E) -> RegisterBridge<B, E> {
        RegisterBridge {
            block: self.block,
            version: self.version,
            settle: self.settle,
            delay,
        }
    }

    /// Overrides the settle time reported by the block.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Pause after every register write.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Register file revision the bridge decodes.
    pub fn version(&self) -> LayoutVersion {
        self.version
    }

    /// The underlying register block, for inspection.
    ///
    /// Reads through the block bypass the bridge but still reach the
    /// hardware: on a live cluster a read covering `cores_busy_flag` is a
    /// poll like any other.
    pub fn block(&self) -> &B {
        &self.block
    }

    /// Gives the register block back, e.g. to close a mapping explicitly.
    pub fn into_inner(self) -> B {
        self.block
    }

    /// Position of `field` in the selected layout.
    pub fn field(&self, field: Field) -> Result<FieldSpec> {
        self.version
            .spec(field)
            .ok_or(BridgeError::FieldNotInLayout {
                field,
                version: self.version,
            })
    }

    /// Reads the raw bytes of a register into `buf`, returning the width.
    pub fn read_field_bytes(&self, field: Field, buf: &mut [u8; MAX_FIELD_WIDTH]) -> Result<usize> {
        let spec = self.field(field)?;
        self.block.read(spec.offset, &mut buf[..spec.width])?;
        Ok(spec.width)
    }

    /// Reads a register as an unsigned little-endian integer.
    pub fn read_field(&self, field: Field) -> Result<u128> {
        let mut buf = [0u8; MAX_FIELD_WIDTH];
        let width = self.read_field_bytes(field, &mut buf)?;
        Ok(read_le(&buf[..width]))
    }

    /// Writes an unsigned value to a register.
    ///
    /// The value must fit the register. No ordering with respect to the
    /// hardware is enforced: this is the raw access used by diagnostics.
    pub fn write_field(&mut self, field: Field, value: u128) -> Result<()> {
        let spec = self.field(field)?;
        let bits = spec.bits();
        if value & !low_mask(bits) != 0 {
            return Err(BridgeError::ValueOutOfRange { field, value, bits });
        }
        self.write_spec(spec, value)
    }

    /// Writes the low bits of a signed value, truncated to the register width.
    pub fn write_field_signed(&mut self, field: Field, value: i128) -> Result<()> {
        let spec = self.field(field)?;
        self.write_spec(spec, value as u128 & low_mask(spec.bits()))
    }

    fn write_spec(&mut self, spec: FieldSpec, value: u128) -> Result<()> {
        let mut buf = [0u8; MAX_FIELD_WIDTH];
        write_le(value, &mut buf[..spec.width]);
        self.block.write(spec.offset, &buf[..spec.width])?;
        if !self.settle.is_zero() {
            self.delay.pause(self.settle);
        }
        Ok(())
    }

    fn read_small(&self, field: Field) -> Result<u64> {
        // Metadata and result registers are at most 64 bits wide in every
        // revision.
        Ok(self.read_field(field)? as u64)
    }

    fn read_optional(&self, field: Field) -> Result<Option<u64>> {
        match self.read_small(field) {
            Ok(value) => Ok(Some(value)),
            Err(BridgeError::FieldNotInLayout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Reads the metadata registers.
    pub fn read_metadata(&self) -> Result<CoreMetadata> {
        Ok(CoreMetadata {
            cores_count: self.read_small(Field::CoresCount)?,
            fixed_size: self.read_small(Field::FixedSize)?,
            fixed_integer_size: self.read_small(Field::FixedIntegerSize)?,
            iterations_size: self.read_optional(Field::IterationsSize)?,
            cores_status_size: self.read_optional(Field::CoresStatusSize)?,
        })
    }

    /// Number of cores reported by the metadata registers.
    ///
    /// The value is not capped: see [`select_core`](Self::select_core) for
    /// the cores that can actually be addressed.
    pub fn cores_count(&self) -> Result<u64> {
        self.read_small(Field::CoresCount)
    }

    fn check_core(&self, core: usize) -> Result<()> {
        let reported = self.cores_count()?;
        let addressable = self.version.max_cores() as u64;
        let count = reported.min(addressable);
        if core as u64 >= count {
            return Err(BridgeError::InvalidCore { core, count });
        }
        Ok(())
    }

    /// Points `core_address` at `core`.
    ///
    /// `core` must be below the reported core count and addressable by the
    /// layout's status vectors.
    pub fn select_core(&mut self, core: usize) -> Result<()> {
        self.check_core(core)?;
        self.write_field(Field::CoreAddress, core as u128)
    }

    /// Current value of `core_address`.
    pub fn selected_core(&self) -> Result<u128> {
        self.read_field(Field::CoreAddress)
    }

    /// Acknowledgement of the last issued command.
    pub fn command_status(&self) -> Result<CommandStatus> {
        Ok(CommandStatus::from_raw(self.read_field(Field::CommandStatus)?))
    }

    /// Last value written to the `command` register.
    pub fn last_command(&self) -> Result<u128> {
        self.read_field(Field::Command)
    }

    /// Writes `command` and returns the control block's acknowledgement.
    ///
    /// The acknowledgement only says whether the command was accepted. Work
    /// started by the command completes asynchronously.
    pub fn issue_command(&mut self, command: Command) -> Result<CommandStatus> {
        if command == Command::Reset && !cfg!(feature = "reset_command") {
            return Err(BridgeError::UnsupportedCommand(command));
        }
        self.write_field(Field::Command, u128::from(command.code()))?;
        self.command_status()
    }

    fn expect_success(&mut self, command: Command) -> Result<()> {
        let status = self.issue_command(command)?;
        if !status.is_success() {
            return Err(BridgeError::CommandRejected { command, status });
        }
        Ok(())
    }

    /// Writes the inputs of the next computation.
    ///
    /// Coordinates are truncated to the register width. The iteration bound
    /// must fit its register.
    pub fn load_parameters(&mut self, params: &CoreParams) -> Result<()> {
        self.write_field_signed(Field::CoreX, params.x)?;
        self.write_field_signed(Field::CoreY, params.y)?;
        self.write_field(Field::CoreMaxIterations, u128::from(params.max_iterations))
    }

    fn read_flags(&self, field: Field) -> Result<FlagVector> {
        let mut buf = [0u8; MAX_FIELD_WIDTH];
        let width = self.read_field_bytes(field, &mut buf)?;
        Ok(FlagVector::from_bytes(&buf[..width]))
    }

    /// Busy bits of every core. On a live cluster this read is a poll.
    pub fn busy_flags(&self) -> Result<FlagVector> {
        self.read_flags(Field::CoresBusyFlag)
    }

    /// Valid bits of every core.
    pub fn valid_flags(&self) -> Result<FlagVector> {
        self.read_flags(Field::CoresValidFlag)
    }

    fn check_addressable(&self, core: usize) -> Result<()> {
        let addressable = self.version.max_cores();
        if core >= addressable {
            return Err(BridgeError::InvalidCore {
                core,
                count: addressable as u64,
            });
        }
        Ok(())
    }

    /// Busy bit of `core`.
    pub fn core_busy(&self, core: usize) -> Result<bool> {
        self.check_addressable(core)?;
        Ok(self.busy_flags()?.get(core))
    }

    /// Valid bit of `core`.
    pub fn core_valid(&self, core: usize) -> Result<bool> {
        self.check_addressable(core)?;
        Ok(self.valid_flags()?.get(core))
    }

    /// Polls the busy bit of `core` until it clears.
    ///
    /// Each poll is one read of `cores_busy_flag`. Returns on the first read
    /// that shows the bit clear, or fails once the poller's policy gives up.
    pub fn poll_until_idle<C: Clock, W: Delay>(
        &self,
        core: usize,
        poller: &mut Poller<'_, C, W>,
    ) -> Result<PollReport> {
        self.check_addressable(core)?;
        poller.poll_until(core, || Ok(!self.busy_flags()?.get(core)))
    }

    /// Selects `core` and reads its result registers.
    ///
    /// The registers can be read at any time. They are only meaningful once
    /// the core is no longer busy; that ordering is up to the caller.
    pub fn read_result(&mut self, core: usize) -> Result<CoreResult> {
        self.select_core(core)?;
        self.read_echo()
    }

    /// The echo registers of whichever core `core_address` selects.
    fn read_echo(&self) -> Result<CoreResult> {
        Ok(CoreResult {
            result: self.read_small(Field::CoreResult)?,
            busy: self.read_field(Field::CoreBusy)? != 0,
            valid: self.read_field(Field::CoreValid)? != 0,
        })
    }

    /// Selects `core`, asks the control block to load its output and reads
    /// the result registers.
    ///
    /// Nothing is written between the acknowledged `LoadResult` and the
    /// reads, so the echo registers are the ones the command loaded.
    pub fn load_result(&mut self, core: usize) -> Result<CoreResult> {
        self.select_core(core)?;
        self.expect_success(Command::LoadResult)?;
        self.read_echo()
    }

    /// Runs one computation on `core` from start to result.
    pub fn run_core<C: Clock, W: Delay>(
        &mut self,
        core: usize,
        params: &CoreParams,
        poller: &mut Poller<'_, C, W>,
    ) -> Result<CoreRun> {
        self.select_core(core)?;
        self.load_parameters(params)?;
        self.expect_success(Command::Start)?;
        let poll = self.poll_until_idle(core, poller)?;
        let result = self.load_result(core)?;
        Ok(CoreRun { result, poll })
    }

    /// Resets `core`.
    ///
    /// The hardware contract of the reset command is unconfirmed.
    #[cfg(feature = "reset_command")]
    pub fn reset_core(&mut self, core: usize) -> Result<CommandStatus> {
        self.select_core(core)?;
        self.issue_command(Command::Reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{PollPolicy, TickClock};
    use crate::regs::MemoryBlock;
    use crate::sim::{SimConfig, SimulatedCluster};
    use alloc::vec::Vec;

    #[derive(Default)]
    struct CountingDelay {
        pauses: u32,
        total: Duration,
    }

    impl Delay for CountingDelay {
        fn pause(&mut self, interval: Duration) {
            self.pauses += 1;
            self.total += interval;
        }
    }

    /// Memory block that remembers the offset of every write.
    struct RecordingBlock {
        inner: MemoryBlock,
        writes: Vec<usize>,
    }

    impl RegisterBlock for RecordingBlock {
        fn span(&self) -> usize {
            self.inner.span()
        }

        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
            self.inner.read(offset, buf)
        }

        fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
            self.writes.push(offset);
            self.inner.write(offset, data)
        }
    }

    fn poller() -> Poller<'static, TickClock, SpinDelay> {
        Poller::new(
            PollPolicy::SPIN.with_max_polls(100),
            TickClock::new(Duration::ZERO),
            SpinDelay,
        )
    }

    fn sentinel_block(version: LayoutVersion) -> MemoryBlock {
        let mut block = MemoryBlock::new(version.default_span());
        for spec in version.fields() {
            let mut bytes = [0u8; MAX_FIELD_WIDTH];
            for (i, byte) in bytes[..spec.width].iter_mut().enumerate() {
                *byte = (spec.offset as u8).wrapping_add(i as u8) | 0x01;
            }
            block.write(spec.offset, &bytes[..spec.width]).unwrap();
        }
        block
    }

    #[test]
    fn rejects_span_smaller_than_layout() {
        let block = MemoryBlock::new(0x80);
        let err = RegisterBridge::new(block, LayoutVersion::V3).err();
        assert_eq!(
            err,
            Some(BridgeError::SpanTooSmall {
                version: LayoutVersion::V3,
                span: 0x80,
                required: 144
            })
        );
    }

    #[test]
    fn reads_fields_at_layout_offsets() {
        for version in LayoutVersion::ALL {
            let block = sentinel_block(version);
            let raw = block.as_bytes().to_vec();
            let bridge = RegisterBridge::new(block, version).unwrap();
            for spec in version.fields() {
                let expected = read_le(&raw[spec.offset..spec.end()]);
                assert_eq!(
                    bridge.read_field(spec.field).unwrap(),
                    expected,
                    "{version} {}",
                    spec.field
                );
            }
        }
    }

    #[test]
    fn write_field_checks_width() {
        let mut bridge = RegisterBridge::new(MemoryBlock::new(0x80), LayoutVersion::V2).unwrap();
        bridge.write_field(Field::CoreMaxIterations, 10_000_000).unwrap();
        assert_eq!(bridge.read_field(Field::CoreMaxIterations).unwrap(), 10_000_000);
        assert_eq!(
            bridge.write_field(Field::CoreMaxIterations, 1 << 32),
            Err(BridgeError::ValueOutOfRange {
                field: Field::CoreMaxIterations,
                value: 1 << 32,
                bits: 32
            })
        );
    }

    #[test]
    fn signed_coordinates_are_truncated_to_width() {
        let mut bridge = RegisterBridge::new(MemoryBlock::new(0x80), LayoutVersion::V2).unwrap();
        bridge.write_field_signed(Field::CoreX, -1).unwrap();
        assert_eq!(bridge.read_field(Field::CoreX).unwrap(), 0xffff_ffff);
        assert_eq!(bridge.read_field(Field::CoreMaxIterations).unwrap(), 0);
    }

    #[test]
    fn missing_metadata_reads_as_none() {
        let mut block = MemoryBlock::new(LayoutVersion::V3.default_span());
        block.write(0, &[4, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let bridge = RegisterBridge::new(block, LayoutVersion::V3).unwrap();
        let meta = bridge.read_metadata().unwrap();
        assert_eq!(meta.cores_count, 4);
        assert_eq!(meta.iterations_size, None);
        assert_eq!(meta.cores_status_size, None);
        assert_eq!(
            bridge.read_field(Field::IterationsSize),
            Err(BridgeError::FieldNotInLayout {
                field: Field::IterationsSize,
                version: LayoutVersion::V3
            })
        );
    }

    #[test]
    fn select_core_validates_against_core_count() {
        let mut block = MemoryBlock::new(0x80);
        block.write(0, &[2, 0, 0, 0]).unwrap();
        let mut bridge = RegisterBridge::new(block, LayoutVersion::V2).unwrap();
        bridge.select_core(1).unwrap();
        assert_eq!(bridge.selected_core().unwrap(), 1);
        assert_eq!(
            bridge.select_core(2),
            Err(BridgeError::InvalidCore { core: 2, count: 2 })
        );
        assert_eq!(bridge.selected_core().unwrap(), 1);
    }

    #[test]
    fn select_core_is_bounded_by_status_vector_width() {
        let mut block = MemoryBlock::new(LayoutVersion::V1.default_span());
        block.write(0, &[200, 0, 0, 0]).unwrap();
        let mut bridge = RegisterBridge::new(block, LayoutVersion::V1).unwrap();
        assert_eq!(
            bridge.select_core(8),
            Err(BridgeError::InvalidCore { core: 8, count: 8 })
        );
    }

    #[cfg(not(feature = "reset_command"))]
    #[test]
    fn reset_requires_feature() {
        let mut bridge = RegisterBridge::new(MemoryBlock::new(0x80), LayoutVersion::V2).unwrap();
        assert_eq!(
            bridge.issue_command(Command::Reset),
            Err(BridgeError::UnsupportedCommand(Command::Reset))
        );
        assert_eq!(bridge.last_command().unwrap(), 0);
    }

    #[test]
    fn read_result_decodes_the_echo_registers() {
        for version in LayoutVersion::ALL {
            let max_cores = version.max_cores();
            for core in [0, 1, max_cores - 1] {
                let mut block = sentinel_block(version);
                let count = version.spec(Field::CoresCount).unwrap();
                let mut bytes = [0u8; MAX_FIELD_WIDTH];
                write_le(max_cores as u128, &mut bytes[..count.width]);
                block.write(count.offset, &bytes[..count.width]).unwrap();
                let valid = version.spec(Field::CoreValid).unwrap();
                block.write(valid.offset, &[0u8; MAX_FIELD_WIDTH][..valid.width]).unwrap();

                let result = version.spec(Field::CoreResult).unwrap();
                let expected = read_le(&block.as_bytes()[result.offset..result.end()]) as u64;

                let mut bridge = RegisterBridge::new(block, version).unwrap();
                let got = bridge.read_result(core).unwrap();
                assert_eq!(
                    got,
                    CoreResult {
                        result: expected,
                        busy: true,
                        valid: false
                    },
                    "{version} core {core}"
                );
                assert_eq!(bridge.selected_core().unwrap(), core as u128);
            }
        }
    }

    #[test]
    fn load_result_reads_without_writing_after_the_command() {
        let version = LayoutVersion::V2;
        let mut inner = MemoryBlock::new(version.default_span());
        inner.write(0, &[4, 0, 0, 0]).unwrap();
        let result = version.spec(Field::CoreResult).unwrap();
        inner.write(result.offset, &42u32.to_le_bytes()).unwrap();
        let block = RecordingBlock {
            inner,
            writes: Vec::new(),
        };

        let mut bridge = RegisterBridge::new(block, version).unwrap();
        let loaded = bridge.load_result(2).unwrap();
        assert_eq!(loaded.result, 42);

        let offset = |field| version.spec(field).unwrap().offset;
        assert_eq!(
            bridge.block().writes,
            [offset(Field::CoreAddress), offset(Field::Command)]
        );
    }

    #[test]
    fn every_write_waits_for_the_settle_time() {
        let sim = SimulatedCluster::new(SimConfig::new(LayoutVersion::V2).with_busy_polls(2));
        let mut bridge = RegisterBridge::new(sim, LayoutVersion::V2)
            .unwrap()
            .with_settle(Duration::from_nanos(20))
            .with_delay(CountingDelay::default());
        let params = CoreParams {
            x: 0,
            y: 0,
            max_iterations: 10,
        };
        bridge.run_core(1, &params, &mut poller()).unwrap();

        // core_address, x, y, max_iterations, Start, core_address, LoadResult.
        assert_eq!(bridge.delay.pauses, 7);
        assert_eq!(bridge.delay.total, Duration::from_nanos(140));
        assert_eq!(bridge.block().commands(), 2);
    }

    #[test]
    fn blocks_without_settle_time_never_pause() {
        let sim = SimulatedCluster::new(SimConfig::new(LayoutVersion::V1));
        let mut bridge = RegisterBridge::new(sim, LayoutVersion::V1)
            .unwrap()
            .with_delay(CountingDelay::default());
        assert!(bridge.settle().is_zero());
        bridge.select_core(0).unwrap();
        bridge.issue_command(Command::Nop).unwrap();
        assert_eq!(bridge.delay.pauses, 0);
    }
}
