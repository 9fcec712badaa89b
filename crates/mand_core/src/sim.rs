use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use mand_common::protocol::{Command, CommandStatus};

use crate::bit_utils::{BitPack, MAX_FIELD_WIDTH, read_le, sign_extend, write_le};
use crate::error::Result;
use crate::layout::{Field, FieldSpec, LayoutVersion};
use crate::mandelbrot::{self, CoordFormat};
use crate::regs::{RegisterBlock, check_bounds};

/// Shape and timing of a simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub version: LayoutVersion,
    /// Window size reported to the bridge.
    pub span: usize,
    pub cores_count: u64,
    pub fixed_size: u64,
    pub fixed_integer_size: u64,
    pub iterations_size: u64,
    pub cores_status_size: u64,
    /// Busy reads a computation lasts before the core finishes.
    pub busy_polls: u64,
    /// Result reported instead of the reference model's iteration count.
    ///
    /// Without it, a computation in a coordinate format the reference model
    /// does not know finishes with a zero result and the valid bit clear.
    pub forced_result: Option<u64>,
}

impl SimConfig {
    /// Defaults matching the hardware build of each revision.
    pub fn new(version: LayoutVersion) -> Self {
        let (fixed_size, iterations_size) = match version {
            LayoutVersion::V1 | LayoutVersion::V2 => (32, 32),
            LayoutVersion::V3 => (128, 64),
        };
        Self {
            version,
            span: version.default_span(),
            cores_count: 4.min(version.max_cores() as u64),
            fixed_size,
            fixed_integer_size: 5,
            iterations_size,
            cores_status_size: version.max_cores() as u64,
            busy_polls: 16,
            forced_result: None,
        }
    }

    pub fn with_span(mut self, span: usize) -> Self {
        self.span = span;
        self
    }

    /// Number of cores, capped by the width of the status vectors.
    pub fn with_cores(mut self, cores: u64) -> Self {
        self.cores_count = cores.min(self.version.max_cores() as u64);
        self
    }

    pub fn with_busy_polls(mut self, polls: u64) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn with_forced_result(mut self, result: u64) -> Self {
        self.forced_result = Some(result);
        self
    }

    /// Format the reference model computes in, if the configured sizes name
    /// one.
    pub fn coord_format(&self) -> Option<CoordFormat> {
        CoordFormat::from_sizes(self.fixed_size, self.fixed_integer_size).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoreState {
    Idle,
    Busy { remaining: u64 },
}

#[derive(Debug, Clone, Copy)]
struct SimCore {
    state: CoreState,
    valid: bool,
    result: u64,
    params: (i128, i128, u64),
}

impl SimCore {
    const RESET: SimCore = SimCore {
        state: CoreState::Idle,
        valid: false,
        result: 0,
        params: (0, 0, 0),
    };

    fn is_busy(&self) -> bool {
        matches!(self.state, CoreState::Busy { .. })
    }
}

/// Snapshot of one simulated core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCoreState {
    pub busy: bool,
    pub valid: bool,
    pub result: u64,
}

/// A cluster control block simulated over an in-memory register file.
///
/// Writable registers keep what software writes. Read-only registers are
/// republished from the simulated state after every access, so writes to
/// them have no lasting effect, like on the hardware.
pub struct SimulatedCluster {
    config: SimConfig,
    regs: RefCell<Vec<u8>>,
    cores: RefCell<Vec<SimCore>>,
    status: Cell<CommandStatus>,
    polls: Cell<u64>,
    commands: u64,
}

impl SimulatedCluster {
    pub fn new(config: SimConfig) -> Self {
        let len = config.span.max(config.version.size());
        let cores = vec![SimCore::RESET; config.cores_count as usize];
        let sim = Self {
            regs: RefCell::new(vec![0; len]),
            cores: RefCell::new(cores),
            status: Cell::new(CommandStatus::Success),
            polls: Cell::new(0),
            commands: 0,
            config,
        };
        sim.publish();
        sim
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Number of reads that covered `cores_busy_flag`.
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }

    /// Number of writes to the `command` register.
    pub fn commands(&self) -> u64 {
        self.commands
    }

    pub fn core_state(&self, core: usize) -> Option<SimCoreState> {
        self.cores.borrow().get(core).map(|c| SimCoreState {
            busy: c.is_busy(),
            valid: c.valid,
            result: c.result,
        })
    }

    fn spec(&self, field: Field) -> Option<FieldSpec> {
        self.config.version.spec(field)
    }

    fn load(&self, field: Field) -> u128 {
        let Some(spec) = self.spec(field) else {
            return 0;
        };
        read_le(&self.regs.borrow()[spec.offset..spec.end()])
    }

    fn store(&self, field: Field, value: u128) {
        if let Some(spec) = self.spec(field) {
            write_le(value, &mut self.regs.borrow_mut()[spec.offset..spec.end()]);
        }
    }

    fn load_signed(&self, field: Field) -> i128 {
        let bits = self.spec(field).map_or(0, |spec| spec.bits());
        sign_extend(self.load(field), bits)
    }

    /// Rewrites every read-only register from the simulated state.
    fn publish(&self) {
        let config = &self.config;
        self.store(Field::CoresCount, u128::from(config.cores_count));
        self.store(Field::FixedSize, u128::from(config.fixed_size));
        self.store(Field::FixedIntegerSize, u128::from(config.fixed_integer_size));
        self.store(Field::IterationsSize, u128::from(config.iterations_size));
        self.store(Field::CoresStatusSize, u128::from(config.cores_status_size));
        self.store(Field::CommandStatus, self.status.get().raw());

        let cores = self.cores.borrow();
        let mut busy = [0u8; MAX_FIELD_WIDTH];
        let mut valid = [0u8; MAX_FIELD_WIDTH];
        for (index, core) in cores.iter().enumerate() {
            BitPack::set(&mut busy, index, core.is_busy());
            BitPack::set(&mut valid, index, core.valid);
        }
        for (field, bits) in [(Field::CoresBusyFlag, &busy), (Field::CoresValidFlag, &valid)] {
            if let Some(spec) = self.spec(field) {
                self.regs.borrow_mut()[spec.offset..spec.end()]
                    .copy_from_slice(&bits[..spec.width]);
            }
        }

        let selected = usize::try_from(self.load(Field::CoreAddress))
            .ok()
            .and_then(|address| cores.get(address).copied());
        let (result, busy, valid) = selected.map_or((0, false, false), |core| {
            (core.result, core.is_busy(), core.valid)
        });
        self.store(Field::CoreResult, u128::from(result));
        self.store(Field::CoreBusy, u128::from(busy));
        self.store(Field::CoreValid, u128::from(valid));
    }

    /// Advances every busy core by one poll.
    fn tick(&self) {
        self.polls.set(self.polls.get() + 1);
        let format = self.config.coord_format();
        let forced = self.config.forced_result;
        for core in self.cores.borrow_mut().iter_mut() {
            match core.state {
                CoreState::Busy { remaining: 0 } => {
                    let (x, y, max_iterations) = core.params;
                    let computed = forced.or_else(|| {
                        format.map(|f| mandelbrot::escape_iterations(x, y, f, max_iterations))
                    });
                    core.result = computed.unwrap_or(0);
                    core.valid = computed.is_some();
                    core.state = CoreState::Idle;
                }
                CoreState::Busy { remaining } => {
                    core.state = CoreState::Busy {
                        remaining: remaining - 1,
                    };
                }
                CoreState::Idle => {}
            }
        }
    }

    fn execute(&mut self, raw: u128) {
        self.commands += 1;
        let address = self.load(Field::CoreAddress);
        let params = (
            self.load_signed(Field::CoreX),
            self.load_signed(Field::CoreY),
            self.load(Field::CoreMaxIterations) as u64,
        );
        let busy_polls = self.config.busy_polls;

        let mut cores = self.cores.borrow_mut();
        let status = match usize::try_from(address).ok().and_then(|a| cores.get_mut(a)) {
            None => CommandStatus::InvalidCore,
            Some(core) => match Command::from_code(raw) {
                Some(Command::Nop) => CommandStatus::Success,
                Some(Command::LoadResult) if core.is_busy() => CommandStatus::CoreBusy,
                Some(Command::LoadResult) => CommandStatus::Success,
                Some(Command::Start) if core.is_busy() => CommandStatus::CoreBusy,
                Some(Command::Start) => {
                    core.params = params;
                    core.valid = false;
                    core.state = CoreState::Busy {
                        remaining: busy_polls,
                    };
                    CommandStatus::Success
                }
                Some(Command::Reset) => {
                    *core = SimCore::RESET;
                    CommandStatus::Success
                }
                None => CommandStatus::InvalidCommand,
            },
        };
        drop(cores);
        self.status.set(status);
    }
}

impl RegisterBlock for SimulatedCluster {
    fn span(&self) -> usize {
        self.config.span
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.config.span)?;
        let polled = self
            .spec(Field::CoresBusyFlag)
            .is_some_and(|spec| spec.overlaps(offset, buf.len()));
        if polled {
            self.tick();
        }
        self.publish();
        buf.copy_from_slice(&self.regs.borrow()[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.config.span)?;
        self.regs.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
        let commanded = self
            .spec(Field::Command)
            .is_some_and(|spec| spec.overlaps(offset, data.len()));
        if commanded {
            let raw = self.load(Field::Command);
            self.execute(raw);
        }
        self.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CoreParams, RegisterBridge};
    use crate::error::BridgeError;

    fn bridge(config: SimConfig) -> RegisterBridge<SimulatedCluster> {
        let version = config.version;
        RegisterBridge::new(SimulatedCluster::new(config), version).unwrap()
    }

    #[test]
    fn publishes_metadata() {
        for version in LayoutVersion::ALL {
            let bridge = bridge(SimConfig::new(version).with_cores(3));
            let meta = bridge.read_metadata().unwrap();
            assert_eq!(meta.cores_count, 3);
            assert_eq!(meta.fixed_integer_size, 5);
            assert_eq!(meta.iterations_size.is_some(), version != LayoutVersion::V3);
        }
    }

    #[test]
    fn start_sets_busy_and_latches_parameters() {
        let mut bridge = bridge(SimConfig::new(LayoutVersion::V2).with_busy_polls(2));
        bridge.select_core(1).unwrap();
        bridge
            .load_parameters(&CoreParams {
                x: 0,
                y: 0,
                max_iterations: 50,
            })
            .unwrap();
        assert_eq!(bridge.issue_command(Command::Start), Ok(CommandStatus::Success));
        assert_eq!(bridge.last_command().unwrap(), 2);
        assert!(bridge.core_busy(1).unwrap());
        assert!(!bridge.core_busy(0).unwrap());
        assert_eq!(bridge.issue_command(Command::Start), Ok(CommandStatus::CoreBusy));
        assert_eq!(bridge.issue_command(Command::LoadResult), Ok(CommandStatus::CoreBusy));

        // Third poll sees the core done.
        assert!(!bridge.core_busy(1).unwrap());
        assert!(bridge.core_valid(1).unwrap());
        let state = bridge.block().core_state(1).unwrap();
        assert_eq!(state.result, 50);
    }

    #[test]
    fn unknown_command_and_core_are_rejected() {
        let mut bridge = bridge(SimConfig::new(LayoutVersion::V1).with_cores(2));
        bridge.write_field(Field::Command, 9).unwrap();
        assert_eq!(bridge.command_status(), Ok(CommandStatus::InvalidCommand));

        // Bypasses select_core validation on purpose.
        bridge.write_field(Field::CoreAddress, 5).unwrap();
        bridge.write_field(Field::Command, 2).unwrap();
        assert_eq!(bridge.command_status(), Ok(CommandStatus::InvalidCore));
        assert_eq!(bridge.block().commands(), 2);
    }

    #[test]
    fn read_only_registers_ignore_writes() {
        let mut bridge = bridge(SimConfig::new(LayoutVersion::V2).with_cores(4));
        bridge.write_field(Field::CoresCount, 99).unwrap();
        assert_eq!(bridge.cores_count(), Ok(4));
    }

    #[test]
    fn echo_registers_follow_core_address() {
        let mut bridge = bridge(
            SimConfig::new(LayoutVersion::V3)
                .with_busy_polls(0)
                .with_forced_result(7),
        );
        bridge.select_core(2).unwrap();
        bridge.issue_command(Command::Start).unwrap();
        assert!(!bridge.core_busy(2).unwrap());

        let done = bridge.read_result(2).unwrap();
        assert_eq!((done.result, done.busy, done.valid), (7, false, true));
        let other = bridge.read_result(0).unwrap();
        assert_eq!((other.result, other.busy, other.valid), (0, false, false));
    }

    #[test]
    fn unknown_coordinate_format_finishes_invalid() {
        let mut config = SimConfig::new(LayoutVersion::V2).with_busy_polls(0);
        config.fixed_size = 24;
        assert_eq!(config.coord_format(), None);
        let mut bridge = bridge(config);
        bridge.select_core(0).unwrap();
        bridge.issue_command(Command::Start).unwrap();
        assert!(!bridge.core_busy(0).unwrap());
        assert!(!bridge.core_valid(0).unwrap());
        assert_eq!(bridge.block().core_state(0).unwrap().result, 0);
    }

    #[test]
    fn span_checked_against_simulated_window() {
        let sim = SimulatedCluster::new(SimConfig::new(LayoutVersion::V3).with_span(0x80));
        assert!(matches!(
            RegisterBridge::new(sim, LayoutVersion::V3),
            Err(BridgeError::SpanTooSmall { .. })
        ));
    }

    #[cfg(feature = "reset_command")]
    #[test]
    fn reset_clears_core() {
        let mut bridge = bridge(SimConfig::new(LayoutVersion::V2).with_busy_polls(100));
        bridge.select_core(0).unwrap();
        bridge.issue_command(Command::Start).unwrap();
        assert!(bridge.core_busy(0).unwrap());
        assert_eq!(bridge.reset_core(0), Ok(CommandStatus::Success));
        assert!(!bridge.core_busy(0).unwrap());
        assert!(!bridge.core_valid(0).unwrap());
    }
}
