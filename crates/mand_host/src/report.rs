//! Register file listings for `meta` and `inspect`.

use anyhow::Result;
use mand_common::protocol::CommandStatus;
use mand_core::bit_utils::sign_extend;
use mand_core::bridge::RegisterBridge;
use mand_core::layout::{Field, FieldSpec};
use mand_core::mandelbrot::CoordFormat;
use mand_core::poll::Delay;
use mand_core::regs::RegisterBlock;
use tracing::warn;

/// Prints every register of the bridge's layout in table order.
///
/// Writable registers are marked `rw`, the rest `ro`. Coordinates are shown
/// both as raw signed bits and, when the metadata names a known format, as
/// decimals.
pub fn print_registers<B: RegisterBlock, D: Delay>(bridge: &RegisterBridge<B, D>) -> Result<()> {
    let version = bridge.version();
    let meta = bridge.read_metadata()?;
    let format = match meta.coord_format() {
        Ok(format) => Some(format),
        Err(err) => {
            warn!("coordinates shown as raw bits: {err}");
            None
        }
    };

    println!("Register file {version} ({} bytes)", version.size());
    for spec in version.fields() {
        let raw = bridge.read_field(spec.field)?;
        println!(
            "  {:<20} @{:#05x} {}  {}",
            spec.field.name(),
            spec.offset,
            if spec.field.is_writable() { "rw" } else { "ro" },
            describe(spec, raw, format)
        );
    }
    Ok(())
}

fn describe(spec: &FieldSpec, raw: u128, format: Option<CoordFormat>) -> String {
    match spec.field {
        Field::CoresBusyFlag | Field::CoresValidFlag => {
            format!("0b{raw:0width$b}", width = spec.bits() as usize)
        }
        Field::CommandStatus => format!("{:?} ({raw})", CommandStatus::from_raw(raw)),
        Field::CoreX | Field::CoreY => {
            let value = sign_extend(raw, spec.bits());
            match format {
                Some(format) => format!("{value} ({:.9})", format.to_f64(value)),
                None => value.to_string(),
            }
        }
        _ => raw.to_string(),
    }
}
