//! `dump` and `inspect`: register file snapshots.

use std::path::Path;

use anyhow::{Context, Result};
use mand_core::bridge::RegisterBridge;
use mand_io::loader::{Snapshot, load_snapshot, save_snapshot};
use tracing::info;

use crate::backend::{self, DeviceArgs};
use crate::report::print_registers;

/// Saves the live register file to `out`.
pub fn dump(device: &DeviceArgs, out: &Path) -> Result<()> {
    let bridge = backend::open(device)?;
    let snapshot = Snapshot::capture(bridge.block(), bridge.version())?;
    save_snapshot(out, &snapshot)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(path = %out.display(), bytes = snapshot.bytes.len(), "register snapshot saved");
    println!(
        "Saved {} bytes of the {} register file to {}",
        snapshot.bytes.len(),
        snapshot.version,
        out.display()
    );
    backend::release(bridge)
}

/// Decodes a snapshot file without touching the device.
pub fn inspect(from: &Path) -> Result<()> {
    let snapshot =
        load_snapshot(from).with_context(|| format!("Failed to read {}", from.display()))?;
    let version = snapshot.version;
    let bridge = RegisterBridge::new(snapshot.into_block(), version)?;
    print_registers(&bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        device: DeviceArgs,
    }

    #[test]
    fn dump_then_inspect() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.bin");
        let harness = Harness::parse_from(["test", "--sim", "--layout", "v3"]);
        dump(&harness.device, &path).unwrap();

        let snapshot = load_snapshot(&path).unwrap();
        assert_eq!(snapshot.bytes.len(), 144);
        inspect(&path).unwrap();
    }

    #[test]
    fn inspect_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(inspect(&dir.path().join("missing.bin")).is_err());
    }
}
