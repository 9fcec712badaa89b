use anyhow::{Context, Result, anyhow, ensure};
use mand_core::layout::LayoutVersion;
use mand_core::regs::{MemoryBlock, RegisterBlock};
use nom::IResult;
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u8, le_u32};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Leading bytes of every snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"MANDREGS";

/// A captured register file together with its layout revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: LayoutVersion,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    /// Copies the register file of `version` out of `block`.
    ///
    /// Reads the registers in one access starting at offset zero. On a live
    /// cluster this counts as a poll of the busy vector.
    pub fn capture<B: RegisterBlock + ?Sized>(block: &B, version: LayoutVersion) -> Result<Self> {
        let mut bytes = vec![0u8; version.size()];
        block
            .read(0, &mut bytes)
            .context("Failed to read the register file")?;
        Ok(Self { version, bytes })
    }

    /// Turns the snapshot into a register block the bridge can decode.
    pub fn into_block(self) -> MemoryBlock {
        MemoryBlock::from_bytes(self.bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = u32::try_from(self.bytes.len()).context("register snapshot too large")?;
        let mut out = Vec::with_capacity(SNAPSHOT_MAGIC.len() + 5 + self.bytes.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.push(u8::from(self.version));
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.bytes);
        Ok(out)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        let (rest, (version, bytes)) =
            snapshot(input).map_err(|err| anyhow!("malformed register snapshot: {err:?}"))?;
        ensure!(
            rest.is_empty(),
            "{} trailing bytes after the register snapshot",
            rest.len()
        );

        let version = LayoutVersion::try_from(version)
            .with_context(|| format!("snapshot layout byte {version}"))?;
        ensure!(
            bytes.len() >= version.size(),
            "snapshot holds {} bytes but the {version} register file needs {}",
            bytes.len(),
            version.size()
        );

        Ok(Self {
            version,
            bytes: bytes.to_vec(),
        })
    }
}

fn snapshot(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, _) = tag(&SNAPSHOT_MAGIC[..])(input)?;
    let (input, version) = le_u8(input)?;
    let (input, len) = le_u32(input)?;
    let (input, bytes) = take(len)(input)?;
    Ok((input, (version, bytes)))
}

/// Writes a snapshot file.
pub fn save_snapshot<P: AsRef<Path>>(path: P, snapshot: &Snapshot) -> Result<()> {
    let encoded = snapshot.encode()?;
    let mut file = File::create(path).context("Failed to create snapshot file")?;
    file.write_all(&encoded)?;
    Ok(())
}

/// Reads a snapshot file.
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Snapshot> {
    let mut file = File::open(path).context("Failed to open snapshot file")?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Snapshot::decode(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: LayoutVersion) -> Snapshot {
        Snapshot {
            version,
            bytes: (0..version.size()).map(|i| i as u8).collect(),
        }
    }

    #[test]
    fn header_layout() {
        let encoded = sample(LayoutVersion::V2).encode().unwrap();
        assert_eq!(&encoded[..8], b"MANDREGS");
        assert_eq!(encoded[8], 2);
        assert_eq!(&encoded[9..13], &88u32.to_le_bytes());
        assert_eq!(encoded.len(), 13 + 88);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let snapshot = sample(LayoutVersion::V3);
        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn rejects_damaged_input() {
        let good = sample(LayoutVersion::V1).encode().unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(Snapshot::decode(&bad_magic).is_err());

        assert!(Snapshot::decode(&good[..good.len() - 1]).is_err());

        let mut trailing = good.clone();
        trailing.push(0);
        assert!(Snapshot::decode(&trailing).is_err());

        let mut unknown_version = good.clone();
        unknown_version[8] = 9;
        assert!(Snapshot::decode(&unknown_version).is_err());
    }

    #[test]
    fn rejects_short_register_files() {
        let short = Snapshot {
            version: LayoutVersion::V2,
            bytes: vec![0; 40],
        };
        assert!(Snapshot::decode(&short.encode().unwrap()).is_err());
    }
}
