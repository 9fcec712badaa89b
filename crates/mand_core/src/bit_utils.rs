use bitvec::prelude::*;

/// Widest register of any layout, in bytes.
pub const MAX_FIELD_WIDTH: usize = 16;

pub struct BitPack;

impl BitPack {
    /// Reads bit `index` of a little-endian register, LSB first.
    ///
    /// Bits past the end of the register read as zero.
    #[inline(always)]
    pub fn get(storage: &[u8], index: usize) -> bool {
        storage
            .view_bits::<Lsb0>()
            .get(index)
            .is_some_and(|bit| *bit)
    }

    #[inline(always)]
    pub fn set(storage: &mut [u8], index: usize, val: bool) {
        storage.view_bits_mut::<Lsb0>().set(index, val);
    }

    #[inline(always)]
    pub fn count_ones(storage: &[u8]) -> usize {
        storage.view_bits::<Lsb0>().count_ones()
    }

    pub fn ones(storage: &[u8]) -> impl Iterator<Item = usize> + '_ {
        storage.view_bits::<Lsb0>().iter_ones()
    }
}

/// Decodes up to 16 little-endian bytes into an integer.
#[inline]
pub fn read_le(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .take(MAX_FIELD_WIDTH)
        .rev()
        .fold(0u128, |acc, &byte| (acc << 8) | u128::from(byte))
}

/// Encodes the low `out.len()` bytes of `value` in little-endian order.
#[inline]
pub fn write_le(value: u128, out: &mut [u8]) {
    let bytes = value.to_le_bytes();
    let len = out.len().min(MAX_FIELD_WIDTH);
    out[..len].copy_from_slice(&bytes[..len]);
}

/// Mask of the low `bits` bits.
#[inline]
pub const fn low_mask(bits: u32) -> u128 {
    if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 }
}

/// Interprets the low `bits` bits of `raw` as a two's-complement value.
#[inline]
pub const fn sign_extend(raw: u128, bits: u32) -> i128 {
    if bits == 0 {
        return 0;
    }
    if bits >= 128 {
        return raw as i128;
    }
    let shift = 128 - bits;
    ((raw << shift) as i128) >> shift
}

/// A per-core status vector as read from `cores_busy_flag` or
/// `cores_valid_flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagVector {
    bytes: [u8; MAX_FIELD_WIDTH],
    width: usize,
}

impl FlagVector {
    /// Wraps raw register bytes. Anything past 16 bytes is ignored.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let width = raw.len().min(MAX_FIELD_WIDTH);
        let mut bytes = [0u8; MAX_FIELD_WIDTH];
        bytes[..width].copy_from_slice(&raw[..width]);
        Self { bytes, width }
    }

    /// Whether the bit of core `index` is set.
    pub fn get(&self, index: usize) -> bool {
        BitPack::get(self.as_bytes(), index)
    }

    /// Number of cores the vector describes.
    pub const fn bits(&self) -> usize {
        self.width * 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.width]
    }

    /// The vector as an integer, bit `i` belonging to core `i`.
    pub fn mask(&self) -> u128 {
        read_le(self.as_bytes())
    }

    pub fn count(&self) -> usize {
        BitPack::count_ones(self.as_bytes())
    }

    /// Indices of the cores whose bit is set.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        BitPack::ones(self.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn reference_bit(bytes: &[u8], i: usize) -> bool {
        (bytes[i / 8] >> (i % 8)) & 1 == 1
    }

    #[test]
    fn get_matches_byte_reference_for_every_core() {
        let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
        for _ in 0..64 {
            let mut bytes = [0u8; 16];
            rng.fill(&mut bytes[..]);
            let flags = FlagVector::from_bytes(&bytes);
            for i in 0..128 {
                assert_eq!(flags.get(i), reference_bit(&bytes, i), "bit {i} of {bytes:02x?}");
                assert_eq!((flags.mask() >> i) & 1 == 1, reference_bit(&bytes, i));
            }
        }
    }

    #[test]
    fn single_byte_vector() {
        let flags = FlagVector::from_bytes(&[0b1000_0101]);
        assert_eq!(flags.bits(), 8);
        assert!(flags.get(0));
        assert!(!flags.get(1));
        assert!(flags.get(2));
        assert!(flags.get(7));
        assert!(!flags.get(8));
        assert_eq!(flags.count(), 3);
        let set: alloc::vec::Vec<usize> = flags.iter_set().collect();
        assert_eq!(set, [0, 2, 7]);
    }

    #[test]
    fn set_then_get() {
        let mut bytes = [0u8; 16];
        BitPack::set(&mut bytes, 127, true);
        BitPack::set(&mut bytes, 9, true);
        assert_eq!(bytes[15], 0x80);
        assert_eq!(bytes[1], 0x02);
        BitPack::set(&mut bytes, 9, false);
        assert_eq!(bytes[1], 0);
        assert!(BitPack::get(&bytes, 127));
    }

    #[test]
    fn little_endian_packing() {
        let mut out = [0u8; 4];
        write_le(0x1234_5678, &mut out);
        assert_eq!(out, [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(read_le(&out), 0x1234_5678);
        assert_eq!(read_le(&[0xff; 16]), u128::MAX);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xffff_ffff, 32), -1);
        assert_eq!(sign_extend(0x7fff_ffff, 32), i32::MAX as i128);
        assert_eq!(sign_extend(0x8000_0000, 32), i32::MIN as i128);
        assert_eq!(sign_extend(u128::MAX, 128), -1);
        assert_eq!(low_mask(8), 0xff);
        assert_eq!(low_mask(128), u128::MAX);
    }
}
