use core::fmt;
use core::str::FromStr;

use fixed::ParseFixedError;
use fixed::traits::Fixed;
use fixed::types::{I5F3, I5F11, I5F27, I5F59, I5F123};

use crate::error::{BridgeError, Result};

/// Integer bits, sign included, of every coordinate format the cores are
/// built with.
pub const COORD_INTEGER_BITS: u64 = 5;

/// Fixed-point format of the coordinate registers.
///
/// The cores are synthesized with five integer bits and a total width of 8,
/// 16, 32, 64 or 128 bits. Each variant names the matching `fixed` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordFormat {
    I5F3,
    I5F11,
    I5F27,
    I5F59,
    I5F123,
}

/// Conversion between a `fixed` type and raw register bits.
trait RawBits: Fixed {
    fn from_raw(raw: i128) -> Self;
    fn into_raw(self) -> i128;
}

macro_rules! raw_bits {
    ($($ty:ty => $bits:ty),* $(,)?) => {$(
        impl RawBits for $ty {
            #[inline]
            fn from_raw(raw: i128) -> Self {
                Self::from_bits(raw as $bits)
            }

            #[inline]
            fn into_raw(self) -> i128 {
                i128::from(self.to_bits())
            }
        }
    )*};
}

raw_bits!(I5F3 => i8, I5F11 => i16, I5F27 => i32, I5F59 => i64, I5F123 => i128);

/// Calls the generic `$func` with the `fixed` type of `$format`.
macro_rules! with_coord_type {
    ($format:expr, $func:ident($($arg:expr),*)) => {
        match $format {
            CoordFormat::I5F3 => $func::<I5F3>($($arg),*),
            CoordFormat::I5F11 => $func::<I5F11>($($arg),*),
            CoordFormat::I5F27 => $func::<I5F27>($($arg),*),
            CoordFormat::I5F59 => $func::<I5F59>($($arg),*),
            CoordFormat::I5F123 => $func::<I5F123>($($arg),*),
        }
    };
}

impl CoordFormat {
    pub const ALL: [CoordFormat; 5] = [
        CoordFormat::I5F3,
        CoordFormat::I5F11,
        CoordFormat::I5F27,
        CoordFormat::I5F59,
        CoordFormat::I5F123,
    ];

    /// Format with `fixed_size` total and `integer_size` integer bits, as
    /// reported by the metadata registers.
    pub fn from_sizes(fixed_size: u64, integer_size: u64) -> Result<Self> {
        let unsupported = BridgeError::UnsupportedFormat {
            fixed_size,
            integer_size,
        };
        if integer_size != COORD_INTEGER_BITS {
            return Err(unsupported);
        }
        Self::ALL
            .into_iter()
            .find(|format| u64::from(format.total_bits()) == fixed_size)
            .ok_or(unsupported)
    }

    pub const fn total_bits(self) -> u32 {
        match self {
            CoordFormat::I5F3 => 8,
            CoordFormat::I5F11 => 16,
            CoordFormat::I5F27 => 32,
            CoordFormat::I5F59 => 64,
            CoordFormat::I5F123 => 128,
        }
    }

    pub const fn frac_bits(self) -> u32 {
        self.total_bits() - COORD_INTEGER_BITS as u32
    }

    /// Parses a decimal literal such as `-0.65` into raw register bits.
    ///
    /// The value is rounded to the nearest representable coordinate. Values
    /// outside the format's range are an error.
    pub fn parse_decimal(self, text: &str) -> core::result::Result<i128, ParseFixedError> {
        with_coord_type!(self, parse_raw(text))
    }

    /// Raw register bits as a float, for display.
    pub fn to_f64(self, raw: i128) -> f64 {
        with_coord_type!(self, raw_to_f64(raw))
    }

    /// Raw register bits nearest to `value`, or `None` if it is out of range.
    pub fn from_f64(self, value: f64) -> Option<i128> {
        with_coord_type!(self, raw_from_f64(value))
    }
}

impl fmt::Display for CoordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}F{}", COORD_INTEGER_BITS, self.frac_bits())
    }
}

fn parse_raw<T: RawBits>(text: &str) -> core::result::Result<i128, ParseFixedError> {
    T::from_str(text).map(T::into_raw)
}

fn raw_to_f64<T: RawBits>(raw: i128) -> f64 {
    T::from_raw(raw).to_num::<f64>()
}

fn raw_from_f64<T: RawBits>(value: f64) -> Option<i128> {
    T::checked_from_num(value).map(T::into_raw)
}

fn escape_raw<T: RawBits>(x0: i128, y0: i128, max_iterations: u64) -> u64 {
    escape_time(T::from_raw(x0), T::from_raw(y0), max_iterations)
}

/// Escape-time iteration count of `c = x0 + i*y0` in the fixed-point type
/// `T`.
///
/// Starting from `z = 0` every iteration first checks `|z|^2 > 4` and
/// returns the iteration index if so, then steps `z = z^2 + c`. A point that
/// never escapes returns `max_iterations`. An intermediate that overflows `T`
/// counts as an escape at that iteration.
///
/// `T` needs at least four integer bits; narrower types saturate the bound.
pub fn escape_time<T: Fixed>(x0: T, y0: T, max_iterations: u64) -> u64 {
    let bound = T::saturating_from_num(4);
    let two = T::saturating_from_num(2);

    let mut x = T::saturating_from_num(0);
    let mut y = T::saturating_from_num(0);

    for iteration in 0..max_iterations {
        let Some((next_x, next_y)) = step(x, y, x0, y0, bound, two) else {
            return iteration;
        };
        x = next_x;
        y = next_y;
    }

    max_iterations
}

/// One iteration, or `None` once the orbit has escaped.
#[inline]
fn step<T: Fixed>(x: T, y: T, x0: T, y0: T, bound: T, two: T) -> Option<(T, T)> {
    let x_s = x.checked_mul(x)?;
    let y_s = y.checked_mul(y)?;
    if x_s.checked_add(y_s)? > bound {
        return None;
    }

    let next_x = x_s.checked_sub(y_s)?.checked_add(x0)?;
    let next_y = two.checked_mul(x)?.checked_mul(y)?.checked_add(y0)?;
    Some((next_x, next_y))
}

/// Escape-time iteration count of the point `(x0, y0)`.
///
/// `x0` and `y0` are the raw two's-complement bits written to `core_x` and
/// `core_y`. They are reinterpreted at the width of `format`, so the model
/// computes at the same precision as the cores.
pub fn escape_iterations(x0: i128, y0: i128, format: CoordFormat, max_iterations: u64) -> u64 {
    with_coord_type!(format, escape_raw(x0, y0, max_iterations))
}
