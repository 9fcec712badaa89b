//! Parsers for the literals used to configure a computation.
//!
//! Numbers are decimal or `0x` hexadecimal with optional `_` separators.
//! Coordinates are either decimal literals such as `-0.65`, rounded to the
//! cluster's fixed-point format, or raw `0x` bits. Point files hold one
//! `x y max_iterations` triple per line; blank lines and `#` comments are
//! skipped.

use anyhow::{Context, Result, anyhow, bail, ensure};
use mand_core::bit_utils::{low_mask, sign_extend};
use mand_core::mandelbrot::CoordFormat;
use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while, take_while1};
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::sequence::{pair, preceded, tuple};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One line of a point file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i128,
    pub y: i128,
    pub max_iterations: u64,
}

enum Literal<'a> {
    Hex(&'a str),
    Decimal(&'a str),
}

fn hex_digits(input: &str) -> IResult<&str, &str> {
    preceded(
        tag_no_case("0x"),
        take_while1(|c: char| c.is_ascii_hexdigit() || c == '_'),
    )(input)
}

fn decimal_digits(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        digit1,
        take_while(|c: char| c.is_ascii_digit() || c == '_'),
    ))(input)
}

fn unsigned_literal(input: &str) -> IResult<&str, Literal<'_>> {
    alt((
        map(hex_digits, Literal::Hex),
        map(decimal_digits, Literal::Decimal),
    ))(input)
}

fn decimal_fixed(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(one_of("+-")),
        decimal_digits,
        opt(preceded(char('.'), digit1)),
    )))(input)
}

fn fixed_literal(input: &str) -> IResult<&str, Literal<'_>> {
    alt((
        map(hex_digits, Literal::Hex),
        map(decimal_fixed, Literal::Decimal),
    ))(input)
}

fn digits_value(digits: &str, radix: u32) -> Result<u128> {
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    ensure!(!cleaned.is_empty(), "no digits");
    u128::from_str_radix(&cleaned, radix).with_context(|| format!("{digits} is out of range"))
}

/// Parses a decimal or `0x` hexadecimal number.
pub fn parse_unsigned(text: &str) -> Result<u128> {
    let text = text.trim();
    let (_, literal) = all_consuming(unsigned_literal)(text)
        .map_err(|err| anyhow!("invalid number {text:?}: {err}"))?;
    let value = match literal {
        Literal::Hex(digits) => digits_value(digits, 16),
        Literal::Decimal(digits) => digits_value(digits, 10),
    };
    value.with_context(|| format!("invalid number {text:?}"))
}

/// [`parse_unsigned`] limited to 64 bits, usable as a `clap` value parser.
pub fn parse_u64(text: &str) -> Result<u64> {
    let value = parse_unsigned(text)?;
    u64::try_from(value).with_context(|| format!("{text} does not fit 64 bits"))
}

/// Parses a coordinate into raw fixed-point bits of `format`.
///
/// Decimal literals are rounded to the nearest value of `format` and must
/// lie inside its range. Hexadecimal literals are taken as the raw register
/// bits and sign-extended from the format width.
pub fn parse_fixed(text: &str, format: CoordFormat) -> Result<i128> {
    let text = text.trim();
    let (_, literal) = all_consuming(fixed_literal)(text)
        .map_err(|err| anyhow!("invalid coordinate {text:?}: {err}"))?;

    match literal {
        Literal::Hex(digits) => {
            let total = format.total_bits();
            let raw = digits_value(digits, 16)?;
            ensure!(
                raw & !low_mask(total) == 0,
                "{text} does not fit {total} bits"
            );
            Ok(sign_extend(raw, total))
        }
        Literal::Decimal(decimal) => {
            let cleaned: String = decimal
                .trim_start_matches('+')
                .chars()
                .filter(|&c| c != '_')
                .collect();
            format
                .parse_decimal(&cleaned)
                .map_err(|err| anyhow!("invalid {format} coordinate {text:?}: {err}"))
        }
    }
}

/// Parses one line of a point file. Blank and comment lines give `None`.
pub fn parse_point_line(line: &str, format: CoordFormat) -> Result<Option<Point>> {
    let content = line.split('#').next().unwrap_or_default().trim();
    if content.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = content.split_whitespace().collect();
    let [x, y, max_iterations] = parts.as_slice() else {
        bail!(
            "expected `x y max_iterations`, found {} fields",
            parts.len()
        );
    };

    Ok(Some(Point {
        x: parse_fixed(x, format)?,
        y: parse_fixed(y, format)?,
        max_iterations: parse_u64(max_iterations)?,
    }))
}

/// Reads every point from `reader`.
pub fn read_points<R: BufRead>(reader: R, format: CoordFormat) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let point =
            parse_point_line(&line, format).with_context(|| format!("line {}", index + 1))?;
        points.extend(point);
    }
    Ok(points)
}

/// Loads a point file for batch runs.
pub fn load_points_file<P: AsRef<Path>>(path: P, format: CoordFormat) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let file = File::open(path).context("Failed to open points file")?;
    read_points(BufReader::new(file), format)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
