//! Core domain types
//!
//! Pure types with no I/O dependencies: frequencies, operating modes and the
//! small enumerations the FT-991A reports over CAT.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CatError, CatResult};

/// Frequency in Hz. CAT carries whole hertz, so this is an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frequency(pub u64);

impl Frequency {
    pub fn hz(hz: u64) -> Self {
        Self(hz)
    }

    pub fn khz(khz: u64) -> Self {
        Self(khz * 1_000)
    }

    pub fn mhz(mhz: u64) -> Self {
        Self(mhz * 1_000_000)
    }

    pub fn as_hz(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06} MHz", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

/// Accepts `"145.5M"`, `"14313K"` or plain hertz `"7127000"`.
impl FromStr for Frequency {
    type Err = CatError;

    fn from_str(s: &str) -> CatResult<Self> {
        let s = s.trim();
        let (number, scale_digits) = match s.chars().last() {
            Some('M') | Some('m') => (&s[..s.len() - 1], 6),
            Some('K') | Some('k') => (&s[..s.len() - 1], 3),
            _ => (s, 0),
        };
        parse_scaled(number, scale_digits)
            .map(Frequency)
            .ok_or_else(|| CatError::validation("frequency", format!("cannot parse '{s}'")))
    }
}

/// Decimal parse without going through floats, so "145.5M" is exact.
fn parse_scaled(number: &str, scale_digits: u32) -> Option<u64> {
    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    // Sub-hertz precision cannot be expressed on the wire.
    if frac_part.len() > scale_digits as usize {
        return None;
    }
    let int_value: u64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let frac_value: u64 = if frac_part.is_empty() { 0 } else { frac_part.parse().ok()? };
    let frac_scale = 10u64.pow(scale_digits - frac_part.len() as u32);
    int_value
        .checked_mul(10u64.pow(scale_digits))?
        .checked_add(frac_value * frac_scale)
}

/// FT-991A operating modes. The CAT code is a single hex-like character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Lsb,
    Usb,
    Cw,
    Fm,
    Am,
    RttyLsb,
    CwR,
    DataLsb,
    RttyUsb,
    DataFm,
    FmN,
    DataUsb,
    AmN,
    C4fm,
}

/// Single source of truth for FT-991A mode code ↔ mode mapping.
const MODE_TABLE: &[(char, Mode, &str)] = &[
    ('1', Mode::Lsb, "LSB"),
    ('2', Mode::Usb, "USB"),
    ('3', Mode::Cw, "CW"),
    ('4', Mode::Fm, "FM"),
    ('5', Mode::Am, "AM"),
    ('6', Mode::RttyLsb, "RTTY-LSB"),
    ('7', Mode::CwR, "CW-R"),
    ('8', Mode::DataLsb, "DATA-LSB"),
    ('9', Mode::RttyUsb, "RTTY-USB"),
    ('A', Mode::DataFm, "DATA-FM"),
    ('B', Mode::FmN, "FM-N"),
    ('C', Mode::DataUsb, "DATA-USB"),
    ('D', Mode::AmN, "AM-N"),
    ('E', Mode::C4fm, "C4FM"),
];

impl Mode {
    pub fn code(&self) -> char {
        MODE_TABLE
            .iter()
            .find(|(_, m, _)| m == self)
            .map(|(c, _, _)| *c)
            .unwrap_or('2')
    }

    pub fn from_code(code: char) -> Option<Mode> {
        MODE_TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, m, _)| *m)
    }

    pub fn name(&self) -> &'static str {
        MODE_TABLE
            .iter()
            .find(|(_, m, _)| m == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("USB")
    }

    /// Every CAT mode code, in table order.
    pub fn codes() -> impl Iterator<Item = char> {
        MODE_TABLE.iter().map(|(c, _, _)| *c)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = CatError;

    fn from_str(s: &str) -> CatResult<Self> {
        MODE_TABLE
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(_, m, _)| *m)
            .ok_or_else(|| CatError::validation("mode", format!("unknown mode name '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vfo {
    A,
    B,
}

/// CTCSS / DCS squelch setting (`CT0` and the tone digit of `MR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToneMode {
    Off,
    CtcssEncDec,
    CtcssEnc,
    DcsEncDec,
    DcsEnc,
}

impl ToneMode {
    pub fn digit(&self) -> u64 {
        match self {
            ToneMode::Off => 0,
            ToneMode::CtcssEncDec => 1,
            ToneMode::CtcssEnc => 2,
            ToneMode::DcsEncDec => 3,
            ToneMode::DcsEnc => 4,
        }
    }

    pub fn from_digit(digit: u64) -> Option<Self> {
        match digit {
            0 => Some(ToneMode::Off),
            1 => Some(ToneMode::CtcssEncDec),
            2 => Some(ToneMode::CtcssEnc),
            3 => Some(ToneMode::DcsEncDec),
            4 => Some(ToneMode::DcsEnc),
            _ => None,
        }
    }
}

/// FM repeater offset direction (`OS0` and the shift digit of `MR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepeaterShift {
    Simplex,
    Plus,
    Minus,
}

impl RepeaterShift {
    pub fn digit(&self) -> u64 {
        match self {
            RepeaterShift::Simplex => 0,
            RepeaterShift::Plus => 1,
            RepeaterShift::Minus => 2,
        }
    }

    pub fn from_digit(digit: u64) -> Option<Self> {
        match digit {
            0 => Some(RepeaterShift::Simplex),
            1 => Some(RepeaterShift::Plus),
            2 => Some(RepeaterShift::Minus),
            _ => None,
        }
    }
}

/// The radio-side contents of one memory slot as reported by `MR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub frequency: Frequency,
    pub mode: Mode,
    pub tone: ToneMode,
    pub shift: RepeaterShift,
}

/// Information about a serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub name: String,
    pub port_type: String,
}
