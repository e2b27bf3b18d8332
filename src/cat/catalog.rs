//! Static FT-991A command catalog.
//!
//! Every CAT command the engine can send is one `CommandDef` in `CATALOG`.
//! A descriptor says which directions the mnemonic supports, the grammar of
//! its parameters and answer, and which piece of radio state an answer
//! confirms. Encoding, validation and answer parsing are all driven from
//! this table, so no other module carries its own copy of the grammar.
//!
//! Pure data plus pure functions: no I/O, no mutable state.

use std::fmt;

use crate::domain::{CatError, CatResult};
use crate::state::StateKey;

/// One typed parameter value, before formatting / after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(u64),
    Signed(i64),
    Code(char),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Signed(v) => write!(f, "{v:+}"),
            Value::Code(c) => write!(f, "{c}"),
            Value::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// Value domain of a single parameter. Every domain has a fixed wire width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Zero-padded decimal in `min..=max`
    Range { width: usize, min: u64, max: u64 },
    /// Zero-padded decimal hertz inside one of the tunable ranges
    Bands {
        width: usize,
        bands: &'static [(u64, u64)],
    },
    /// `+` or `-` followed by zero-padded digits
    Signed { digits: usize, max: u64 },
    /// One character from a closed set
    Codes(&'static [char]),
    /// Printable ASCII, right-padded with spaces
    Text { width: usize },
    /// Filler the radio always sends verbatim
    Literal(&'static str),
}

impl Domain {
    pub fn width(&self) -> usize {
        match self {
            Domain::Range { width, .. } | Domain::Bands { width, .. } => *width,
            Domain::Signed { digits, .. } => digits + 1,
            Domain::Codes(_) => 1,
            Domain::Text { width } => *width,
            Domain::Literal(text) => text.len(),
        }
    }

    fn check(&self, field: &str, value: &Value) -> CatResult<()> {
        match (self, value) {
            (Domain::Range { min, max, .. }, Value::Int(v)) => {
                if v < min || v > max {
                    return Err(CatError::validation(
                        field,
                        format!("{v} is outside {min}..={max}"),
                    ));
                }
            }
            (Domain::Bands { bands, .. }, Value::Int(v)) => {
                if !bands.iter().any(|&(lo, hi)| *v >= lo && *v <= hi) {
                    return Err(CatError::validation(
                        field,
                        format!("{v} Hz is outside the tunable ranges"),
                    ));
                }
            }
            (Domain::Signed { max, .. }, Value::Signed(v)) => {
                if v.unsigned_abs() > *max {
                    return Err(CatError::validation(
                        field,
                        format!("{v} is outside -{max}..={max}"),
                    ));
                }
            }
            (Domain::Codes(codes), Value::Code(c)) => {
                if !codes.contains(c) {
                    let set: String = codes.iter().collect();
                    return Err(CatError::validation(
                        field,
                        format!("code '{c}' is not one of {set}"),
                    ));
                }
            }
            (Domain::Text { width }, Value::Text(s)) => {
                if s.len() > *width {
                    return Err(CatError::validation(
                        field,
                        format!("'{s}' is longer than {width} characters"),
                    ));
                }
                if let Some(bad) = s.chars().find(|c| !is_text_char(*c)) {
                    return Err(CatError::validation(
                        field,
                        format!("character {bad:?} cannot be sent over CAT"),
                    ));
                }
                // The radio pads with spaces, so a trailing space would not survive.
                if s.ends_with(' ') {
                    return Err(CatError::validation(field, "must not end with a space"));
                }
            }
            (Domain::Literal(text), Value::Text(s)) => {
                if s != text {
                    return Err(CatError::validation(field, format!("must be '{text}'")));
                }
            }
            (domain, value) => {
                return Err(CatError::validation(
                    field,
                    format!("{value} does not fit {domain:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Append the wire form of an already checked value.
    fn format_into(&self, value: &Value, out: &mut String) {
        match (self, value) {
            (Domain::Range { width, .. } | Domain::Bands { width, .. }, Value::Int(v)) => {
                out.push_str(&format!("{v:0w$}", w = *width));
            }
            (Domain::Signed { digits, .. }, Value::Signed(v)) => {
                out.push(if *v < 0 { '-' } else { '+' });
                out.push_str(&format!("{:0w$}", v.unsigned_abs(), w = *digits));
            }
            (Domain::Codes(_), Value::Code(c)) => out.push(*c),
            (Domain::Text { width }, Value::Text(s)) => {
                out.push_str(&format!("{s:<w$}", w = *width));
            }
            (Domain::Literal(text), _) => out.push_str(text),
            _ => {}
        }
    }

    /// Parse exactly `self.width()` characters of an answer. Answers are not
    /// range checked: a clamped value is still what the radio reports.
    fn parse(&self, text: &str) -> Result<Value, String> {
        let digits = |t: &str| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit());
        match self {
            Domain::Range { .. } | Domain::Bands { .. } => {
                if !digits(text) {
                    return Err(format!("expected digits, got '{text}'"));
                }
                text.parse::<u64>()
                    .map(Value::Int)
                    .map_err(|e| format!("'{text}': {e}"))
            }
            Domain::Signed { .. } => {
                let (sign, rest) = text.split_at(1);
                if !digits(rest) {
                    return Err(format!("expected signed digits, got '{text}'"));
                }
                let magnitude = rest.parse::<i64>().map_err(|e| format!("'{text}': {e}"))?;
                match sign {
                    "+" => Ok(Value::Signed(magnitude)),
                    "-" => Ok(Value::Signed(-magnitude)),
                    _ => Err(format!("expected '+' or '-', got '{sign}'")),
                }
            }
            Domain::Codes(codes) => match text.chars().next() {
                Some(c) if codes.contains(&c) => Ok(Value::Code(c)),
                _ => Err(format!("unknown code '{text}'")),
            },
            Domain::Text { .. } => Ok(Value::Text(text.trim_end_matches(' ').to_string())),
            Domain::Literal(expected) => {
                if text == *expected {
                    Ok(Value::Text(text.to_string()))
                } else {
                    Err(format!("expected '{expected}', got '{text}'"))
                }
            }
        }
    }
}

fn is_text_char(c: char) -> bool {
    (' '..='~').contains(&c) && c != ';'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub domain: Domain,
}

/// What a mnemonic can do. A closed set: dispatch is by match, not by
/// per-command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Readable and writable. A read sends `address`, a write sends
    /// `address` + `params`, and the answer mirrors `address` + `params`.
    Setting {
        address: &'static [Param],
        params: &'static [Param],
    },
    /// Read-only. `answer` starts with the `address` fields.
    Query {
        address: &'static [Param],
        answer: &'static [Param],
    },
    /// Fire-and-forget action; the radio only speaks up to reject it.
    Execute,
}

/// Which piece of radio state an answer confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    VfoAFrequency,
    VfoBFrequency,
    Mode,
    ActiveVfo,
    MemorySelect,
    Power,
    Split,
    Transmit,
    Tone,
    Shift,
    Identity,
    MemoryRecord,
    MemoryTag,
    Nothing,
}

/// What an execute command does to cached state it cannot confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Invalidates(&'static [StateKey]),
    /// The selected memory channel; every memory channel if the selection
    /// is not known
    InvalidatesMemory,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CommandDef {
    pub mnemonic: &'static str,
    pub name: &'static str,
    pub kind: CommandKind,
    pub binding: Binding,
    pub effect: Effect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
    Execute,
}

/// A catalog descriptor paired with the direction it is used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    def: &'static CommandDef,
    direction: Direction,
}

impl CommandDef {
    pub fn read(&'static self) -> CatResult<Command> {
        match self.kind {
            CommandKind::Setting { .. } | CommandKind::Query { .. } => Ok(Command {
                def: self,
                direction: Direction::Read,
            }),
            CommandKind::Execute => Err(self.unsupported("read")),
        }
    }

    pub fn write(&'static self) -> CatResult<Command> {
        match self.kind {
            CommandKind::Setting { .. } => Ok(Command {
                def: self,
                direction: Direction::Write,
            }),
            _ => Err(self.unsupported("written")),
        }
    }

    pub fn execute(&'static self) -> CatResult<Command> {
        match self.kind {
            CommandKind::Execute => Ok(Command {
                def: self,
                direction: Direction::Execute,
            }),
            _ => Err(self.unsupported("executed")),
        }
    }

    fn unsupported(&self, what: &str) -> CatError {
        CatError::Unsupported(format!("{} ({}) cannot be {what}", self.mnemonic, self.name))
    }

    fn address(&self) -> &'static [Param] {
        match self.kind {
            CommandKind::Setting { address, .. } | CommandKind::Query { address, .. } => address,
            CommandKind::Execute => &[],
        }
    }

    /// Grammar of the radio's answer (also the read-back of a write).
    pub fn answer_params(&self) -> Vec<&'static Param> {
        match self.kind {
            CommandKind::Setting { address, params } => address.iter().chain(params).collect(),
            CommandKind::Query { answer, .. } => answer.iter().collect(),
            CommandKind::Execute => Vec::new(),
        }
    }
}

impl Command {
    pub fn def(&self) -> &'static CommandDef {
        self.def
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mnemonic(&self) -> &'static str {
        self.def.mnemonic
    }

    /// The read used to confirm this command's effect: itself for a read,
    /// the same setting for a write, nothing for an execute.
    pub fn confirming_read(&self) -> Option<Command> {
        match self.direction {
            Direction::Read => Some(*self),
            Direction::Write => Some(Command {
                def: self.def,
                direction: Direction::Read,
            }),
            Direction::Execute => None,
        }
    }

    /// Parameters the caller must supply, in wire order.
    pub fn request_params(&self) -> Vec<&'static Param> {
        match (self.direction, self.def.kind) {
            (Direction::Read, _) => self.def.address().iter().collect(),
            (Direction::Write, CommandKind::Setting { address, params }) => {
                address.iter().chain(params).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Number of leading request values that address the target (e.g. the
    /// memory channel of `MT`). Answers must echo them.
    pub fn address_len(&self) -> usize {
        self.def.address().len()
    }

    /// Format already validated values. Use [`validate`] first.
    pub(crate) fn format_params(&self, values: &[Value]) -> String {
        let mut out = String::new();
        for (param, value) in self.request_params().into_iter().zip(values) {
            param.domain.format_into(value, &mut out);
        }
        out
    }

    /// Parse the parameter text of an answer frame against the grammar.
    pub fn parse_answer(&self, text: &str) -> Result<Vec<Value>, String> {
        let params = self.def.answer_params();
        let expected: usize = params.iter().map(|p| p.domain.width()).sum();
        if !text.is_ascii() {
            return Err(format!("non-ASCII answer for {}", self.def.mnemonic));
        }
        if text.len() != expected {
            return Err(format!(
                "{} answer '{text}' is {} characters, expected {expected}",
                self.def.mnemonic,
                text.len()
            ));
        }
        let mut offset = 0;
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            let width = param.domain.width();
            let field = &text[offset..offset + width];
            let value = param
                .domain
                .parse(field)
                .map_err(|e| format!("{} {}: {e}", self.def.mnemonic, param.name))?;
            values.push(value);
            offset += width;
        }
        Ok(values)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Read => "read",
            Direction::Write => "write",
            Direction::Execute => "execute",
        };
        write!(f, "{verb} {} ({})", self.def.mnemonic, self.def.name)
    }
}

// ---------------------------------------------------------------
// FT-991A parameter grammar
// ---------------------------------------------------------------

/// FT-991A general coverage, in hertz.
pub const TUNABLE_HZ: &[(u64, u64)] = &[
    (30_000, 56_000_000),
    (118_000_000, 164_000_000),
    (420_000_000, 470_000_000),
];

/// Mode codes accepted by `MD0`.
pub const MODE_CODES: &[char] = &[
    '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E',
];

/// Memory channels 001-099 plus the PMS edges P1L..P9U (100-117).
pub const MEMORY_CHANNELS: (u64, u64) = (1, 117);

pub const TAG_WIDTH: usize = 12;

const FREQUENCY: Param = Param {
    name: "frequency",
    domain: Domain::Bands {
        width: 9,
        bands: TUNABLE_HZ,
    },
};
const MODE: Param = Param {
    name: "mode",
    domain: Domain::Codes(MODE_CODES),
};
const CHANNEL: Param = Param {
    name: "channel",
    domain: Domain::Range {
        width: 3,
        min: MEMORY_CHANNELS.0,
        max: MEMORY_CHANNELS.1,
    },
};
const VFO: Param = Param {
    name: "vfo",
    domain: Domain::Range { width: 1, min: 0, max: 1 },
};
const POWER: Param = Param {
    name: "power",
    domain: Domain::Range { width: 3, min: 5, max: 100 },
};
const SPLIT: Param = Param {
    name: "split",
    domain: Domain::Range { width: 1, min: 0, max: 1 },
};
const TRANSMIT: Param = Param {
    name: "transmit",
    domain: Domain::Range { width: 1, min: 0, max: 1 },
};
const TONE: Param = Param {
    name: "tone",
    domain: Domain::Range { width: 1, min: 0, max: 4 },
};
const SHIFT: Param = Param {
    name: "shift",
    domain: Domain::Range { width: 1, min: 0, max: 2 },
};
const RADIO_ID: Param = Param {
    name: "id",
    domain: Domain::Range { width: 4, min: 0, max: 9999 },
};
const TAG: Param = Param {
    name: "tag",
    domain: Domain::Text { width: TAG_WIDTH },
};

/// `MR` answer: channel, frequency, clarifier offset, RX clarifier, TX
/// clarifier, mode, VFO/memory, tone, fixed `00`, shift.
const MEMORY_READ_ANSWER: &[Param] = &[
    CHANNEL,
    FREQUENCY,
    Param {
        name: "clarifier",
        domain: Domain::Signed { digits: 4, max: 9990 },
    },
    Param {
        name: "rx_clarifier",
        domain: Domain::Range { width: 1, min: 0, max: 1 },
    },
    Param {
        name: "tx_clarifier",
        domain: Domain::Range { width: 1, min: 0, max: 1 },
    },
    MODE,
    Param {
        name: "memory_mode",
        domain: Domain::Range { width: 1, min: 0, max: 1 },
    },
    TONE,
    Param {
        name: "reserved",
        domain: Domain::Literal("00"),
    },
    SHIFT,
];

const fn setting(
    mnemonic: &'static str,
    name: &'static str,
    params: &'static [Param],
    binding: Binding,
) -> CommandDef {
    CommandDef {
        mnemonic,
        name,
        kind: CommandKind::Setting { address: &[], params },
        binding,
        effect: Effect::None,
    }
}

const fn execute(mnemonic: &'static str, name: &'static str, effect: Effect) -> CommandDef {
    CommandDef {
        mnemonic,
        name,
        kind: CommandKind::Execute,
        binding: Binding::Nothing,
        effect,
    }
}

static CATALOG: &[CommandDef] = &[
    setting("FA", "VFO-A frequency", &[FREQUENCY], Binding::VfoAFrequency),
    setting("FB", "VFO-B frequency", &[FREQUENCY], Binding::VfoBFrequency),
    setting("MD0", "operating mode", &[MODE], Binding::Mode),
    setting("VS", "VFO select", &[VFO], Binding::ActiveVfo),
    setting("MC", "memory channel", &[CHANNEL], Binding::MemorySelect),
    setting("PC", "RF power", &[POWER], Binding::Power),
    setting("ST", "split", &[SPLIT], Binding::Split),
    setting("TX", "transmit", &[TRANSMIT], Binding::Transmit),
    setting("CT0", "tone mode", &[TONE], Binding::Tone),
    setting("OS0", "repeater shift", &[SHIFT], Binding::Shift),
    CommandDef {
        mnemonic: "ID",
        name: "radio identification",
        kind: CommandKind::Query {
            address: &[],
            answer: &[RADIO_ID],
        },
        binding: Binding::Identity,
        effect: Effect::None,
    },
    CommandDef {
        mnemonic: "MR",
        name: "memory channel read",
        kind: CommandKind::Query {
            address: &[CHANNEL],
            answer: MEMORY_READ_ANSWER,
        },
        binding: Binding::MemoryRecord,
        effect: Effect::None,
    },
    CommandDef {
        mnemonic: "MT",
        name: "memory channel tag",
        kind: CommandKind::Setting {
            address: &[CHANNEL],
            params: &[TAG],
        },
        binding: Binding::MemoryTag,
        effect: Effect::None,
    },
    execute(
        "AB",
        "VFO-A to VFO-B",
        Effect::Invalidates(&[StateKey::VfoBFrequency]),
    ),
    execute(
        "SV",
        "swap VFO",
        Effect::Invalidates(&[
            StateKey::VfoAFrequency,
            StateKey::VfoBFrequency,
            StateKey::OperatingMode,
        ]),
    ),
    execute("AM", "VFO-A to memory channel", Effect::InvalidatesMemory),
];

/// Every command the engine knows.
pub fn catalog() -> &'static [CommandDef] {
    CATALOG
}

/// Look up a descriptor by its mnemonic.
pub fn lookup(mnemonic: &str) -> CatResult<&'static CommandDef> {
    CATALOG
        .iter()
        .find(|def| def.mnemonic == mnemonic)
        .ok_or_else(|| CatError::Unsupported(mnemonic.to_string()))
}

/// Split a frame body into mnemonic and parameter text.
///
/// Uses the longest catalog mnemonic that prefixes the body (`MD02` is
/// `MD0` + `2`); unknown bodies split after their leading letters.
pub fn split_mnemonic(body: &str) -> (&str, &str) {
    let known = CATALOG
        .iter()
        .filter(|def| body.starts_with(def.mnemonic))
        .map(|def| def.mnemonic.len())
        .max();
    let end = known.unwrap_or_else(|| {
        body.find(|c: char| !c.is_ascii_uppercase())
            .unwrap_or(body.len())
    });
    body.split_at(end)
}

/// Check values against a command's declared parameters.
///
/// Reads take only address values (usually none), writes take address +
/// parameters, executes take nothing.
pub fn validate(cmd: &Command, values: &[Value]) -> CatResult<()> {
    let params = cmd.request_params();
    if params.len() != values.len() {
        return Err(CatError::validation(
            cmd.mnemonic(),
            format!(
                "{cmd} takes {} value(s), got {}",
                params.len(),
                values.len()
            ),
        ));
    }
    for (param, value) in params.iter().zip(values) {
        param
            .domain
            .check(&format!("{}.{}", cmd.mnemonic(), param.name), value)?;
    }
    Ok(())
}
