//! Radio state cache
//!
//! A typed mirror of what the radio has reported. Entries are written only
//! from confirmed responses handed over by the transaction engine, never
//! from the value a caller asked for: the FT-991A may clamp or round a
//! write, and the cache must hold what the radio says it did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::cat::catalog::{self, Binding, CommandDef, Effect, Value};
use crate::cat::Response;
use crate::domain::{
    CatError, CatResult, Frequency, MemoryRecord, Mode, RepeaterShift, ToneMode, Vfo,
};

/// A piece of radio state the cache can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    VfoAFrequency,
    VfoBFrequency,
    OperatingMode,
    ActiveVfo,
    ActiveMemoryChannel,
    TxPower,
    Split,
    Transmit,
    ToneMode,
    RepeaterShift,
    RadioId,
    MemoryChannel(u16),
    MemoryTag(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Frequency(Frequency),
    Mode(Mode),
    Vfo(Vfo),
    Channel(u16),
    /// Watts
    Power(u8),
    Flag(bool),
    Tone(ToneMode),
    Shift(RepeaterShift),
    Id(u16),
    Memory(MemoryRecord),
    Tag(String),
}

impl StateValue {
    pub fn frequency(&self) -> Option<Frequency> {
        match self {
            StateValue::Frequency(f) => Some(*f),
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            StateValue::Mode(m) => Some(*m),
            _ => None,
        }
    }

    pub fn flag(&self) -> Option<bool> {
        match self {
            StateValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryRecord> {
        match self {
            StateValue::Memory(record) => Some(record),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            StateValue::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

impl StateKey {
    /// The catalog mnemonic that reads (and, if writable, writes) this key.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            StateKey::VfoAFrequency => "FA",
            StateKey::VfoBFrequency => "FB",
            StateKey::OperatingMode => "MD0",
            StateKey::ActiveVfo => "VS",
            StateKey::ActiveMemoryChannel => "MC",
            StateKey::TxPower => "PC",
            StateKey::Split => "ST",
            StateKey::Transmit => "TX",
            StateKey::ToneMode => "CT0",
            StateKey::RepeaterShift => "OS0",
            StateKey::RadioId => "ID",
            StateKey::MemoryChannel(_) => "MR",
            StateKey::MemoryTag(_) => "MT",
        }
    }

    pub fn command_def(&self) -> CatResult<&'static CommandDef> {
        catalog::lookup(self.mnemonic())
    }

    /// Address values sent with a read of this key.
    pub fn address(&self) -> Vec<Value> {
        match self {
            StateKey::MemoryChannel(n) | StateKey::MemoryTag(n) => vec![Value::Int(u64::from(*n))],
            _ => Vec::new(),
        }
    }

    /// Wire values for writing `value` to this key.
    pub fn write_values(&self, value: &StateValue) -> CatResult<Vec<Value>> {
        let values = match (self, value) {
            (StateKey::VfoAFrequency | StateKey::VfoBFrequency, StateValue::Frequency(f)) => {
                vec![Value::Int(f.as_hz())]
            }
            (StateKey::OperatingMode, StateValue::Mode(m)) => vec![Value::Code(m.code())],
            (StateKey::ActiveVfo, StateValue::Vfo(vfo)) => vec![Value::Int(match vfo {
                Vfo::A => 0,
                Vfo::B => 1,
            })],
            (StateKey::ActiveMemoryChannel, StateValue::Channel(n)) => {
                vec![Value::Int(u64::from(*n))]
            }
            (StateKey::TxPower, StateValue::Power(w)) => vec![Value::Int(u64::from(*w))],
            (StateKey::Split | StateKey::Transmit, StateValue::Flag(on)) => {
                vec![Value::Int(u64::from(*on))]
            }
            (StateKey::ToneMode, StateValue::Tone(t)) => vec![Value::Int(t.digit())],
            (StateKey::RepeaterShift, StateValue::Shift(s)) => vec![Value::Int(s.digit())],
            (StateKey::MemoryTag(n), StateValue::Tag(tag)) => {
                vec![Value::Int(u64::from(*n)), Value::Text(tag.clone())]
            }
            (StateKey::RadioId | StateKey::MemoryChannel(_), _) => {
                return Err(CatError::Unsupported(format!(
                    "{self:?} is read-only; memory channels are written through a channel plan"
                )));
            }
            (key, value) => {
                return Err(CatError::validation(
                    format!("{key:?}"),
                    format!("{value:?} is the wrong kind of value"),
                ));
            }
        };
        Ok(values)
    }
}

/// Turn a confirmed answer into the state it confirms.
pub fn confirmed_state(def: &CommandDef, values: &[Value]) -> Option<(StateKey, StateValue)> {
    let int = |i: usize| match values.get(i) {
        Some(Value::Int(v)) => Some(*v),
        _ => None,
    };
    let code = |i: usize| match values.get(i) {
        Some(Value::Code(c)) => Some(*c),
        _ => None,
    };
    let channel = |i: usize| int(i).and_then(|v| u16::try_from(v).ok());

    let confirmed = match def.binding {
        Binding::VfoAFrequency => (
            StateKey::VfoAFrequency,
            StateValue::Frequency(Frequency::hz(int(0)?)),
        ),
        Binding::VfoBFrequency => (
            StateKey::VfoBFrequency,
            StateValue::Frequency(Frequency::hz(int(0)?)),
        ),
        Binding::Mode => (
            StateKey::OperatingMode,
            StateValue::Mode(Mode::from_code(code(0)?)?),
        ),
        Binding::ActiveVfo => (
            StateKey::ActiveVfo,
            StateValue::Vfo(if int(0)? == 0 { Vfo::A } else { Vfo::B }),
        ),
        Binding::MemorySelect => (StateKey::ActiveMemoryChannel, StateValue::Channel(channel(0)?)),
        Binding::Power => (
            StateKey::TxPower,
            StateValue::Power(u8::try_from(int(0)?).ok()?),
        ),
        Binding::Split => (StateKey::Split, StateValue::Flag(int(0)? != 0)),
        Binding::Transmit => (StateKey::Transmit, StateValue::Flag(int(0)? != 0)),
        Binding::Tone => (
            StateKey::ToneMode,
            StateValue::Tone(ToneMode::from_digit(int(0)?)?),
        ),
        Binding::Shift => (
            StateKey::RepeaterShift,
            StateValue::Shift(RepeaterShift::from_digit(int(0)?)?),
        ),
        Binding::Identity => (
            StateKey::RadioId,
            StateValue::Id(u16::try_from(int(0)?).ok()?),
        ),
        Binding::MemoryRecord => (
            StateKey::MemoryChannel(channel(0)?),
            StateValue::Memory(MemoryRecord {
                frequency: Frequency::hz(int(1)?),
                mode: Mode::from_code(code(5)?)?,
                tone: ToneMode::from_digit(int(7)?)?,
                shift: RepeaterShift::from_digit(int(9)?)?,
            }),
        ),
        Binding::MemoryTag => match values.get(1) {
            Some(Value::Text(tag)) => (StateKey::MemoryTag(channel(0)?), StateValue::Tag(tag.clone())),
            _ => return None,
        },
        Binding::Nothing => return None,
    };
    Some(confirmed)
}

/// A cached value with its confirmation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed {
    pub value: StateValue,
    /// Monotonic per cache; later confirmations have larger numbers
    pub sequence: u64,
    pub confirmed_at: Instant,
    /// Set by `invalidate`; the value is the last one confirmed, not a guess
    pub stale: bool,
}

impl Confirmed {
    pub fn age(&self) -> Duration {
        self.confirmed_at.elapsed()
    }
}

/// Shared mirror of confirmed radio state.
///
/// Written only by the transaction engine; read by anyone. Readers take a
/// shared lock and get a clone, so they never see a half-applied update.
#[derive(Debug, Default)]
pub struct RadioStateCache {
    entries: RwLock<HashMap<StateKey, Confirmed>>,
    sequence: AtomicU64,
}

impl RadioStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last confirmed value for `key`, stale or not.
    pub fn get(&self, key: StateKey) -> Option<Confirmed> {
        self.read_entries().get(&key).cloned()
    }

    /// Last confirmed value for `key` if it has not been invalidated.
    pub fn value(&self, key: StateKey) -> Option<StateValue> {
        self.get(key).filter(|c| !c.stale).map(|c| c.value)
    }

    pub fn snapshot(&self) -> HashMap<StateKey, Confirmed> {
        self.read_entries().clone()
    }

    /// Sequence number of the most recent confirmation (0 if none yet).
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self, key: StateKey) {
        if let Some(entry) = self.write_entries().get_mut(&key) {
            entry.stale = true;
        }
    }

    pub fn invalidate_where(&self, pred: impl Fn(&StateKey) -> bool) {
        for (key, entry) in self.write_entries().iter_mut() {
            if pred(key) {
                entry.stale = true;
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.invalidate_where(|_| true);
    }

    /// Record the state a response confirms. Engine only.
    pub(crate) fn on_response(&self, response: &Response) {
        let Response::Values { command, values } = response else {
            return;
        };
        let Some((key, value)) = confirmed_state(command.def(), values) else {
            return;
        };
        let mut entries = self.write_entries();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("state: {key:?} = {value:?} (#{sequence})");
        entries.insert(
            key,
            Confirmed {
                value,
                sequence,
                confirmed_at: Instant::now(),
                stale: false,
            },
        );
    }

    /// Mark what an acknowledged execute command may have changed.
    pub(crate) fn apply_effect(&self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Invalidates(keys) => {
                for key in keys {
                    self.invalidate(*key);
                }
            }
            Effect::InvalidatesMemory => match self.value(StateKey::ActiveMemoryChannel) {
                Some(StateValue::Channel(n)) => self.invalidate(StateKey::MemoryChannel(n)),
                _ => self.invalidate_where(|k| matches!(k, StateKey::MemoryChannel(_))),
            },
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<StateKey, Confirmed>> {
        // Entries are plain data; a panicked writer cannot leave them torn.
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<StateKey, Confirmed>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
