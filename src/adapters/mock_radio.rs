//! Simulated FT-991A for development and testing without hardware.
//!
//! `MockFt991a` is a `Transport` that answers CAT frames the way the radio
//! does: reads answer with the current value, writes are silent, anything
//! it cannot accept answers `?;`. A cloneable `SimulatorHandle` inspects
//! the simulated radio and injects faults (silence, rejections, clamping,
//! line noise, a corrupted memory store, a pulled cable).
//!
//! Every frame the simulator handles is logged at DEBUG level with a
//! `[MOCK RADIO]` prefix.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::cat::catalog::TUNABLE_HZ;
use crate::cat::codec::{Decoded, Frame, FrameCodec};
use crate::domain::{CatError, CatResult, Frequency, MemoryRecord, Mode, RepeaterShift, ToneMode};
use crate::ports::Transport;

/// Default frequency: 20m FT8 calling frequency
const DEFAULT_VFO_A_HZ: u64 = 14_074_000;
const DEFAULT_VFO_B_HZ: u64 = 7_074_000;
/// Default mode: DATA-USB
const DEFAULT_MODE: Mode = Mode::DataUsb;
/// What the FT-991A answers to `ID;`
pub const FT991A_ID: u16 = 670;

/// Offset a corrupted memory store adds to the frequency.
const CORRUPT_OFFSET_HZ: u64 = 5_000;

enum Reply {
    Answer(String),
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    record: MemoryRecord,
    tag: String,
}

#[derive(Debug)]
struct Radio {
    vfo_a: u64,
    vfo_b: u64,
    mode: Mode,
    tone: ToneMode,
    shift: RepeaterShift,
    vfo_b_active: bool,
    selected: u16,
    power: u8,
    split: bool,
    transmitting: bool,
    memory: BTreeMap<u16, Slot>,

    silent: bool,
    echo: bool,
    connected: bool,
    rejected: HashSet<String>,
    frequency_step: Option<u64>,
    corrupt_stores: HashSet<u16>,
    noise: Vec<u8>,
    received: Vec<String>,
    outbox: Vec<u8>,
}

impl Default for Radio {
    fn default() -> Self {
        Self {
            vfo_a: DEFAULT_VFO_A_HZ,
            vfo_b: DEFAULT_VFO_B_HZ,
            mode: DEFAULT_MODE,
            tone: ToneMode::Off,
            shift: RepeaterShift::Simplex,
            vfo_b_active: false,
            selected: 1,
            power: 100,
            split: false,
            transmitting: false,
            memory: BTreeMap::new(),
            silent: false,
            echo: false,
            connected: true,
            rejected: HashSet::new(),
            frequency_step: None,
            corrupt_stores: HashSet::new(),
            noise: Vec::new(),
            received: Vec::new(),
            outbox: Vec::new(),
        }
    }
}

impl Radio {
    /// Handle one frame; `None` means the radio stays silent.
    fn handle(&mut self, frame: &Frame) -> Option<String> {
        if self.rejected.contains(&frame.mnemonic) {
            return Some("?".into());
        }
        match self.respond(&frame.mnemonic, &frame.params) {
            Some(Reply::Answer(answer)) => Some(answer),
            Some(Reply::Silent) => None,
            None => Some("?".into()),
        }
    }

    /// `None` rejects the frame.
    fn respond(&mut self, m: &str, p: &str) -> Option<Reply> {
        let reply = match (m, p) {
            ("FA", "") => Reply::Answer(format!("FA{:09}", self.vfo_a)),
            ("FB", "") => Reply::Answer(format!("FB{:09}", self.vfo_b)),
            ("FA", hz) => {
                self.vfo_a = self.tune(hz)?;
                Reply::Silent
            }
            ("FB", hz) => {
                self.vfo_b = self.tune(hz)?;
                Reply::Silent
            }
            ("MD0", "") => Reply::Answer(format!("MD0{}", self.mode.code())),
            ("MD0", code) => {
                self.mode = single_char(code).and_then(Mode::from_code)?;
                Reply::Silent
            }
            ("VS", "") => Reply::Answer(format!("VS{}", u8::from(self.vfo_b_active))),
            ("VS", v) => {
                self.vfo_b_active = flag(v)?;
                Reply::Silent
            }
            ("MC", "") => Reply::Answer(format!("MC{:03}", self.selected)),
            ("MC", ch) => {
                self.selected = channel(ch)?;
                Reply::Silent
            }
            ("PC", "") => Reply::Answer(format!("PC{:03}", self.power)),
            ("PC", watts) => {
                self.power = digits(watts, 3)?.clamp(5, 100) as u8;
                Reply::Silent
            }
            ("ST", "") => Reply::Answer(format!("ST{}", u8::from(self.split))),
            ("ST", v) => {
                self.split = flag(v)?;
                Reply::Silent
            }
            ("TX", "") => Reply::Answer(format!("TX{}", u8::from(self.transmitting))),
            ("TX", v) => {
                self.transmitting = flag(v)?;
                Reply::Silent
            }
            ("CT0", "") => Reply::Answer(format!("CT0{}", self.tone.digit())),
            ("CT0", d) => {
                self.tone = digits(d, 1).and_then(ToneMode::from_digit)?;
                Reply::Silent
            }
            ("OS0", "") => Reply::Answer(format!("OS0{}", self.shift.digit())),
            ("OS0", d) => {
                self.shift = digits(d, 1).and_then(RepeaterShift::from_digit)?;
                Reply::Silent
            }
            ("ID", "") => Reply::Answer(format!("ID{FT991A_ID:04}")),
            ("MR", ch) => {
                let n = channel(ch)?;
                let slot = self.memory.get(&n)?;
                let r = &slot.record;
                Reply::Answer(format!(
                    "MR{n:03}{:09}+000000{}0{}00{}",
                    r.frequency.as_hz(),
                    r.mode.code(),
                    r.tone.digit(),
                    r.shift.digit()
                ))
            }
            ("MT", ch) if ch.len() == 3 => {
                let n = channel(ch)?;
                let slot = self.memory.get(&n)?;
                Reply::Answer(format!("MT{n:03}{:<12}", slot.tag))
            }
            ("MT", text) if text.len() == 15 => {
                let n = channel(&text[..3])?;
                let slot = self.memory.get_mut(&n)?;
                slot.tag = text[3..].trim_end_matches(' ').to_string();
                Reply::Silent
            }
            ("AB", "") => {
                self.vfo_b = self.vfo_a;
                Reply::Silent
            }
            ("SV", "") => {
                std::mem::swap(&mut self.vfo_a, &mut self.vfo_b);
                Reply::Silent
            }
            ("AM", "") => {
                let mut frequency = self.vfo_a;
                if self.corrupt_stores.remove(&self.selected) {
                    frequency += CORRUPT_OFFSET_HZ;
                }
                let tag = self
                    .memory
                    .get(&self.selected)
                    .map(|s| s.tag.clone())
                    .unwrap_or_default();
                self.memory.insert(
                    self.selected,
                    Slot {
                        record: MemoryRecord {
                            frequency: Frequency::hz(frequency),
                            mode: self.mode,
                            tone: self.tone,
                            shift: self.shift,
                        },
                        tag,
                    },
                );
                Reply::Silent
            }
            _ => return None,
        };
        Some(reply)
    }

    fn tune(&self, hz: &str) -> Option<u64> {
        let hz = digits(hz, 9)?;
        if !TUNABLE_HZ.iter().any(|&(lo, hi)| (lo..=hi).contains(&hz)) {
            return None;
        }
        Some(match self.frequency_step {
            Some(step) if step > 0 => hz / step * step,
            _ => hz,
        })
    }
}

fn digits(text: &str, width: usize) -> Option<u64> {
    if text.len() != width || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

fn flag(text: &str) -> Option<bool> {
    match digits(text, 1)? {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn channel(text: &str) -> Option<u16> {
    digits(text, 3)
        .filter(|n| (1..=117).contains(n))
        .and_then(|n| u16::try_from(n).ok())
}

/// The simulated radio as seen from the engine.
pub struct MockFt991a {
    radio: Arc<Mutex<Radio>>,
    codec: FrameCodec,
}

/// Inspect and steer a running `MockFt991a`.
#[derive(Clone)]
pub struct SimulatorHandle {
    radio: Arc<Mutex<Radio>>,
}

impl MockFt991a {
    pub fn new() -> (Self, SimulatorHandle) {
        let radio = Arc::new(Mutex::new(Radio::default()));
        log::info!(
            "[MOCK RADIO] Initialized at {}, mode={}",
            Frequency::hz(DEFAULT_VFO_A_HZ),
            DEFAULT_MODE
        );
        let handle = SimulatorHandle {
            radio: Arc::clone(&radio),
        };
        (
            Self {
                radio,
                codec: FrameCodec::default(),
            },
            handle,
        )
    }

    fn radio(&self) -> MutexGuard<'_, Radio> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockFt991a {
    fn write(&mut self, data: &[u8]) -> CatResult<()> {
        let items = self.codec.decode(data);
        let mut radio = self.radio.lock().unwrap_or_else(PoisonError::into_inner);
        if !radio.connected {
            return Err(CatError::Io("[MOCK RADIO] link down".into()));
        }
        if radio.echo {
            radio.outbox.extend_from_slice(data);
        }
        let noise = std::mem::take(&mut radio.noise);
        radio.outbox.extend(noise);

        for item in items {
            let Decoded::Frame(frame) = item else {
                radio.outbox.extend_from_slice(b"?;");
                continue;
            };
            radio
                .received
                .push(format!("{}{};", frame.mnemonic, frame.params));
            let answer = radio.handle(&frame);
            log::debug!(
                "[MOCK RADIO] {}{}; -> {}",
                frame.mnemonic,
                frame.params,
                answer.as_deref().unwrap_or("(silent)")
            );
            if let (Some(answer), false) = (answer, radio.silent) {
                radio.outbox.extend_from_slice(answer.as_bytes());
                radio.outbox.push(b';');
            }
        }
        Ok(())
    }

    fn read_available(&mut self, deadline: Instant) -> CatResult<Vec<u8>> {
        {
            let mut radio = self.radio();
            if !radio.connected {
                return Err(CatError::Io("[MOCK RADIO] link down".into()));
            }
            if !radio.outbox.is_empty() {
                return Ok(std::mem::take(&mut radio.outbox));
            }
        }
        // Answers are produced synchronously on write, so nothing more can
        // arrive before the deadline.
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        Ok(Vec::new())
    }

    fn close(&mut self) -> CatResult<()> {
        log::info!("[MOCK RADIO] closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.radio().connected
    }
}

impl SimulatorHandle {
    fn radio(&self) -> MutexGuard<'_, Radio> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop answering anything (writes are still applied).
    pub fn set_silent(&self, silent: bool) {
        self.radio().silent = silent;
    }

    /// Answer `?;` to every frame with this mnemonic.
    pub fn reject(&self, mnemonic: &str) {
        self.radio().rejected.insert(mnemonic.to_string());
    }

    pub fn accept(&self, mnemonic: &str) {
        self.radio().rejected.remove(mnemonic);
    }

    /// Round VFO frequency writes down to a multiple of `step` Hz.
    pub fn set_frequency_step(&self, step: Option<u64>) {
        self.radio().frequency_step = step;
    }

    /// Make the next `AM` into this channel store a frequency 5 kHz off.
    pub fn corrupt_store(&self, channel: u16) {
        self.radio().corrupt_stores.insert(channel);
    }

    /// Echo every written byte back, like a half-duplex interface with
    /// local echo.
    pub fn set_echo(&self, echo: bool) {
        self.radio().echo = echo;
    }

    /// Bytes sent ahead of the answer to the next write.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.radio().noise.extend_from_slice(bytes);
    }

    pub fn set_connected(&self, connected: bool) {
        self.radio().connected = connected;
    }

    /// Put a channel in memory as if programmed from the front panel.
    pub fn preload(&self, channel: u16, record: MemoryRecord, tag: &str) {
        self.radio().memory.insert(
            channel,
            Slot {
                record,
                tag: tag.to_string(),
            },
        );
    }

    pub fn memory(&self, channel: u16) -> Option<(MemoryRecord, String)> {
        self.radio()
            .memory
            .get(&channel)
            .map(|s| (s.record.clone(), s.tag.clone()))
    }

    pub fn vfo_a(&self) -> Frequency {
        Frequency::hz(self.radio().vfo_a)
    }

    pub fn mode(&self) -> Mode {
        self.radio().mode
    }

    pub fn transmitting(&self) -> bool {
        self.radio().transmitting
    }

    /// Every frame received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.radio().received.clone()
    }

    pub fn clear_received(&self) {
        self.radio().received.clear();
    }
}
