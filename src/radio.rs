//! FT-991A facade: the only entry point callers need.
//!
//! Owns the transaction engine (and through it the transport) and exposes
//! state reads and writes, memory channel programming and the everyday
//! `RadioControl` operations. Nothing here talks to the transport or the
//! codec directly.

use std::sync::Arc;
use std::time::Duration;

use crate::cat::TransactionEngine;
use crate::domain::{CatError, CatResult, Configuration, Frequency, Mode, ProgramConfig};
use crate::memory::{ApplyProgress, ChannelPlan, ChannelProgrammer, ProgressEvent};
use crate::ports::{RadioControl, Transport, TransportFactory};
use crate::state::{confirmed_state, Confirmed, RadioStateCache, StateKey, StateValue};

/// Radio ID the FT-991A reports to `ID;`
pub const FT991A_RADIO_ID: u16 = 670;

pub struct Ft991a {
    engine: TransactionEngine,
    program: ProgramConfig,
}

impl Ft991a {
    /// Wrap an already open transport.
    pub fn new(transport: Box<dyn Transport>, config: &Configuration) -> CatResult<Self> {
        let cache = Arc::new(RadioStateCache::new());
        let engine = TransactionEngine::spawn(transport, config.engine.clone(), cache)?;
        Ok(Self {
            engine,
            program: config.program.clone(),
        })
    }

    /// Open the configured serial port through `F` and wrap it.
    pub fn connect<F: TransportFactory>(config: &Configuration) -> CatResult<Self> {
        let port = config
            .serial
            .port
            .as_deref()
            .ok_or_else(|| CatError::Config("No serial port configured".into()))?;
        let transport = F::open(port, config.serial.baud_rate)?;
        log::info!("Connected to {port} ({})", config.name);
        Self::new(transport, config)
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<RadioStateCache> {
        self.engine.cache()
    }

    /// Last confirmed value, without touching the radio.
    pub fn cached(&self, key: StateKey) -> Option<Confirmed> {
        self.cache().get(key)
    }

    /// Ask the radio for `key`.
    pub fn read_state(&self, key: StateKey) -> CatResult<StateValue> {
        let cmd = key.command_def()?.read()?;
        let response = self.engine.request(cmd, &key.address())?;
        confirmed_value(key, cmd.def(), response.values())
    }

    /// Write `value` to `key` and return what the radio confirmed, which
    /// may differ (e.g. a frequency rounded to the tuning step).
    pub fn write_state(&self, key: StateKey, value: StateValue) -> CatResult<StateValue> {
        let values = key.write_values(&value)?;
        let cmd = key.command_def()?.write()?;
        let response = self.engine.request(cmd, &values)?;
        let confirmed = confirmed_value(key, cmd.def(), response.values())?;
        if confirmed != value {
            log::info!("{key:?}: requested {value:?}, radio confirmed {confirmed:?}");
        }
        Ok(confirmed)
    }

    /// Run an execute command such as `AB` (VFO-A to VFO-B) or `SV` (swap).
    pub fn execute(&self, mnemonic: &str) -> CatResult<()> {
        let cmd = crate::cat::lookup(mnemonic)?.execute()?;
        self.engine.request(cmd, &[]).map(|_| ())
    }

    /// Read the radio ID and check it is an FT-991A.
    pub fn identify(&self) -> CatResult<u16> {
        match self.read_state(StateKey::RadioId)? {
            StateValue::Id(id) if id == FT991A_RADIO_ID => Ok(id),
            StateValue::Id(id) => Err(CatError::Unsupported(format!(
                "radio ID {id:04} is not an FT-991A ({FT991A_RADIO_ID:04})"
            ))),
            other => Err(CatError::Malformed(format!("ID answered {other:?}"))),
        }
    }

    pub fn apply_channel_plan(&self, plan: &ChannelPlan) -> ApplyProgress {
        self.apply_channel_plan_with_progress(plan, |_| {})
    }

    pub fn apply_channel_plan_with_progress(
        &self,
        plan: &ChannelPlan,
        mut on_event: impl FnMut(&ProgressEvent),
    ) -> ApplyProgress {
        ChannelProgrammer::new(&self.engine, self.program.clone()).apply(plan, &mut on_event)
    }

    /// Stop the engine and close the transport.
    pub fn disconnect(&self) -> CatResult<()> {
        self.engine.shutdown()
    }
}

fn confirmed_value(
    key: StateKey,
    def: &crate::cat::CommandDef,
    values: &[crate::cat::Value],
) -> CatResult<StateValue> {
    match confirmed_state(def, values) {
        Some((confirmed_key, value)) if confirmed_key == key => Ok(value),
        Some((other, _)) => Err(CatError::Malformed(format!(
            "answer for {key:?} confirmed {other:?}"
        ))),
        None => Err(CatError::Malformed(format!(
            "answer for {key:?} has values outside the known set"
        ))),
    }
}

impl RadioControl for Ft991a {
    fn ptt_on(&mut self) -> CatResult<()> {
        self.write_state(StateKey::Transmit, StateValue::Flag(true))
            .map(|_| ())
    }

    fn ptt_off(&mut self) -> CatResult<()> {
        self.write_state(StateKey::Transmit, StateValue::Flag(false))
            .map(|_| ())
    }

    fn is_transmitting(&self) -> bool {
        // A stale "transmitting" still counts: unkeying must not be skipped.
        matches!(
            self.cached(StateKey::Transmit),
            Some(Confirmed {
                value: StateValue::Flag(true),
                ..
            })
        )
    }

    fn get_frequency(&mut self) -> CatResult<Frequency> {
        self.read_state(StateKey::VfoAFrequency)?
            .frequency()
            .ok_or_else(|| CatError::Malformed("VFO-A answer is not a frequency".into()))
    }

    fn set_frequency(&mut self, freq: Frequency) -> CatResult<Frequency> {
        self.write_state(StateKey::VfoAFrequency, StateValue::Frequency(freq))?
            .frequency()
            .ok_or_else(|| CatError::Malformed("VFO-A answer is not a frequency".into()))
    }

    fn get_mode(&mut self) -> CatResult<Mode> {
        self.read_state(StateKey::OperatingMode)?
            .mode()
            .ok_or_else(|| CatError::Malformed("mode answer is not a mode".into()))
    }

    fn set_mode(&mut self, mode: Mode) -> CatResult<Mode> {
        self.write_state(StateKey::OperatingMode, StateValue::Mode(mode))?
            .mode()
            .ok_or_else(|| CatError::Malformed("mode answer is not a mode".into()))
    }
}

/// Safety: auto-release PTT if the radio is dropped while transmitting.
/// This prevents leaving the radio keyed up if the app crashes or disconnects.
/// Retries up to 3 times with increasing delays in case the first attempt
/// fails (e.g. USB adapter momentarily busy).
impl Drop for Ft991a {
    fn drop(&mut self) {
        if self.is_transmitting() {
            for delay_ms in [0, 10, 50] {
                if delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
                if self.ptt_off().is_ok() {
                    return;
                }
            }
            log::error!("CRITICAL: Failed to release PTT on drop. Radio may still be transmitting!");
        }
    }
}
