//! Channel plans and the progress record of applying one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cat::catalog::{self, Value};
use crate::domain::{CatError, CatResult, Frequency, MemoryRecord, Mode, RepeaterShift, ToneMode};

/// One memory slot as it should end up in the radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChannel {
    /// 1-99 regular channels, 100-117 PMS edges P1L..P9U
    pub number: u16,
    pub frequency: Frequency,
    pub mode: Mode,
    #[serde(default = "default_tone")]
    pub tone: ToneMode,
    #[serde(default = "default_shift")]
    pub shift: RepeaterShift,
    #[serde(default)]
    pub tag: String,
}

fn default_tone() -> ToneMode {
    ToneMode::Off
}

fn default_shift() -> RepeaterShift {
    RepeaterShift::Simplex
}

impl MemoryChannel {
    pub fn new(number: u16, frequency: Frequency, mode: Mode) -> Self {
        Self {
            number,
            frequency,
            mode,
            tone: ToneMode::Off,
            shift: RepeaterShift::Simplex,
            tag: String::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_tone(mut self, tone: ToneMode) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_shift(mut self, shift: RepeaterShift) -> Self {
        self.shift = shift;
        self
    }

    /// The fields stored by the radio's memory write (the tag is separate).
    pub fn record(&self) -> MemoryRecord {
        MemoryRecord {
            frequency: self.frequency,
            mode: self.mode,
            tone: self.tone,
            shift: self.shift,
        }
    }

    /// Check every field against the command that will write it.
    pub fn validate(&self) -> CatResult<()> {
        let number = Value::Int(u64::from(self.number));
        let writes = [
            ("MC", vec![number.clone()]),
            ("FA", vec![Value::Int(self.frequency.as_hz())]),
            ("MD0", vec![Value::Code(self.mode.code())]),
            ("CT0", vec![Value::Int(self.tone.digit())]),
            ("OS0", vec![Value::Int(self.shift.digit())]),
            ("MT", vec![number, Value::Text(self.tag.clone())]),
        ];
        for (mnemonic, values) in writes {
            let cmd = catalog::lookup(mnemonic)?.write()?;
            catalog::validate(&cmd, &values).map_err(|e| match e {
                CatError::Validation { field, reason } => CatError::Validation {
                    field: format!("channel {}: {field}", self.label()),
                    reason,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Front-panel name of the slot: `005`, or `P3U` for a PMS edge.
    pub fn label(&self) -> String {
        match self.number {
            100..=117 => {
                let edge = self.number - 100;
                let side = if edge % 2 == 0 { 'L' } else { 'U' };
                format!("P{}{side}", edge / 2 + 1)
            }
            n => format!("{n:03}"),
        }
    }
}

/// Ordered, validated, immutable list of channels to program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelPlan {
    entries: Vec<MemoryChannel>,
}

impl ChannelPlan {
    /// Validate every entry. Nothing is sent to the radio for an invalid plan.
    pub fn new(entries: Vec<MemoryChannel>) -> CatResult<Self> {
        for entry in &entries {
            entry.validate()?;
        }
        Ok(Self { entries })
    }

    /// Read a plan from a JSON array of channels and validate it.
    pub fn from_json_str(json: &str) -> CatResult<Self> {
        let entries: Vec<MemoryChannel> = serde_json::from_str(json)
            .map_err(|e| CatError::Config(format!("Failed to parse channel plan: {e}")))?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[MemoryChannel] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    PartiallyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Pending,
    Writing,
    Confirmed,
    Failed(ChannelFailure),
}

/// Step of the per-channel write sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteStage {
    Snapshot,
    Select,
    Frequency,
    Mode,
    Flags,
    Store,
    Label,
    ReadBack,
}

impl WriteStage {
    /// Whether the memory slot itself may have changed by the end of this
    /// stage.
    pub fn touches_slot(&self) -> bool {
        *self >= WriteStage::Store
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Snapshot => "snapshot",
            WriteStage::Select => "select",
            WriteStage::Frequency => "frequency",
            WriteStage::Mode => "mode",
            WriteStage::Flags => "flags",
            WriteStage::Store => "store",
            WriteStage::Label => "label",
            WriteStage::ReadBack => "read-back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transaction(CatError),
    /// The radio confirmed something other than what was written
    Mismatch {
        field: &'static str,
        written: String,
        confirmed: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transaction(e) => write!(f, "{e}"),
            FailureReason::Mismatch {
                field,
                written,
                confirmed,
            } => write!(f, "{field} written as {written}, radio reports {confirmed}"),
        }
    }
}

/// What happened to the slot after a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// The failure came before the slot was touched
    NotNeeded,
    /// Prior contents stored back and confirmed
    Restored,
    /// The slot was empty before; CAT cannot erase it again
    NoPriorContents,
    Failed {
        stage: WriteStage,
        reason: FailureReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub stage: WriteStage,
    pub reason: FailureReason,
    pub rollback: Rollback,
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.reason)?;
        match &self.rollback {
            Rollback::NotNeeded => Ok(()),
            Rollback::Restored => write!(f, " (prior contents restored)"),
            Rollback::NoPriorContents => write!(f, " (slot was empty, left as written)"),
            Rollback::Failed { stage, reason } => {
                write!(f, " (rollback failed at {stage}: {reason})")
            }
        }
    }
}

/// What became of VFO-A after channels were staged through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfoRestore {
    /// Switched off in `ProgramConfig`
    Disabled,
    Restored,
    /// VFO-A could not be read before the plan, so it was left on the last
    /// staged channel
    SnapshotFailed(CatError),
    /// The saved frequency or mode could not be written back
    Failed(CatError),
}

/// Reported to the progress callback as a plan is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PlanStarted { channels: usize },
    ChannelStarted { index: usize, number: u16 },
    ChannelConfirmed { index: usize, number: u16 },
    ChannelFailed {
        index: usize,
        number: u16,
        failure: ChannelFailure,
    },
    VfoFinished { outcome: VfoRestore },
    PlanFinished { status: PlanStatus },
}

/// Per-plan record: which entries committed, which are pending, which
/// failed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyProgress {
    status: PlanStatus,
    entries: Vec<(MemoryChannel, ChannelStatus)>,
    vfo: VfoRestore,
}

impl ApplyProgress {
    pub fn new(plan: &ChannelPlan) -> Self {
        Self {
            status: PlanStatus::Pending,
            entries: plan
                .entries()
                .iter()
                .map(|c| (c.clone(), ChannelStatus::Pending))
                .collect(),
            vfo: VfoRestore::Disabled,
        }
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn entries(&self) -> &[(MemoryChannel, ChannelStatus)] {
        &self.entries
    }

    pub fn vfo(&self) -> &VfoRestore {
        &self.vfo
    }

    pub fn confirmed(&self) -> Vec<&MemoryChannel> {
        self.entries
            .iter()
            .filter(|(_, s)| *s == ChannelStatus::Confirmed)
            .map(|(c, _)| c)
            .collect()
    }

    pub fn failed(&self) -> Vec<(&MemoryChannel, &ChannelFailure)> {
        self.entries
            .iter()
            .filter_map(|(c, s)| match s {
                ChannelStatus::Failed(failure) => Some((c, failure)),
                _ => None,
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, s)| matches!(s, ChannelStatus::Pending | ChannelStatus::Writing))
            .count()
    }

    /// A plan of only the failed entries, in their original order.
    pub fn retry_plan(&self) -> ChannelPlan {
        ChannelPlan {
            entries: self.failed().into_iter().map(|(c, _)| c.clone()).collect(),
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = PlanStatus::InProgress;
    }

    pub(crate) fn set(&mut self, index: usize, status: ChannelStatus) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.1 = status;
        }
    }

    pub(crate) fn set_vfo(&mut self, outcome: VfoRestore) {
        self.vfo = outcome;
    }

    pub(crate) fn finish(&mut self) -> PlanStatus {
        let any_failed = self
            .entries
            .iter()
            .any(|(_, s)| matches!(s, ChannelStatus::Failed(_)));
        self.status = if any_failed {
            PlanStatus::PartiallyFailed
        } else {
            PlanStatus::Completed
        };
        self.status
    }
}
