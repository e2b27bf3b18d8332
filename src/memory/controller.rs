//! Applies a `ChannelPlan` to the radio one channel at a time.
//!
//! The FT-991A has no multi-field memory write, so each channel goes
//! through an explicit commit sequence:
//!
//! 1. snapshot the slot (`MR`, `MT`)
//! 2. stage the fields in VFO-A (`MC`, `FA`, `MD0`, `CT0`, `OS0`)
//! 3. store VFO-A into the slot (`AM`) and write the tag (`MT`)
//! 4. read the slot back (`MR`) and compare with the plan entry
//!
//! Nothing touches the slot before step 3. A failure from step 3 on rolls
//! the slot back to its snapshot. A failed channel never stops the plan.
//! The VFO-A outcome is recorded in `ApplyProgress::vfo`.

use crate::cat::catalog::{lookup, Value};
use crate::cat::TransactionEngine;
use crate::domain::{CatError, CatResult, Frequency, MemoryRecord, Mode, ProgramConfig};
use crate::state::{confirmed_state, StateValue};

use super::plan::{
    ApplyProgress, ChannelFailure, ChannelPlan, ChannelStatus, FailureReason, MemoryChannel,
    ProgressEvent, Rollback, VfoRestore, WriteStage,
};

type Step<T = ()> = Result<T, (WriteStage, FailureReason)>;

/// Slot contents before the plan touched it.
struct Prior {
    record: Option<MemoryRecord>,
    tag: String,
}

pub struct ChannelProgrammer<'a> {
    engine: &'a TransactionEngine,
    config: ProgramConfig,
}

impl<'a> ChannelProgrammer<'a> {
    pub fn new(engine: &'a TransactionEngine, config: ProgramConfig) -> Self {
        Self { engine, config }
    }

    /// Apply every entry in plan order and report the outcome per channel.
    pub fn apply(
        &self,
        plan: &ChannelPlan,
        on_event: &mut dyn FnMut(&ProgressEvent),
    ) -> ApplyProgress {
        let mut progress = ApplyProgress::new(plan);
        progress.start();
        log::info!("Programming {} memory channel(s)", plan.len());
        on_event(&ProgressEvent::PlanStarted {
            channels: plan.len(),
        });

        let vfo = if self.config.restore_vfo {
            match self.snapshot_vfo() {
                Ok(vfo) => Some(vfo),
                Err(e) => {
                    log::warn!("Could not snapshot VFO-A, it will not be restored: {e}");
                    progress.set_vfo(VfoRestore::SnapshotFailed(e));
                    None
                }
            }
        } else {
            None
        };

        for (index, channel) in plan.entries().iter().enumerate() {
            progress.set(index, ChannelStatus::Writing);
            on_event(&ProgressEvent::ChannelStarted {
                index,
                number: channel.number,
            });

            match self.program_channel(channel) {
                Ok(()) => {
                    log::info!("Channel {} confirmed", channel.label());
                    progress.set(index, ChannelStatus::Confirmed);
                    on_event(&ProgressEvent::ChannelConfirmed {
                        index,
                        number: channel.number,
                    });
                }
                Err(failure) => {
                    log::warn!("Channel {}: {failure}", channel.label());
                    progress.set(index, ChannelStatus::Failed(failure.clone()));
                    on_event(&ProgressEvent::ChannelFailed {
                        index,
                        number: channel.number,
                        failure,
                    });
                }
            }
        }

        if let Some((frequency, mode)) = vfo {
            let outcome = match self.restore_vfo(frequency, mode) {
                Ok(()) => VfoRestore::Restored,
                Err(e) => {
                    log::warn!("Could not restore VFO-A to {frequency} {mode}: {e}");
                    VfoRestore::Failed(e)
                }
            };
            progress.set_vfo(outcome);
        }
        if self.config.restore_vfo {
            on_event(&ProgressEvent::VfoFinished {
                outcome: progress.vfo().clone(),
            });
        }

        let status = progress.finish();
        log::info!(
            "Channel plan {status:?}: {} confirmed, {} failed",
            progress.confirmed().len(),
            progress.failed().len()
        );
        on_event(&ProgressEvent::PlanFinished { status });
        progress
    }

    fn program_channel(&self, channel: &MemoryChannel) -> Result<(), ChannelFailure> {
        let prior = self
            .snapshot(channel.number)
            .map_err(|e| ChannelFailure {
                stage: WriteStage::Snapshot,
                reason: FailureReason::Transaction(e),
                rollback: Rollback::NotNeeded,
            })?;

        let record = channel.record();
        let written = self
            .stage(channel.number, &record)
            .and_then(|()| self.store(channel.number, &channel.tag))
            .and_then(|()| self.verify(channel.number, &record));
        let Err((stage, reason)) = written else {
            return Ok(());
        };
        let rollback = if stage.touches_slot() {
            self.rollback(channel.number, &prior)
        } else {
            Rollback::NotNeeded
        };
        Err(ChannelFailure {
            stage,
            reason,
            rollback,
        })
    }

    /// Read the slot's current contents. A rejected read is an empty slot.
    fn snapshot(&self, number: u16) -> CatResult<Prior> {
        let address = [Value::Int(u64::from(number))];
        match self.read("MR", &address) {
            Ok(values) => {
                let record = memory_record(&values)?;
                let tag = match self.read("MT", &address)?.get(1) {
                    Some(Value::Text(tag)) => tag.clone(),
                    _ => String::new(),
                };
                Ok(Prior {
                    record: Some(record),
                    tag,
                })
            }
            Err(CatError::Rejected { .. }) => {
                log::debug!("Channel {number:03} is empty");
                Ok(Prior {
                    record: None,
                    tag: String::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Select the slot and put the record's fields into VFO-A.
    fn stage(&self, number: u16, record: &MemoryRecord) -> Step {
        self.confirm_write(
            WriteStage::Select,
            "MC",
            "channel",
            &[Value::Int(u64::from(number))],
        )?;
        self.confirm_write(
            WriteStage::Frequency,
            "FA",
            "frequency",
            &[Value::Int(record.frequency.as_hz())],
        )?;
        self.confirm_write(
            WriteStage::Mode,
            "MD0",
            "mode",
            &[Value::Code(record.mode.code())],
        )?;
        self.confirm_write(
            WriteStage::Flags,
            "CT0",
            "tone",
            &[Value::Int(record.tone.digit())],
        )?;
        self.confirm_write(
            WriteStage::Flags,
            "OS0",
            "shift",
            &[Value::Int(record.shift.digit())],
        )
    }

    /// Copy VFO-A into the selected slot, then label it.
    fn store(&self, number: u16, tag: &str) -> Step {
        lookup("AM")
            .and_then(|def| def.execute())
            .and_then(|cmd| self.engine.request(cmd, &[]))
            .map_err(|e| (WriteStage::Store, FailureReason::Transaction(e)))?;
        self.confirm_write(
            WriteStage::Label,
            "MT",
            "tag",
            &[Value::Int(u64::from(number)), Value::Text(tag.to_string())],
        )
    }

    fn verify(&self, number: u16, expected: &MemoryRecord) -> Step {
        let stage = WriteStage::ReadBack;
        let values = self
            .read("MR", &[Value::Int(u64::from(number))])
            .map_err(|e| (stage, FailureReason::Transaction(e)))?;
        let actual = memory_record(&values).map_err(|e| (stage, FailureReason::Transaction(e)))?;

        let fields = [
            (
                "frequency",
                expected.frequency.to_string(),
                actual.frequency.to_string(),
            ),
            ("mode", expected.mode.to_string(), actual.mode.to_string()),
            (
                "tone",
                format!("{:?}", expected.tone),
                format!("{:?}", actual.tone),
            ),
            (
                "shift",
                format!("{:?}", expected.shift),
                format!("{:?}", actual.shift),
            ),
        ];
        for (field, written, confirmed) in fields {
            if written != confirmed {
                return Err((
                    stage,
                    FailureReason::Mismatch {
                        field,
                        written,
                        confirmed,
                    },
                ));
            }
        }
        Ok(())
    }

    fn rollback(&self, number: u16, prior: &Prior) -> Rollback {
        let Some(record) = &prior.record else {
            log::warn!("Channel {number:03} was empty before; leaving it as written");
            return Rollback::NoPriorContents;
        };
        log::warn!("Rolling channel {number:03} back to {record:?}");
        let restored = self
            .stage(number, record)
            .and_then(|()| self.store(number, &prior.tag))
            .and_then(|()| self.verify(number, record));
        match restored {
            Ok(()) => Rollback::Restored,
            Err((stage, reason)) => {
                log::error!("Rollback of channel {number:03} failed at {stage}: {reason}");
                Rollback::Failed { stage, reason }
            }
        }
    }

    fn snapshot_vfo(&self) -> CatResult<(Frequency, Mode)> {
        let frequency = match self.read("FA", &[])?.first() {
            Some(Value::Int(hz)) => Frequency::hz(*hz),
            other => return Err(CatError::Malformed(format!("FA answer {other:?}"))),
        };
        let mode = match self.read("MD0", &[])?.first() {
            Some(Value::Code(code)) => Mode::from_code(*code)
                .ok_or_else(|| CatError::Malformed(format!("unknown mode code '{code}'")))?,
            other => return Err(CatError::Malformed(format!("MD0 answer {other:?}"))),
        };
        Ok((frequency, mode))
    }

    fn restore_vfo(&self, frequency: Frequency, mode: Mode) -> CatResult<()> {
        self.write("FA", &[Value::Int(frequency.as_hz())])?;
        self.write("MD0", &[Value::Code(mode.code())])?;
        log::debug!("VFO-A restored to {frequency} {mode}");
        Ok(())
    }

    /// Write and require the radio to confirm exactly what was written.
    fn confirm_write(
        &self,
        stage: WriteStage,
        mnemonic: &str,
        field: &'static str,
        values: &[Value],
    ) -> Step {
        let confirmed = self
            .write(mnemonic, values)
            .map_err(|e| (stage, FailureReason::Transaction(e)))?;
        if confirmed != values {
            return Err((
                stage,
                FailureReason::Mismatch {
                    field,
                    written: join(values),
                    confirmed: join(&confirmed),
                },
            ));
        }
        Ok(())
    }

    fn write(&self, mnemonic: &str, values: &[Value]) -> CatResult<Vec<Value>> {
        let cmd = lookup(mnemonic)?.write()?;
        Ok(self.engine.request(cmd, values)?.into_values())
    }

    fn read(&self, mnemonic: &str, address: &[Value]) -> CatResult<Vec<Value>> {
        let cmd = lookup(mnemonic)?.read()?;
        Ok(self.engine.request(cmd, address)?.into_values())
    }
}

fn memory_record(values: &[Value]) -> CatResult<MemoryRecord> {
    let def = lookup("MR")?;
    match confirmed_state(def, values) {
        Some((_, StateValue::Memory(record))) => Ok(record),
        _ => Err(CatError::Malformed(format!(
            "memory read answer {} has unknown codes",
            join(values)
        ))),
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
