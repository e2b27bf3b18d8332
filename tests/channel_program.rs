//! Integration tests: memory channel programming against the simulated radio
//!
//! Each test builds a `ChannelPlan`, applies it through `Ft991a`, and then
//! checks three things: the returned `ApplyProgress`, what the simulated
//! radio's memory actually holds, and what the state cache believes.

use catsu::adapters::{MockFt991a, SimulatorHandle};
use catsu::domain::{
    CatError, Configuration, EngineConfig, Frequency, MemoryRecord, Mode, ProgramConfig,
    RepeaterShift, ToneMode,
};
use catsu::memory::{
    ChannelPlan, ChannelStatus, FailureReason, MemoryChannel, PlanStatus, ProgressEvent,
    Rollback, VfoRestore, WriteStage,
};
use catsu::{Ft991a, StateKey, StateValue};

fn connect_with(program: ProgramConfig) -> (Ft991a, SimulatorHandle) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (transport, handle) = MockFt991a::new();
    let config = Configuration {
        engine: EngineConfig {
            timeout_ms: 40,
            command_delay_ms: 0,
            execute_drain_ms: 10,
            ..EngineConfig::default()
        },
        program,
        ..Configuration::default()
    };
    (Ft991a::new(Box::new(transport), &config).unwrap(), handle)
}

fn connect() -> (Ft991a, SimulatorHandle) {
    connect_with(ProgramConfig::default())
}

/// 2m repeater-style channel `n`: 146.520 MHz + n × 15 kHz.
fn two_meter(n: u16) -> MemoryChannel {
    MemoryChannel::new(
        n,
        Frequency::hz(146_520_000 + u64::from(n) * 15_000),
        Mode::Fm,
    )
    .with_shift(RepeaterShift::Plus)
    .with_tone(ToneMode::CtcssEnc)
    .with_tag(format!("RPT {n:02}"))
}

fn ten_channel_plan() -> ChannelPlan {
    ChannelPlan::new((1..=10).map(two_meter).collect()).unwrap()
}

#[test]
fn plan_writes_every_channel() {
    let (radio, handle) = connect();
    let plan = ChannelPlan::new(vec![
        two_meter(1),
        MemoryChannel::new(2, Frequency::khz(14_074), Mode::DataUsb).with_tag("FT8 20M"),
        MemoryChannel::new(100, Frequency::khz(14_000), Mode::Cw),
    ])
    .unwrap();

    let progress = radio.apply_channel_plan(&plan);
    assert_eq!(progress.status(), PlanStatus::Completed);
    assert_eq!(progress.confirmed().len(), 3);
    assert!(progress.failed().is_empty());

    let (record, tag) = handle.memory(2).unwrap();
    assert_eq!(record.frequency, Frequency::hz(14_074_000));
    assert_eq!(record.mode, Mode::DataUsb);
    assert_eq!(tag, "FT8 20M");
    assert_eq!(handle.memory(100).unwrap().1, "");
}

/// Channel 5 of 10 stores the wrong frequency: only channel 5 fails, the
/// other nine are confirmed and cached.
#[test]
fn one_bad_read_back_in_ten() {
    let (radio, handle) = connect();
    handle.corrupt_store(5);
    let plan = ten_channel_plan();

    let progress = radio.apply_channel_plan(&plan);
    assert_eq!(progress.status(), PlanStatus::PartiallyFailed);

    let failed = progress.failed();
    assert_eq!(failed.len(), 1);
    let (channel, failure) = failed[0];
    assert_eq!(channel.number, 5);
    assert_eq!(failure.stage, WriteStage::ReadBack);
    assert!(matches!(
        failure.reason,
        FailureReason::Mismatch {
            field: "frequency",
            ..
        }
    ));
    // Slot 5 was empty before the plan; there is nothing to go back to.
    assert_eq!(failure.rollback, Rollback::NoPriorContents);

    let confirmed = progress.confirmed();
    assert_eq!(confirmed.len(), 9);
    assert!(confirmed.iter().all(|c| c.number != 5));

    for entry in plan.entries().iter().filter(|c| c.number != 5) {
        assert_eq!(
            radio.cache().value(StateKey::MemoryChannel(entry.number)),
            Some(StateValue::Memory(entry.record())),
            "channel {} in cache",
            entry.number
        );
        assert_eq!(
            radio.cache().value(StateKey::MemoryTag(entry.number)),
            Some(StateValue::Tag(entry.tag.clone()))
        );
    }
    assert_ne!(
        radio.cache().value(StateKey::MemoryChannel(5)),
        Some(StateValue::Memory(two_meter(5).record()))
    );
}

/// Resume-by-retry: the failed subset goes through on a second pass.
#[test]
fn retry_plan_holds_only_failures() {
    let (radio, handle) = connect();
    handle.corrupt_store(3);
    handle.corrupt_store(7);
    let progress = radio.apply_channel_plan(&ten_channel_plan());

    let retry = progress.retry_plan();
    let numbers: Vec<u16> = retry.entries().iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![3, 7]);

    let second = radio.apply_channel_plan(&retry);
    assert_eq!(second.status(), PlanStatus::Completed);
    assert_eq!(handle.memory(7).unwrap().0, two_meter(7).record());
}

/// A failure after the store puts the slot's old contents back.
#[test]
fn failed_store_rolls_back_to_prior_contents() {
    let (radio, handle) = connect();
    let old = MemoryRecord {
        frequency: Frequency::hz(145_500_000),
        mode: Mode::Fm,
        tone: ToneMode::Off,
        shift: RepeaterShift::Simplex,
    };
    handle.preload(8, old.clone(), "CALLING");
    handle.corrupt_store(8);

    let progress = radio.apply_channel_plan(&ChannelPlan::new(vec![two_meter(8)]).unwrap());
    let failed = progress.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1.rollback, Rollback::Restored);

    assert_eq!(handle.memory(8), Some((old.clone(), "CALLING".to_string())));
    assert_eq!(
        radio.cache().value(StateKey::MemoryChannel(8)),
        Some(StateValue::Memory(old))
    );
}

/// A failure while staging never touches the slot.
#[test]
fn failure_before_store_leaves_slot_alone() {
    let (radio, handle) = connect();
    let old = MemoryRecord {
        frequency: Frequency::hz(146_000_000),
        mode: Mode::Fm,
        tone: ToneMode::Off,
        shift: RepeaterShift::Minus,
    };
    handle.preload(2, old.clone(), "OLD");
    // 10 kHz steps: 146.525 comes back as 146.520.
    handle.set_frequency_step(Some(10_000));

    let plan = ChannelPlan::new(vec![
        MemoryChannel::new(2, Frequency::hz(146_525_000), Mode::Fm),
        MemoryChannel::new(4, Frequency::hz(146_540_000), Mode::Fm),
    ])
    .unwrap();
    let progress = radio.apply_channel_plan(&plan);

    assert_eq!(progress.status(), PlanStatus::PartiallyFailed);
    let failed = progress.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0.number, 2);
    assert_eq!(failed[0].1.stage, WriteStage::Frequency);
    assert_eq!(failed[0].1.rollback, Rollback::NotNeeded);
    assert_eq!(handle.memory(2), Some((old, "OLD".to_string())));

    assert_eq!(progress.entries()[1].1, ChannelStatus::Confirmed);
}

#[test]
fn rejected_store_is_reported() {
    let (radio, handle) = connect();
    handle.reject("AM");
    let progress = radio.apply_channel_plan(&ChannelPlan::new(vec![two_meter(1)]).unwrap());
    let failed = progress.failed();
    assert_eq!(failed[0].1.stage, WriteStage::Store);
    assert!(matches!(
        failed[0].1.reason,
        FailureReason::Transaction(CatError::Rejected { .. })
    ));
    assert!(handle.memory(1).is_none());
}

/// No answer to the snapshot: the channel fails before anything is written.
#[test]
fn unreachable_radio_fails_at_snapshot() {
    let (radio, handle) = connect();
    handle.set_silent(true);
    let progress = radio.apply_channel_plan(&ChannelPlan::new(vec![two_meter(1)]).unwrap());
    let failed = progress.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1.stage, WriteStage::Snapshot);
    assert!(matches!(
        failed[0].1.reason,
        FailureReason::Transaction(CatError::Timeout { .. })
    ));
    assert!(!handle.received().iter().any(|f| f.starts_with("MC")));
}

#[test]
fn vfo_is_restored_after_plan() {
    let (radio, handle) = connect();
    let progress = radio.apply_channel_plan(&ten_channel_plan());
    assert_eq!(progress.vfo(), &VfoRestore::Restored);
    assert_eq!(handle.vfo_a(), Frequency::hz(14_074_000));
    assert_eq!(handle.mode(), Mode::DataUsb);
}

#[test]
fn vfo_restore_can_be_disabled() {
    let (radio, handle) = connect_with(ProgramConfig { restore_vfo: false });
    let progress = radio.apply_channel_plan(&ChannelPlan::new(vec![two_meter(6)]).unwrap());
    assert_eq!(progress.vfo(), &VfoRestore::Disabled);
    assert_eq!(handle.vfo_a(), two_meter(6).frequency);
    assert_eq!(handle.mode(), Mode::Fm);
}

#[test]
fn progress_events_follow_the_plan() {
    let (radio, handle) = connect();
    handle.corrupt_store(2);
    let plan = ChannelPlan::new(vec![two_meter(1), two_meter(2)]).unwrap();

    let mut events = Vec::new();
    radio.apply_channel_plan_with_progress(&plan, |e| events.push(e.clone()));

    assert_eq!(events.len(), 7);
    assert_eq!(events[0], ProgressEvent::PlanStarted { channels: 2 });
    assert_eq!(events[1], ProgressEvent::ChannelStarted { index: 0, number: 1 });
    assert_eq!(events[2], ProgressEvent::ChannelConfirmed { index: 0, number: 1 });
    assert_eq!(events[3], ProgressEvent::ChannelStarted { index: 1, number: 2 });
    assert!(matches!(
        events[4],
        ProgressEvent::ChannelFailed { index: 1, number: 2, .. }
    ));
    assert_eq!(
        events[5],
        ProgressEvent::VfoFinished {
            outcome: VfoRestore::Restored
        }
    );
    assert_eq!(
        events[6],
        ProgressEvent::PlanFinished {
            status: PlanStatus::PartiallyFailed
        }
    );
}

#[test]
fn invalid_plan_is_refused_before_any_io() {
    let (_radio, handle) = connect();
    let err = ChannelPlan::new(vec![
        two_meter(1),
        two_meter(2).with_tag("SEMI;COLON"),
    ])
    .unwrap_err();
    assert!(matches!(err, CatError::Validation { .. }));
    assert!(handle.received().is_empty());
}

/// VFO-A cannot be read up front: the radio is left on the last staged
/// channel and the progress record says so.
#[test]
fn unreadable_vfo_is_reported() {
    let (radio, handle) = connect();
    handle.reject("MD0");
    let mut events = Vec::new();
    let progress = radio.apply_channel_plan_with_progress(
        &ChannelPlan::new(vec![two_meter(1)]).unwrap(),
        |e| events.push(e.clone()),
    );

    assert!(matches!(
        progress.vfo(),
        VfoRestore::SnapshotFailed(CatError::Rejected { .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::VfoFinished {
            outcome: VfoRestore::SnapshotFailed(_)
        }
    )));
    assert_eq!(progress.status(), PlanStatus::PartiallyFailed);
}

#[test]
fn failed_vfo_restore_is_reported() {
    let (radio, handle) = connect();
    let progress = radio.apply_channel_plan_with_progress(
        &ChannelPlan::new(vec![two_meter(3)]).unwrap(),
        |e| {
            if let ProgressEvent::ChannelConfirmed { .. } = e {
                handle.reject("MD0");
            }
        },
    );

    assert_eq!(progress.status(), PlanStatus::Completed);
    assert!(matches!(
        progress.vfo(),
        VfoRestore::Failed(CatError::Rejected { .. })
    ));
    // The frequency went back before the mode write was refused.
    assert_eq!(handle.vfo_a(), Frequency::hz(14_074_000));
    assert_eq!(handle.mode(), Mode::Fm);
}

#[test]
fn plan_loaded_from_json_is_applied() {
    let (radio, handle) = connect();
    let plan = ChannelPlan::from_json_str(
        r#"[{"number": 40, "frequency": 146550000, "mode": "Fm", "tag": "SIMPLEX"}]"#,
    )
    .unwrap();
    assert_eq!(radio.apply_channel_plan(&plan).status(), PlanStatus::Completed);
    let (record, tag) = handle.memory(40).unwrap();
    assert_eq!(record.frequency, Frequency::hz(146_550_000));
    assert_eq!(tag, "SIMPLEX");
}
