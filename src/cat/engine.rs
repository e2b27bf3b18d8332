//! TransactionEngine: owns the transport and drives CAT I/O timing.
//!
//! One IO thread owns the `Transport` exclusively. Callers on any thread
//! submit requests into a FIFO queue and get a `PendingRequest` back; the
//! IO thread runs one transaction at a time:
//!
//! 1. wait out the inter-command delay
//! 2. drop stale input left over from earlier exchanges
//! 3. write the request (a write is followed by its confirming read)
//! 4. collect frames until the matching answer, a rejection or the deadline
//! 5. on a deadline, resend up to `retries` times
//!
//! Confirmed answers are applied to the state cache before the caller is
//! woken, so a caller that sees `Ok` also sees the cache updated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::domain::{CatError, CatResult, EngineConfig};
use crate::ports::Transport;
use crate::state::RadioStateCache;

use super::catalog::{Command, Direction, Value};
use super::codec::{self, Decoded, Frame, FrameCodec};
use super::Response;

const QUEUED: u8 = 0;
const SENT: u8 = 1;
const CANCELLED: u8 = 2;

/// Most stale input drained ahead of one attempt; a link that never goes
/// quiet gets the rest treated as noise by the answer matcher.
const MAX_STALE_BYTES: usize = 4096;

/// Handle to the IO thread. Cheap to share behind an `Arc`.
pub struct TransactionEngine {
    jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cache: Arc<RadioStateCache>,
    config: EngineConfig,
}

/// A submitted request whose outcome has not been collected yet.
///
/// Dropping it only stops waiting: the transaction still runs and its
/// answer still reaches the state cache.
pub struct PendingRequest {
    command: Command,
    state: Arc<AtomicU8>,
    reply: Receiver<CatResult<Response>>,
}

enum Job {
    Transaction(Transaction),
    Shutdown(Sender<CatResult<()>>),
}

struct Transaction {
    command: Command,
    wire: Vec<u8>,
    expect: Expect,
    timeout: Duration,
    state: Arc<AtomicU8>,
    reply: Sender<CatResult<Response>>,
}

enum Expect {
    /// A frame of `read` whose parameters start with `address`
    Answer { read: Command, address: String },
    /// Nothing, unless the radio rejects the command
    Silence,
}

enum Attempt {
    Answered(Vec<Value>),
    Rejected,
    TimedOut { malformed: Option<String> },
}

impl TransactionEngine {
    /// Start the IO thread. The engine takes ownership of `transport`.
    pub fn spawn(
        transport: Box<dyn Transport>,
        config: EngineConfig,
        cache: Arc<RadioStateCache>,
    ) -> CatResult<Self> {
        config.validate()?;
        let (jobs, queue) = crossbeam_channel::unbounded();
        let worker = Worker {
            codec: FrameCodec::new(config.max_frame_len, &config.reject_pattern),
            transport,
            config: config.clone(),
            cache: Arc::clone(&cache),
            last_command_time: None,
        };
        let handle = std::thread::Builder::new()
            .name("cat-io".into())
            .spawn(move || worker.run(queue))
            .map_err(|e| CatError::Io(format!("Failed to start CAT IO thread: {e}")))?;
        log::info!("CAT engine started");
        Ok(Self {
            jobs,
            worker: Mutex::new(Some(handle)),
            cache,
            config,
        })
    }

    pub fn cache(&self) -> &Arc<RadioStateCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue a request and return immediately.
    ///
    /// Values are validated here, so a `Validation` error never costs a
    /// byte on the wire.
    pub fn submit(
        &self,
        command: Command,
        values: &[Value],
        timeout: Duration,
    ) -> CatResult<PendingRequest> {
        let (wire, expect) = match command.direction() {
            Direction::Read => (
                codec::encode(&command, values)?,
                Expect::Answer {
                    read: command,
                    address: command.format_params(values),
                },
            ),
            Direction::Write => {
                let wire = codec::encode_confirmed_write(&command, values)?;
                let read = command.confirming_read().ok_or_else(|| {
                    CatError::Unsupported(format!("{command} has no confirming read"))
                })?;
                let address = read.format_params(&values[..read.address_len()]);
                (wire, Expect::Answer { read, address })
            }
            Direction::Execute => (codec::encode(&command, values)?, Expect::Silence),
        };

        let state = Arc::new(AtomicU8::new(QUEUED));
        let (reply, receiver) = crossbeam_channel::bounded(1);
        self.jobs
            .send(Job::Transaction(Transaction {
                command,
                wire,
                expect,
                timeout,
                state: Arc::clone(&state),
                reply,
            }))
            .map_err(|_| CatError::Disconnected)?;
        Ok(PendingRequest {
            command,
            state,
            reply: receiver,
        })
    }

    /// Submit and block until the outcome is known.
    pub fn execute(
        &self,
        command: Command,
        values: &[Value],
        timeout: Duration,
    ) -> CatResult<Response> {
        self.submit(command, values, timeout)?.wait()
    }

    /// `execute` with the configured timeout.
    pub fn request(&self, command: Command, values: &[Value]) -> CatResult<Response> {
        self.execute(command, values, self.config.timeout())
    }

    /// Finish queued requests, close the transport and stop the IO thread.
    ///
    /// Requests submitted afterwards fail with `Disconnected`.
    pub fn shutdown(&self) -> CatResult<()> {
        let (done, result) = crossbeam_channel::bounded(1);
        self.jobs
            .send(Job::Shutdown(done))
            .map_err(|_| CatError::Disconnected)?;
        let closed = result.recv().unwrap_or(Err(CatError::Disconnected));
        self.join_worker();
        closed
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("CAT IO thread panicked");
            }
        }
    }
}

impl Drop for TransactionEngine {
    fn drop(&mut self) {
        let (done, _result) = crossbeam_channel::bounded(1);
        // Fails only if the worker is already gone.
        let _ = self.jobs.send(Job::Shutdown(done));
        self.join_worker();
    }
}

impl PendingRequest {
    pub fn command(&self) -> Command {
        self.command
    }

    /// Block until the transaction finishes.
    pub fn wait(self) -> CatResult<Response> {
        self.reply.recv().unwrap_or(Err(CatError::Disconnected))
    }

    /// Wait at most `timeout`. `None` means the outcome is not known yet and
    /// the request is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CatResult<Response>> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CatError::Disconnected)),
        }
    }

    /// Withdraw the request if it has not reached the wire yet.
    ///
    /// Returns `false` once bytes may have been sent; the transaction then
    /// runs to completion.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

struct Worker {
    transport: Box<dyn Transport>,
    codec: FrameCodec,
    config: EngineConfig,
    cache: Arc<RadioStateCache>,
    last_command_time: Option<Instant>,
}

impl Worker {
    fn run(mut self, jobs: Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            match job {
                Job::Transaction(txn) => self.handle(txn),
                Job::Shutdown(done) => {
                    log::info!("CAT engine shutting down");
                    let _ = done.send(self.transport.close());
                    return;
                }
            }
        }
        let _ = self.transport.close();
    }

    fn handle(&mut self, txn: Transaction) {
        if txn
            .state
            .compare_exchange(QUEUED, SENT, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("CAT {}: cancelled before sending", txn.command);
            let _ = txn.reply.send(Err(CatError::Cancelled));
            return;
        }

        let result = self.run_transaction(&txn);
        match &result {
            Ok(Response::Ack) => self.cache.apply_effect(txn.command.def().effect),
            Ok(response) => self.cache.on_response(response),
            Err(CatError::Io(e)) => {
                log::error!("CAT {}: link failure: {e}", txn.command);
                self.cache.invalidate_all();
            }
            Err(e) => log::warn!("CAT {}: {e}", txn.command),
        }
        // The caller may have stopped waiting; the cache is already updated.
        let _ = txn.reply.send(result);
    }

    fn run_transaction(&mut self, txn: &Transaction) -> CatResult<Response> {
        let attempts = match txn.expect {
            Expect::Answer { .. } => 1 + self.config.retries,
            Expect::Silence => 1,
        };
        let mut malformed = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                log::warn!(
                    "CAT {}: no answer, retry {}/{}",
                    txn.command,
                    attempt - 1,
                    self.config.retries
                );
            }
            self.ensure_command_delay();
            self.discard_stale_input()?;

            log::debug!("CAT TX: {}", String::from_utf8_lossy(&txn.wire));
            let written = self.transport.write(&txn.wire);
            // Update timestamp even on error so the next command still respects the delay
            self.last_command_time = Some(Instant::now());
            written?;

            let outcome = match &txn.expect {
                Expect::Silence => {
                    let deadline = Instant::now() + self.config.execute_drain();
                    self.await_silence(txn, deadline)?
                }
                Expect::Answer { read, address } => {
                    let deadline = Instant::now() + txn.timeout;
                    self.await_answer(txn, read, address, deadline)?
                }
            };
            match outcome {
                Attempt::Answered(values) => {
                    return Ok(Response::Values {
                        command: txn.command,
                        values,
                    })
                }
                Attempt::Rejected => {
                    return Err(CatError::Rejected {
                        command: txn.command.to_string(),
                    })
                }
                Attempt::TimedOut { malformed: m } => malformed = m,
            }
        }

        if let Expect::Silence = txn.expect {
            return Ok(Response::Ack);
        }
        Err(match malformed {
            Some(detail) => CatError::Malformed(detail),
            None => CatError::Timeout {
                command: txn.command.to_string(),
                attempts,
            },
        })
    }

    /// Read until the expected answer, a rejection or the deadline.
    fn await_answer(
        &mut self,
        txn: &Transaction,
        read: &Command,
        address: &str,
        deadline: Instant,
    ) -> CatResult<Attempt> {
        let mut echoes = self.expected_echoes(txn);
        let mut malformed = None;

        while Instant::now() < deadline {
            let bytes = self.transport.read_available(deadline)?;
            if bytes.is_empty() {
                continue;
            }
            log::debug!("CAT RX: {}", String::from_utf8_lossy(&bytes));

            for item in self.codec.decode(&bytes) {
                let frame = match item {
                    Decoded::Rejection => return Ok(Attempt::Rejected),
                    Decoded::Malformed(detail) => {
                        log::warn!("CAT {}: noise: {detail}", txn.command);
                        continue;
                    }
                    Decoded::Frame(frame) => frame,
                };
                if echoes.front() == Some(&frame) {
                    echoes.pop_front();
                    continue;
                }
                if frame.mnemonic != read.mnemonic() || !frame.params.starts_with(address) {
                    log::debug!("CAT {}: ignoring {}{};", txn.command, frame.mnemonic, frame.params);
                    continue;
                }
                if frame.params.len() == address.len() {
                    // Our own query reflected back by the link.
                    continue;
                }
                match read.parse_answer(&frame.params) {
                    Ok(values) => return Ok(Attempt::Answered(values)),
                    Err(detail) => {
                        log::warn!("CAT {}: {detail}", txn.command);
                        malformed = Some(detail);
                    }
                }
            }
        }
        Ok(Attempt::TimedOut { malformed })
    }

    /// Listen for a rejection until the drain window closes.
    fn await_silence(&mut self, txn: &Transaction, deadline: Instant) -> CatResult<Attempt> {
        while Instant::now() < deadline {
            let bytes = self.transport.read_available(deadline)?;
            for item in self.codec.decode(&bytes) {
                match item {
                    Decoded::Rejection => return Ok(Attempt::Rejected),
                    Decoded::Malformed(detail) => log::warn!("CAT {}: {detail}", txn.command),
                    Decoded::Frame(frame) => {
                        log::debug!("CAT {}: ignoring {}{};", txn.command, frame.mnemonic, frame.params)
                    }
                }
            }
        }
        Ok(Attempt::TimedOut { malformed: None })
    }

    /// Frames the link will echo back if local echo is on, in send order.
    fn expected_echoes(&self, txn: &Transaction) -> VecDeque<Frame> {
        if !self.config.local_echo {
            return VecDeque::new();
        }
        let mut codec = FrameCodec::new(self.config.max_frame_len, &self.config.reject_pattern);
        codec
            .decode(&txn.wire)
            .into_iter()
            .filter_map(|item| match item {
                Decoded::Frame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Drain whatever is already waiting, over as many reads as it takes.
    fn discard_stale_input(&mut self) -> CatResult<()> {
        self.codec.reset();
        let mut stale = Vec::new();
        while stale.len() < MAX_STALE_BYTES {
            let chunk = self.transport.read_available(Instant::now())?;
            if chunk.is_empty() {
                break;
            }
            stale.extend_from_slice(&chunk);
        }
        if !stale.is_empty() {
            log::debug!(
                "CAT: discarding {} stale byte(s): {}",
                stale.len(),
                String::from_utf8_lossy(&stale)
            );
        }
        Ok(())
    }

    /// Sleep if needed to maintain the minimum inter-command delay.
    fn ensure_command_delay(&self) {
        if let Some(last) = self.last_command_time {
            let elapsed = last.elapsed();
            let min_delay = self.config.command_delay();
            if elapsed < min_delay {
                std::thread::sleep(min_delay - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat::catalog::lookup;
    use crate::state::{StateKey, StateValue};
    use crate::domain::Frequency;

    // ---------------------------------------------------------------------------
    // Scripted transport: answers each write through a closure
    // ---------------------------------------------------------------------------

    type Script = Box<dyn FnMut(&str) -> Vec<(Duration, String)> + Send>;

    struct ScriptedTransport {
        writes: Arc<Mutex<Vec<String>>>,
        script: Script,
        inbox: VecDeque<(Instant, Vec<u8>)>,
        echo: bool,
    }

    impl ScriptedTransport {
        fn new(
            script: impl FnMut(&str) -> Vec<(Duration, String)> + Send + 'static,
        ) -> (Self, Arc<Mutex<Vec<String>>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                writes: Arc::clone(&writes),
                script: Box::new(script),
                inbox: VecDeque::new(),
                echo: false,
            };
            (transport, writes)
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, data: &[u8]) -> CatResult<()> {
            let text = String::from_utf8_lossy(data).to_string();
            self.writes.lock().unwrap().push(text.clone());
            let now = Instant::now();
            if self.echo {
                self.inbox.push_back((now, data.to_vec()));
            }
            for (delay, reply) in (self.script)(&text) {
                self.inbox.push_back((now + delay, reply.into_bytes()));
            }
            Ok(())
        }

        fn read_available(&mut self, deadline: Instant) -> CatResult<Vec<u8>> {
            loop {
                let now = Instant::now();
                match self.inbox.front() {
                    Some((at, _)) if *at <= now => {
                        return Ok(self.inbox.pop_front().map(|(_, b)| b).unwrap_or_default());
                    }
                    Some((at, _)) if *at < deadline => std::thread::sleep(*at - now),
                    _ => {
                        if deadline > now {
                            std::thread::sleep(deadline - now);
                        }
                        return Ok(Vec::new());
                    }
                }
            }
        }

        fn close(&mut self) -> CatResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            timeout_ms: 40,
            command_delay_ms: 0,
            execute_drain_ms: 20,
            ..EngineConfig::default()
        }
    }

    fn now(reply: &str) -> Vec<(Duration, String)> {
        vec![(Duration::ZERO, reply.to_string())]
    }

    fn engine(transport: ScriptedTransport) -> TransactionEngine {
        TransactionEngine::spawn(Box::new(transport), fast_config(), Arc::default()).unwrap()
    }

    fn read(mnemonic: &str) -> Command {
        lookup(mnemonic).unwrap().read().unwrap()
    }

    fn write(mnemonic: &str) -> Command {
        lookup(mnemonic).unwrap().write().unwrap()
    }

    #[test]
    fn read_frequency_updates_cache() {
        let (t, writes) = ScriptedTransport::new(|_| now("FA014074000;"));
        let engine = engine(t);
        let response = engine.request(read("FA"), &[]).unwrap();
        assert_eq!(response.values(), &[Value::Int(14_074_000)]);
        assert_eq!(*writes.lock().unwrap(), vec!["FA;"]);
        assert_eq!(
            engine.cache().value(StateKey::VfoAFrequency),
            Some(StateValue::Frequency(Frequency::hz(14_074_000)))
        );
    }

    #[test]
    fn write_is_confirmed_by_read_back() {
        let (t, writes) = ScriptedTransport::new(|w| match w {
            "FA007074000;FA;" => now("FA007074000;"),
            _ => vec![],
        });
        let engine = engine(t);
        engine
            .request(write("FA"), &[Value::Int(7_074_000)])
            .unwrap();
        assert_eq!(*writes.lock().unwrap(), vec!["FA007074000;FA;"]);
        assert_eq!(
            engine.cache().value(StateKey::VfoAFrequency),
            Some(StateValue::Frequency(Frequency::hz(7_074_000)))
        );
    }

    #[test]
    fn cache_holds_clamped_value_not_requested_value() {
        let (t, _) = ScriptedTransport::new(|_| now("PC100;"));
        let engine = engine(t);
        let response = engine.request(write("PC"), &[Value::Int(100)]).unwrap();
        assert_eq!(response.values(), &[Value::Int(100)]);

        let (t, _) = ScriptedTransport::new(|_| now("FA014074000;"));
        let engine = self::engine(t);
        let response = engine
            .request(write("FA"), &[Value::Int(14_074_010)])
            .unwrap();
        assert_eq!(response.values(), &[Value::Int(14_074_000)]);
        assert_eq!(
            engine.cache().value(StateKey::VfoAFrequency),
            Some(StateValue::Frequency(Frequency::hz(14_074_000)))
        );
    }

    #[test]
    fn silence_times_out_after_all_attempts() {
        let (t, writes) = ScriptedTransport::new(|_| vec![]);
        let engine = engine(t);
        let err = engine.request(read("FA"), &[]).unwrap_err();
        assert_eq!(
            err,
            CatError::Timeout {
                command: read("FA").to_string(),
                attempts: 3
            }
        );
        assert_eq!(writes.lock().unwrap().len(), 3);
        assert!(engine.cache().get(StateKey::VfoAFrequency).is_none());
    }

    #[test]
    fn rejection_is_not_retried() {
        let (t, writes) = ScriptedTransport::new(|_| now("?;"));
        let engine = engine(t);
        let err = engine.request(write("MC"), &[Value::Int(5)]).unwrap_err();
        assert!(matches!(err, CatError::Rejected { .. }));
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn validation_failure_sends_nothing() {
        let (t, writes) = ScriptedTransport::new(|_| now("MD02;"));
        let engine = engine(t);
        let err = engine.request(write("MD0"), &[Value::Code('F')]).unwrap_err();
        assert!(matches!(err, CatError::Validation { .. }));
        // A later request proves the worker is idle and nothing was written.
        engine.request(read("MD0"), &[]).unwrap();
        assert_eq!(*writes.lock().unwrap(), vec!["MD0;"]);
    }

    #[test]
    fn noise_before_answer_is_skipped() {
        let (t, _) = ScriptedTransport::new(|_| {
            now("FB007000000;\u{0}\u{ff}TX0;FA;FA014074000;")
        });
        let engine = engine(t);
        let response = engine.request(read("FA"), &[]).unwrap();
        assert_eq!(response.values(), &[Value::Int(14_074_000)]);
    }

    #[test]
    fn line_noise_alone_is_a_timeout() {
        let (t, writes) = ScriptedTransport::new(|_| now("\u{ff}\u{fe};;12345;"));
        let engine = engine(t);
        let err = engine.request(read("FA"), &[]).unwrap_err();
        assert_eq!(
            err,
            CatError::Timeout {
                command: read("FA").to_string(),
                attempts: 3
            }
        );
        assert_eq!(writes.lock().unwrap().len(), 3);
    }

    #[test]
    fn leftovers_in_several_chunks_are_all_discarded() {
        let (t, _) = ScriptedTransport::new(|w| match w {
            "FB;" => vec![
                (Duration::ZERO, "FB007000000;".to_string()),
                (Duration::ZERO, "FA011111111;".to_string()),
                (Duration::ZERO, "FA022222222;".to_string()),
            ],
            "FA;" => now("FA014074000;"),
            _ => vec![],
        });
        let engine = engine(t);
        let response = engine.request(read("FB"), &[]).unwrap();
        assert_eq!(response.values(), &[Value::Int(7_000_000)]);

        let response = engine.request(read("FA"), &[]).unwrap();
        assert_eq!(response.values(), &[Value::Int(14_074_000)]);
        assert_eq!(
            engine.cache().value(StateKey::VfoAFrequency),
            Some(StateValue::Frequency(Frequency::hz(14_074_000)))
        );
    }

    #[test]
    fn only_malformed_answers_report_malformed() {
        let (t, writes) = ScriptedTransport::new(|_| now("FA14074;"));
        let engine = engine(t);
        let err = engine.request(read("FA"), &[]).unwrap_err();
        assert!(matches!(err, CatError::Malformed(_)), "{err:?}");
        assert_eq!(writes.lock().unwrap().len(), 3);
    }

    #[test]
    fn late_answer_on_retry_succeeds() {
        let mut calls = 0;
        let (t, writes) = ScriptedTransport::new(move |_| {
            calls += 1;
            if calls == 1 {
                vec![]
            } else {
                now("MD02;")
            }
        });
        let engine = engine(t);
        engine.request(read("MD0"), &[]).unwrap();
        assert_eq!(writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn answer_split_across_reads() {
        let (t, _) = ScriptedTransport::new(|_| {
            vec![
                (Duration::ZERO, "FA0140".to_string()),
                (Duration::from_millis(5), "74000;".to_string()),
            ]
        });
        let engine = engine(t);
        let response = engine.request(read("FA"), &[]).unwrap();
        assert_eq!(response.values(), &[Value::Int(14_074_000)]);
    }

    #[test]
    fn addressed_answer_must_match_channel() {
        let (t, _) = ScriptedTransport::new(|_| {
            now("MT004OTHER       ;MT005NET         ;")
        });
        let engine = engine(t);
        let response = engine.request(read("MT"), &[Value::Int(5)]).unwrap();
        assert_eq!(
            response.values(),
            &[Value::Int(5), Value::Text("NET".into())]
        );
        assert_eq!(
            engine.cache().value(StateKey::MemoryTag(5)),
            Some(StateValue::Tag("NET".into()))
        );
        assert!(engine.cache().get(StateKey::MemoryTag(4)).is_none());
    }

    #[test]
    fn execute_acks_on_silence_and_fails_on_reject() {
        let (t, writes) = ScriptedTransport::new(|w| match w {
            "AB;" => vec![],
            _ => now("?;"),
        });
        let engine = engine(t);
        let ab = lookup("AB").unwrap().execute().unwrap();
        assert_eq!(engine.request(ab, &[]).unwrap(), Response::Ack);
        let am = lookup("AM").unwrap().execute().unwrap();
        assert!(matches!(
            engine.request(am, &[]),
            Err(CatError::Rejected { .. })
        ));
        assert_eq!(*writes.lock().unwrap(), vec!["AB;", "AM;"]);
    }

    #[test]
    fn execute_invalidates_affected_keys() {
        let (t, _) = ScriptedTransport::new(|w| match w {
            "FB;" => now("FB007000000;"),
            _ => vec![],
        });
        let engine = engine(t);
        engine.request(read("FB"), &[]).unwrap();
        engine
            .request(lookup("AB").unwrap().execute().unwrap(), &[])
            .unwrap();
        assert!(engine.cache().get(StateKey::VfoBFrequency).unwrap().stale);
    }

    #[test]
    fn local_echo_is_dropped() {
        let (mut t, _) = ScriptedTransport::new(|w| match w {
            "FA007074000;FA;" => now("FA007074000;"),
            _ => vec![],
        });
        t.echo = true;
        let config = EngineConfig {
            local_echo: true,
            ..fast_config()
        };
        let engine = TransactionEngine::spawn(Box::new(t), config, Arc::default()).unwrap();
        let response = engine
            .request(write("FA"), &[Value::Int(7_074_000)])
            .unwrap();
        assert_eq!(response.values(), &[Value::Int(7_074_000)]);
    }

    #[test]
    fn requests_run_in_submission_order() {
        let (t, writes) = ScriptedTransport::new(|w| match w {
            "FA;" => now("FA014074000;"),
            "FB;" => now("FB007074000;"),
            "MD0;" => now("MD02;"),
            _ => vec![],
        });
        let engine = engine(t);
        let a = engine.submit(read("FA"), &[], Duration::from_millis(40)).unwrap();
        let b = engine.submit(read("FB"), &[], Duration::from_millis(40)).unwrap();
        let c = engine.submit(read("MD0"), &[], Duration::from_millis(40)).unwrap();
        assert_eq!(c.wait().unwrap().values(), &[Value::Code('2')]);
        assert_eq!(b.wait().unwrap().values(), &[Value::Int(7_074_000)]);
        assert_eq!(a.wait().unwrap().values(), &[Value::Int(14_074_000)]);
        assert_eq!(*writes.lock().unwrap(), vec!["FA;", "FB;", "MD0;"]);
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        let (t, writes) = ScriptedTransport::new(|w| match w {
            "FA;" => now("FA014074000;"),
            "MD0;" => now("MD02;"),
            _ => vec![],
        });
        let engine = Arc::new(engine(t));
        std::thread::scope(|s| {
            for i in 0..8 {
                let engine = Arc::clone(&engine);
                s.spawn(move || {
                    let cmd = if i % 2 == 0 { read("FA") } else { read("MD0") };
                    engine.request(cmd, &[]).unwrap();
                });
            }
        });
        // Every write is a whole request; nothing interleaves.
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 8);
        assert!(writes.iter().all(|w| w == "FA;" || w == "MD0;"));
    }

    #[test]
    fn cancel_only_while_queued() {
        let (t, writes) = ScriptedTransport::new(|w| match w {
            "FA;" => vec![(Duration::from_millis(30), "FA014074000;".to_string())],
            _ => now("FB007000000;"),
        });
        let engine = engine(t);
        let timeout = Duration::from_millis(200);
        let slow = engine.submit(read("FA"), &[], timeout).unwrap();
        let queued = engine.submit(read("FB"), &[], timeout).unwrap();
        assert!(queued.cancel());
        assert_eq!(queued.wait(), Err(CatError::Cancelled));
        assert!(slow.wait().is_ok());
        assert!(!writes.lock().unwrap().contains(&"FB;".to_string()));
    }

    #[test]
    fn cancel_after_send_is_refused() {
        let (t, _) = ScriptedTransport::new(|_| {
            vec![(Duration::from_millis(20), "FA014074000;".to_string())]
        });
        let engine = engine(t);
        let pending = engine
            .submit(read("FA"), &[], Duration::from_millis(200))
            .unwrap();
        // Give the worker time to pick it up.
        std::thread::sleep(Duration::from_millis(10));
        assert!(!pending.cancel());
        assert!(pending.wait().is_ok());
    }

    #[test]
    fn abandoned_request_still_updates_cache() {
        let (t, _) = ScriptedTransport::new(|w| match w {
            "FA;" => vec![(Duration::from_millis(10), "FA014074000;".to_string())],
            _ => now("MD02;"),
        });
        let engine = engine(t);
        let pending = engine
            .submit(read("FA"), &[], Duration::from_millis(200))
            .unwrap();
        assert!(pending.wait_timeout(Duration::from_millis(1)).is_none());
        drop(pending);
        engine.request(read("MD0"), &[]).unwrap();
        assert_eq!(
            engine.cache().value(StateKey::VfoAFrequency),
            Some(StateValue::Frequency(Frequency::hz(14_074_000)))
        );
    }

    #[test]
    fn link_failure_invalidates_everything() {
        /// Answers the first request, then loses the link.
        struct Flaky {
            writes: u32,
            answer_pending: bool,
        }
        impl Transport for Flaky {
            fn write(&mut self, _: &[u8]) -> CatResult<()> {
                self.writes += 1;
                if self.writes > 1 {
                    return Err(CatError::Io("cable pulled".into()));
                }
                self.answer_pending = true;
                Ok(())
            }
            fn read_available(&mut self, _: Instant) -> CatResult<Vec<u8>> {
                if std::mem::take(&mut self.answer_pending) {
                    return Ok(b"FA014074000;".to_vec());
                }
                Ok(Vec::new())
            }
            fn close(&mut self) -> CatResult<()> {
                Ok(())
            }
            fn is_connected(&self) -> bool {
                self.writes <= 1
            }
        }

        let engine = TransactionEngine::spawn(
            Box::new(Flaky {
                writes: 0,
                answer_pending: false,
            }),
            fast_config(),
            Arc::default(),
        )
        .unwrap();
        engine.request(read("FA"), &[]).unwrap();
        assert!(!engine.cache().get(StateKey::VfoAFrequency).unwrap().stale);

        let err = engine.request(read("FA"), &[]).unwrap_err();
        assert!(matches!(err, CatError::Io(_)));
        assert!(engine.cache().get(StateKey::VfoAFrequency).unwrap().stale);
    }

    #[test]
    fn submit_after_shutdown_is_disconnected() {
        let (t, _) = ScriptedTransport::new(|_| vec![]);
        let engine = engine(t);
        engine.shutdown().unwrap();
        assert!(matches!(
            engine.submit(read("FA"), &[], Duration::from_millis(10)),
            Err(CatError::Disconnected)
        ));
    }

    #[test]
    fn spawn_rejects_bad_config() {
        let (t, _) = ScriptedTransport::new(|_| vec![]);
        let config = EngineConfig {
            reject_pattern: String::new(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            TransactionEngine::spawn(Box::new(t), config, Arc::default()),
            Err(CatError::Config(_))
        ));

        let (t, _) = ScriptedTransport::new(|_| vec![]);
        let config = EngineConfig {
            retries: u32::MAX,
            ..fast_config()
        };
        assert!(matches!(
            TransactionEngine::spawn(Box::new(t), config, Arc::default()),
            Err(CatError::Config(_))
        ));
    }
}
