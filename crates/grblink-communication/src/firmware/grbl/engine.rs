//! Grbl engine façade and worker loop
//!
//! [`GrblEngine`] is the one object collaborators hold. It owns a dedicated
//! worker task that has exclusive use of the transport, the flow-control
//! queue and the mutable machine state; the façade talks to it only through
//! channels and an abort flag, so no engine method ever blocks on serial
//! I/O.
//!
//! Worker loop, each iteration:
//! 1. check the abort flag
//! 2. write any queued real-time bytes (they bypass flow control)
//! 3. bounded read of one line, decoded and dispatched to events
//! 4. during initialization, watch the banner deadline
//! 5. once ready, admit backlog commands the firmware buffer can absorb
//!    and send the periodic `?` status poll

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

use grblink_core::config::{ConnectionParams, EngineConfig};
use grblink_core::error::{ConnectError, EngineError, TransportError};
use grblink_core::event::{
    EngineEvent, EngineListener, EventBus, EventFilter, SubscriptionId,
};
use grblink_core::machine::MachineState;

use crate::communication::flow_control::{FlowControlQueue, QueuedCommand};
use crate::communication::serial::{ReadOutcome, SerialTransport, Transport};

use super::codes;
use super::decoder::{GrblDecoder, GrblResponse};

/// Real-time control bytes.
///
/// Grbl intercepts these in its serial interrupt before the line buffer, so
/// they act immediately regardless of buffer occupancy and never count
/// against flow control.
pub mod realtime {
    /// Ctrl-X: soft reset, halts and clears the firmware
    pub const SOFT_RESET: u8 = 0x18;
    /// Request one status report
    pub const STATUS_POLL: u8 = b'?';
    /// Feed hold, decelerate to a stop
    pub const FEED_HOLD: u8 = b'!';
    /// Resume from hold
    pub const CYCLE_RESUME: u8 = b'~';
    /// Cancel the current jog motion (Grbl 1.1 extended set)
    pub const JOG_CANCEL: u8 = 0x85;
}

/// Where the engine is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub enum LifecycleState {
    /// No connection; the only state commands can never be submitted from
    #[default]
    Disconnected,
    /// Opening the port
    Connecting,
    /// Port open, waiting for the startup banner
    Initializing,
    /// Banner received; accepting commands
    Ready,
    /// A fatal transport or initialization failure ended the connection
    Faulted,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Faulted => "Faulted",
        };
        write!(f, "{}", name)
    }
}

/// Receipt for a submitted command; its events carry the same sequence
/// number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHandle {
    /// Sequence number assigned at submission
    pub seq: u64,
}

/// Details of the active connection
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionInfo {
    /// Port the connection is on
    pub port: String,
    /// Negotiated baud rate
    pub baud_rate: u32,
    /// Firmware version from the startup banner, e.g. `1.1h`
    pub firmware_version: String,
}

struct WorkerHandle {
    cmd_tx: mpsc::UnboundedSender<QueuedCommand>,
    realtime_tx: mpsc::UnboundedSender<u8>,
    abort: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

/// The engine façade.
///
/// One instance manages at most one connection at a time. All observation
/// happens through [`EngineEvent`]s and the [`MachineState`] snapshot;
/// methods return quickly and never touch the serial port directly.
pub struct GrblEngine {
    config: EngineConfig,
    lifecycle: Arc<RwLock<LifecycleState>>,
    machine: Arc<RwLock<MachineState>>,
    events: Arc<EventBus>,
    next_seq: AtomicU64,
    worker: Option<WorkerHandle>,
    connection: Option<ConnectionInfo>,
}

impl GrblEngine {
    /// Create a disconnected engine
    pub fn new(config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_capacity));
        Self {
            config,
            lifecycle: Arc::new(RwLock::new(LifecycleState::Disconnected)),
            machine: Arc::new(RwLock::new(MachineState::default())),
            events,
            next_seq: AtomicU64::new(0),
            worker: None,
            connection: None,
        }
    }

    /// Open a serial port and run the initialization handshake.
    ///
    /// Returns once the startup banner arrives, or fails with
    /// [`ConnectError::InitializationTimeout`] after the timeout elapsed
    /// twice (a soft reset is sent between the two windows, which wakes a
    /// controller that was already running when we attached).
    pub async fn connect(
        &mut self,
        params: &ConnectionParams,
    ) -> Result<ConnectionInfo, ConnectError> {
        if self.worker.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }
        *self.lifecycle.write() = LifecycleState::Connecting;

        let transport = match SerialTransport::open(&params.port, params.baud_rate) {
            Ok(transport) => transport,
            Err(e) => {
                *self.lifecycle.write() = LifecycleState::Disconnected;
                return Err(e.into());
            }
        };

        self.connect_with_transport(Box::new(transport), params).await
    }

    /// Run the handshake over an already-open transport.
    ///
    /// [`connect`](Self::connect) delegates here; tests inject scripted
    /// transports through this entry point.
    pub async fn connect_with_transport(
        &mut self,
        transport: Box<dyn Transport>,
        params: &ConnectionParams,
    ) -> Result<ConnectionInfo, ConnectError> {
        if self.worker.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        *self.machine.write() = MachineState::default();
        *self.lifecycle.write() = LifecycleState::Initializing;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (realtime_tx, realtime_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();
        let abort = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            config: self.config.clone(),
            transport,
            decoder: GrblDecoder::new(params.effective_axis_count()),
            queue: FlowControlQueue::new(self.config.rx_buffer_capacity),
            cmd_rx,
            realtime_rx,
            abort: abort.clone(),
            lifecycle: self.lifecycle.clone(),
            machine: self.machine.clone(),
            events: self.events.clone(),
        };

        let join = tokio::task::spawn_blocking(move || worker.run(init_tx));

        self.worker = Some(WorkerHandle {
            cmd_tx,
            realtime_tx,
            abort,
            join,
        });

        let outcome = match init_rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without reporting; the worker died early.
            Err(_) => Err(ConnectError::Aborted),
        };

        match outcome {
            Ok(firmware_version) => {
                let info = ConnectionInfo {
                    port: params.port.clone(),
                    baud_rate: params.baud_rate,
                    firmware_version,
                };
                self.connection = Some(info.clone());
                tracing::info!(
                    "connected to Grbl {} on {}",
                    info.firmware_version,
                    info.port
                );
                Ok(info)
            }
            Err(e) => {
                // The worker has already exited and set the lifecycle.
                if let Some(handle) = self.worker.take() {
                    let _ = handle.join.await;
                }
                Err(e)
            }
        }
    }

    /// Tear down the connection: stop the worker, close the port, return
    /// to `Disconnected`. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.abort.store(true, Ordering::SeqCst);
            let _ = handle.join.await;
        }
        self.connection = None;
        *self.lifecycle.write() = LifecycleState::Disconnected;
    }

    /// Queue one command line for flow-controlled transmission.
    ///
    /// The engine owns the terminator; `text` must not include one. The
    /// returned handle's sequence number ties the later
    /// `CommandAcknowledged`/`CommandFailed` event to this submission.
    ///
    /// A line whose wire length exceeds the firmware buffer capacity is
    /// rejected here: it could never be written, and letting it into the
    /// queue would block everything behind it. Grbl itself refuses lines
    /// over 80 characters.
    pub fn submit(&self, text: &str) -> Result<CommandHandle, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::CommandRejected {
                reason: "empty command".to_string(),
            });
        }
        let wire_len = text.len() + 1;
        if wire_len > self.config.rx_buffer_capacity {
            return Err(EngineError::CommandRejected {
                reason: format!(
                    "command is {} bytes on the wire, firmware buffer holds {}",
                    wire_len, self.config.rx_buffer_capacity
                ),
            });
        }
        if *self.lifecycle.read() != LifecycleState::Ready {
            return Err(EngineError::NotConnected);
        }
        let handle = self.worker.as_ref().ok_or(EngineError::NotConnected)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let command = QueuedCommand::new(seq, text);
        handle
            .cmd_tx
            .send(command)
            .map_err(|_| EngineError::NotConnected)?;
        Ok(CommandHandle { seq })
    }

    /// Send a single real-time control byte, bypassing flow control
    pub fn submit_realtime(&self, byte: u8) -> Result<(), EngineError> {
        let handle = self.worker.as_ref().ok_or(EngineError::NotConnected)?;
        handle
            .realtime_tx
            .send(byte)
            .map_err(|_| EngineError::NotConnected)
    }

    /// Feed hold (`!`): decelerate to a stop without losing position
    pub fn feed_hold(&self) -> Result<(), EngineError> {
        self.submit_realtime(realtime::FEED_HOLD)
    }

    /// Cycle resume (`~`) after a hold
    pub fn cycle_resume(&self) -> Result<(), EngineError> {
        self.submit_realtime(realtime::CYCLE_RESUME)
    }

    /// Soft reset (Ctrl-X): halts the firmware and clears both its buffer
    /// and the engine's queue
    pub fn soft_reset(&self) -> Result<(), EngineError> {
        self.submit_realtime(realtime::SOFT_RESET)
    }

    /// Request one status report outside the periodic poll
    pub fn request_status(&self) -> Result<(), EngineError> {
        self.submit_realtime(realtime::STATUS_POLL)
    }

    /// Cancel the current jog motion
    pub fn jog_cancel(&self) -> Result<(), EngineError> {
        self.submit_realtime(realtime::JOG_CANCEL)
    }

    /// `$X`: clear an alarm lockout
    pub fn unlock(&self) -> Result<CommandHandle, EngineError> {
        self.submit("$X")
    }

    /// `$H`: run the homing cycle
    pub fn home(&self) -> Result<CommandHandle, EngineError> {
        self.submit("$H")
    }

    /// `$G`: request a parser-state report
    pub fn query_parser_state(&self) -> Result<CommandHandle, EngineError> {
        self.submit("$G")
    }

    /// New broadcast receiver over all engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.receiver()
    }

    /// Register an async listener for events matching `filter`.
    ///
    /// Must be called from within a tokio runtime; each matching event is
    /// delivered on a spawned task.
    pub fn register_listener(
        &self,
        listener: Arc<dyn EngineListener>,
        filter: EventFilter,
    ) -> SubscriptionId {
        let runtime = tokio::runtime::Handle::current();
        self.events.subscribe_fn(filter, move |event| {
            let listener = listener.clone();
            runtime.spawn(async move {
                listener.on_event(event).await;
            });
        })
    }

    /// Remove a previously registered listener
    pub fn unregister_listener(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Current machine-state snapshot
    pub fn machine_state(&self) -> MachineState {
        self.machine.read().clone()
    }

    /// Current lifecycle state
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.read()
    }

    /// Details of the active connection, if any
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref()
    }

    /// True while a worker is running
    pub fn is_connected(&self) -> bool {
        self.worker.is_some()
    }
}

impl Default for GrblEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for GrblEngine {
    fn drop(&mut self) {
        // Best effort; disconnect() is the orderly path.
        if let Some(handle) = &self.worker {
            handle.abort.store(true, Ordering::SeqCst);
        }
    }
}

enum Exit {
    Aborted,
    Fault(TransportError),
    InitTimedOut,
}

struct Worker {
    config: EngineConfig,
    transport: Box<dyn Transport>,
    decoder: GrblDecoder,
    queue: FlowControlQueue,
    cmd_rx: mpsc::UnboundedReceiver<QueuedCommand>,
    realtime_rx: mpsc::UnboundedReceiver<u8>,
    abort: Arc<AtomicBool>,
    lifecycle: Arc<RwLock<LifecycleState>>,
    machine: Arc<RwLock<MachineState>>,
    events: Arc<EventBus>,
}

impl Worker {
    fn run(mut self, init_tx: oneshot::Sender<Result<String, ConnectError>>) {
        let mut init_tx = Some(init_tx);
        let mut init_deadline = Instant::now() + self.config.init_timeout;
        let mut reset_retried = false;
        let mut next_poll = Instant::now() + self.config.poll_interval;

        let exit = loop {
            if self.abort.load(Ordering::SeqCst) {
                break Exit::Aborted;
            }

            if let Err(e) = self.drain_realtime() {
                break Exit::Fault(e);
            }

            match self.transport.read_line(self.config.read_timeout) {
                Ok(ReadOutcome::Line(line)) => {
                    tracing::trace!("rx: {}", line);
                    if let Some(version) = self.handle_line(&line) {
                        match init_tx.take() {
                            Some(tx) => {
                                *self.lifecycle.write() = LifecycleState::Ready;
                                self.events.publish(EngineEvent::InitializationComplete {
                                    firmware_version: version.clone(),
                                });
                                let _ = tx.send(Ok(version));
                            }
                            None => {
                                // The controller restarted underneath us
                                // (watchdog, power glitch, external reset).
                                // Its buffer is empty, so in-flight
                                // accounting is void.
                                tracing::warn!(
                                    "firmware restarted while connected; clearing queue"
                                );
                                self.queue.clear();
                                *self.machine.write() = MachineState::default();
                                self.events.publish(EngineEvent::InitializationComplete {
                                    firmware_version: version,
                                });
                            }
                        }
                    }
                }
                Ok(ReadOutcome::TimedOut) => {}
                Err(e) => break Exit::Fault(e),
            }

            if init_tx.is_some() {
                if Instant::now() >= init_deadline {
                    if !reset_retried {
                        reset_retried = true;
                        tracing::warn!("no startup banner yet, sending soft reset");
                        if let Err(e) = self.transport.write_bytes(&[realtime::SOFT_RESET]) {
                            break Exit::Fault(e);
                        }
                        init_deadline = Instant::now() + self.config.init_timeout;
                    } else {
                        break Exit::InitTimedOut;
                    }
                }
                continue;
            }

            if let Err(e) = self.pump_outbound() {
                break Exit::Fault(e);
            }

            if Instant::now() >= next_poll {
                if let Err(e) = self.transport.write_bytes(&[realtime::STATUS_POLL]) {
                    break Exit::Fault(e);
                }
                next_poll = Instant::now() + self.config.poll_interval;
            }
        };

        match exit {
            Exit::Aborted => {
                tracing::info!("worker stopping on request");
                // Best-effort drain: write what the firmware still has
                // room for, then report what had to be left behind.
                if let Err(e) = self.pump_outbound() {
                    tracing::debug!("final drain failed: {}", e);
                }
                let discarded = self.queue.backlog_len();
                if discarded > 0 {
                    tracing::debug!("{} queued commands discarded at disconnect", discarded);
                }
                *self.lifecycle.write() = LifecycleState::Disconnected;
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Err(ConnectError::Aborted));
                }
            }
            Exit::Fault(e) => {
                tracing::error!("connection failed: {}", e);
                *self.lifecycle.write() = LifecycleState::Faulted;
                self.events.publish(EngineEvent::ConnectionLost {
                    reason: e.to_string(),
                });
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Err(ConnectError::Transport(e)));
                }
            }
            Exit::InitTimedOut => {
                let timeout_ms = self.config.init_timeout.as_millis() as u64;
                tracing::error!("no startup banner within {} ms, twice", timeout_ms);
                *self.lifecycle.write() = LifecycleState::Faulted;
                self.events.publish(EngineEvent::InitializationFailed);
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Err(ConnectError::InitializationTimeout { timeout_ms }));
                }
            }
        }

        self.transport.close();
    }

    /// Write every queued real-time byte immediately. A soft reset empties
    /// the firmware buffer, so the queue's accounting is discarded with it.
    fn drain_realtime(&mut self) -> Result<(), TransportError> {
        while let Ok(byte) = self.realtime_rx.try_recv() {
            tracing::debug!("realtime byte 0x{:02X}", byte);
            self.transport.write_bytes(&[byte])?;
            if byte == realtime::SOFT_RESET {
                self.queue.clear();
            }
        }
        Ok(())
    }

    /// Move submissions into the backlog, then write as many as the
    /// firmware buffer has room for
    fn pump_outbound(&mut self) -> Result<(), TransportError> {
        while let Ok(command) = self.cmd_rx.try_recv() {
            self.queue.submit(command);
        }
        while let Some(command) = self.queue.pop_writable() {
            tracing::debug!("tx #{}: {}", command.seq, command.text);
            self.transport.write_bytes(&command.wire_bytes())?;
        }
        Ok(())
    }

    /// Decode one line and publish what it means. Returns the firmware
    /// version when the line was a startup banner; the caller handles
    /// lifecycle transitions.
    fn handle_line(&mut self, line: &str) -> Option<String> {
        match self.decoder.decode(line) {
            GrblResponse::Ok => match self.queue.acknowledge() {
                Some((seq, _)) => {
                    self.events.publish(EngineEvent::CommandAcknowledged { seq });
                }
                None => tracing::warn!("ok with no command in flight"),
            },
            GrblResponse::Error(code) => match self.queue.acknowledge() {
                Some((seq, _)) => {
                    self.events.publish(EngineEvent::CommandFailed {
                        seq,
                        code,
                        description: codes::describe_error(code),
                    });
                }
                None => {
                    tracing::warn!("error:{} with no command in flight", code);
                    self.events
                        .publish(EngineEvent::Message(codes::format_error(code)));
                }
            },
            GrblResponse::Alarm(code) => {
                self.events.publish(EngineEvent::AlarmRaised {
                    code,
                    description: codes::describe_alarm(code),
                });
            }
            GrblResponse::Status(report) => {
                let next = {
                    let prev = self.machine.read();
                    report.apply(&prev)
                };
                *self.machine.write() = next.clone();
                self.events.publish(EngineEvent::StatusUpdated(next));
            }
            GrblResponse::ParserState(state) => {
                if state.active_wcs.is_some() {
                    self.machine.write().active_wcs = state.active_wcs.clone();
                }
                self.events.publish(EngineEvent::ParserStateUpdated(state));
            }
            GrblResponse::Startup { version } => return Some(version),
            GrblResponse::Setting { number, value } => {
                self.events
                    .publish(EngineEvent::Message(format!("${}={}", number, value)));
            }
            GrblResponse::Feedback(text) => {
                self.events.publish(EngineEvent::Message(text));
            }
            GrblResponse::Unrecognized(text) => {
                tracing::debug!("unrecognized line: {}", text);
                self.events.publish(EngineEvent::UnrecognizedLine(text));
            }
        }
        None
    }
}
