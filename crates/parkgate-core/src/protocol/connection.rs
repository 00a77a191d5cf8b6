//! Connection management
//!
//! Owns the controller session: opening the port, the background reader,
//! the periodic status request, command sends and the VEK diagnostic
//! request/response correlation.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{
    commands::encode_command,
    reader::{spawn_reader, ReaderHandle},
    serial::{open_port, with_port_lock},
    Command, CommunicationChannel, DiagnosticResult, InboundQueue, ProtocolError, SerialChannel,
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, DIAGNOSTIC_POLL_ATTEMPTS, DIAGNOSTIC_POLL_INTERVAL_MS,
    INBOUND_QUEUE_CAPACITY, READER_JOIN_TIMEOUT_MS, STATUS_INTERVAL_MS,
};
use crate::garage::{Dispatcher, ErrorKind, GarageStatus, NotificationSinks};

/// Write half of the session, shared with the status timer
type SharedWriter = Arc<Mutex<Option<Box<dyn CommunicationChannel>>>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Port open, reader running
    Connected,
    /// Last open attempt failed
    Error,
}

/// Connection configuration. A fresh session is built from it on every open.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
    /// Period of the automatic STATUS request (0 disables it)
    pub status_interval_ms: u64,
    /// Time given to the controller to boot after the port opens
    pub startup_delay_ms: u64,
    /// Inbound queue capacity
    pub queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            status_interval_ms: STATUS_INTERVAL_MS,
            startup_delay_ms: 2000,
            queue_capacity: INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Controller session
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    writer: SharedWriter,
    queue: InboundQueue,
    sinks: NotificationSinks,
    status_tx: Arc<watch::Sender<GarageStatus>>,
    status_rx: watch::Receiver<GarageStatus>,
    reader: Option<ReaderHandle>,
    cancel: CancellationToken,
    status_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig, sinks: NotificationSinks) -> Self {
        let (status_tx, status_rx) = watch::channel(GarageStatus::default());
        let queue = InboundQueue::new(config.queue_capacity);
        Self {
            config,
            state: ConnectionState::Disconnected,
            writer: Arc::new(Mutex::new(None)),
            queue,
            sinks,
            status_tx: Arc::new(status_tx),
            status_rx,
            reader: None,
            cancel: CancellationToken::new(),
            status_task: None,
        }
    }

    /// Settings this session was created with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the reader is running on an open transport
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Latest garage status reported by the controller
    pub fn status(&self) -> GarageStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch the garage status; survives reconnects (reset on each open)
    pub fn subscribe_status(&self) -> watch::Receiver<GarageStatus> {
        self.status_rx.clone()
    }

    /// Raw inbound lines, most recent last
    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    /// Notification senders shared with the dispatcher
    pub fn sinks(&self) -> &NotificationSinks {
        &self.sinks
    }

    /// Open the configured serial port and start the reader
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let opened = with_port_lock(|| {
            open_port(&self.config.port_name, self.config.baud_rate, timeout)
        });
        match opened {
            Ok(port) => self.attach(Box::new(SerialChannel::new(port))),
            Err(e) => {
                self.state = ConnectionState::Error;
                self.sinks.error(
                    ErrorKind::Transport,
                    format!("Failed to open {}: {}", self.config.port_name, e),
                );
                Err(e)
            }
        }
    }

    /// Start a session over an already open transport
    pub fn attach(
        &mut self,
        mut channel: Box<dyn CommunicationChannel>,
    ) -> Result<(), ProtocolError> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let name = channel.name();
        if let Err(e) = channel.discard_buffers() {
            tracing::debug!("could not clear buffers on {}: {}", name, e);
        }

        let reader_end = match channel.try_clone() {
            Ok(end) => end,
            Err(e) => {
                self.release(channel);
                self.state = ConnectionState::Error;
                return Err(e.into());
            }
        };

        self.queue.clear();
        self.cancel = CancellationToken::new();
        let dispatcher = Dispatcher::with_status(self.sinks.clone(), self.status_tx.clone());
        let reader = match spawn_reader(
            reader_end,
            self.queue.clone(),
            dispatcher,
            self.sinks.clone(),
            self.cancel.clone(),
        ) {
            Ok(reader) => reader,
            Err(e) => {
                self.release(channel);
                self.state = ConnectionState::Error;
                return Err(e.into());
            }
        };

        *lock_writer(&self.writer) = Some(channel);
        self.reader = Some(reader);
        self.state = ConnectionState::Connected;
        self.sinks.log(format!("Connected to {}", name));
        Ok(())
    }

    /// Full session start-up: open, let the controller boot, ask for an
    /// initial STATUS and start the periodic status timer
    pub async fn start(&mut self) -> Result<(), ProtocolError> {
        self.sinks.log("Starting access control session...");
        self.open()?;
        self.finish_start().await
    }

    /// Like [`start`](Self::start) over an already open transport
    pub async fn start_with(
        &mut self,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<(), ProtocolError> {
        self.attach(channel)?;
        self.finish_start().await
    }

    async fn finish_start(&mut self) -> Result<(), ProtocolError> {
        tokio::time::sleep(Duration::from_millis(self.config.startup_delay_ms)).await;
        if let Err(e) = self.send_command(Command::Status).await {
            self.close();
            return Err(e);
        }
        self.start_status_timer();
        self.sinks.log(format!(
            "Session started on {}",
            if self.config.port_name.is_empty() {
                "attached channel"
            } else {
                self.config.port_name.as_str()
            }
        ));
        Ok(())
    }

    /// Spawn the periodic STATUS request. Needs a Tokio runtime.
    pub fn start_status_timer(&mut self) {
        if self.config.status_interval_ms == 0 || self.status_task.is_some() {
            return;
        }
        let period = Duration::from_millis(self.config.status_interval_ms);
        let writer = self.writer.clone();
        let sinks = self.sinks.clone();
        let cancel = self.cancel.clone();

        self.status_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write_line(writer.clone(), Command::Status.encode()).await {
                            sinks.error(ErrorKind::Transport, format!("Status request failed: {}", e));
                        }
                    }
                }
            }
        }));
    }

    /// Send a typed command
    pub async fn send_command(&self, command: Command) -> Result<(), ProtocolError> {
        self.send_raw(command.as_str()).await
    }

    /// Send any command token (uppercased, `\n`-terminated). There is no
    /// acknowledgement; success means the bytes reached the port.
    pub async fn send_raw(&self, command: &str) -> Result<(), ProtocolError> {
        let line = encode_command(command);
        match write_line(self.writer.clone(), line).await {
            Ok(()) => {
                self.sinks.log(format!("-> Command sent: {}", command.trim().to_uppercase()));
                Ok(())
            }
            Err(e) => {
                self.sinks
                    .error(ErrorKind::Transport, format!("Error sending command: {}", e));
                Err(e)
            }
        }
    }

    /// Ask the controller for a VEK loop diagnostic and wait (at most
    /// 20 x 100ms) for the matching `DIAGNOSTICO_VEK` line in the inbound
    /// queue. Lines inspected before the match are consumed.
    pub async fn request_diagnostic(&self) -> Result<DiagnosticResult, ProtocolError> {
        self.send_command(Command::VekDiag).await?;

        let interval = Duration::from_millis(DIAGNOSTIC_POLL_INTERVAL_MS);
        let deadline = Instant::now() + interval * DIAGNOSTIC_POLL_ATTEMPTS;
        loop {
            if let Some(diag) = self.queue.take_first(DiagnosticResult::from_line) {
                tracing::debug!("VEK diagnostic received: {}", diag);
                return Ok(diag);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wake = (now + interval).min(deadline);
            let _ = tokio::time::timeout_at(wake, self.queue.arrived()).await;
        }

        tracing::warn!("no VEK diagnostic within {:?}", interval * DIAGNOSTIC_POLL_ATTEMPTS);
        Err(ProtocolError::Timeout)
    }

    /// Stop the timer and reader and release the port. Idempotent.
    pub fn close(&mut self) {
        let was_open = self.reader.is_some() || lock_writer(&self.writer).is_some();
        self.cancel.cancel();
        if let Some(task) = self.status_task.take() {
            task.abort();
        }
        if let Some(mut reader) = self.reader.take() {
            reader.shutdown(Duration::from_millis(READER_JOIN_TIMEOUT_MS));
        }
        let channel = with_port_lock(|| lock_writer(&self.writer).take());
        drop(channel);
        self.state = ConnectionState::Disconnected;
        if was_open {
            self.sinks.log("Session stopped");
        }
    }

    fn release(&self, channel: Box<dyn CommunicationChannel>) {
        with_port_lock(move || drop(channel));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_writer(
    writer: &SharedWriter,
) -> std::sync::MutexGuard<'_, Option<Box<dyn CommunicationChannel>>> {
    writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write one framed line under the port lock, off the async executor
async fn write_line(writer: SharedWriter, line: String) -> Result<(), ProtocolError> {
    tokio::task::spawn_blocking(move || {
        with_port_lock(|| -> Result<(), ProtocolError> {
            let mut guard = lock_writer(&writer);
            let channel = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
            channel.write_all(line.as_bytes())?;
            channel.flush()?;
            tracing::debug!("-> {}", line.trim_end());
            Ok(())
        })
    })
    .await
    .map_err(|e| ProtocolError::SerialError(format!("write task failed: {}", e)))?
}
