//! Demo Mode - simulated lane hardware and collaborators
//!
//! In-memory stand-ins for everything outside the core: the gate controller
//! on its serial link, the record store, the ticket printer, the barrier
//! relay and the plate recognition appliance. Used by the tests and for
//! bench runs without a lane.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::anpr::{AlarmRequest, ReachabilityProbe};
use crate::barrier::{BarrierActuator, BarrierSide};
use crate::config::GateConfig;
use crate::protocol::{CommunicationChannel, GarageState, LineFramer, ProtocolError};
use crate::store::{ParameterStore, PlateRecord, RecordStore, Register, StoreError};
use crate::ticket::{AccessRecord, PrintError, TicketPrinter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Controller {
    /// Bytes waiting to be read by the host
    inbound: VecDeque<u8>,
    /// Everything the host wrote
    written: Vec<u8>,
    commands: LineFramer,
    auto_reply: bool,
    answer_diagnostics: bool,
    state: GarageState,
    vehicle_present: bool,
    disconnected: bool,
}

impl Controller {
    fn reply(&mut self, line: String) {
        self.inbound.extend(line.as_bytes());
        self.inbound.push_back(b'\n');
    }

    fn execute(&mut self, command: &str) {
        match command {
            "STATUS" => {
                let line = serde_json::json!({
                    "tipo": "ESTADO_COMPLETO",
                    "estado": self.state.as_str(),
                    "vehiculo_presente": self.vehicle_present,
                })
                .to_string();
                self.reply(line);
            }
            "VEK_DIAG" if self.answer_diagnostics => {
                let line = serde_json::json!({
                    "tipo": "DIAGNOSTICO_VEK",
                    "relay1": self.vehicle_present,
                    "relay2": false,
                    "interpretacion": if self.vehicle_present {
                        "VEHICULO PRESENTE"
                    } else {
                        "SIN VEHICULO"
                    },
                    "config_dip": "NA",
                })
                .to_string();
                self.reply(line);
            }
            "RESET" => {
                self.state = GarageState::Waiting;
                self.vehicle_present = false;
                self.reply(r#"{"tipo":"SISTEMA_RESETEADO"}"#.to_string());
            }
            _ => {}
        }
    }
}

/// In-memory controller link. Clones share the same line, so a test keeps
/// one clone to inject frames while the session owns another.
#[derive(Debug, Clone)]
pub struct LoopbackChannel {
    inner: Arc<Mutex<Controller>>,
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackChannel {
    /// A silent line: only injected frames are ever read
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Controller {
                inbound: VecDeque::new(),
                written: Vec::new(),
                commands: LineFramer::new(),
                auto_reply: false,
                answer_diagnostics: true,
                state: GarageState::Waiting,
                vehicle_present: false,
                disconnected: false,
            })),
        }
    }

    /// A line with a simulated controller answering `STATUS`, `VEK_DIAG`
    /// and `RESET`
    pub fn simulated_controller() -> Self {
        let channel = Self::new();
        lock(&channel.inner).auto_reply = true;
        channel
    }

    /// Queue raw bytes for the host to read
    pub fn inject_bytes(&self, bytes: &[u8]) {
        lock(&self.inner).inbound.extend(bytes);
    }

    /// Queue one `\n`-terminated frame
    pub fn inject_line(&self, line: &str) {
        lock(&self.inner).reply(line.to_string());
    }

    /// Commands written by the host so far
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&lock(&self.inner).written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Set the state and vehicle flag reported on `STATUS`
    pub fn set_state(&self, state: GarageState, vehicle_present: bool) {
        let mut inner = lock(&self.inner);
        inner.state = state;
        inner.vehicle_present = vehicle_present;
    }

    /// Stop answering `VEK_DIAG`
    pub fn mute_diagnostics(&self) {
        lock(&self.inner).answer_diagnostics = false;
    }

    /// Make every further read and write fail, like an unplugged adapter
    pub fn disconnect(&self) {
        lock(&self.inner).disconnected = true;
    }

    fn check(inner: &Controller) -> io::Result<()> {
        if inner.disconnected {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback disconnected"))
        } else {
            Ok(())
        }
    }
}

impl Read for LoopbackChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = lock(&self.inner);
        Self::check(&inner)?;
        if inner.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(inner.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = lock(&self.inner);
        Self::check(&inner)?;
        inner.written.extend_from_slice(buf);
        let commands = inner.commands.push(buf);
        if inner.auto_reply {
            for command in commands.into_iter().flatten() {
                inner.execute(&command);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Self::check(&lock(&self.inner))
    }
}

impl CommunicationChannel for LoopbackChannel {
    fn discard_buffers(&mut self) -> io::Result<()> {
        lock(&self.inner).inbound.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let inner = lock(&self.inner);
        Self::check(&inner)?;
        Ok(inner.inbound.len() as u32)
    }

    fn name(&self) -> String {
        "loopback".to_string()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    config: GateConfig,
    registers: Vec<Register>,
    accesses: Vec<AccessRecord>,
    plates: Vec<PlateRecord>,
    /// Highest number handed out by `reserve_ticket_number`
    reserved: u64,
    next_plate_id: i64,
    unavailable: bool,
    reject_inserts: bool,
}

/// Record and parameter store held in memory. Ticket numbers are unique:
/// inserting an already issued number fails with
/// [`StoreError::DuplicateTicket`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    /// Empty store with no registers
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one active register
    pub fn with_active_register(number: i64) -> Self {
        let store = Self::new();
        store.add_register(Register {
            number,
            name: format!("CAJA {}", number),
            location: String::new(),
            active: true,
        });
        store
    }

    /// Delay applied before every query, to let concurrent runs interleave
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Make every query fail
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// Make `insert_access` fail while every other query still works
    pub fn set_reject_inserts(&self, reject: bool) {
        lock(&self.state).reject_inserts = reject;
    }

    /// Replace the configuration returned by `load`
    pub fn set_config(&self, config: GateConfig) {
        lock(&self.state).config = config;
    }

    /// Add a register (active or not)
    pub fn add_register(&self, register: Register) {
        lock(&self.state).registers.push(register);
    }

    /// File a plate read, as the appliance does. Returns the incidence id.
    pub fn record_plate(
        &self,
        camera_id: &str,
        number_plate: &str,
        image_path: Option<String>,
    ) -> i64 {
        let mut state = lock(&self.state);
        state.next_plate_id += 1;
        let id = state.next_plate_id;
        state.plates.push(PlateRecord {
            id,
            number_plate: number_plate.to_string(),
            image_path,
            camera_id: camera_id.to_string(),
        });
        id
    }

    /// Accesses inserted so far
    pub fn accesses(&self) -> Vec<AccessRecord> {
        lock(&self.state).accesses.clone()
    }

    async fn enter(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let state = lock(&self.state);
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(state)
    }
}

fn last_issued(state: &StoreState) -> u64 {
    state
        .accesses
        .iter()
        .map(|record| record.ticket_number)
        .max()
        .unwrap_or(0)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn active_register(&self) -> Result<Option<Register>, StoreError> {
        let state = self.enter().await?;
        Ok(state.registers.iter().find(|r| r.active).cloned())
    }

    async fn last_ticket_number(&self) -> Result<u64, StoreError> {
        let state = self.enter().await?;
        Ok(last_issued(&state))
    }

    async fn reserve_ticket_number(&self) -> Result<u64, StoreError> {
        let mut state = self.enter().await?;
        let next = state.reserved.max(last_issued(&state)) + 1;
        state.reserved = next;
        Ok(next)
    }

    async fn insert_access(&self, record: &AccessRecord) -> Result<(), StoreError> {
        let mut state = self.enter().await?;
        if state.reject_inserts {
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }
        if state
            .accesses
            .iter()
            .any(|existing| existing.ticket_number == record.ticket_number)
        {
            return Err(StoreError::DuplicateTicket(record.ticket_number));
        }
        state.accesses.push(record.clone());
        Ok(())
    }

    async fn latest_plate(&self, camera_id: &str) -> Result<Option<PlateRecord>, StoreError> {
        let state = self.enter().await?;
        Ok(state
            .plates
            .iter()
            .rev()
            .find(|plate| plate.camera_id == camera_id)
            .cloned())
    }
}

#[async_trait]
impl ParameterStore for MemoryStore {
    async fn load(&self) -> Result<GateConfig, StoreError> {
        let state = self.enter().await?;
        Ok(state.config.clone())
    }
}

// ---------------------------------------------------------------------------
// Printer, barrier, probe
// ---------------------------------------------------------------------------

/// Printer that keeps what it printed
#[derive(Debug, Default)]
pub struct MemoryPrinter {
    offline: AtomicBool,
    delay: Mutex<Duration>,
    printed: Mutex<Vec<(String, AccessRecord)>>,
}

impl MemoryPrinter {
    /// Online printer that prints instantly
    pub fn new() -> Self {
        Self::default()
    }

    /// Make further prints fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every print by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// `(printer name, record)` for every printed ticket
    pub fn printed(&self) -> Vec<(String, AccessRecord)> {
        lock(&self.printed).clone()
    }
}

#[async_trait]
impl TicketPrinter for MemoryPrinter {
    async fn print(&self, printer_name: &str, record: &AccessRecord) -> Result<(), PrintError> {
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(PrintError::Unavailable(printer_name.to_string()));
        }
        tracing::debug!("printed:\n{}", record.render_text().join("\n"));
        lock(&self.printed).push((printer_name.to_string(), record.clone()));
        Ok(())
    }
}

/// Barrier that records pulses instead of driving a relay
#[derive(Debug, Default)]
pub struct RecordingBarrier {
    jammed: AtomicBool,
    pulses: Mutex<Vec<BarrierSide>>,
}

impl RecordingBarrier {
    /// Working barrier
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every pulse fail
    pub fn set_jammed(&self, jammed: bool) {
        self.jammed.store(jammed, Ordering::SeqCst);
    }

    /// Sides pulsed so far
    pub fn pulses(&self) -> Vec<BarrierSide> {
        lock(&self.pulses).clone()
    }
}

#[async_trait]
impl BarrierActuator for RecordingBarrier {
    async fn pulse(&self, side: BarrierSide) -> Result<(), ProtocolError> {
        if self.jammed.load(Ordering::SeqCst) {
            return Err(ProtocolError::SerialError("relay not responding".to_string()));
        }
        lock(&self.pulses).push(side);
        Ok(())
    }
}

/// Probe with a fixed answer
#[derive(Debug, Default)]
pub struct StaticProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl StaticProbe {
    /// Probe answering `reachable` for every host
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the reachability answer
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of checks made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self, _host: &str, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Appliance
// ---------------------------------------------------------------------------

/// Random plate in the four letters, two digits format
pub fn random_plate(rng: &mut impl Rng) -> String {
    const LETTERS: &[u8] = b"BCDFGHJKLPRSTVWXYZ";
    let mut plate = String::with_capacity(6);
    for _ in 0..4 {
        plate.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
    }
    for _ in 0..2 {
        plate.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    plate
}

#[derive(Debug, Default)]
struct ApplianceState {
    alarms: Vec<AlarmRequest>,
    /// Readings to file next, before falling back to random plates
    script: VecDeque<String>,
}

/// Plate recognition appliance on a local TCP port. Every alarm received
/// files a plate for `camera_id` in the store.
pub struct SimulatedAppliance {
    addr: SocketAddr,
    state: Arc<Mutex<ApplianceState>>,
    cancel: CancellationToken,
}

impl SimulatedAppliance {
    /// Listen on an ephemeral localhost port
    pub async fn start(store: Arc<MemoryStore>, camera_id: impl Into<String>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ApplianceState::default()));
        let cancel = CancellationToken::new();
        let camera_id = camera_id.into();

        let task_state = state.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            loop {
                let (mut socket, peer) = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("appliance accept failed: {}", e);
                            continue;
                        }
                    },
                };

                let mut payload = Vec::new();
                if let Err(e) = socket.read_to_end(&mut payload).await {
                    tracing::warn!("appliance read from {} failed: {}", peer, e);
                    continue;
                }
                let xml = String::from_utf8_lossy(&payload);
                let alarm = match AlarmRequest::from_xml(&xml) {
                    Ok(alarm) => alarm,
                    Err(e) => {
                        tracing::warn!("appliance rejected alarm from {}: {}", peer, e);
                        continue;
                    }
                };

                let plate = {
                    let mut state = lock(&task_state);
                    state.alarms.push(alarm);
                    state.script.pop_front()
                }
                .unwrap_or_else(|| random_plate(&mut rng));

                let id = store.record_plate(
                    &camera_id,
                    &plate,
                    Some(format!("D:\\anpr\\{}.jpg", plate)),
                );
                tracing::debug!("appliance filed {} as incidence {}", plate, id);
            }
        });

        Ok(Self { addr, state, cancel })
    }

    /// Address the appliance listens on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the appliance listens on
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// File `reading` on the next alarm (e.g. `"NO_PLATE"`)
    pub fn script(&self, reading: impl Into<String>) {
        lock(&self.state).script.push_back(reading.into());
    }

    /// Alarms received so far
    pub fn alarms(&self) -> Vec<AlarmRequest> {
        lock(&self.state).alarms.clone()
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SimulatedAppliance {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
