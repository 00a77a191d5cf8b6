//! Controller session over the in-memory loopback

mod common;

use common::{eventually, init_tracing, recv_within};
use parkgate_core::demo::LoopbackChannel;
use parkgate_core::garage::{notification_channels, ErrorKind};
use parkgate_core::protocol::{
    Command, CommunicationChannel, Connection, ConnectionConfig, ConnectionState, GarageState,
    ProtocolError,
};
use pretty_assertions::assert_eq;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn quick_config() -> ConnectionConfig {
    ConnectionConfig {
        port_name: String::new(),
        startup_delay_ms: 0,
        status_interval_ms: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_requests_status_and_tracks_state() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = LoopbackChannel::simulated_controller();
    line.set_state(GarageState::Processing, true);

    let mut session = Connection::new(quick_config(), sinks);
    session.start_with(Box::new(line.clone())).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(line.written_lines(), vec!["STATUS".to_string()]);

    let change = recv_within(&mut rx.state_changes, Duration::from_secs(2))
        .await
        .expect("state change");
    assert_eq!(change.previous, GarageState::Unknown);
    assert_eq!(change.current, GarageState::Processing);

    let mut status = session.subscribe_status();
    let status = status
        .wait_for(|s| s.vehicle_present)
        .await
        .unwrap()
        .clone();
    assert_eq!(status.state, GarageState::Processing);
    session.close();
}

#[tokio::test]
async fn test_lines_are_queued_in_order_and_bounded() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    let mut burst = String::new();
    for i in 0..150 {
        burst.push_str(&format!("{{\"tipo\":\"RUIDO\",\"n\":{}}}\n", i));
    }
    line.inject_bytes(burst.as_bytes());

    let queue = session.queue().clone();
    assert!(
        eventually(Duration::from_secs(2), || queue
            .snapshot()
            .last()
            .is_some_and(|l| l.contains("\"n\":149")))
        .await
    );
    let lines = queue.snapshot();
    assert_eq!(lines.len(), 100);
    assert!(lines[0].contains("\"n\":50"));
    session.close();
}

#[tokio::test]
async fn test_diagnostic_round_trip() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::simulated_controller();
    line.set_state(GarageState::VehicleDetected, true);
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    let diag = session.request_diagnostic().await.unwrap();
    assert!(diag.relay1);
    assert!(!diag.relay2);
    assert_eq!(diag.interpretation, "VEHICULO PRESENTE");
    assert_eq!(line.written_lines(), vec!["VEK_DIAG".to_string()]);
    session.close();
}

#[tokio::test]
async fn test_diagnostic_leaves_later_lines_queued() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.inject_line(r#"{"tipo":"ESTADO_COMPLETO","estado":"ESPERANDO"}"#);
    line.inject_line(
        r#"{"tipo":"DIAGNOSTICO_VEK","relay1":false,"relay2":true,"interpretacion":"LAZO","config_dip":"01"}"#,
    );
    line.inject_line(r#"{"evento":"VEHICULO_ENTRADA","timestamp":5}"#);
    let queue = session.queue().clone();
    assert!(eventually(Duration::from_secs(2), || queue.len() == 3).await);

    let diag = session.request_diagnostic().await.unwrap();
    assert_eq!(diag.dip_config, "01");
    assert_eq!(queue.len(), 1);
    assert!(queue.snapshot()[0].contains("VEHICULO_ENTRADA"));
    session.close();
}

#[tokio::test]
async fn test_diagnostic_times_out_within_bound() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::simulated_controller();
    line.mute_diagnostics();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    // Unrelated traffic must not end the wait early
    line.inject_line(r#"{"tipo":"ESTADO_COMPLETO","estado":"ESPERANDO"}"#);

    let started = Instant::now();
    let result = session.request_diagnostic().await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert!(elapsed >= Duration::from_millis(1900), "{:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(2100), "{:?}", elapsed);
    session.close();
}

#[tokio::test]
async fn test_periodic_status_requests() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::simulated_controller();
    let mut session = Connection::new(
        ConnectionConfig {
            status_interval_ms: 50,
            ..quick_config()
        },
        sinks,
    );
    session.start_with(Box::new(line.clone())).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let sent = line
        .written_lines()
        .iter()
        .filter(|l| l.as_str() == "STATUS")
        .count();
    assert!(sent >= 3, "only {} STATUS sent", sent);

    session.close();
    let after_close = line.written_lines().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(line.written_lines().len(), after_close);
}

#[tokio::test]
async fn test_close_stops_reader_and_releases_port() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();
    assert!(matches!(
        session.attach(Box::new(line.clone())),
        Err(ProtocolError::AlreadyConnected)
    ));

    session.close();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(
        session.send_command(Command::Help).await,
        Err(ProtocolError::NotConnected)
    ));

    line.inject_line(r#"{"evento":"VEHICULO_ENTRADA","timestamp":1}"#);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.queue().is_empty());
    assert!(rx.vehicles.try_recv().is_err());

    // Closing twice is harmless
    session.close();
}

#[tokio::test]
async fn test_reconnect_starts_from_unknown_state() {
    init_tracing();
    let (sinks, _rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);

    session.attach(Box::new(line.clone())).unwrap();
    line.inject_line(r#"{"tipo":"ESTADO_COMPLETO","estado":"COOLDOWN"}"#);
    let mut status = session.subscribe_status();
    status
        .wait_for(|s| s.state == GarageState::Cooldown)
        .await
        .unwrap();
    session.close();

    session.attach(Box::new(LoopbackChannel::new())).unwrap();
    assert_eq!(session.status().state, GarageState::Unknown);
    session.close();
}

#[tokio::test]
async fn test_read_failure_is_reported_once() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.disconnect();
    let notice = recv_within(&mut rx.errors, Duration::from_secs(2))
        .await
        .expect("transport error");
    assert_eq!(notice.kind, ErrorKind::Transport);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.errors.try_recv().is_err());
    session.close();
}

#[tokio::test]
async fn test_invalid_utf8_frame_is_a_decode_error() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = LoopbackChannel::new();
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.inject_bytes(b"{\"tipo\":\"ESTADO_COMPLETO\",\"estado\":\"ESPER\xC3ANDO\"}\n");
    line.inject_line(r#"{"tipo":"ESTADO_COMPLETO","estado":"ESPERANDO"}"#);

    let notice = recv_within(&mut rx.errors, Duration::from_secs(2))
        .await
        .expect("decode error");
    assert_eq!(notice.kind, ErrorKind::Decode);
    let queue = session.queue().clone();
    assert!(eventually(Duration::from_secs(2), || queue.len() == 1).await);
    assert!(!queue.snapshot()[0].contains('\u{FFFD}'));
    session.close();
}

/// Scripted transport: polls fail while `failing` is set, and once `armed`
/// every read blocks for `read_delay` before failing
#[derive(Clone)]
struct ScriptedChannel {
    failing: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
    reading: Arc<AtomicBool>,
    read_delay: Duration,
}

impl ScriptedChannel {
    fn new(read_delay: Duration) -> Self {
        Self {
            failing: Arc::new(AtomicBool::new(false)),
            armed: Arc::new(AtomicBool::new(false)),
            reading: Arc::new(AtomicBool::new(false)),
            read_delay,
        }
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        self.reading.store(true, Ordering::SeqCst);
        std::thread::sleep(self.read_delay);
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"))
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn discard_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable glitch"));
        }
        Ok(u32::from(self.armed.load(Ordering::SeqCst)))
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

#[tokio::test]
async fn test_read_failure_after_idle_recovery_is_reported_again() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = ScriptedChannel::new(Duration::ZERO);
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.failing.store(true, Ordering::SeqCst);
    let first = recv_within(&mut rx.errors, Duration::from_secs(2))
        .await
        .expect("first failure");
    assert_eq!(first.kind, ErrorKind::Transport);
    assert_eq!(first.message, "Read error: cable glitch");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.errors.try_recv().is_err());

    // Idle polls succeed, then the same fault returns
    line.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    line.failing.store(true, Ordering::SeqCst);

    let second = recv_within(&mut rx.errors, Duration::from_secs(2))
        .await
        .expect("repeated failure");
    assert_eq!(second.message, "Read error: cable glitch");
    session.close();
}

#[tokio::test]
async fn test_read_error_during_close_is_not_reported() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = ScriptedChannel::new(Duration::from_millis(300));
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.armed.store(true, Ordering::SeqCst);
    let reading = line.reading.clone();
    assert!(eventually(Duration::from_secs(2), || reading.load(Ordering::SeqCst)).await);

    let started = Instant::now();
    session.close();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);
    assert!(rx.errors.try_recv().is_err());
}

#[tokio::test]
async fn test_close_is_bounded_when_reader_is_stuck() {
    init_tracing();
    let (sinks, mut rx) = notification_channels();
    let line = ScriptedChannel::new(Duration::from_secs(4));
    let mut session = Connection::new(quick_config(), sinks);
    session.attach(Box::new(line.clone())).unwrap();

    line.armed.store(true, Ordering::SeqCst);
    let reading = line.reading.clone();
    assert!(eventually(Duration::from_secs(2), || reading.load(Ordering::SeqCst)).await);

    let started = Instant::now();
    session.close();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(1900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3000), "{:?}", elapsed);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(rx.errors.try_recv().is_err());
}
