//! Background reader
//!
//! A dedicated OS thread owns the read side of the controller transport. It
//! polls for pending bytes (sleeping briefly when idle), frames them into
//! lines, queues each line for request/response correlation and hands it to
//! the dispatcher. Cancellation is cooperative and checked every iteration.

use std::io::{ErrorKind as IoErrorKind, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{CommunicationChannel, InboundQueue, LineFramer, READER_IDLE_MS};
use crate::garage::{Dispatcher, ErrorKind, NotificationSinks};

const READ_CHUNK: usize = 512;

/// Handle on a running reader thread
pub(crate) struct ReaderHandle {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Signal the thread and wait for it up to `timeout`. A thread still
    /// stuck in a blocking read after the deadline is left detached.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("reader thread did not stop within {:?}, detaching", timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(READER_IDLE_MS));
        }
        if thread.join().is_err() {
            tracing::error!("reader thread panicked");
        }
        true
    }
}

/// Spawn the reader thread over `channel`
pub(crate) fn spawn_reader(
    channel: Box<dyn CommunicationChannel>,
    queue: InboundQueue,
    dispatcher: Dispatcher,
    sinks: NotificationSinks,
    cancel: CancellationToken,
) -> std::io::Result<ReaderHandle> {
    let token = cancel.clone();
    let thread = thread::Builder::new()
        .name("controller-reader".to_string())
        .spawn(move || run(channel, queue, dispatcher, sinks, token))?;
    Ok(ReaderHandle {
        cancel,
        thread: Some(thread),
    })
}

fn run(
    mut channel: Box<dyn CommunicationChannel>,
    queue: InboundQueue,
    mut dispatcher: Dispatcher,
    sinks: NotificationSinks,
    cancel: CancellationToken,
) {
    let idle = Duration::from_millis(READER_IDLE_MS);
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut last_error: Option<String> = None;

    tracing::debug!("reader started on {}", channel.name());

    while !cancel.is_cancelled() {
        let result = channel.bytes_to_read().and_then(|pending| {
            if pending == 0 {
                return Ok(0);
            }
            let want = (pending as usize).min(buf.len());
            channel.read(&mut buf[..want])
        });

        // Any successful poll ends a failure streak, so a repeat is reported
        if result.is_ok() {
            last_error = None;
        }

        match result {
            Ok(0) => thread::sleep(idle),
            Ok(n) => {
                for frame in framer.push(&buf[..n]) {
                    match frame {
                        Ok(line) => {
                            if let Some(evicted) = queue.push(line.as_str()) {
                                tracing::trace!("inbound queue full, dropped: {}", evicted);
                            }
                            dispatcher.handle_line(&line);
                        }
                        Err(e) => sinks.error(ErrorKind::Decode, e.to_string()),
                    }
                }
            }
            Err(e) if e.kind() == IoErrorKind::TimedOut || e.kind() == IoErrorKind::WouldBlock => {}
            Err(e) => {
                // A port closed underneath us during teardown is a normal stop
                if cancel.is_cancelled() {
                    break;
                }
                let message = format!("Read error: {}", e);
                if last_error.as_deref() != Some(message.as_str()) {
                    sinks.error(ErrorKind::Transport, message.clone());
                    last_error = Some(message);
                }
                thread::sleep(idle);
            }
        }
    }

    tracing::debug!("reader stopped");
}
