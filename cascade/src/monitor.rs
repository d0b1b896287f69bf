//! Background thread that polls the status record for the controller.
//!
//! The thread holds only a `Weak` reference, so dropping the last controller
//! handle ends the loop at the next tick.

use std::io;
use std::sync::Weak;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::controller::Controller;

pub struct MonitorHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// An in-progress completion (tests, commit, cascade delay) finishes first.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            tracing::error!("monitor thread panicked");
        }
    }
}

/// Spawn the polling loop. The first poll happens immediately.
pub fn spawn(controller: Weak<Controller>, interval: Duration) -> io::Result<MonitorHandle> {
    let (stop, stopped) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("cascade-monitor".to_string())
        .spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "monitor started");
            loop {
                match controller.upgrade() {
                    Some(controller) => controller.poll_handshake(),
                    None => break,
                }
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("monitor stopped");
        })?;
    Ok(MonitorHandle { stop, thread })
}
