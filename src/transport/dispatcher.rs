//! Event dispatcher: the single task woken by the device's notification
//! signal.
//!
//! Each wake queries the combined status once and routes to either the
//! modem-status path or the receive-drain path. A failed wake records error
//! flags and notifies observers, then the loop goes back to waiting; only a
//! shutdown request ends it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Sender};

use crate::codec::decode;
use crate::domain::{ErrorFlags, EventMask, PurgeMask};
use crate::ports::EventSignal;

use super::events::TransportEvent;
use super::Shared;

/// Handle to the running dispatcher thread
pub struct Dispatcher {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn(shared: Arc<Shared>, signal: EventSignal) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("ftserial-dispatch".into())
            .spawn(move || {
                log::debug!("dispatcher started");
                loop {
                    select! {
                        recv(signal.receiver()) -> wake => {
                            if wake.is_err() {
                                break;
                            }
                            handle_event(&shared);
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("dispatcher stopped");
            })?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Ask the thread to exit and wait for it, unless called from the
    /// dispatcher thread itself.
    pub fn stop(mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("dispatcher thread panicked");
            }
        }
    }
}

const STATUS_QUERY_FAILED: &str = "an error occurred while reading the device status";
const MODEM_QUERY_FAILED: &str = "an error occurred while reading the modem status";
const RX_IO_FAILED: &str = "an IO error occurred";
const RX_READ_FAILED: &str = "an error occurred while reading bytes from the device";

/// Handle one wake of the notification signal.
pub(crate) fn handle_event(shared: &Shared) {
    let status = match shared.session.with_device(|device| device.status()) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return report_fault(shared, STATUS_QUERY_FAILED, &e),
        Err(e) => return report_fault(shared, STATUS_QUERY_FAILED, &e),
    };

    if status.events.contains(EventMask::MODEM_STATUS) {
        modem_status_changed(shared);
    } else if status.events.contains(EventMask::RX_CHAR) {
        receive(shared);
    } else {
        log::trace!("ignoring event mask {:#06x}", status.events.bits());
    }
}

/// Drain the device receive queue into the receive buffer.
fn receive(shared: &Shared) {
    let drained = shared.session.with_device(|device| {
        let queued = device.queue_status()? as usize;
        if queued == 0 {
            return Ok(Vec::new());
        }
        let mut chunk = vec![0u8; queued];
        let read = device.read(&mut chunk)?;
        chunk.truncate(read);
        Ok(chunk)
    });

    let bytes = match drained {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) if e.is_io() => return report_fault(shared, RX_IO_FAILED, &e),
        Ok(Err(e)) => return report_fault(shared, RX_READ_FAILED, &e),
        Err(e) => return report_fault(shared, RX_READ_FAILED, &e),
    };

    if bytes.is_empty() {
        log::trace!("receive event with empty queue");
        return;
    }

    let received = bytes.len();
    shared.buffer.append(&bytes);
    shared
        .observers
        .emit(TransportEvent::DataReady { received });
}

/// Read the modem status word and either purge (serious receive error) or
/// refresh the stored error flags. Neither branch notifies observers.
fn modem_status_changed(shared: &Shared) {
    let word = match shared.session.with_device(|device| device.modem_status()) {
        Ok(Ok(word)) => word,
        Ok(Err(e)) => return report_fault(shared, MODEM_QUERY_FAILED, &e),
        Err(e) => return report_fault(shared, MODEM_QUERY_FAILED, &e),
    };

    if decode::has_serious_error(word) {
        log::debug!("serious line error in modem status {word:#06x}, purging device queues");
        match shared
            .session
            .with_device(|device| device.purge(PurgeMask::RX | PurgeMask::TX))
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("purge after line error failed: {e}"),
            Err(_) => log::debug!("session closed before purge"),
        }
        return;
    }

    shared.session.set_errors(decode::decode_error_bits(word));
}

/// Record read-error (or not-open, if the session is gone) and notify.
fn report_fault(shared: &Shared, context: &str, cause: &dyn fmt::Display) {
    let flags = if shared.session.is_open() {
        ErrorFlags::READ
    } else {
        ErrorFlags::NOT_OPEN
    };
    log::warn!("{context}: {cause}");
    shared.session.record_fault(flags, format!("{context}: {cause}"));
    shared.observers.emit(TransportEvent::ErrorOccurred(flags));
}
