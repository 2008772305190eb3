//! Waitable notification primitive
//!
//! An auto-reset event: any number of `set()` calls before the waiter wakes
//! collapse into a single wake-up, and waking consumes the signal. Built on a
//! one-slot crossbeam channel so the dispatcher can `select!` on it alongside
//! its shutdown channel.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Cloneable handle to one waitable object. All clones share the same slot.
#[derive(Debug, Clone)]
pub struct EventSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl EventSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Signal the object. Never blocks; a pending signal absorbs this one.
    pub fn set(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::trace!("event signal set after all waiters dropped")
            }
        }
    }

    /// True if a signal is pending and has not been consumed yet
    pub fn is_set(&self) -> bool {
        !self.rx.is_empty()
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for EventSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn repeated_sets_collapse_into_one_wake() {
        let signal = EventSignal::new();
        signal.set();
        signal.set();
        signal.set();
        assert!(signal.receiver().try_recv().is_ok());
        assert!(signal.receiver().try_recv().is_err());
        assert!(!signal.is_set());
    }

    #[test]
    fn fresh_signal_is_not_set() {
        let signal = EventSignal::new();
        assert!(!signal.is_set());
        assert!(signal
            .receiver()
            .recv_timeout(Duration::from_millis(20))
            .is_err());
    }

    #[test]
    fn clone_signals_the_shared_slot() {
        let signal = EventSignal::new();
        let remote = signal.clone();
        let setter = thread::spawn(move || remote.set());
        assert!(signal.receiver().recv_timeout(Duration::from_secs(2)).is_ok());
        setter.join().unwrap();
    }
}
