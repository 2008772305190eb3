//! Transport notifications
//!
//! Observers subscribe and receive every event on their own bounded crossbeam
//! channel. Dropping the receiver unsubscribes.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::domain::{ErrorFlags, FlowControl, LineEncoding};

/// Events held per subscriber before new ones are dropped for it
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Something observable happened on the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device was opened and the dispatcher is running
    Connected,
    /// New bytes were appended to the receive buffer
    DataReady { received: usize },
    /// The session is about to be closed
    AboutToClose,
    /// A status query or receive drain failed; carries the recorded flags
    ErrorOccurred(ErrorFlags),
    BaudRateChanged(u32),
    LineEncodingChanged(LineEncoding),
    FlowControlChanged(FlowControl),
    DataTerminalReadyChanged(bool),
    RequestToSendChanged(bool),
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub struct Observers {
    subscribers: Mutex<Vec<Sender<TransportEvent>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// New receiver for every event emitted from now on. A receiver that is
    /// not drained keeps its first `EVENT_QUEUE_CAPACITY` pending events and
    /// misses later ones until it catches up.
    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every subscriber, forgetting the ones that hung up.
    /// Never blocks: a full queue drops the event for that subscriber only.
    pub fn emit(&self, event: TransportEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                log::trace!("Subscriber queue full, dropped {dropped:?}");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_the_event() {
        let observers = Observers::new();
        let a = observers.subscribe();
        let b = observers.subscribe();

        observers.emit(TransportEvent::BaudRateChanged(9600));

        assert_eq!(a.try_recv().unwrap(), TransportEvent::BaudRateChanged(9600));
        assert_eq!(b.try_recv().unwrap(), TransportEvent::BaudRateChanged(9600));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let observers = Observers::new();
        let kept = observers.subscribe();
        drop(observers.subscribe());
        assert_eq!(observers.subscriber_count(), 2);

        observers.emit(TransportEvent::Connected);
        assert_eq!(observers.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), TransportEvent::Connected);
    }

    #[test]
    fn idle_subscriber_queue_stays_bounded() {
        let observers = Observers::new();
        let idle = observers.subscribe();

        for received in 0..EVENT_QUEUE_CAPACITY + 10 {
            observers.emit(TransportEvent::DataReady { received });
        }

        assert_eq!(idle.len(), EVENT_QUEUE_CAPACITY);
        assert_eq!(observers.subscriber_count(), 1);
        assert_eq!(
            idle.try_recv().unwrap(),
            TransportEvent::DataReady { received: 0 }
        );

        // Draining makes room again
        observers.emit(TransportEvent::Connected);
        assert_eq!(idle.len(), EVENT_QUEUE_CAPACITY);
        assert_eq!(idle.try_iter().last(), Some(TransportEvent::Connected));
    }
}
