//! Receive buffer: FIFO byte queue paired with an availability counter.
//!
//! The dispatcher appends, callers take. The queue and the counter use
//! separate locks so a reader never waits on the device section, and a
//! blocked waiter is released by the counter alone.
//!
//! Invariant: `available() <= queued bytes` at every instant, and the two are
//! equal whenever no append or take is half-way through. Appends extend the
//! queue before releasing permits; takes acquire permits before removing bytes.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Permits {
    count: usize,
    interrupted: bool,
}

/// Counting primitive: one permit per buffered byte.
#[derive(Debug, Default)]
struct ByteSemaphore {
    permits: Mutex<Permits>,
    ready: Condvar,
}

impl ByteSemaphore {
    fn release(&self, n: usize) {
        lock(&self.permits).count += n;
        self.ready.notify_all();
    }

    /// Take exactly `n` permits or none at all
    fn try_acquire(&self, n: usize) -> bool {
        let mut permits = lock(&self.permits);
        if permits.count >= n {
            permits.count -= n;
            true
        } else {
            false
        }
    }

    fn available(&self) -> usize {
        lock(&self.permits).count
    }

    fn wait_nonzero(&self, timeout: Duration) -> bool {
        let permits = lock(&self.permits);
        let (permits, _) = self
            .ready
            .wait_timeout_while(permits, timeout, |p| p.count == 0 && !p.interrupted)
            .unwrap_or_else(PoisonError::into_inner);
        permits.count > 0
    }

    fn set_interrupted(&self, interrupted: bool) {
        lock(&self.permits).interrupted = interrupted;
        self.ready.notify_all();
    }
}

/// Bytes received from the device and not yet read by the caller.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    queue: Mutex<VecDeque<u8>>,
    permits: ByteSemaphore,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: queue `bytes` and make them available, waking waiters.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        lock(&self.queue).extend(bytes);
        self.permits.release(bytes.len());
    }

    /// Consumer side: remove and return up to `max` bytes from the front.
    ///
    /// Never blocks. If the permits cannot be reserved (another reader got
    /// there first) the result is empty rather than partial.
    pub fn take_up_to(&self, max: usize) -> Vec<u8> {
        let n = max.min(self.permits.available());
        if n == 0 || !self.permits.try_acquire(n) {
            return Vec::new();
        }
        lock(&self.queue).drain(..n).collect()
    }

    /// Like `take_up_to`, copying into `out`. Returns the number of bytes copied.
    pub fn take_into(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.permits.available());
        if n == 0 || !self.permits.try_acquire(n) {
            return 0;
        }
        let mut queue = lock(&self.queue);
        for (slot, byte) in out.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        n
    }

    /// Bytes that can be taken right now
    pub fn available(&self) -> usize {
        self.permits.available()
    }

    /// Block until at least one byte is available, the buffer is interrupted,
    /// or `timeout` elapses. Returns immediately if data is already there.
    pub fn wait_available(&self, timeout: Duration) -> bool {
        self.permits.wait_nonzero(timeout)
    }

    /// Release every blocked waiter (they return false unless data is present).
    /// Stays in effect until `resume`.
    pub fn interrupt(&self) {
        self.permits.set_interrupted(true);
    }

    pub fn resume(&self) {
        self.permits.set_interrupted(false);
    }

    /// Discard everything currently available. Returns how many bytes were dropped.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        loop {
            let n = self.permits.available();
            if n == 0 {
                return dropped;
            }
            if self.permits.try_acquire(n) {
                lock(&self.queue).drain(..n);
                dropped += n;
            }
        }
    }
}
