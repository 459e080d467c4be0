//! Multi-producer / single-consumer queue with per-item acknowledgment.
//!
//! Items travel over an unbounded crossbeam channel. Backpressure is counted
//! in *unacknowledged* items rather than queued ones: a producer blocks in
//! `push` while `capacity` items have been pushed but not yet `ack`ed, and
//! `await_all_acked` lets a producer stay alive until the consumer has
//! finished with everything it sent.

use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    unfinished: usize,
    peak: usize,
    closed: bool,
}

pub(crate) struct AckQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: Option<usize>,
    state: Mutex<State>,
    // producers blocked in `push`
    space: Condvar,
    // producers blocked in `await_all_acked`
    drained: Condvar,
}

impl<T> AckQueue<T> {
    /// `capacity = None` never blocks producers.
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            capacity: capacity.map(|c| c.max(1)),
            state: Mutex::new(State::default()),
            space: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while the queue is at capacity. Fails once the queue is closed.
    pub(crate) fn push(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        while !state.closed && self.capacity.is_some_and(|cap| state.unfinished >= cap) {
            state = self
                .space
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            bail!("Queue is closed");
        }
        state.unfinished += 1;
        state.peak = state.peak.max(state.unfinished);
        if self.sender.send(item).is_err() {
            bail!("Queue receiver disconnected");
        }
        Ok(())
    }

    /// Waits up to `timeout` for the next item.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Marks one previously popped item as finished.
    pub(crate) fn ack(&self) -> Result<()> {
        let mut state = self.lock();
        if state.unfinished == 0 {
            bail!("ack() called more times than there were items pushed");
        }
        state.unfinished -= 1;
        self.space.notify_all();
        if state.unfinished == 0 {
            self.drained.notify_all();
        }
        Ok(())
    }

    /// Blocks until every pushed item was acknowledged or the queue is closed.
    pub(crate) fn await_all_acked(&self) {
        let mut state = self.lock();
        while state.unfinished > 0 && !state.closed {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes every blocked producer. Later pushes fail.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.space.notify_all();
        self.drained.notify_all();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.lock().unfinished
    }

    /// Highest number of unacknowledged items seen so far.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.lock().peak
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ack_without_push_fails() {
        let queue: AckQueue<u32> = AckQueue::new(None);
        assert!(queue.ack().is_err());
    }

    #[test]
    fn push_blocks_until_ack() -> Result<()> {
        let queue = Arc::new(AckQueue::new(Some(2)));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || -> Result<()> {
                for i in 0..6u32 {
                    queue.push(i)?;
                }
                queue.await_all_acked();
                Ok(())
            })
        };

        let mut received = Vec::new();
        while received.len() < 6 {
            if let Some(item) = queue.pop_timeout(Duration::from_millis(100)) {
                assert!(queue.in_flight() <= 2);
                received.push(item);
                queue.ack()?;
            }
        }
        producer.join().expect("producer panicked")?;

        assert_eq!(received, (0..6).collect::<Vec<_>>());
        assert!(queue.peak_in_flight() <= 2);
        assert_eq!(queue.in_flight(), 0);
        Ok(())
    }

    #[test]
    fn close_releases_blocked_producers() {
        let queue = Arc::new(AckQueue::new(Some(1)));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let first = queue.push(1u32);
                let second = queue.push(2u32);
                queue.await_all_acked();
                (first.is_ok(), second.is_ok())
            })
        };

        while queue.in_flight() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        queue.close();
        assert_eq!(producer.join().expect("producer panicked"), (true, false));
    }
}
