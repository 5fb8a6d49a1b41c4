#![forbid(unsafe_code)]

//! FIFO turn-taking for apply requests.
//!
//! Every request takes a [`Ticket`] synchronously when it is issued. Tickets
//! are served strictly in issue order, one at a time; a request runs only
//! while its ticket is being served. Blocking callers wait on a condvar,
//! async callers on a [`Notify`], and both share the same counter so sync and
//! async requests interleave in one order.
//!
//! # Invariants
//!
//! 1. `serving <= next`.
//! 2. At most one ticket is served at a time.
//! 3. A ticket dropped before its turn is recorded as abandoned and skipped
//!    when the counter reaches it, so a dropped future never stalls the queue.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    next: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
}

/// Serializes apply requests in issue order.
#[derive(Debug, Default)]
pub(crate) struct ApplyQueue {
    state: Mutex<QueueState>,
    turn_changed: Condvar,
    notify: Notify,
}

impl ApplyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket.
    pub(crate) fn enqueue(&self) -> Ticket<'_> {
        let mut state = self.lock();
        let sequence = state.next;
        state.next += 1;
        Ticket {
            queue: self,
            sequence,
        }
    }

    /// Requests issued but not yet finished, including the one being served.
    pub(crate) fn pending(&self) -> u64 {
        let state = self.lock();
        state.next - state.serving - state.abandoned.len() as u64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_serving(&self, sequence: u64) -> bool {
        self.lock().serving == sequence
    }

    fn release(&self, sequence: u64) {
        let mut state = self.lock();
        if sequence == state.serving {
            state.serving += 1;
            loop {
                let next = state.serving;
                if !state.abandoned.remove(&next) {
                    break;
                }
                state.serving += 1;
            }
        } else if sequence > state.serving {
            state.abandoned.insert(sequence);
        }
        drop(state);
        self.turn_changed.notify_all();
        self.notify.notify_waiters();
    }
}

/// A place in the apply queue. Dropping it ends the turn, or abandons it if
/// the turn has not started.
#[derive(Debug)]
pub(crate) struct Ticket<'a> {
    queue: &'a ApplyQueue,
    sequence: u64,
}

impl Ticket<'_> {
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Block the calling thread until this ticket is served.
    pub(crate) fn wait_blocking(&self) {
        let mut state = self.queue.lock();
        while state.serving != self.sequence {
            state = self
                .queue
                .turn_changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Suspend until this ticket is served.
    pub(crate) async fn wait(&self) {
        loop {
            // Registered before the check so a release in between is not lost.
            let notified = self.queue.notify.notified();
            if self.queue.is_serving(self.sequence) {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.queue.release(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn tickets_are_sequential() {
        let queue = ApplyQueue::new();
        let a = queue.enqueue();
        let b = queue.enqueue();
        assert_eq!((a.sequence(), b.sequence()), (0, 1));
        assert_eq!(queue.pending(), 2);
        assert!(queue.is_serving(0));
        drop(a);
        assert!(queue.is_serving(1));
        drop(b);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn abandoned_tickets_are_skipped() {
        let queue = ApplyQueue::new();
        let a = queue.enqueue();
        let b = queue.enqueue();
        let c = queue.enqueue();
        drop(b);
        assert_eq!(queue.pending(), 2);
        drop(a);
        assert!(queue.is_serving(2));
        c.wait_blocking();
        drop(c);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn blocking_waiters_run_in_issue_order() {
        let queue = Arc::new(ApplyQueue::new());
        let order = Arc::new(AtomicU64::new(0));
        let first = queue.enqueue();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            // Tickets are taken here, in loop order, before the threads start.
            let sequence = {
                let ticket = queue.enqueue();
                let sequence = ticket.sequence();
                std::mem::forget(ticket);
                sequence
            };
            handles.push(thread::spawn(move || {
                let ticket = Ticket {
                    queue: &queue,
                    sequence,
                };
                ticket.wait_blocking();
                let seen = order.fetch_add(1, Ordering::SeqCst);
                assert_eq!(seen + 1, sequence);
            }));
        }

        thread::sleep(Duration::from_millis(20));
        assert_eq!(order.load(Ordering::SeqCst), 0);
        drop(first);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(order.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn async_waiter_wakes_on_release() {
        let queue = ApplyQueue::new();
        let first = queue.enqueue();
        let second = queue.enqueue();
        let waiter = async {
            second.wait().await;
            second.sequence()
        };
        let releaser = async move {
            tokio::task::yield_now().await;
            drop(first);
        };
        let (served, ()) = tokio::join!(waiter, releaser);
        assert_eq!(served, 1);
    }
}
