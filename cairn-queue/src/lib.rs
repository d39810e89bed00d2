//! An interruptible FIFO work queue with processed-marker barriers.
//!
//! [`Queue`] is safe for concurrent access from any number of producers
//! and consumers, though it is designed for the single-consumer pattern:
//! a worker loops on [`Queue::pop`] while producers push work.
//!
//! A *barrier* ([`Queue::wait_until_processed`]) is a marker enqueued
//! behind the current items; its [`Processed`] handle resolves `true` once
//! every item pushed before it has been popped, giving producers a cheap
//! "drained up to here" synchronization point.
//!
//! [`Queue::interrupt`] is sticky: all current and future pops return
//! `None`, every outstanding barrier resolves `false` (as does any barrier
//! requested later), and pushes are accepted but never drained.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Condvar, Mutex};

enum QueueEntry<T> {
    Item(T),
    Barrier(Sender<bool>),
}

struct State<T> {
    entries: VecDeque<QueueEntry<T>>,
    interrupted: bool,
}

/// A FIFO queue of work items with barrier markers and a sticky
/// interrupt.
pub struct Queue<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Queue {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                interrupted: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Enqueue an item.
    ///
    /// Accepted even after an interrupt, though such items are never
    /// drained.
    pub fn push(&self, item: T) {
        {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            state.entries.push_back(QueueEntry::Item(item));
        }
        self.signal.notify_all();
    }

    /// Dequeue the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is interrupted. Barriers reached by
    /// this call resolve before it returns: any at the front resolve
    /// first, and any exposed by removing the returned item resolve
    /// immediately after, so a barrier fires as soon as the last item
    /// pushed before it has been popped.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            Self::resolve_leading_barriers(&mut state);
            if state.interrupted {
                return None;
            }
            match state.entries.pop_front() {
                Some(QueueEntry::Item(item)) => {
                    Self::resolve_leading_barriers(&mut state);
                    return Some(item);
                }
                Some(QueueEntry::Barrier(sender)) => {
                    // Unreachable in practice: leading barriers were just
                    // drained. Resolve it all the same.
                    let _ = sender.send(true);
                }
                None => {
                    state = self
                        .signal
                        .wait(state)
                        .expect("queue mutex poisoned");
                }
            }
        }
    }

    fn resolve_leading_barriers(state: &mut State<T>) {
        while let Some(QueueEntry::Barrier(_)) = state.entries.front() {
            match state.entries.pop_front() {
                Some(QueueEntry::Barrier(sender)) => {
                    let _ = sender.send(true);
                }
                _ => unreachable!("front was a barrier"),
            }
        }
    }

    /// Enqueue a barrier marker and return its wait handle.
    ///
    /// The handle resolves `true` once every item pushed before this call
    /// has been popped, or `false` if the queue is (or becomes)
    /// interrupted first.
    pub fn wait_until_processed(&self) -> Processed {
        let (sender, receiver) = channel();
        {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            if state.interrupted {
                let _ = sender.send(false);
            } else if state.entries.iter().any(|e| matches!(e, QueueEntry::Item(_))) {
                state.entries.push_back(QueueEntry::Barrier(sender));
            } else {
                // Nothing ahead of the marker; it is trivially processed.
                let _ = sender.send(true);
            }
        }
        self.signal.notify_all();
        Processed { receiver }
    }

    /// Interrupt the queue. Sticky: wakes all blocked pops with `None`,
    /// resolves every queued barrier (and all future ones) with `false`,
    /// and leaves remaining items undrained.
    pub fn interrupt(&self) {
        {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            state.interrupted = true;
            let entries = std::mem::take(&mut state.entries);
            for entry in entries {
                match entry {
                    QueueEntry::Item(item) => state.entries.push_back(QueueEntry::Item(item)),
                    QueueEntry::Barrier(sender) => {
                        let _ = sender.send(false);
                    }
                }
            }
        }
        self.signal.notify_all();
    }

    /// Whether the queue has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").interrupted
    }
}

/// Wait handle returned by [`Queue::wait_until_processed`].
pub struct Processed {
    receiver: Receiver<bool>,
}

impl Processed {
    /// Block until the barrier resolves. `true` means every item pushed
    /// before the barrier was popped; `false` means the queue was
    /// interrupted.
    pub fn wait(self) -> bool {
        self.receiver.recv().unwrap_or(false)
    }

    /// Poll without blocking. `None` while unresolved.
    pub fn try_wait(&self) -> Option<bool> {
        self.receiver.try_recv().ok()
    }
}
