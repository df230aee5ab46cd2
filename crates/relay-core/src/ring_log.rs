//! Capacity-bounded log with FIFO eviction.
//!
//! `RingLog` is the memory bound for every long-lived capture: console and
//! error entries, and network calls. Appending past capacity drops the oldest
//! entry, so a session that runs for days holds at most `capacity` entries.

use std::collections::VecDeque;

/// Default capacity for console entries.
pub const DEFAULT_CONSOLE_CAPACITY: usize = 500;
/// Default capacity for network entries.
pub const DEFAULT_NETWORK_CAPACITY: usize = 200;
/// Default capacity for error entries.
pub const DEFAULT_ERROR_CAPACITY: usize = 100;

/// Ordered, bounded collection of captured entries.
///
/// Not internally synchronized; captures keep it behind a `Mutex`.
#[derive(Debug, Clone)]
pub struct RingLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T: Clone> RingLog<T> {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Append to the tail, evicting from the head while over capacity.
    pub fn append(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
    }

    /// Copy of the entries, oldest first.
    pub fn entries(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    /// Mutate the newest entry matching `pred`. Returns whether one was found.
    pub fn update_last_where<P, F>(&mut self, pred: P, update: F) -> bool
    where
        P: Fn(&T) -> bool,
        F: FnOnce(&mut T),
    {
        match self.entries.iter_mut().rev().find(|e| pred(e)) {
            Some(entry) => {
                update(entry);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries dropped by capacity since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
