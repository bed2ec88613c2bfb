//! Synchronisation channels
//!
//! A channel is a counting semaphore with initial count 0 that encodes one
//! cross-worker precedence edge: the upstream worker issues `Notify` after
//! the producing reaction, the downstream worker `Wait`s before the
//! consuming one. Each channel sees exactly one pair per tag, so the count
//! returns to zero at every tag boundary.

use parking_lot::{Condvar, Mutex};

use crate::types::ChannelId;

#[derive(Debug, Default)]
struct SemaphoreState {
    permits: usize,
    poisoned: bool,
}

/// Counting semaphore
#[derive(Debug, Default)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                poisoned: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is available and take it
    ///
    /// Returns `false` without taking a permit if the semaphore was poisoned.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        while state.permits == 0 && !state.poisoned {
            self.available.wait(&mut state);
        }
        if state.poisoned {
            return false;
        }
        state.permits -= 1;
        true
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits == 0 || state.poisoned {
            return false;
        }
        state.permits -= 1;
        true
    }

    pub fn release(&self, permits: usize) {
        let mut state = self.state.lock();
        state.permits += permits;
        if permits == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Wake every waiter and make all further acquires fail
    pub fn poison(&self) {
        self.state.lock().poisoned = true;
        self.available.notify_all();
    }

    pub fn permits(&self) -> usize {
        self.state.lock().permits
    }
}

/// All channels of a program, indexed by [`ChannelId`]
#[derive(Debug)]
pub struct ChannelTable {
    channels: Vec<Semaphore>,
}

impl ChannelTable {
    pub fn new(count: usize) -> Self {
        Self {
            channels: (0..count).map(|_| Semaphore::new(0)).collect(),
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<&Semaphore> {
        self.channels.get(channel.index())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn poison_all(&self) {
        for channel in &self.channels {
            channel.poison();
        }
    }

    /// True when no channel holds an unconsumed permit
    pub fn is_balanced(&self) -> bool {
        self.channels.iter().all(|c| c.permits() == 0)
    }
}
