//! Per-thread session slots
//!
//! Every test worker thread owns at most one driver handle. Handles are keyed
//! by [`ThreadId`], so no thread can observe another thread's session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use rig_core::prelude::*;
use rig_core::DeviceSession;

/// Everything a test needs once bring-up has finished
#[derive(Debug, Clone)]
pub struct SessionContext<H> {
    pub device: DeviceSession,
    pub server_url: String,
    pub capabilities: serde_json::Value,
    pub handle: H,
}

/// A stored handle and the generation of the `set` call that stored it
#[derive(Debug)]
struct Slot<H> {
    generation: u64,
    handle: H,
}

/// Thread-keyed store of driver handles
#[derive(Debug)]
pub struct SessionRegistry<H> {
    slots: Mutex<HashMap<ThreadId, Slot<H>>>,
    next_generation: AtomicU64,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<H: Clone> SessionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    // A test that panicked while holding the lock must not wedge the others.
    fn lock(&self) -> MutexGuard<'_, HashMap<ThreadId, Slot<H>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The calling thread's handle
    pub fn get(&self) -> Result<H> {
        self.lock()
            .get(&thread::current().id())
            .map(|slot| slot.handle.clone())
            .ok_or(Error::SessionNotInitialized)
    }

    /// Store the calling thread's handle until the guard is dropped
    ///
    /// A later `set` on the same thread replaces the handle; the older guard
    /// then no longer clears the slot.
    pub fn set(&self, handle: H) -> SessionGuard<'_, H> {
        let thread = thread::current().id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if self
            .lock()
            .insert(thread, Slot { generation, handle })
            .is_some()
        {
            warn!("Replacing existing session for {:?}", thread);
        }
        SessionGuard {
            registry: self,
            thread,
            generation,
        }
    }

    /// Remove the calling thread's handle
    pub fn clear(&self) -> Option<H> {
        self.lock()
            .remove(&thread::current().id())
            .map(|slot| slot.handle)
    }

    /// Remove `thread`'s slot only if it still holds `generation`
    fn release(&self, thread: ThreadId, generation: u64) -> bool {
        let mut slots = self.lock();
        match slots.get(&thread) {
            Some(slot) if slot.generation == generation => {
                slots.remove(&thread);
                true
            }
            _ => false,
        }
    }

    /// Number of threads holding a session
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clears its thread's slot when dropped, including during a panic
#[must_use = "dropping the guard clears the session immediately"]
pub struct SessionGuard<'a, H: Clone> {
    registry: &'a SessionRegistry<H>,
    thread: ThreadId,
    generation: u64,
}

impl<H: Clone> SessionGuard<'_, H> {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl<H: Clone> Drop for SessionGuard<'_, H> {
    fn drop(&mut self) {
        if self.registry.release(self.thread, self.generation) {
            debug!("Session for {:?} cleared", self.thread);
        }
    }
}
