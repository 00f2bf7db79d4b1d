//! In-flight compile de-duplication.
//!
//! At most one compilation per module id runs at a time: the first caller
//! claims a slot and compiles; later callers block on the slot and then read
//! the settled module from the store. A compile pass never waits on an id in
//! its own visited set, so recursive cycles cannot self-deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Slot {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Slot {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    fn settle(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cv.notify_all();
    }
}

/// Map of module id → in-flight compile slot.
#[derive(Debug, Default, Clone)]
pub struct InFlightMap {
    slots: Arc<DashMap<String, Arc<Slot>>>,
}

/// Outcome of a claim attempt.
pub enum Claim {
    /// This caller owns the compile; drop the guard when the module settles.
    Owner(ClaimGuard),
    /// Another caller compiled the module; it is settled in the store now.
    Waited,
}

/// Releases and notifies the slot on drop (success or error path alike).
pub struct ClaimGuard {
    slots: Arc<DashMap<String, Arc<Slot>>>,
    id: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Some((_, slot)) = self.slots.remove(&self.id) {
            slot.settle();
        }
    }
}

impl InFlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the compile for `id`, or block until the current owner settles.
    pub fn claim(&self, id: &str) -> Claim {
        match self.slots.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let slot = entry.get().clone();
                drop(entry); // release the shard lock before blocking
                slot.wait();
                Claim::Waited
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(Slot::default()));
                Claim::Owner(ClaimGuard {
                    slots: self.slots.clone(),
                    id: id.to_string(),
                })
            }
        }
    }
}
