//! [`DeviceRegistry`] – the ordered set of devices eligible for round-robin
//! triggering.
//!
//! Every registration is stamped with a monotonically increasing [`Slot`].
//! A traversal cursor is simply the last slot visited; the next device is the
//! first live entry with a greater slot, wrapping to the lowest one.  Because
//! the cursor never points *into* the collection, removing any entry (the
//! head, the one about to be visited, or the last one) cannot leave it
//! dangling.
//!
//! The registry is plain data.  Concurrent access goes through
//! [`RoundRobinScheduler`][crate::scheduler::RoundRobinScheduler], which keeps
//! it behind the same lock as the scheduler state.

use std::sync::Arc;

use crate::device::Device;

/// Registration stamp; orders devices by the time they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u64);

/// One step of a traversal produced by [`DeviceRegistry::next_after`].
pub struct Visit<'a> {
    pub slot: Slot,
    /// `true` when the traversal went past the tail and restarted at the head.
    pub wrapped: bool,
    pub device: &'a Arc<dyn Device>,
}

struct Entry {
    slot: Slot,
    device: Arc<dyn Device>,
}

/// Ordered, duplicate-free collection of device handles.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Vec<Entry>,
    next_slot: u64,
}

/// Handle identity: same allocation, regardless of the concrete type the
/// caller holds.
fn same_device<D: Device + ?Sized>(a: &Arc<dyn Device>, b: &Arc<D>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `device` to the rotation.
    ///
    /// Returns `false` (and changes nothing) if this exact handle is already
    /// registered.
    pub fn register(&mut self, device: Arc<dyn Device>) -> bool {
        if self.contains(&device) {
            return false;
        }
        let slot = Slot(self.next_slot);
        self.next_slot += 1;
        self.entries.push(Entry { slot, device });
        true
    }

    /// Remove `device` from the rotation.  Returns `false` if it was not
    /// registered.
    pub fn deregister<D: Device + ?Sized>(&mut self, device: &Arc<D>) -> bool {
        match self
            .entries
            .iter()
            .position(|e| same_device(&e.device, device))
        {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Whether this exact handle is registered.
    pub fn contains<D: Device + ?Sized>(&self, device: &Arc<D>) -> bool {
        self.entries.iter().any(|e| same_device(&e.device, device))
    }

    /// First registered device whose [`Device::id`] equals `id`.
    pub fn find(&self, id: &str) -> Option<&Arc<dyn Device>> {
        self.entries
            .iter()
            .map(|e| &e.device)
            .find(|d| d.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every registered handle, in registration order.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.entries.iter().map(|e| Arc::clone(&e.device)).collect()
    }

    /// Registered devices that currently report `enabled() == true`, in
    /// registration order.  The iterator is lazy: `enabled()` is queried as
    /// each element is reached.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Device>> {
        self.entries
            .iter()
            .map(|e| &e.device)
            .filter(|d| d.enabled())
    }

    /// Call `visit` for every enabled device, in registration order.
    pub fn for_each_enabled(&self, mut visit: impl FnMut(&dyn Device)) {
        for device in self.enabled() {
            visit(device.as_ref());
        }
    }

    /// The device to visit after `cursor`.
    ///
    /// `None` as the cursor starts at the head.  Returns `None` only when the
    /// registry is empty.
    pub fn next_after(&self, cursor: Option<Slot>) -> Option<Visit<'_>> {
        let following = match cursor {
            Some(last) => self.entries.iter().find(|e| e.slot > last),
            None => self.entries.first(),
        };
        match following {
            Some(entry) => Some(Visit {
                slot: entry.slot,
                wrapped: false,
                device: &entry.device,
            }),
            None => self.entries.first().map(|entry| Visit {
                slot: entry.slot,
                wrapped: cursor.is_some(),
                device: &entry.device,
            }),
        }
    }

    /// Clear the measurement state of every registered device.
    pub fn reset_all(&self) {
        for entry in &self.entries {
            entry.device.reset();
        }
    }
}
