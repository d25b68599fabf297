use std::sync::Arc;

use parking_lot::Mutex;

/// Weak reference to a value registered in a [`TaskRuntime`].
///
/// A handle stays valid until the value is removed; the slot's generation is
/// bumped on removal so a reused slot never matches an old handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    busy: bool,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

#[derive(Debug)]
struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> SlotTable<T> {
    fn entry_mut(&mut self, handle: SessionHandle) -> Option<&mut Entry<T>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }
}

/// Registry of values shared between the foreground tick and background tasks.
///
/// Every access goes through the same mutex, so liveness checks of unrelated
/// sessions are serialized against each other.
#[derive(Debug)]
pub struct TaskRuntime<T> {
    table: Mutex<SlotTable<T>>,
}

impl<T> Default for TaskRuntime<T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(SlotTable {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }
}

impl<T> TaskRuntime<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, value: T) -> SessionHandle {
        let mut table = self.table.lock();
        let entry = Entry { value, busy: false };
        table.live += 1;

        if let Some(index) = table.free.pop() {
            let slot = &mut table.slots[index as usize];
            slot.entry = Some(entry);
            return SessionHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = table.slots.len() as u32;
        table.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        SessionHandle {
            index,
            generation: 0,
        }
    }

    pub fn remove(&self, handle: SessionHandle) -> Option<T> {
        let mut table = self.table.lock();
        let slot = table.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        table.free.push(handle.index);
        table.live -= 1;
        Some(entry.value)
    }

    pub fn is_live(&self, handle: SessionHandle) -> bool {
        self.table.lock().entry_mut(handle).is_some()
    }

    /// Locks the runtime, checks the handle and runs `f` on the value.
    pub fn with<R>(&self, handle: SessionHandle, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut table = self.table.lock();
        table.entry_mut(handle).map(|entry| f(&mut entry.value))
    }

    pub fn is_busy(&self, handle: SessionHandle) -> bool {
        self.table
            .lock()
            .entry_mut(handle)
            .is_some_and(|entry| entry.busy)
    }

    pub(crate) fn try_acquire(&self, handle: SessionHandle) -> Result<(), crate::TaskError> {
        let mut table = self.table.lock();
        let entry = table.entry_mut(handle).ok_or(crate::TaskError::NotLive)?;
        if entry.busy {
            return Err(crate::TaskError::Busy);
        }
        entry.busy = true;
        Ok(())
    }

    pub(crate) fn release(&self, handle: SessionHandle) {
        if let Some(entry) = self.table.lock().entry_mut(handle) {
            entry.busy = false;
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
