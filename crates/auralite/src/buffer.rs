//! Buffer storage: immutable PCM payloads plus reference counting.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::Shared;

use crate::error::{AlError, AlResult};
use crate::gc;

/// Format descriptor for a buffer's PCM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFormat {
    /// 1 (mono) or 2 (stereo); see spec Non-goals for why this engine
    /// never accepts more.
    pub channels: u8,
    pub sample_rate: u32,
}

/// The loaded payload of a buffer, once `BufferData` has been called.
#[derive(Clone)]
pub struct BufferRecord {
    pub format: BufferFormat,
    /// Interleaved float32 PCM. Wrapped in `Shared` so that replacing or
    /// freeing it never blocks the thread that drops the last reference.
    pub payload: Shared<Vec<f32>>,
}

impl BufferRecord {
    pub fn frame_count(&self) -> usize {
        self.payload.len() / self.format.channels as usize
    }
}

/// One buffer slot. Stable for the lifetime of the device: once a slot
/// exists at a given name, the `Arc<BufferSlot>` handed out for it never
/// moves, so the mixer can hold a long-lived clone without the API mutex.
pub struct BufferSlot {
    allocated: AtomicBool,
    refcount: AtomicU32,
    record: Mutex<Option<BufferRecord>>,
}

impl BufferSlot {
    fn new() -> Self {
        Self {
            allocated: AtomicBool::new(true),
            refcount: AtomicU32::new(0),
            record: Mutex::new(None),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decref(&self) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "buffer refcount underflow");
    }

    pub fn record(&self) -> Option<BufferRecord> {
        self.record.lock().unwrap().clone()
    }
}

/// Owns the immutable audio payload of every decoded clip and its
/// reference count. Buffer names are dense small integers starting at 1
/// (0 is reserved to mean "no buffer").
pub struct BufferStore {
    slots: Mutex<Vec<Arc<BufferSlot>>>,
    free_names: Mutex<Vec<u32>>,
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            free_names: Mutex::new(Vec::new()),
        }
    }

    /// Atomically claim `n` free names, allocating new blocks as needed.
    /// On failure no names are claimed at all.
    pub fn generate(&self, n: usize) -> AlResult<Vec<u32>> {
        let mut slots = self.slots.lock().unwrap();
        let mut free = self.free_names.lock().unwrap();
        let mut names = Vec::with_capacity(n);

        for _ in 0..n {
            if let Some(name) = free.pop() {
                let idx = (name - 1) as usize;
                slots[idx] = Arc::new(BufferSlot::new());
                names.push(name);
            } else {
                slots.push(Arc::new(BufferSlot::new()));
                names.push(slots.len() as u32);
            }
        }

        Ok(names)
    }

    /// Validate-then-delete: fails atomically (no buffers deleted) if any
    /// name is unknown or still referenced.
    pub fn delete(&self, names: &[u32]) -> AlResult<()> {
        let slots = self.slots.lock().unwrap();

        for &name in names {
            let slot = slots
                .get((name.wrapping_sub(1)) as usize)
                .filter(|s| s.is_allocated())
                .ok_or(AlError::InvalidName)?;
            if slot.refcount() != 0 {
                return Err(AlError::InvalidOperation);
            }
        }

        let mut free = self.free_names.lock().unwrap();
        for &name in names {
            let slot = &slots[(name - 1) as usize];
            slot.allocated.store(false, Ordering::Release);
            *slot.record.lock().unwrap() = None;
            free.push(name);
        }
        drop(free);
        drop(slots);

        if !names.is_empty() {
            gc::notify_retirement();
        }
        Ok(())
    }

    /// Load (or replace) a buffer's payload. Only permitted while
    /// refcount == 0.
    pub fn load(&self, name: u32, format: BufferFormat, payload: Vec<f32>) -> AlResult<()> {
        let slot = self.get(name)?;
        if slot.refcount() != 0 {
            return Err(AlError::InvalidOperation);
        }
        let shared = Shared::new(&gc::gc_handle(), payload);
        *slot.record.lock().unwrap() = Some(BufferRecord { format, payload: shared });
        Ok(())
    }

    /// Get a stable handle to a buffer slot by name.
    pub fn get(&self, name: u32) -> AlResult<Arc<BufferSlot>> {
        let slots = self.slots.lock().unwrap();
        slots
            .get((name.wrapping_sub(1)) as usize)
            .filter(|s| s.is_allocated())
            .cloned()
            .ok_or(AlError::InvalidName)
    }

    pub fn is_buffer(&self, name: u32) -> bool {
        self.get(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> BufferFormat {
        BufferFormat { channels: 1, sample_rate: 48000 }
    }

    #[test]
    fn generate_then_delete_frees_name_for_reuse() {
        let store = BufferStore::new();
        let names = store.generate(2).unwrap();
        assert_eq!(names, vec![1, 2]);
        store.delete(&[1]).unwrap();
        assert!(!store.is_buffer(1));
        let more = store.generate(1).unwrap();
        assert_eq!(more, vec![1]);
        assert!(store.is_buffer(1));
    }

    #[test]
    fn delete_referenced_buffer_fails_and_deletes_nothing() {
        let store = BufferStore::new();
        let names = store.generate(2).unwrap();
        store.load(names[0], fmt(), vec![0.0; 10]).unwrap();
        let slot = store.get(names[0]).unwrap();
        slot.incref();

        let err = store.delete(&names).unwrap_err();
        assert_eq!(err, AlError::InvalidOperation);
        assert!(store.is_buffer(names[0]));
        assert!(store.is_buffer(names[1]));
    }

    #[test]
    fn delete_unknown_name_fails_atomically() {
        let store = BufferStore::new();
        let names = store.generate(1).unwrap();
        let err = store.delete(&[names[0], 999]).unwrap_err();
        assert_eq!(err, AlError::InvalidName);
        assert!(store.is_buffer(names[0]));
    }

    #[test]
    fn load_rejected_while_referenced() {
        let store = BufferStore::new();
        let names = store.generate(1).unwrap();
        store.load(names[0], fmt(), vec![0.0; 4]).unwrap();
        store.get(names[0]).unwrap().incref();
        let err = store.load(names[0], fmt(), vec![1.0; 4]).unwrap_err();
        assert_eq!(err, AlError::InvalidOperation);
    }
}
