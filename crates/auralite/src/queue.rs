//! Buffer queues: the lock-minimising handoff between application threads
//! and the mixer thread.
//!
//! Each queue exposes a single-writer intake slot (`SegQueue`) that any
//! producer may push onto, and a consumer-private side (also guarded by a
//! `Mutex` here, since this build favours a safe value-oriented collection
//! over a hand-rolled atomic swap — see the design notes on Treiber-stack
//! replacement). `drain_into_local` is the only place the two sides meet;
//! once an item has moved into the local deque it is owned exclusively by
//! whichever side called drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::queue::SegQueue;

/// One queued buffer reference. Buffer identity is by name — the refcount
/// bump/drop happens in `Source`, not here.
#[derive(Debug, Clone, Copy)]
pub struct BufferQueueItem {
    pub buffer_name: u32,
    pub frame_count: usize,
}

/// A single-producer-friendly, single-consumer buffer queue.
#[derive(Default)]
pub struct BufferQueue {
    intake: SegQueue<BufferQueueItem>,
    local: Mutex<VecDeque<BufferQueueItem>>,
    num_items: AtomicUsize,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self {
            intake: SegQueue::new(),
            local: Mutex::new(VecDeque::new()),
            num_items: AtomicUsize::new(0),
        }
    }

    /// Producer-side append. Safe to call from any thread, including
    /// concurrently with other appenders; ordering between callers is
    /// whichever wins the race, but a single call's own items stay in order.
    pub fn append(&self, items: impl IntoIterator<Item = BufferQueueItem>) {
        let mut count = 0;
        for item in items {
            self.intake.push(item);
            count += 1;
        }
        self.num_items.fetch_add(count, Ordering::AcqRel);
    }

    /// Consumer-side: migrate everything waiting in the intake into the
    /// local deque, preserving arrival order.
    pub fn drain_into_local(&self) {
        let mut local = self.local.lock().unwrap();
        while let Some(item) = self.intake.pop() {
            local.push_back(item);
        }
    }

    /// Consumer-side: peek the head without removing it.
    pub fn front(&self) -> Option<BufferQueueItem> {
        self.local.lock().unwrap().front().copied()
    }

    /// Consumer-side: pop the head.
    pub fn pop_front(&self) -> Option<BufferQueueItem> {
        let item = self.local.lock().unwrap().pop_front();
        if item.is_some() {
            self.num_items.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Total items queued, including anything still sitting in intake.
    pub fn len(&self) -> usize {
        self.num_items.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `frame_count` across every queued item, without removing
    /// anything. Used by `Source::get_offset` to report playback position
    /// on a streaming source.
    pub fn total_frames(&self) -> usize {
        self.drain_into_local();
        self.local.lock().unwrap().iter().map(|i| i.frame_count).sum()
    }

    /// Drain everything (intake + local) and return it in FIFO order. Used
    /// by `stop`/`rewind` to move all pending items to processed in bulk.
    pub fn take_all(&self) -> Vec<BufferQueueItem> {
        self.drain_into_local();
        let mut local = self.local.lock().unwrap();
        let items: Vec<_> = local.drain(..).collect();
        self.num_items.fetch_sub(items.len(), Ordering::AcqRel);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: u32) -> BufferQueueItem {
        BufferQueueItem { buffer_name: name, frame_count: 100 }
    }

    #[test]
    fn append_then_drain_preserves_order() {
        let q = BufferQueue::new();
        q.append([item(1), item(2), item(3)]);
        assert_eq!(q.len(), 3);
        q.drain_into_local();
        assert_eq!(q.pop_front().unwrap().buffer_name, 1);
        assert_eq!(q.pop_front().unwrap().buffer_name, 2);
        assert_eq!(q.pop_front().unwrap().buffer_name, 3);
        assert!(q.pop_front().is_none());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn take_all_drains_everything_in_order() {
        let q = BufferQueue::new();
        q.append([item(1), item(2)]);
        let all = q.take_all();
        assert_eq!(all.iter().map(|i| i.buffer_name).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(q.len(), 0);
    }
}
