//! Per-recipient priority mailboxes shared by every device.
//!
//! Each [`DeviceId`] owns one bucket behind its own lock, so devices posting
//! to different recipients never contend. Overflow is handled by dropping
//! stale data wholesale: a full bucket is cleared before the new message is
//! stored, and [`Blackboard::maintain`] clears everything once the total
//! entry count reaches capacity. Sensor devices publish fresh readings every
//! tick, so a dropped update is replaced on the next one.

use core::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::message::{AclMessage, DeviceId, Priority};

/// Default per-recipient bucket capacity.
pub const MAX_BLACKBOARD_BUCKET_SIZE: usize = 64;

/// Default capacity of the whole blackboard.
pub const BLACKBOARD_SIZE: usize = 512;

struct Entry {
    priority: Priority,
    seq: u64,
    message: AclMessage,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // `BinaryHeap` is a max-heap: the highest priority (lowest ordinal) and
    // then the oldest entry must compare greatest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Bucket {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

pub struct Blackboard {
    buckets: [Mutex<Bucket>; DeviceId::COUNT],
    total: AtomicUsize,
    max_bucket_size: usize,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new(MAX_BLACKBOARD_BUCKET_SIZE, BLACKBOARD_SIZE)
    }
}

impl Blackboard {
    pub fn new(max_bucket_size: usize, capacity: usize) -> Self {
        Self {
            buckets: std::array::from_fn(|_| Mutex::new(Bucket::default())),
            total: AtomicUsize::new(0),
            max_bucket_size: max_bucket_size.max(1),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Post a message to its receiver's mailbox.
    ///
    /// Invalid messages and messages sent after [`shutdown`](Self::shutdown)
    /// are discarded.
    pub fn send(&self, message: AclMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !message.is_valid() {
            tracing::trace!(?message, "discarding invalid message");
            return;
        }
        let Some(receiver) = message.receiver() else {
            return;
        };

        let mut bucket = self.buckets[receiver.index()].lock();
        if bucket.heap.len() >= self.max_bucket_size {
            let dropped = bucket.heap.len();
            bucket.heap.clear();
            self.total.fetch_sub(dropped, Ordering::AcqRel);
            tracing::debug!(%receiver, dropped, "mailbox overflow, bucket cleared");
        }

        let seq = bucket.next_seq;
        bucket.next_seq += 1;
        bucket.heap.push(Entry {
            priority: message.priority(),
            seq,
            message,
        });
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    /// Take the next message for `id`, or the empty sentinel.
    pub fn receive(&self, id: DeviceId) -> AclMessage {
        let mut bucket = self.buckets[id.index()].lock();
        match bucket.heap.pop() {
            Some(entry) => {
                self.total.fetch_sub(1, Ordering::AcqRel);
                entry.message
            }
            None => AclMessage::empty(),
        }
    }

    /// Coarse global backpressure, run once per controller tick.
    pub fn maintain(&self) {
        let total = self.len();
        if total >= self.capacity {
            tracing::warn!(total, capacity = self.capacity, "blackboard full, clearing");
            self.clear();
        }
    }

    /// Drop every pending message and refuse further sends.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of messages waiting for `id`.
    pub fn pending(&self, id: DeviceId) -> usize {
        self.buckets[id.index()].lock().heap.len()
    }

    /// Number of messages waiting in all mailboxes.
    pub fn len(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) {
        for bucket in &self.buckets {
            let mut bucket = bucket.lock();
            let dropped = bucket.heap.len();
            bucket.heap.clear();
            self.total.fetch_sub(dropped, Ordering::AcqRel);
        }
    }
}
