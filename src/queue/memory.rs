//! In-memory working set of a request queue
//!
//! Requests are popped by descending priority. Within one priority the most
//! recently pushed request comes out first (LIFO per priority bucket),
//! which keeps a depth-first crawl from fanning out across the whole site.

use crate::queue::request::FetchRequest;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A resident request with its insertion sequence number
#[derive(Debug)]
struct Slot {
    priority: i32,
    seq: u64,
    request: FetchRequest,
}

// Max-heap: higher priority first, then the later insertion first
impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Slot {}

/// Priority structure holding the resident requests of one job run
#[derive(Debug, Default)]
pub struct MemoryQueue {
    heap: BinaryHeap<Slot>,
    next_seq: u64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: FetchRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Slot {
            priority: request.priority,
            seq,
            request,
        });
    }

    pub fn pop(&mut self) -> Option<FetchRequest> {
        self.heap.pop().map(|slot| slot.request)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
