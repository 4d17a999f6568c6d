//! Priority worklist for pending analysis tasks.
//!
//! A binary min-heap over a caller-supplied order. Items that compare equal
//! come out in the order they were enqueued.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{DosflowError, Result};

pub struct Worklist<T, F = fn(&T, &T) -> Ordering>
where
    F: Fn(&T, &T) -> Ordering,
{
    heap: Vec<(u64, T)>,
    order: F,
    sequence: u64,
}

impl<T: Ord> Worklist<T> {
    /// A worklist ordered by `T`'s own ordering.
    pub fn new() -> Self {
        Self::with_order(T::cmp)
    }
}

impl<T: Ord> Default for Worklist<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> fmt::Debug for Worklist<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worklist")
            .field("len", &self.heap.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<T, F> Worklist<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// A worklist ordered by `order`.
    pub fn with_order(order: F) -> Self {
        Self {
            heap: Vec::new(),
            order,
            sequence: 0,
        }
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (seq_a, item_a) = &self.heap[a];
        let (seq_b, item_b) = &self.heap[b];
        (self.order)(item_a, item_b).then(seq_a.cmp(seq_b)) == Ordering::Less
    }

    /// Add an item.
    pub fn enqueue(&mut self, item: T) {
        self.heap.push((self.sequence, item));
        self.sequence += 1;
        let mut child = self.heap.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.less(child, parent) {
                break;
            }
            self.heap.swap(child, parent);
            child = parent;
        }
    }

    /// Remove the lowest item; fails on an empty worklist.
    pub fn dequeue(&mut self) -> Result<T> {
        if self.heap.is_empty() {
            return Err(DosflowError::EmptyWorklist);
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let (_, item) = self.heap.pop().ok_or(DosflowError::EmptyWorklist)?;

        let len = self.heap.len();
        let mut parent = 0;
        loop {
            let left = 2 * parent + 1;
            let right = left + 1;
            let mut smallest = parent;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == parent {
                break;
            }
            self.heap.swap(parent, smallest);
            parent = smallest;
        }
        Ok(item)
    }

    /// The item the next `dequeue` returns
    pub fn peek(&self) -> Option<&T> {
        self.heap.first().map(|(_, item)| item)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
