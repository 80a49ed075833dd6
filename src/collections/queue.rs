//! A first-in first-out queue shared between tasks.

use super::Guarded;
use crate::sync::AcquireError;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::VecDeque;

/// A FIFO queue whose mutations never interleave.
#[derive(Debug)]
pub struct AsyncQueue<T> {
    items: Guarded<VecDeque<T>>,
    /// Mirror of the queue length, updated inside the critical section
    len: AtomicUsize,
}

impl<T> AsyncQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        AsyncQueue {
            items: Guarded::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends `items` to the back of the queue, preserving their order.
    ///
    /// Returns the length of the queue afterwards.
    pub async fn enqueue<I>(&self, items: I) -> Result<usize, AcquireError>
    where
        I: IntoIterator<Item = T>,
    {
        self.items
            .with(|queue| {
                queue.extend(items);
                self.len.store(queue.len(), Ordering::Release);
                queue.len()
            })
            .await
    }

    /// Removes the item at the front of the queue.
    pub async fn dequeue(&self) -> Result<Option<T>, AcquireError> {
        self.items
            .with(|queue| {
                let item = queue.pop_front();
                self.len.store(queue.len(), Ordering::Release);
                item
            })
            .await
    }

    /// Returns a copy of the item at the front of the queue.
    pub async fn peek(&self) -> Result<Option<T>, AcquireError>
    where
        T: Clone,
    {
        self.items.with(|queue| queue.front().cloned()).await
    }

    /// Returns a copy of all items, front first.
    pub async fn snapshot(&self) -> Result<Vec<T>, AcquireError>
    where
        T: Clone,
    {
        self.items.with(|queue| queue.iter().cloned().collect()).await
    }

    /// Returns the number of queued items as of the last completed mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the queue was empty after the last completed mutation.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the queue, returning its items.
    pub fn into_inner(self) -> VecDeque<T> {
        self.items.into_inner()
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for AsyncQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: VecDeque<T> = iter.into_iter().collect();
        AsyncQueue {
            len: AtomicUsize::new(items.len()),
            items: Guarded::new(items),
        }
    }
}
