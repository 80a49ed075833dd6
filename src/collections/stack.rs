//! A last-in first-out stack shared between tasks.

use super::Guarded;
use crate::sync::AcquireError;
use core::sync::atomic::{AtomicUsize, Ordering};

/// A LIFO stack whose mutations never interleave.
#[derive(Debug)]
pub struct AsyncStack<T> {
    items: Guarded<Vec<T>>,
    len: AtomicUsize,
}

impl<T> AsyncStack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        AsyncStack {
            items: Guarded::new(Vec::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Pushes `items` in order, so the last one ends up on top.
    ///
    /// Returns the height of the stack afterwards.
    pub async fn push<I>(&self, items: I) -> Result<usize, AcquireError>
    where
        I: IntoIterator<Item = T>,
    {
        self.items
            .with(|stack| {
                stack.extend(items);
                self.len.store(stack.len(), Ordering::Release);
                stack.len()
            })
            .await
    }

    /// Removes the top item.
    pub async fn pop(&self) -> Result<Option<T>, AcquireError> {
        self.items
            .with(|stack| {
                let item = stack.pop();
                self.len.store(stack.len(), Ordering::Release);
                item
            })
            .await
    }

    /// Returns a copy of the top item.
    pub async fn peek(&self) -> Result<Option<T>, AcquireError>
    where
        T: Clone,
    {
        self.items.with(|stack| stack.last().cloned()).await
    }

    /// Returns a copy of all items, bottom first.
    pub async fn snapshot(&self) -> Result<Vec<T>, AcquireError>
    where
        T: Clone,
    {
        self.items.with(|stack| stack.clone()).await
    }

    /// Returns the height of the stack as of the last completed mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the stack was empty after the last completed mutation.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the stack, returning its items bottom first.
    pub fn into_inner(self) -> Vec<T> {
        self.items.into_inner()
    }
}

impl<T> Default for AsyncStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for AsyncStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        AsyncStack {
            len: AtomicUsize::new(items.len()),
            items: Guarded::new(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AsyncStack;
    use futures::executor::block_on;

    #[test]
    fn last_pushed_is_popped_first() {
        block_on(async {
            let stack = AsyncStack::new();
            assert_eq!(Ok(3), stack.push(["a", "b", "c"]).await);
            assert_eq!(Ok(Some("c")), stack.peek().await);
            assert_eq!(Ok(Some("c")), stack.pop().await);
            assert_eq!(Ok(Some("b")), stack.pop().await);
            assert_eq!(1, stack.len());
            assert_eq!(Ok(vec!["a"]), stack.snapshot().await);
        });
    }

    #[test]
    fn pop_from_empty_stack() {
        block_on(async {
            let stack: AsyncStack<u8> = std::iter::empty().collect();
            assert!(stack.is_empty());
            assert_eq!(Ok(None), stack.pop().await);
            assert_eq!(Ok(None), stack.peek().await);
            assert!(stack.into_inner().is_empty());
        });
    }
}
