//! A futures-aware mutual exclusion lock.

use super::Semaphore;
use crate::atomic::Counter;
use core::ops::Deref;
use std::sync::Arc;

/// A [`Semaphore`] with exactly one permit.
///
/// At most one task at a time holds the [`Releaser`](super::Releaser) of a
/// `Mutex`. All semaphore operations are available through `Deref`:
///
/// ```
/// # futures::executor::block_on(async {
/// use futures_semaphore::sync::Mutex;
///
/// let mutex = Mutex::new();
/// let answer = mutex.run(|| async { 42 }).await.unwrap();
/// assert_eq!(42, answer);
/// assert!(!mutex.is_locked());
/// # });
/// ```
#[derive(Clone)]
pub struct Mutex {
    semaphore: Semaphore,
}

impl Mutex {
    /// Creates a new, unlocked mutex.
    pub fn new() -> Mutex {
        Mutex {
            semaphore: Semaphore::new(1),
        }
    }

    /// Creates a mutex whose lock state is kept in `counter`, which should
    /// hold `1` while unlocked.
    pub fn with_counter(counter: Arc<dyn Counter>) -> Mutex {
        Mutex {
            semaphore: Semaphore::with_counter(1, counter),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Mutex {
    type Target = Semaphore;

    fn deref(&self) -> &Semaphore {
        &self.semaphore
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters_count())
            .finish()
    }
}
