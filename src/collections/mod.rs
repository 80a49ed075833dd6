//! Containers whose every access is serialized through a private [`Mutex`].
//!
//! Each operation acquires the mutex, runs a short synchronous critical
//! section on the stored data and releases the mutex again. No permit is
//! held across any other suspension point, so one slow caller cannot starve
//! the others.

use crate::sync::{AcquireError, Mutex};
use core::cell::UnsafeCell;

mod map;
mod queue;
mod stack;
mod var;

pub use self::map::AsyncMap;
pub use self::queue::AsyncQueue;
pub use self::stack::AsyncStack;
pub use self::var::{safe_var, SafeVar};

/// A value that is only ever touched while its mutex is held.
struct Guarded<T> {
    mutex: Mutex,
    value: UnsafeCell<T>,
}

// The value is only reachable through `with`, which grants exclusive access
// while holding the mutex.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    fn new(value: T) -> Self {
        Guarded {
            mutex: Mutex::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` on the value while holding the mutex.
    async fn with<F, R>(&self, f: F) -> Result<R, AcquireError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let _releaser = self.mutex.acquire().await?;
        // Safety: the mutex is private and never reset or drained, so the
        // releaser is the only one in existence and nobody else can be
        // inside this block.
        let value = unsafe { &mut *self.value.get() };
        Ok(f(value))
    }

    fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> core::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Guarded")
            .field("mutex", &self.mutex)
            .finish()
    }
}
