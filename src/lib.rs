//! Futures-aware synchronization built around a FIFO counting semaphore.
//!
//! A [`Semaphore`] hands out a fixed number of permits. Acquirers which find
//! no free permit are queued and served strictly in arrival order: a
//! released permit goes directly to the oldest waiter instead of being
//! raced for. A [`Mutex`] is a semaphore with a single permit.
//!
//! Permits are tracked by a bounds-checked atomic counter from the
//! [`atomic`] module, and the containers in [`collections`] use a `Mutex` to
//! serialize every access to their contents.
//!
//! All futures in this crate are executor-agnostic, except
//! [`Semaphore::run_with_timeout`], which relies on the Tokio timer.
//!
//! ```
//! # futures::executor::block_on(async {
//! use futures_semaphore::Semaphore;
//!
//! let semaphore = Semaphore::new(2);
//! let first = semaphore.acquire().await.unwrap();
//! let second = semaphore.try_acquire().unwrap();
//! assert!(semaphore.is_locked());
//! drop(first);
//! assert_eq!(1, semaphore.permits());
//! # drop(second);
//! # });
//! ```

mod waker;

pub mod atomic;
pub mod collections;
pub mod sync;

pub use self::sync::{AcquireError, Mutex, Releaser, Semaphore, SemaphoreAcquire};
