//! Asynchronous synchronization primitives.
//!
//! This module provides a counting [`Semaphore`] and its single-permit
//! specialization [`Mutex`] for synchronizing concurrently executing futures.

mod mutex;
mod semaphore;

pub use self::mutex::Mutex;
pub use self::semaphore::{AcquireError, Releaser, Semaphore, SemaphoreAcquire};
