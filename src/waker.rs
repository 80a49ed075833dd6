//! A task handle with a stable ABI, kept inside wait queue entries.

use {
    abi_stable::{
        sabi_extern_fn,
        std_types::ROption::{self, *},
        StableAbi,
    },
    futures_core::task::Waker,
};

use std::fmt;

#[derive(StableAbi, Debug)]
#[repr(C)]
pub struct OpaqueWaker {
    #[sabi(unsafe_opaque_field)]
    inner: Waker,
}

#[sabi_extern_fn]
fn wake(waker: OpaqueWaker) {
    waker.inner.wake()
}

#[sabi_extern_fn]
fn drop_waker(waker: OpaqueWaker) {
    drop(waker.inner)
}

/// Function table shared by every `RWaker`.
#[derive(StableAbi)]
#[repr(C)]
pub struct WakerVTable {
    wake: unsafe extern "C" fn(OpaqueWaker),
    drop: unsafe extern "C" fn(OpaqueWaker),
}

static VTABLE: WakerVTable = WakerVTable {
    wake,
    drop: drop_waker,
};

/// The waker of a task parked at a semaphore.
///
/// Calls go through `VTABLE` so the handle can cross a dynamic library
/// boundary together with the queue it lives in.
#[derive(StableAbi)]
#[repr(C)]
pub struct RWaker {
    waker: ROption<OpaqueWaker>,
    vtable: &'static WakerVTable,
}

impl RWaker {
    pub fn new(waker: Waker) -> Self {
        Self {
            waker: RSome(OpaqueWaker { inner: waker }),
            vtable: &VTABLE,
        }
    }

    /// Wakes the task, consuming the handle.
    #[inline]
    pub fn wake(mut self) {
        if let RSome(waker) = self.waker.take() {
            unsafe { (self.vtable.wake)(waker) }
        }
    }

    /// Stores `waker` unless the current handle would already wake the same
    /// task.
    pub fn update(&mut self, waker: &Waker) {
        if let RSome(current) = self.waker.as_ref() {
            if current.inner.will_wake(waker) {
                return;
            }
        }
        if let RSome(old) = self.waker.take() {
            unsafe { (self.vtable.drop)(old) };
        }
        self.waker = RSome(OpaqueWaker {
            inner: waker.clone(),
        });
    }
}

impl Drop for RWaker {
    #[inline]
    fn drop(&mut self) {
        if let RSome(waker) = self.waker.take() {
            unsafe { (self.vtable.drop)(waker) };
        }
    }
}

impl fmt::Debug for RWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RWaker")
            .field("waker", &self.waker)
            .finish()
    }
}
