//! A single value shared between tasks.

use super::Guarded;
use crate::sync::AcquireError;

/// A variable whose reads and writes never interleave.
#[derive(Debug)]
pub struct SafeVar<T> {
    inner: Guarded<T>,
}

/// Creates a [`SafeVar`] holding `value`.
pub fn safe_var<T>(value: T) -> SafeVar<T> {
    SafeVar::new(value)
}

impl<T> SafeVar<T> {
    /// Creates a new variable holding `value`.
    pub fn new(value: T) -> Self {
        SafeVar {
            inner: Guarded::new(value),
        }
    }

    /// Returns a copy of the current value.
    pub async fn get(&self) -> Result<T, AcquireError>
    where
        T: Clone,
    {
        self.inner.with(|value| value.clone()).await
    }

    /// Replaces the value, returning the previous one.
    pub async fn set(&self, value: T) -> Result<T, AcquireError> {
        self.inner
            .with(|current| core::mem::replace(current, value))
            .await
    }

    /// Replaces the value with `replacement` if it equals `expected`.
    ///
    /// Returns the value held after the operation.
    pub async fn set_if(&self, expected: &T, replacement: T) -> Result<T, AcquireError>
    where
        T: Clone + PartialEq,
    {
        self.inner
            .with(|current| {
                if *current == *expected {
                    *current = replacement;
                }
                current.clone()
            })
            .await
    }

    /// Runs `f` with exclusive access to the value.
    pub async fn with<F, R>(&self, f: F) -> Result<R, AcquireError>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.inner.with(f).await
    }

    /// Consumes the variable, returning the value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for SafeVar<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{safe_var, SafeVar};
    use futures::executor::block_on;
    use futures::future::join_all;

    #[test]
    fn get_set_and_set_if() {
        block_on(async {
            let var = safe_var(1);
            assert_eq!(Ok(1), var.get().await);
            assert_eq!(Ok(1), var.set(2).await);
            assert_eq!(Ok(2), var.set_if(&5, 7).await);
            assert_eq!(Ok(7), var.set_if(&2, 7).await);
            assert_eq!(7, var.into_inner());
        });
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let var = SafeVar::<u32>::default();
        block_on(join_all((0..50).map(|_| var.with(|n| *n += 1))));
        assert_eq!(50, var.into_inner());
    }
}
