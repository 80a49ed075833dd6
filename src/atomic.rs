//! Bounds-checked atomic integers.
//!
//! Every width shares the same implementation, [`AtomicNumber`], which is
//! parametrized by the primitive integer it stores. Arithmetic that would
//! leave the representable range of that integer fails with [`OutOfRange`]
//! instead of wrapping, and the stored value is left untouched.
//!
//! The [`Counter`] trait is the narrow contract a [`Semaphore`] relies on.
//! Handing the same counter to code running on several threads gives all of
//! them the same view of the permit count.
//!
//! [`Semaphore`]: crate::sync::Semaphore

use core::fmt;
use core::sync::atomic::{self, Ordering};

/// The error returned when an operation would leave an atomic integer outside
/// the range of its underlying type.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct OutOfRange {
    /// Smallest value the integer can hold
    pub min: i64,
    /// Largest value the integer can hold
    pub max: i64,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value out of bounds [{}, {}]", self.min, self.max)
    }
}

impl std::error::Error for OutOfRange {}

/// An integer cell with atomic arithmetic, as consumed by a semaphore.
///
/// All values are exchanged as `i64`; implementations reject values that
/// their storage cannot represent.
pub trait Counter: Send + Sync {
    /// Returns the current value.
    fn get(&self) -> i64;

    /// Stores `value`.
    fn set(&self, value: i64) -> Result<(), OutOfRange>;

    /// Adds `delta` and returns the previous value.
    fn add(&self, delta: i64) -> Result<i64, OutOfRange>;

    /// Subtracts `delta` and returns the previous value.
    fn sub(&self, delta: i64) -> Result<i64, OutOfRange>;

    /// Stores `new` if the current value equals `current`.
    ///
    /// Returns the previous value; the exchange happened iff it equals
    /// `current`.
    fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, OutOfRange>;
}

mod private {
    pub trait Sealed {}
}

/// Primitive integers that have a matching std atomic type.
///
/// This trait is sealed and implemented for `i8`, `i16`, `i32`, `u8`, `u16`
/// and `u32`.
pub trait Integer: private::Sealed + Copy + Send + Sync + 'static {
    #[doc(hidden)]
    type Atomic: Send + Sync;

    /// Smallest representable value
    const MIN: i64;
    /// Largest representable value
    const MAX: i64;
    /// Size of the integer in bytes
    const BYTES: usize;

    #[doc(hidden)]
    fn new_atomic(value: Self) -> Self::Atomic;
    #[doc(hidden)]
    fn load(atomic: &Self::Atomic) -> Self;
    #[doc(hidden)]
    fn store(atomic: &Self::Atomic, value: Self);
    #[doc(hidden)]
    fn swap(atomic: &Self::Atomic, value: Self) -> Self;
    #[doc(hidden)]
    fn compare_exchange_weak(
        atomic: &Self::Atomic,
        current: Self,
        new: Self,
    ) -> Result<Self, Self>;
    #[doc(hidden)]
    fn fetch_and(atomic: &Self::Atomic, value: Self) -> Self;
    #[doc(hidden)]
    fn fetch_or(atomic: &Self::Atomic, value: Self) -> Self;
    #[doc(hidden)]
    fn fetch_xor(atomic: &Self::Atomic, value: Self) -> Self;
    #[doc(hidden)]
    fn is_lock_free() -> bool;

    #[doc(hidden)]
    fn to_i64(self) -> i64;
    /// Converts a value which was already checked against `MIN` and `MAX`.
    #[doc(hidden)]
    fn from_i64_unchecked(value: i64) -> Self;
}

macro_rules! impl_integer {
    ($($int:ty => $atomic:ident, $has_atomic:tt;)*) => {
        $(
            impl private::Sealed for $int {}

            impl Integer for $int {
                type Atomic = atomic::$atomic;

                const MIN: i64 = <$int>::MIN as i64;
                const MAX: i64 = <$int>::MAX as i64;
                const BYTES: usize = core::mem::size_of::<$int>();

                #[inline]
                fn new_atomic(value: Self) -> Self::Atomic {
                    atomic::$atomic::new(value)
                }

                #[inline]
                fn load(atomic: &Self::Atomic) -> Self {
                    atomic.load(Ordering::SeqCst)
                }

                #[inline]
                fn store(atomic: &Self::Atomic, value: Self) {
                    atomic.store(value, Ordering::SeqCst)
                }

                #[inline]
                fn swap(atomic: &Self::Atomic, value: Self) -> Self {
                    atomic.swap(value, Ordering::SeqCst)
                }

                #[inline]
                fn compare_exchange_weak(
                    atomic: &Self::Atomic,
                    current: Self,
                    new: Self,
                ) -> Result<Self, Self> {
                    atomic.compare_exchange_weak(current, new, Ordering::SeqCst, Ordering::SeqCst)
                }

                #[inline]
                fn fetch_and(atomic: &Self::Atomic, value: Self) -> Self {
                    atomic.fetch_and(value, Ordering::SeqCst)
                }

                #[inline]
                fn fetch_or(atomic: &Self::Atomic, value: Self) -> Self {
                    atomic.fetch_or(value, Ordering::SeqCst)
                }

                #[inline]
                fn fetch_xor(atomic: &Self::Atomic, value: Self) -> Self {
                    atomic.fetch_xor(value, Ordering::SeqCst)
                }

                #[inline]
                fn is_lock_free() -> bool {
                    cfg!(target_has_atomic = $has_atomic)
                }

                #[inline]
                fn to_i64(self) -> i64 {
                    self as i64
                }

                #[inline]
                fn from_i64_unchecked(value: i64) -> Self {
                    value as $int
                }
            }
        )*
    };
}

impl_integer! {
    i8 => AtomicI8, "8";
    i16 => AtomicI16, "16";
    i32 => AtomicI32, "32";
    u8 => AtomicU8, "8";
    u16 => AtomicU16, "16";
    u32 => AtomicU32, "32";
}

/// Range check shared by every operation that produces a new value.
///
/// `None` stands for a result that did not even fit into an `i64`.
fn bounded<T: Integer>(value: Option<i64>) -> Result<T, OutOfRange> {
    match value {
        Some(v) if (T::MIN..=T::MAX).contains(&v) => Ok(T::from_i64_unchecked(v)),
        _ => Err(OutOfRange {
            min: T::MIN,
            max: T::MAX,
        }),
    }
}

/// An atomic integer of type `T` whose arithmetic is checked against the
/// bounds of `T`.
///
/// All operations are sequentially consistent.
pub struct AtomicNumber<T: Integer> {
    inner: T::Atomic,
}

/// Atomic `i8`
pub type AtomicInt8 = AtomicNumber<i8>;
/// Atomic `i16`
pub type AtomicInt16 = AtomicNumber<i16>;
/// Atomic `i32`
pub type AtomicInt32 = AtomicNumber<i32>;
/// Atomic `u8`
pub type AtomicUint8 = AtomicNumber<u8>;
/// Atomic `u16`
pub type AtomicUint16 = AtomicNumber<u16>;
/// Atomic `u32`
pub type AtomicUint32 = AtomicNumber<u32>;

impl<T: Integer> AtomicNumber<T> {
    /// Smallest value this integer can hold
    pub const MIN: i64 = T::MIN;
    /// Largest value this integer can hold
    pub const MAX: i64 = T::MAX;
    /// Width of the stored integer in bytes
    pub const BYTES: usize = T::BYTES;

    /// Creates a new atomic integer holding `value`.
    pub fn new(value: T) -> Self {
        AtomicNumber {
            inner: T::new_atomic(value),
        }
    }

    /// Creates a new atomic integer from an `i64`, failing if `value` does
    /// not fit into `T`.
    pub fn try_from_i64(value: i64) -> Result<Self, OutOfRange> {
        bounded::<T>(Some(value)).map(Self::new)
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        T::load(&self.inner).to_i64()
    }

    /// Stores `value`.
    pub fn set(&self, value: i64) -> Result<(), OutOfRange> {
        T::store(&self.inner, bounded::<T>(Some(value))?);
        Ok(())
    }

    /// Adds `delta` and returns the previous value.
    pub fn add(&self, delta: i64) -> Result<i64, OutOfRange> {
        self.update(|current| current.checked_add(delta))
    }

    /// Subtracts `delta` and returns the previous value.
    pub fn sub(&self, delta: i64) -> Result<i64, OutOfRange> {
        self.update(|current| current.checked_sub(delta))
    }

    /// Stores `value` and returns the previous value.
    pub fn exchange(&self, value: i64) -> Result<i64, OutOfRange> {
        let value = bounded::<T>(Some(value))?;
        Ok(T::swap(&self.inner, value).to_i64())
    }

    /// Stores `new` if the current value equals `current` and returns the
    /// previous value.
    ///
    /// `new` is checked against the bounds of `T` even if the exchange would
    /// not take place. A `current` outside the bounds can never match.
    pub fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, OutOfRange> {
        let new = bounded::<T>(Some(new))?;
        let expected = match bounded::<T>(Some(current)) {
            Ok(expected) => expected,
            Err(_) => return Ok(self.get()),
        };
        loop {
            match T::compare_exchange_weak(&self.inner, expected, new) {
                Ok(previous) => return Ok(previous.to_i64()),
                Err(actual) if actual.to_i64() != current => return Ok(actual.to_i64()),
                // Spurious failure
                Err(_) => continue,
            }
        }
    }

    /// Stores the bitwise AND of the current value and `value`, returning the
    /// previous value.
    pub fn and(&self, value: T) -> i64 {
        T::fetch_and(&self.inner, value).to_i64()
    }

    /// Stores the bitwise OR of the current value and `value`, returning the
    /// previous value.
    pub fn or(&self, value: T) -> i64 {
        T::fetch_or(&self.inner, value).to_i64()
    }

    /// Stores the bitwise XOR of the current value and `value`, returning the
    /// previous value.
    pub fn xor(&self, value: T) -> i64 {
        T::fetch_xor(&self.inner, value).to_i64()
    }

    /// Returns whether the target supports this width without falling back
    /// to locks.
    pub fn is_lock_free(&self) -> bool {
        T::is_lock_free()
    }

    /// Applies `f` in a compare-exchange loop and publishes its result only
    /// if it lies within the bounds of `T`.
    fn update<F>(&self, f: F) -> Result<i64, OutOfRange>
    where
        F: Fn(i64) -> Option<i64>,
    {
        let mut current = T::load(&self.inner);
        loop {
            let next = bounded::<T>(f(current.to_i64()))?;
            match T::compare_exchange_weak(&self.inner, current, next) {
                Ok(previous) => return Ok(previous.to_i64()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl<T: Integer> Counter for AtomicNumber<T> {
    fn get(&self) -> i64 {
        AtomicNumber::get(self)
    }

    fn set(&self, value: i64) -> Result<(), OutOfRange> {
        AtomicNumber::set(self, value)
    }

    fn add(&self, delta: i64) -> Result<i64, OutOfRange> {
        AtomicNumber::add(self, delta)
    }

    fn sub(&self, delta: i64) -> Result<i64, OutOfRange> {
        AtomicNumber::sub(self, delta)
    }

    fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, OutOfRange> {
        AtomicNumber::compare_exchange(self, current, new)
    }
}

impl<T: Integer + Default> Default for AtomicNumber<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Integer> fmt::Debug for AtomicNumber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicNumber").field(&self.get()).finish()
    }
}

impl<T: Integer> fmt::Display for AtomicNumber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicNumber({})", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_return_previous_value() {
        let n = AtomicInt32::new(5);
        assert_eq!(5, n.add(1).unwrap());
        assert_eq!(6, n.sub(3).unwrap());
        assert_eq!(3, n.get());
    }

    #[test]
    fn overflow_is_rejected_and_value_kept() {
        let n = AtomicInt8::new(127);
        assert_eq!(Err(OutOfRange { min: -128, max: 127 }), n.add(1));
        assert_eq!(127, n.get());

        let n = AtomicInt8::new(-128);
        assert!(n.sub(1).is_err());
        assert_eq!(-128, n.get());
    }

    #[test]
    fn unsigned_counters_cannot_go_negative() {
        let n = AtomicUint8::new(0);
        assert!(n.sub(1).is_err());
        assert_eq!(0, n.get());

        let n = AtomicUint32::new(u32::MAX);
        assert!(n.add(1).is_err());
        assert_eq!(u32::MAX as i64, n.get());
    }

    #[test]
    fn huge_deltas_do_not_overflow_the_check() {
        let n = AtomicInt16::new(1);
        assert!(n.add(i64::MAX).is_err());
        assert!(n.sub(i64::MAX).is_err());
        assert_eq!(1, n.get());
    }

    #[test]
    fn set_checks_bounds() {
        let n = AtomicUint16::new(10);
        assert!(n.set(65_536).is_err());
        assert!(n.set(-1).is_err());
        assert_eq!(10, n.get());
        n.set(65_535).unwrap();
        assert_eq!(65_535, n.get());
    }

    #[test]
    fn exchange_and_compare_exchange() {
        let n = AtomicInt32::new(1);
        assert_eq!(1, n.exchange(7).unwrap());
        assert_eq!(7, n.compare_exchange(7, 9).unwrap());
        assert_eq!(9, n.get());
        // No match, value stays
        assert_eq!(9, n.compare_exchange(1, 2).unwrap());
        assert_eq!(9, n.get());
        // Out of range replacement is rejected even without a match
        assert!(n.compare_exchange(1, i64::from(i32::MAX) + 1).is_err());
        // An expected value the type cannot hold never matches
        assert_eq!(9, n.compare_exchange(i64::MAX, 0).unwrap());
    }

    #[test]
    fn bitwise_operations() {
        let n = AtomicUint8::new(0b1100);
        assert_eq!(0b1100, n.and(0b0100));
        assert_eq!(0b0100, n.or(0b0011));
        assert_eq!(0b0111, n.xor(0b0001));
        assert_eq!(0b0110, n.get());
    }

    #[test]
    fn constants_and_formatting() {
        assert_eq!(1, AtomicInt8::BYTES);
        assert_eq!(4, AtomicUint32::BYTES);
        assert_eq!(-32_768, AtomicInt16::MIN);
        assert_eq!(255, AtomicUint8::MAX);
        assert!(AtomicInt32::try_from_i64(i64::from(i32::MAX) + 1).is_err());
        assert_eq!("AtomicNumber(3)", AtomicInt32::new(3).to_string());
        assert_eq!(0, AtomicUint16::default().get());
    }

    #[test]
    fn counter_is_object_safe() {
        let counter: std::sync::Arc<dyn Counter> = std::sync::Arc::new(AtomicInt16::new(2));
        assert_eq!(2, counter.sub(1).unwrap());
        assert_eq!(1, counter.compare_exchange(1, 4).unwrap());
        assert_eq!(4, counter.get());
    }
}
