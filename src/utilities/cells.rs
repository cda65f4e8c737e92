//! Interior-mutability helpers for the event-driven, lock-free object graph.
//!
//! `VolatileCell` comes straight from the `vcell` crate; endpoint packet
//! buffers are hardware-DMA visible, so every access must be a real memory
//! access.

use core::cell::Cell;

pub use vcell::VolatileCell;

/// A `Cell` wrapping an `Option`, for fields that start out unset or that
/// hold a revocable borrow (a pending request record, a registered
/// capability).
pub struct OptionalCell<T: Copy> {
    value: Cell<Option<T>>,
}

impl<T: Copy> OptionalCell<T> {
    pub const fn new(val: T) -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(Some(val)),
        }
    }

    /// Create an empty cell (contains just `None`).
    pub const fn empty() -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(None),
        }
    }

    pub fn set(&self, val: T) {
        self.value.set(Some(val));
    }

    /// Reset the stored value to `None`.
    pub fn clear(&self) {
        self.value.set(None);
    }

    pub fn is_some(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn is_none(&self) -> bool {
        self.value.get().is_none()
    }

    /// Return a copy of the contained option.
    pub fn extract(&self) -> Option<T> {
        self.value.get()
    }

    /// Return the contained value and replace it with `None`.
    pub fn take(&self) -> Option<T> {
        self.value.take()
    }

    /// Call a closure on the value if the value exists.
    pub fn map<F, R>(&self, closure: F) -> Option<R>
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map(closure)
    }

    /// Call a closure on the value if the value exists, or return the
    /// default if the value is `None`.
    pub fn map_or<F, R>(&self, default: R, closure: F) -> R
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map_or(default, closure)
    }

    /// Transform the contained `Option<T>` into a `Result<T, E>`, mapping
    /// `Some(v)` to `Ok(v)` and `None` to `Err(err)`.
    pub fn ok_or<E>(&self, err: E) -> Result<T, E> {
        self.value.get().ok_or(err)
    }
}

impl<T: Copy> Default for OptionalCell<T> {
    fn default() -> Self {
        OptionalCell::empty()
    }
}
