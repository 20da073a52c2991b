use core::mem::MaybeUninit;
use core::ops::{BitAnd, BitOr, Not};
use core::ptr;

use super::Io;

/// A memory-mapped location accessed with volatile loads and stores.
///
/// The cell has the size and alignment of `T`, so `#[repr(C)]` register blocks built from it
/// match the hardware layout field for field.
#[repr(transparent)]
pub struct Mmio<T> {
    value: MaybeUninit<T>,
}

impl<T> Mmio<T> {
    /// Creates a cell holding `value`, for building records in ordinary memory before they are
    /// copied into a ring.
    pub const fn new(value: T) -> Self {
        Mmio {
            value: MaybeUninit::new(value),
        }
    }
}

impl<T> Io for Mmio<T>
where
    T: Copy + PartialEq + BitAnd<Output = T> + BitOr<Output = T> + Not<Output = T>,
{
    type Value = T;

    #[inline(always)]
    fn read(&self) -> T {
        // SAFETY: the cell always holds an initialized `T`, either from `new` or from the zeroed
        // memory it was placed over.
        unsafe { ptr::read_volatile(self.value.as_ptr()) }
    }

    #[inline(always)]
    fn write(&mut self, value: T) {
        unsafe { ptr::write_volatile(self.value.as_mut_ptr(), value) };
    }
}
