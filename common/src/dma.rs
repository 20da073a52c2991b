use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::slice;
use std::sync::Mutex;

use log::trace;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DmaError {
    #[error("DMA pool exhausted: {size} bytes aligned to {align} requested, {remaining} remaining")]
    OutOfMemory {
        size: usize,
        align: usize,
        remaining: usize,
    },
    #[error("invalid DMA layout: size {size}, align {align}, boundary {boundary}")]
    InvalidLayout {
        size: usize,
        align: usize,
        boundary: usize,
    },
    #[error("the DMA pool never frees memory")]
    FreeUnsupported,
}

pub type Result<T, E = DmaError> = std::result::Result<T, E>;

struct Cursor {
    base: usize,
    end: usize,
    next: usize,
}

/// A bump allocator over a fixed region of device-visible memory.
///
/// The kernel runs in a single identity-mapped address space, so the address handed out is both
/// the pointer software uses and the physical address programmed into the controller.
/// Allocations live for the lifetime of the pool: nothing is ever returned to it.
pub struct DmaPool {
    cursor: Mutex<Cursor>,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl DmaPool {
    /// Creates a pool over `len` bytes starting at `base`.
    ///
    /// # Safety
    /// The region must be valid for reads and writes for the rest of the program, and nothing
    /// else may use it.
    pub unsafe fn from_raw_parts(base: usize, len: usize) -> Self {
        Self {
            cursor: Mutex::new(Cursor {
                base,
                end: base + len,
                next: base,
            }),
        }
    }

    pub fn from_static(region: &'static mut [u8]) -> Self {
        unsafe { Self::from_raw_parts(region.as_mut_ptr() as usize, region.len()) }
    }

    /// Creates a pool backed by leaked heap memory, for hosted builds and tests.
    pub fn from_heap(len: usize) -> Self {
        let words = vec![0u64; (len + 7) / 8].into_boxed_slice();
        let region = Box::leak(words);
        unsafe { Self::from_raw_parts(region.as_mut_ptr() as usize, region.len() * 8) }
    }

    /// Allocates `size` bytes aligned to `align` that do not cross a multiple of `boundary`.
    ///
    /// A `boundary` of zero means the allocation may cross any boundary.
    pub fn alloc(&self, size: usize, align: usize, boundary: usize) -> Result<usize> {
        let invalid = DmaError::InvalidLayout {
            size,
            align,
            boundary,
        };
        if size == 0 || !align.is_power_of_two() {
            return Err(invalid);
        }
        if boundary != 0 && (!boundary.is_power_of_two() || size > boundary) {
            return Err(invalid);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());

        let mut start = align_up(cursor.next, align);
        if boundary != 0 && start / boundary != (start + size - 1) / boundary {
            start = align_up(start, boundary);
        }
        if start + size > cursor.end {
            return Err(DmaError::OutOfMemory {
                size,
                align,
                remaining: cursor.end - cursor.next,
            });
        }
        cursor.next = start + size;

        trace!(
            "dma alloc {:#x}+{:#x} ({} of {} bytes used)",
            start,
            size,
            cursor.next - cursor.base,
            cursor.end - cursor.base
        );
        Ok(start)
    }

    /// Always fails; allocations are never reclaimed.
    pub fn free(&self, _address: usize, _size: usize) -> Result<()> {
        Err(DmaError::FreeUnsupported)
    }

    pub fn used(&self) -> usize {
        let cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        cursor.next - cursor.base
    }
}

/// A typed view of a pool allocation.
///
/// Dropping a `Dma` runs the destructor of its contents but does not return the memory.
pub struct Dma<T: ?Sized> {
    phys: usize,
    size: usize,
    virt: *mut T,
}

unsafe impl<T: ?Sized + Send> Send for Dma<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Dma<T> {}

fn zeroed_region(pool: &DmaPool, size: usize, align: usize, boundary: usize) -> Result<usize> {
    let address = pool.alloc(size, align, boundary)?;
    unsafe { ptr::write_bytes(address as *mut u8, 0, size) };
    Ok(address)
}

impl<T> Dma<T> {
    pub fn new(pool: &DmaPool, value: T, align: usize, boundary: usize) -> Result<Self> {
        let this = Self::zeroed_uninit(pool, align, boundary)?;
        unsafe {
            ptr::write(this.virt, MaybeUninit::new(value));
            Ok(this.assume_init())
        }
    }

    pub fn zeroed_uninit(
        pool: &DmaPool,
        align: usize,
        boundary: usize,
    ) -> Result<Dma<MaybeUninit<T>>> {
        let size = mem::size_of::<T>();
        let address = zeroed_region(pool, size, align.max(mem::align_of::<T>()), boundary)?;
        Ok(Dma {
            phys: address,
            size,
            virt: address as *mut MaybeUninit<T>,
        })
    }

    /// Allocates a zero-filled `T`.
    ///
    /// # Safety
    /// An all-zero bit pattern must be a valid `T`.
    pub unsafe fn zeroed(pool: &DmaPool, align: usize, boundary: usize) -> Result<Self> {
        Ok(Self::zeroed_uninit(pool, align, boundary)?.assume_init())
    }
}

impl<T> Dma<MaybeUninit<T>> {
    pub unsafe fn assume_init(self) -> Dma<T> {
        let dma = Dma {
            phys: self.phys,
            size: self.size,
            virt: self.virt as *mut T,
        };
        mem::forget(self);
        dma
    }
}

impl<T> Dma<[T]> {
    /// Allocates `count` zero-filled elements.
    ///
    /// # Safety
    /// An all-zero bit pattern must be a valid `T`.
    pub unsafe fn zeroed_unsized(
        pool: &DmaPool,
        count: usize,
        align: usize,
        boundary: usize,
    ) -> Result<Self> {
        let size = mem::size_of::<T>() * count;
        let address = zeroed_region(pool, size, align.max(mem::align_of::<T>()), boundary)?;
        Ok(Dma {
            phys: address,
            size,
            virt: slice::from_raw_parts_mut(address as *mut T, count) as *mut [T],
        })
    }
}

impl<T: ?Sized> Dma<T> {
    pub fn physical(&self) -> usize {
        self.phys
    }
    pub fn size(&self) -> usize {
        self.size
    }
}

impl<T: ?Sized> Deref for Dma<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.virt }
    }
}

impl<T: ?Sized> DerefMut for Dma<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.virt }
    }
}

impl<T: ?Sized> Drop for Dma<T> {
    fn drop(&mut self) {
        unsafe { ptr::drop_in_place(self.virt) }
    }
}
