//! Typed handles to resolved kernel functions.
//!
//! Kernel entry points that are not exported to modules are located at
//! runtime by the symbol resolver. A [`KernelFn`] is the only way this crate
//! turns such an address into something callable: it can only be built from
//! a non-zero address, so no code path can jump through an unresolved
//! symbol.

use core::ffi::{c_char, c_void};
use core::fmt;
use core::marker::PhantomData;
use core::num::NonZeroUsize;

/// `unsigned long kallsyms_lookup_name(const char *name)`
pub type LookupNameFn = unsafe extern "C" fn(name: *const c_char) -> usize;

/// `int set_memory_x(unsigned long addr, int numpages)` and `set_memory_nx`.
pub type SetMemoryFn = unsafe extern "C" fn(addr: usize, numpages: i32) -> i32;

/// `int path_mount(const char *dev_name, struct path *path,
///                 const char *type_page, unsigned long flags, void *data_page)`
pub type PathMountFn = unsafe extern "C" fn(
    dev_name: *const c_char,
    path: *mut c_void,
    type_page: *const c_char,
    flags: usize,
    data_page: *mut c_void,
) -> i32;

/// A verified, non-null kernel function of signature `F`.
pub struct KernelFn<F> {
    addr: NonZeroUsize,
    _sig: PhantomData<F>,
}

impl<F: Copy> KernelFn<F> {
    /// Wrap a resolved address.
    ///
    /// # Safety
    /// `addr` must be the entry point of a function whose ABI matches `F`,
    /// and `F` must be a function pointer type.
    pub unsafe fn from_addr(addr: NonZeroUsize) -> Self {
        assert!(core::mem::size_of::<F>() == core::mem::size_of::<usize>());
        Self {
            addr,
            _sig: PhantomData,
        }
    }

    /// Entry address of the function.
    pub fn addr(&self) -> usize {
        self.addr.get()
    }

    pub fn nonzero_addr(&self) -> NonZeroUsize {
        self.addr
    }

    /// The callable function pointer.
    pub fn get(&self) -> F {
        // SAFETY: `from_addr` checked the size and the caller vouched for the ABI.
        unsafe { core::mem::transmute_copy::<usize, F>(&self.addr.get()) }
    }
}

impl<F> Clone for KernelFn<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for KernelFn<F> {}

impl<F> PartialEq for KernelFn<F> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<F> Eq for KernelFn<F> {}

impl<F> fmt::Debug for KernelFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelFn({:#x})", self.addr.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn double(addr: usize, numpages: i32) -> i32 {
        (addr as i32) + numpages * 2
    }

    #[test]
    fn test_call_through_handle() {
        let addr = NonZeroUsize::new(double as usize).unwrap();
        let f = unsafe { KernelFn::<SetMemoryFn>::from_addr(addr) };
        assert_eq!(f.addr(), double as usize);
        assert_eq!(unsafe { (f.get())(1, 3) }, 7);
    }

    #[test]
    fn test_debug_shows_address() {
        let f = unsafe { KernelFn::<SetMemoryFn>::from_addr(NonZeroUsize::new(0x1000).unwrap()) };
        assert_eq!(alloc::format!("{:?}", f), "KernelFn(0x1000)");
    }
}
