//! Executable memory regions.
//!
//! A region moves through `Writable -> Executable` as a typestate: code is
//! only copied in while the region is writable, and an entry address is only
//! handed out once the protection change succeeded. Dropping a region in any
//! state restores non-executable protection (when `set_memory_nx` was
//! resolved) and returns the pages to the vmalloc pool.

use core::marker::PhantomData;
use core::ptr::NonNull;

use super::{AARCH64_RET, Error};
use crate::kfn::{KernelFn, SetMemoryFn};
use crate::platform::{AARCH64_INSN_SIZE, Kernel, PAGE_SIZE, page_align};

/// Region is writable and not yet executable.
#[derive(Debug)]
pub enum Writable {}

/// Region has been made executable.
#[derive(Debug)]
pub enum Executable {}

struct RawRegion<'k> {
    kernel: &'k dyn Kernel,
    base: NonNull<u8>,
    size: usize,
    set_memory_nx: Option<KernelFn<SetMemoryFn>>,
    executable: bool,
}

impl RawRegion<'_> {
    fn pages(&self) -> i32 {
        (self.size / PAGE_SIZE) as i32
    }
}

impl Drop for RawRegion<'_> {
    fn drop(&mut self) {
        let addr = self.base.as_ptr() as usize;
        if self.executable {
            if let Some(nx) = self.set_memory_nx {
                let ret = unsafe { self.kernel.call_set_memory(nx, addr, self.pages()) };
                if ret != 0 {
                    warn!("exec: set_memory_nx({:#x}) failed: {}", addr, ret);
                }
            }
        }
        unsafe { self.kernel.vfree(self.base) };
        trace!("exec: released region {:#x} ({} bytes)", addr, self.size);
    }
}

/// A vmalloc region holding one piece of injected code.
pub struct ExecRegion<'k, S> {
    raw: RawRegion<'k>,
    len: usize,
    _state: PhantomData<S>,
}

impl<'k> ExecRegion<'k, Writable> {
    /// Allocate a region large enough for `code_len` bytes plus the trailing
    /// `RET`, rounded up to whole pages.
    pub fn alloc(
        kernel: &'k dyn Kernel,
        code_len: usize,
        set_memory_nx: Option<KernelFn<SetMemoryFn>>,
    ) -> Result<Self, Error> {
        let len = code_len
            .checked_add(AARCH64_INSN_SIZE)
            .ok_or(Error::InvalidInput("code too large"))?;
        let size = page_align(len);
        let base = kernel.vmalloc(size).ok_or(Error::AllocationFailed)?;
        trace!("exec: allocated region {:#x} ({} bytes)", base.as_ptr() as usize, size);
        Ok(Self {
            raw: RawRegion {
                kernel,
                base,
                size,
                set_memory_nx,
                executable: false,
            },
            len: 0,
            _state: PhantomData,
        })
    }

    /// Copy `code` to the start of the region, append `RET` and flush the
    /// instruction cache over the written range.
    pub fn install(&mut self, code: &[u8]) -> Result<(), Error> {
        let len = code.len() + AARCH64_INSN_SIZE;
        if len > self.raw.size {
            return Err(Error::InvalidInput("code does not fit region"));
        }
        let base = self.raw.base.as_ptr();
        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), base, code.len());
            core::ptr::copy_nonoverlapping(
                AARCH64_RET.to_le_bytes().as_ptr(),
                base.add(code.len()),
                AARCH64_INSN_SIZE,
            );
        }
        let start = base as usize;
        self.raw.kernel.flush_icache_range(start, start + len);
        self.len = len;
        Ok(())
    }

    /// Flip the whole region executable through `set_memory_x`.
    pub fn make_executable(
        mut self,
        set_memory_x: KernelFn<SetMemoryFn>,
    ) -> Result<ExecRegion<'k, Executable>, Error> {
        let addr = self.addr();
        let ret = unsafe {
            self.raw
                .kernel
                .call_set_memory(set_memory_x, addr, self.raw.pages())
        };
        if ret != 0 {
            error!("exec: set_memory_x({:#x}, {}) failed: {}", addr, self.raw.pages(), ret);
            return Err(Error::PermissionDenied);
        }
        self.raw.executable = true;
        Ok(ExecRegion {
            raw: self.raw,
            len: self.len,
            _state: PhantomData,
        })
    }
}

impl ExecRegion<'_, Executable> {
    /// Entry point of the installed code.
    pub fn entry(&self) -> usize {
        self.addr()
    }
}

impl<S> ExecRegion<'_, S> {
    /// Base address of the region.
    pub fn addr(&self) -> usize {
        self.raw.base.as_ptr() as usize
    }

    /// Allocated size in bytes (a whole number of pages).
    pub fn size(&self) -> usize {
        self.raw.size
    }

    /// Bytes installed so far, including the trailing `RET`.
    pub fn code_len(&self) -> usize {
        self.len
    }
}
