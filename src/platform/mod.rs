//! Platform abstraction layer for kernel services.
//!
//! The toolkit is hosted inside a running kernel but never links against it
//! directly. Everything it needs from the host (allocators, symbol printing,
//! kprobes, cross-CPU calls, firmware calls, path lookup) is reached through
//! the traits in this module, which the embedding kernel implements once.
//! [`mock::MockKernel`] implements them in user space for testing.
//!
//! Calls through resolved [`KernelFn`] handles also go through these traits
//! (`call_*` methods). Their default bodies perform the raw call; this is the
//! single place where a kernel built with CFI needs its `__nocfi` call sites.

use alloc::string::String;
use core::ffi::{CStr, c_void};
use core::ptr::NonNull;

use crate::cpumask::CpuMask;
use crate::exec::Arm64Regs;
use crate::kfn::{KernelFn, LookupNameFn, PathMountFn, SetMemoryFn};
use crate::plugins::smccc::{Conduit, SmcccRes};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Width of one AArch64 instruction in bytes.
pub const AARCH64_INSN_SIZE: usize = 4;

/// Round `len` up to a whole number of pages.
#[inline]
pub const fn page_align(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & PAGE_MASK
}

/// Kernel memory services.
pub trait MemoryOps {
    /// Allocate virtually contiguous pages suitable for permission changes.
    fn vmalloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Free memory returned by [`MemoryOps::vmalloc`].
    ///
    /// # Safety
    /// `ptr` must come from `vmalloc` and must not be used afterwards.
    unsafe fn vfree(&self, ptr: NonNull<u8>);

    /// General purpose heap allocation.
    fn kmalloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Free a heap allocation.
    ///
    /// # Safety
    /// `ptr` is handed to the kernel allocator as-is.
    unsafe fn kfree(&self, ptr: *mut u8);

    /// Linear-map virtual address to physical address.
    fn virt_to_phys(&self, vaddr: usize) -> u64;

    /// Physical address to linear-map virtual address.
    fn phys_to_virt(&self, paddr: u64) -> usize;

    /// Whether `paddr` is system RAM (as opposed to device memory).
    fn is_ram(&self, paddr: u64) -> bool;

    /// Map the RAM page containing `paddr`; returns the page base.
    ///
    /// # Safety
    /// `paddr` must be RAM. The mapping must be released with `kunmap`.
    unsafe fn kmap(&self, paddr: u64) -> Option<NonNull<u8>>;

    /// # Safety
    /// `page` must come from `kmap`.
    unsafe fn kunmap(&self, page: NonNull<u8>);

    /// Map `len` bytes of device memory at `paddr`.
    ///
    /// # Safety
    /// Accesses through the mapping have device side effects.
    unsafe fn ioremap(&self, paddr: u64, len: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `io` must come from `ioremap`.
    unsafe fn iounmap(&self, io: NonNull<u8>);
}

/// Kernel symbol table and instrumentation services.
pub trait SymbolOps {
    /// Virtual address the kernel image is loaded at.
    fn kimage_vaddr(&self) -> usize;

    /// `sprint_symbol`: `name+0xoff/0xsize` of the symbol covering `addr`,
    /// or the bare hex address when nothing covers it.
    fn sprint_symbol(&self, addr: usize) -> Option<String>;

    /// Whether the kprobe subsystem is built into the running kernel.
    fn kprobes_available(&self) -> bool;

    /// Register a kprobe on `symbol`, read back its address and unregister
    /// it again. Returns a negative errno on failure.
    fn kprobe_symbol_addr(&self, symbol: &str) -> Result<usize, i32>;

    /// Call a discovered `kallsyms_lookup_name`.
    ///
    /// # Safety
    /// `f` must really be `kallsyms_lookup_name`.
    unsafe fn call_lookup_name(&self, f: KernelFn<LookupNameFn>, name: &CStr) -> usize {
        unsafe { (f.get())(name.as_ptr()) }
    }
}

/// Processor services.
pub trait CpuOps {
    /// Number of online CPUs; CPU ids are `0..num_cpus()`.
    fn num_cpus(&self) -> u32;

    /// Run `func(cpu)` on every CPU in `mask` and wait for all of them
    /// (`on_each_cpu_mask(.., wait = true)`).
    fn on_each_cpu_mask(&self, mask: CpuMask, func: &(dyn Fn(u32) + Sync));

    /// Load `regs`, branch to `code`, store the registers back.
    ///
    /// # Safety
    /// `code` must be executable and end in a return.
    unsafe fn exec_code(&self, code: usize, regs: &mut Arm64Regs) {
        unsafe { crate::exec::trampoline::exec_code(code, regs) }
    }

    /// Call a resolved `set_memory_x` / `set_memory_nx`.
    ///
    /// # Safety
    /// `addr` must be a page-aligned vmalloc address spanning `numpages`.
    unsafe fn call_set_memory(&self, f: KernelFn<SetMemoryFn>, addr: usize, numpages: i32) -> i32 {
        unsafe { (f.get())(addr, numpages) }
    }

    /// Make freshly written instructions visible to instruction fetch.
    fn flush_icache_range(&self, start: usize, end: usize) {
        crate::cache::flush_icache_range(start, end);
    }
}

/// Firmware (SMCCC) services.
pub trait FirmwareOps {
    /// Issue an SMCCC v1.1 call through `conduit`.
    fn smccc(&self, conduit: Conduit, args: [u64; 8]) -> SmcccRes {
        crate::plugins::smccc::arm_smccc_1_1(conduit, args)
    }
}

/// Opaque `struct path *` handed out by [`MountOps::kern_path`].
#[derive(Debug)]
pub struct KernelPath(NonNull<c_void>);

impl KernelPath {
    /// # Safety
    /// `ptr` must be a `struct path` owned by the caller until `path_put`.
    pub unsafe fn from_raw(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Filesystem path services used by the automount helper.
pub trait MountOps {
    /// Look up `pathname`; negative errno on failure.
    fn kern_path(&self, pathname: &CStr) -> Result<KernelPath, i32>;

    /// Drop a reference obtained from `kern_path`.
    fn path_put(&self, path: KernelPath);

    /// Call a resolved `path_mount(dev, path, fstype, 0, NULL)`.
    ///
    /// # Safety
    /// `f` must really be `path_mount`.
    unsafe fn call_path_mount(
        &self,
        f: KernelFn<PathMountFn>,
        dev: &CStr,
        path: &KernelPath,
        fstype: &CStr,
    ) -> i32 {
        unsafe {
            (f.get())(
                dev.as_ptr(),
                path.as_ptr(),
                fstype.as_ptr(),
                0,
                core::ptr::null_mut(),
            )
        }
    }
}

/// Everything the toolkit needs from its host kernel.
pub trait Kernel: MemoryOps + SymbolOps + CpuOps + FirmwareOps + MountOps + Send + Sync {}

impl<T> Kernel for T where
    T: MemoryOps + SymbolOps + CpuOps + FirmwareOps + MountOps + Send + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(1), PAGE_SIZE);
        assert_eq!(page_align(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align(PAGE_SIZE + AARCH64_INSN_SIZE), 2 * PAGE_SIZE);
    }
}
