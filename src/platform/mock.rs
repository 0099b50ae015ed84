//! Mock kernel for user-space testing.
//!
//! [`MockKernel`] implements every platform trait on the host:
//!
//! - a symbol table laid out from a fake kernel image base, served through
//!   `sprint_symbol`, kprobes and a fake `kallsyms_lookup_name`;
//! - real heap-backed `vmalloc`/`kmalloc` with live allocation tracking;
//! - a few pages of "RAM" and one page of "MMIO" at fixed physical
//!   addresses;
//! - CPUs that interpret a small AArch64 subset straight out of the
//!   allocated regions, refusing to fetch from memory that was not made
//!   executable through the resolved `set_memory_x`;
//! - per-CPU system registers, SMCCC firmware and a mount table.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::ffi::{CStr, c_void};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::{
    CpuOps, FirmwareOps, KernelPath, MemoryOps, MountOps, PAGE_MASK, PAGE_SIZE, SymbolOps,
};
use crate::cpumask::CpuMask;
use crate::exec::{AARCH64_RET, Arm64Regs, NUM_REGS};
use crate::kfn::{KernelFn, LookupNameFn, PathMountFn, SetMemoryFn};
use crate::plugins::msr::SysReg;
use crate::plugins::smccc::{Conduit, SMCCC_RET_NOT_SUPPORTED, SmcccRes};

/// Load address of the fake kernel image.
pub const KIMAGE_VADDR: usize = 0xffff_ffc0_0801_0000;

/// Physical base of the fake RAM.
pub const RAM_PHYS_BASE: u64 = 0x4000_0000;
/// Size of the fake RAM.
pub const RAM_SIZE: usize = 4 * PAGE_SIZE;

/// Physical base of the fake device page.
pub const MMIO_PHYS_BASE: u64 = 0x0900_0000;
/// Size of the fake device region.
pub const MMIO_SIZE: usize = PAGE_SIZE;

/// Reset value of `SCTLR_EL1` on every mock CPU.
pub const SCTLR_EL1_RESET: u64 = 0x0200_0000_34f4_d91d;

/// `SMCCC_VERSION` function id and the version the mock firmware reports.
pub const SMCCC_VERSION: u64 = 0x8000_0000;
pub const SMCCC_VERSION_1_2: u64 = 0x10002;

const ENOENT: i32 = 2;
const EBUSY: i32 = 16;
const EINVAL: i32 = 22;
const ENOSYS: i32 = 38;

/// Upper bound on interpreted instructions per call.
const MAX_STEPS: usize = 1 << 20;

/// Symbols of the default image: `(name, offset from image base, size)`.
///
/// `kallsyms_lookup_names` sits right before the real function so a plain
/// prefix compare would stop on it.
pub const DEFAULT_SYMBOLS: &[(&str, usize, usize)] = &[
    ("_text", 0x0, 0x4_0000),
    ("kallsyms_lookup_names", 0x4_0000, 0x200),
    ("kallsyms_lookup_name", 0x4_0200, 0x124),
    ("set_memory_x", 0x4_1000, 0x80),
    ("set_memory_nx", 0x4_1080, 0x80),
    ("path_mount", 0x4_2000, 0x400),
    ("__sys_setuid", 0x4_3000, 0x200),
];

#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    addr: usize,
    size: usize,
}

#[derive(Debug, Clone, Copy)]
struct Vmalloc {
    size: usize,
    executable: bool,
}

/// One `exec_code` call seen by the mock CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub cpu: u32,
    pub code: usize,
    /// Whether the code ran to its `RET`.
    pub completed: bool,
}

/// One mount performed through `path_mount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub dev: String,
    pub path: String,
    pub fstype: String,
}

struct MockState {
    num_cpus: u32,
    kprobes: bool,
    kprobe_blacklist: Vec<String>,
    symbols: Vec<Symbol>,
    vmallocs: BTreeMap<usize, Vmalloc>,
    kmallocs: BTreeMap<usize, usize>,
    fail_vmalloc: bool,
    set_memory_x_result: i32,
    largest_vmalloc: usize,
    invalid_frees: usize,
    io_maps: usize,
    kmaps: usize,
    sysregs: Vec<BTreeMap<u16, u64>>,
    executions: Vec<Execution>,
    faults: usize,
    lookup_calls: usize,
    smccc_calls: Vec<(Conduit, [u64; 8])>,
    paths: Vec<String>,
    live_paths: usize,
    mounts: Vec<Mount>,
}

/// Host-side kernel used by the tests.
pub struct MockKernel {
    state: Mutex<MockState>,
    current_cpu: AtomicU32,
    ram: usize,
    mmio: usize,
}

fn region_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, PAGE_SIZE).ok()
}

fn heap_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), 16).ok()
}

fn sysreg_key(reg: SysReg) -> u16 {
    reg.encode(0).map_or(0, |insn| ((insn >> 5) & 0x7fff) as u16)
}

fn default_sysregs() -> BTreeMap<u16, u64> {
    let mut regs = BTreeMap::new();
    regs.insert(sysreg_key(SysReg::SCTLR_EL1), SCTLR_EL1_RESET);
    regs
}

impl MockKernel {
    /// Four CPUs, kprobes available and [`DEFAULT_SYMBOLS`].
    pub fn new() -> Self {
        let alloc_page_aligned = |size| {
            region_layout(size)
                // SAFETY: non-zero size.
                .map(|layout| unsafe { alloc_zeroed(layout) } as usize)
                .unwrap_or(0)
        };
        let num_cpus = 4;
        Self {
            state: Mutex::new(MockState {
                num_cpus,
                kprobes: true,
                kprobe_blacklist: Vec::new(),
                symbols: DEFAULT_SYMBOLS
                    .iter()
                    .map(|&(name, offset, size)| Symbol {
                        name: name.to_string(),
                        addr: KIMAGE_VADDR + offset,
                        size,
                    })
                    .collect(),
                vmallocs: BTreeMap::new(),
                kmallocs: BTreeMap::new(),
                fail_vmalloc: false,
                set_memory_x_result: 0,
                largest_vmalloc: 0,
                invalid_frees: 0,
                io_maps: 0,
                kmaps: 0,
                sysregs: vec![default_sysregs(); num_cpus as usize],
                executions: Vec::new(),
                faults: 0,
                lookup_calls: 0,
                smccc_calls: Vec::new(),
                paths: vec![String::from("/sys/kernel/debug")],
                live_paths: 0,
                mounts: Vec::new(),
            }),
            current_cpu: AtomicU32::new(0),
            ram: alloc_page_aligned(RAM_SIZE),
            mmio: alloc_page_aligned(MMIO_SIZE),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_cpus(mut self, num_cpus: u32) -> Self {
        let state = self.state.get_mut();
        state.num_cpus = num_cpus;
        state.sysregs = vec![default_sysregs(); num_cpus as usize];
        self
    }

    pub fn without_kprobes(mut self) -> Self {
        self.state.get_mut().kprobes = false;
        self
    }

    /// `name` refuses kprobes, like a `NOKPROBE_SYMBOL` function.
    pub fn with_kprobe_blacklisted(mut self, name: &str) -> Self {
        self.state.get_mut().kprobe_blacklist.push(name.to_string());
        self
    }

    pub fn with_symbol(mut self, name: &str, offset: usize, size: usize) -> Self {
        self.state.get_mut().symbols.push(Symbol {
            name: name.to_string(),
            addr: KIMAGE_VADDR + offset,
            size,
        });
        self
    }

    pub fn without_symbol(mut self, name: &str) -> Self {
        self.state.get_mut().symbols.retain(|s| s.name != name);
        self
    }

    /// Something is already mounted at `path`.
    pub fn with_mounted(mut self, path: &str) -> Self {
        self.state.get_mut().mounts.push(Mount {
            dev: String::from("none"),
            path: path.to_string(),
            fstype: String::from("debugfs"),
        });
        self
    }

    /// `path` does not exist.
    pub fn without_path(mut self, path: &str) -> Self {
        self.state.get_mut().paths.retain(|p| p != path);
        self
    }

    // =========================================================================
    // Runtime knobs and inspection
    // =========================================================================

    pub fn set_fail_vmalloc(&self, fail: bool) {
        self.state.lock().fail_vmalloc = fail;
    }

    /// Return value of every later `set_memory_x` call.
    pub fn set_set_memory_x_result(&self, ret: i32) {
        self.state.lock().set_memory_x_result = ret;
    }

    /// Address of symbol `name` in the fake image.
    pub fn symbol_addr(&self, name: &str) -> Option<usize> {
        self.state
            .lock()
            .symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.addr)
    }

    pub fn sysreg(&self, cpu: u32, reg: SysReg) -> u64 {
        self.state
            .lock()
            .sysregs
            .get(cpu as usize)
            .and_then(|regs| regs.get(&sysreg_key(reg)).copied())
            .unwrap_or(0)
    }

    pub fn set_sysreg(&self, cpu: u32, reg: SysReg, value: u64) {
        if let Some(regs) = self.state.lock().sysregs.get_mut(cpu as usize) {
            regs.insert(sysreg_key(reg), value);
        }
    }

    /// Regions currently allocated with `vmalloc`.
    pub fn live_vmallocs(&self) -> usize {
        self.state.lock().vmallocs.len()
    }

    /// Largest `vmalloc` size requested so far.
    pub fn largest_vmalloc(&self) -> usize {
        self.state.lock().largest_vmalloc
    }

    /// Regions that are currently executable.
    pub fn executable_regions(&self) -> usize {
        self.state
            .lock()
            .vmallocs
            .values()
            .filter(|v| v.executable)
            .count()
    }

    pub fn live_kmallocs(&self) -> usize {
        self.state.lock().kmallocs.len()
    }

    /// `kfree` calls on addresses that were not live allocations.
    pub fn invalid_frees(&self) -> usize {
        self.state.lock().invalid_frees
    }

    /// Outstanding `kmap` plus `ioremap` mappings.
    pub fn live_mappings(&self) -> usize {
        let state = self.state.lock();
        state.kmaps + state.io_maps
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.state.lock().executions.clone()
    }

    /// Fetches from non-executable memory, undefined instructions and
    /// runaway code.
    pub fn faults(&self) -> usize {
        self.state.lock().faults
    }

    /// Calls into the fake `kallsyms_lookup_name`.
    pub fn lookup_calls(&self) -> usize {
        self.state.lock().lookup_calls
    }

    pub fn smccc_calls(&self) -> Vec<(Conduit, [u64; 8])> {
        self.state.lock().smccc_calls.clone()
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.state.lock().mounts.clone()
    }

    /// `kern_path` references not yet released.
    pub fn live_paths(&self) -> usize {
        self.state.lock().live_paths
    }

    fn linear_offset(&self) -> usize {
        self.ram.wrapping_sub(RAM_PHYS_BASE as usize)
    }

    fn symbol_named(state: &MockState, name: &str) -> Option<usize> {
        state.symbols.iter().find(|s| s.name == name).map(|s| s.addr)
    }

    // =========================================================================
    // Interpreter
    // =========================================================================

    /// Whether `[addr, addr + len)` lies in one region, and its permission.
    fn region_of(state: &MockState, addr: usize, len: usize) -> Option<Vmalloc> {
        let (&base, region) = state.vmallocs.range(..=addr).next_back()?;
        addr.checked_add(len)
            .is_some_and(|end| end <= base + region.size)
            .then_some(*region)
    }

    fn run(&self, state: &mut MockState, cpu: u32, code: usize, regs: &mut Arm64Regs) -> bool {
        let mut x = [0u64; 32];
        x[..NUM_REGS].copy_from_slice(&regs.x);
        let read = |x: &[u64; 32], r: u32| if r == 31 { 0 } else { x[r as usize] };

        let mut pc = code;
        for _ in 0..MAX_STEPS {
            match Self::region_of(state, pc, 4) {
                Some(region) if region.executable => {}
                _ => {
                    warn!("mock: cpu {} instruction fetch fault at {:#x}", cpu, pc);
                    return false;
                }
            }
            // SAFETY: `pc` lies inside a live vmalloc region.
            let insn = unsafe { (pc as *const u32).read_unaligned() };
            let rd = (insn & 0x1f) as usize;
            let write = |x: &mut [u64; 32], value: u64| {
                if rd != 31 {
                    x[rd] = value;
                }
            };

            if insn == AARCH64_RET {
                regs.x.copy_from_slice(&x[..NUM_REGS]);
                return true;
            } else if insn == 0xd503_201f {
                // NOP
            } else if insn & 0xff80_0000 == 0xd280_0000 {
                // MOVZ (64-bit)
                let shift = ((insn >> 21) & 0x3) * 16;
                write(&mut x, (((insn >> 5) & 0xffff) as u64) << shift);
            } else if insn & 0xff80_0000 == 0x5280_0000 {
                // MOVZ (32-bit)
                let shift = ((insn >> 21) & 0x1) * 16;
                write(&mut x, ((((insn >> 5) & 0xffff) as u32) << shift) as u64);
            } else if insn & 0xff80_0000 == 0xf280_0000 {
                // MOVK (64-bit)
                let shift = ((insn >> 21) & 0x3) * 16;
                let imm = ((insn >> 5) & 0xffff) as u64;
                let old = read(&x, rd as u32);
                write(&mut x, (old & !(0xffff << shift)) | (imm << shift));
            } else if insn & 0xffe0_ffe0 == 0xaa00_03e0 {
                // MOV (ORR Xd, XZR, Xm)
                let value = read(&x, (insn >> 16) & 0x1f);
                write(&mut x, value);
            } else if insn & 0xff80_0000 == 0x9100_0000 {
                // ADD (immediate, 64-bit)
                let imm = ((insn >> 10) & 0xfff) as u64;
                let imm = if insn & (1 << 22) != 0 { imm << 12 } else { imm };
                let value = read(&x, (insn >> 5) & 0x1f).wrapping_add(imm);
                write(&mut x, value);
            } else if insn & 0xff00_0000 == 0x5800_0000 {
                // LDR (literal, 64-bit)
                let imm19 = ((insn >> 5) & 0x7_ffff) as i32;
                let offset = ((imm19 << 13) >> 13) as isize * 4;
                let addr = pc.wrapping_add_signed(offset);
                if Self::region_of(state, addr, 8).is_none() {
                    warn!("mock: cpu {} data abort at {:#x}", cpu, addr);
                    return false;
                }
                // SAFETY: `addr..addr + 8` lies inside a live vmalloc region.
                let value = unsafe { (addr as *const u64).read_unaligned() };
                write(&mut x, value);
            } else if insn & 0xfff0_0000 == 0xd530_0000 {
                // MRS Xt, <sysreg>
                let key = ((insn >> 5) & 0x7fff) as u16;
                let value = state.sysregs[cpu as usize].get(&key).copied().unwrap_or(0);
                write(&mut x, value);
            } else if insn & 0xfff0_0000 == 0xd510_0000 {
                // MSR <sysreg>, Xt
                let key = ((insn >> 5) & 0x7fff) as u16;
                let value = read(&x, rd as u32);
                state.sysregs[cpu as usize].insert(key, value);
            } else {
                warn!("mock: cpu {} undefined instruction {:#010x} at {:#x}", cpu, insn, pc);
                return false;
            }
            pc += 4;
        }
        warn!("mock: cpu {} did not return from {:#x}", cpu, code);
        false
    }
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockKernel {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (&addr, region) in &state.vmallocs {
            if let Some(layout) = region_layout(region.size) {
                unsafe { dealloc(addr as *mut u8, layout) };
            }
        }
        for (&addr, &size) in &state.kmallocs {
            if let Some(layout) = heap_layout(size) {
                unsafe { dealloc(addr as *mut u8, layout) };
            }
        }
        for (ptr, size) in [(self.ram, RAM_SIZE), (self.mmio, MMIO_SIZE)] {
            if ptr == 0 {
                continue;
            }
            if let Some(layout) = region_layout(size) {
                unsafe { dealloc(ptr as *mut u8, layout) };
            }
        }
    }
}

// =============================================================================
// Platform trait implementations
// =============================================================================

impl MemoryOps for MockKernel {
    fn vmalloc(&self, size: usize) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.fail_vmalloc || size == 0 {
            return None;
        }
        let layout = region_layout(size)?;
        // SAFETY: non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        state.vmallocs.insert(
            ptr.as_ptr() as usize,
            Vmalloc {
                size,
                executable: false,
            },
        );
        state.largest_vmalloc = state.largest_vmalloc.max(size);
        Some(ptr)
    }

    unsafe fn vfree(&self, ptr: NonNull<u8>) {
        let mut state = self.state.lock();
        if let Some(region) = state.vmallocs.remove(&(ptr.as_ptr() as usize)) {
            if let Some(layout) = region_layout(region.size) {
                unsafe { dealloc(ptr.as_ptr(), layout) };
            }
        }
    }

    fn kmalloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > 4 * 1024 * 1024 {
            return None;
        }
        let layout = heap_layout(size)?;
        // SAFETY: non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        self.state.lock().kmallocs.insert(ptr.as_ptr() as usize, size);
        Some(ptr)
    }

    unsafe fn kfree(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut state = self.state.lock();
        match state.kmallocs.remove(&(ptr as usize)) {
            Some(size) => {
                if let Some(layout) = heap_layout(size) {
                    unsafe { dealloc(ptr, layout) };
                }
            }
            None => {
                warn!("mock: kfree of unknown object {:p}", ptr);
                state.invalid_frees += 1;
            }
        }
    }

    fn virt_to_phys(&self, vaddr: usize) -> u64 {
        vaddr.wrapping_sub(self.linear_offset()) as u64
    }

    fn phys_to_virt(&self, paddr: u64) -> usize {
        (paddr as usize).wrapping_add(self.linear_offset())
    }

    fn is_ram(&self, paddr: u64) -> bool {
        (RAM_PHYS_BASE..RAM_PHYS_BASE + RAM_SIZE as u64).contains(&paddr)
    }

    unsafe fn kmap(&self, paddr: u64) -> Option<NonNull<u8>> {
        if self.ram == 0 || !self.is_ram(paddr) {
            return None;
        }
        let page = ((paddr - RAM_PHYS_BASE) as usize) & PAGE_MASK;
        self.state.lock().kmaps += 1;
        NonNull::new((self.ram + page) as *mut u8)
    }

    unsafe fn kunmap(&self, _page: NonNull<u8>) {
        let mut state = self.state.lock();
        state.kmaps = state.kmaps.saturating_sub(1);
    }

    unsafe fn ioremap(&self, paddr: u64, len: usize) -> Option<NonNull<u8>> {
        let end = paddr.checked_add(len as u64)?;
        if self.mmio == 0 || paddr < MMIO_PHYS_BASE || end > MMIO_PHYS_BASE + MMIO_SIZE as u64 {
            return None;
        }
        self.state.lock().io_maps += 1;
        NonNull::new((self.mmio + (paddr - MMIO_PHYS_BASE) as usize) as *mut u8)
    }

    unsafe fn iounmap(&self, _io: NonNull<u8>) {
        let mut state = self.state.lock();
        state.io_maps = state.io_maps.saturating_sub(1);
    }
}

impl SymbolOps for MockKernel {
    fn kimage_vaddr(&self) -> usize {
        KIMAGE_VADDR
    }

    fn sprint_symbol(&self, addr: usize) -> Option<String> {
        let state = self.state.lock();
        let text = state
            .symbols
            .iter()
            .find(|s| (s.addr..s.addr + s.size).contains(&addr))
            .map(|s| format!("{}+{:#x}/{:#x}", s.name, addr - s.addr, s.size))
            .unwrap_or_else(|| format!("{:#x}", addr));
        Some(text)
    }

    fn kprobes_available(&self) -> bool {
        self.state.lock().kprobes
    }

    fn kprobe_symbol_addr(&self, symbol: &str) -> Result<usize, i32> {
        let state = self.state.lock();
        if !state.kprobes {
            return Err(-ENOSYS);
        }
        if state.kprobe_blacklist.iter().any(|s| s == symbol) {
            return Err(-EINVAL);
        }
        Self::symbol_named(&state, symbol).ok_or(-ENOENT)
    }

    unsafe fn call_lookup_name(&self, f: KernelFn<LookupNameFn>, name: &CStr) -> usize {
        let mut state = self.state.lock();
        if Some(f.addr()) != Self::symbol_named(&state, "kallsyms_lookup_name") {
            warn!("mock: call through bogus kallsyms_lookup_name {:?}", f);
            state.faults += 1;
            return 0;
        }
        state.lookup_calls += 1;
        match name.to_str() {
            Ok(name) => Self::symbol_named(&state, name).unwrap_or(0),
            Err(_) => 0,
        }
    }
}

impl CpuOps for MockKernel {
    fn num_cpus(&self) -> u32 {
        self.state.lock().num_cpus
    }

    fn on_each_cpu_mask(&self, mask: CpuMask, func: &(dyn Fn(u32) + Sync)) {
        let num_cpus = self.num_cpus();
        for cpu in mask.iter().filter(|&cpu| cpu < num_cpus) {
            self.current_cpu.store(cpu, Ordering::SeqCst);
            func(cpu);
        }
        self.current_cpu.store(0, Ordering::SeqCst);
    }

    unsafe fn exec_code(&self, code: usize, regs: &mut Arm64Regs) {
        let cpu = self.current_cpu.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let completed = self.run(&mut state, cpu, code, regs);
        if !completed {
            state.faults += 1;
        }
        state.executions.push(Execution {
            cpu,
            code,
            completed,
        });
    }

    unsafe fn call_set_memory(&self, f: KernelFn<SetMemoryFn>, addr: usize, numpages: i32) -> i32 {
        let mut state = self.state.lock();
        let executable = if Some(f.addr()) == Self::symbol_named(&state, "set_memory_x") {
            true
        } else if Some(f.addr()) == Self::symbol_named(&state, "set_memory_nx") {
            false
        } else {
            state.faults += 1;
            return -EINVAL;
        };
        if executable && state.set_memory_x_result != 0 {
            return state.set_memory_x_result;
        }
        match state.vmallocs.get_mut(&addr) {
            Some(region) if numpages >= 0 && region.size == numpages as usize * PAGE_SIZE => {
                region.executable = executable;
                0
            }
            _ => -EINVAL,
        }
    }

    fn flush_icache_range(&self, _start: usize, _end: usize) {}
}

impl FirmwareOps for MockKernel {
    fn smccc(&self, conduit: Conduit, args: [u64; 8]) -> SmcccRes {
        self.state.lock().smccc_calls.push((conduit, args));
        if args[0] == SMCCC_VERSION {
            SmcccRes {
                a0: SMCCC_VERSION_1_2,
                a1: args[1],
                a2: args[2],
                a3: args[3],
            }
        } else {
            SmcccRes {
                a0: SMCCC_RET_NOT_SUPPORTED,
                ..SmcccRes::default()
            }
        }
    }
}

impl MountOps for MockKernel {
    fn kern_path(&self, pathname: &CStr) -> Result<KernelPath, i32> {
        let mut state = self.state.lock();
        let name = pathname.to_str().map_err(|_| -EINVAL)?;
        let idx = state.paths.iter().position(|p| p == name).ok_or(-ENOENT)?;
        let ptr = NonNull::new((idx + 1) as *mut c_void).ok_or(-EINVAL)?;
        state.live_paths += 1;
        // SAFETY: the handle is only interpreted by this mock.
        Ok(unsafe { KernelPath::from_raw(ptr) })
    }

    fn path_put(&self, _path: KernelPath) {
        let mut state = self.state.lock();
        state.live_paths = state.live_paths.saturating_sub(1);
    }

    unsafe fn call_path_mount(
        &self,
        f: KernelFn<PathMountFn>,
        dev: &CStr,
        path: &KernelPath,
        fstype: &CStr,
    ) -> i32 {
        let mut state = self.state.lock();
        if Some(f.addr()) != Self::symbol_named(&state, "path_mount") {
            state.faults += 1;
            return -EINVAL;
        }
        let Some(target) = state.paths.get((path.as_ptr() as usize) - 1).cloned() else {
            return -EINVAL;
        };
        if state.mounts.iter().any(|m| m.path == target) {
            return -EBUSY;
        }
        state.mounts.push(Mount {
            dev: dev.to_string_lossy().into_owned(),
            path: target,
            fstype: fstype.to_string_lossy().into_owned(),
        });
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprint_symbol_format() {
        let mock = MockKernel::new();
        let base = mock.symbol_addr("kallsyms_lookup_name").unwrap();
        assert_eq!(
            mock.sprint_symbol(base + 8).unwrap(),
            "kallsyms_lookup_name+0x8/0x124"
        );
        assert_eq!(mock.sprint_symbol(0x1000).unwrap(), "0x1000");
    }

    #[test]
    fn test_linear_map_round_trip() {
        let mock = MockKernel::new();
        let va = mock.phys_to_virt(RAM_PHYS_BASE + 0x10);
        assert_eq!(mock.virt_to_phys(va), RAM_PHYS_BASE + 0x10);
    }

    #[test]
    fn test_kfree_unknown_counts_invalid_free() {
        let mock = MockKernel::new();
        let ptr = mock.kmalloc(32).unwrap();
        unsafe {
            mock.kfree(ptr.as_ptr());
            mock.kfree(ptr.as_ptr());
        }
        assert_eq!(mock.live_kmallocs(), 0);
        assert_eq!(mock.invalid_frees(), 1);
    }
}
