//! Cache maintenance for freshly written code.
//!
//! The execution engine writes instructions through the data side and then
//! fetches them, so the range has to be cleaned to the Point of Unification
//! and invalidated from the instruction cache before the first branch.

/// Smallest D-cache and I-cache line sizes in bytes, read from `CTR_EL0`.
#[cfg(target_arch = "aarch64")]
fn cache_line_sizes() -> (usize, usize) {
    let ctr: u64;
    unsafe {
        core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
    }
    // DminLine [19:16], IminLine [3:0], both log2 of the number of words.
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);
    (dline, iline)
}

/// Flush instruction cache for the specified address range.
///
/// On AArch64:
/// 1. DC CVAU over the range - clean data cache to PoU
/// 2. DSB ISH
/// 3. IC IVAU over the range - invalidate instruction cache to PoU
/// 4. DSB ISH, ISB
#[cfg(target_arch = "aarch64")]
pub fn flush_icache_range(start: usize, end: usize) {
    let (dline, iline) = cache_line_sizes();

    unsafe {
        for addr in (start & !(dline - 1)..end).step_by(dline) {
            core::arch::asm!("dc cvau, {0}", in(reg) addr, options(nostack, preserves_flags));
        }
        core::arch::asm!("dsb ish", options(nostack, preserves_flags));

        for addr in (start & !(iline - 1)..end).step_by(iline) {
            core::arch::asm!("ic ivau, {0}", in(reg) addr, options(nostack, preserves_flags));
        }
        core::arch::asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }

    log::trace!("flush_icache_range: {:#x} - {:#x}", start, end);
}

#[cfg(target_arch = "x86_64")]
pub fn flush_icache_range(_start: usize, _end: usize) {
    // Coherent I/D caches; a fence orders the preceding stores.
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub fn flush_icache_range(_start: usize, _end: usize) {
    log::warn!("flush_icache_range: not implemented for this architecture");
}
