//! Register-loading trampoline used to enter injected code.
//!
//! `exec_code(code, regs)` saves the callee-saved registers (and x18, which
//! the kernel may use as the shadow call stack pointer), loads `x0..x28` from
//! `regs`, branches to `code` with a link register pointing back into the
//! trampoline, then stores `x0..x28` into `regs` and restores everything it
//! saved. Injected code may clobber any of `x0..x30` but must preserve `sp`.

use super::regs::Arm64Regs;

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    ".section .text.axart_exec_code, \"ax\"",
    ".global axart_exec_code",
    ".type axart_exec_code, %function",
    "axart_exec_code:",
    "stp x29, x30, [sp, #-16]!",
    "mov x29, sp",
    "stp x27, x28, [sp, #-16]!",
    "stp x25, x26, [sp, #-16]!",
    "stp x23, x24, [sp, #-16]!",
    "stp x21, x22, [sp, #-16]!",
    "stp x19, x20, [sp, #-16]!",
    "stp x18, xzr, [sp, #-16]!",
    // [sp] = code address, [sp, #8] = regs pointer
    "stp x0, x1, [sp, #-16]!",
    "mov x30, x1",
    "ldp x0, x1, [x30, #0]",
    "ldp x2, x3, [x30, #16]",
    "ldp x4, x5, [x30, #32]",
    "ldp x6, x7, [x30, #48]",
    "ldp x8, x9, [x30, #64]",
    "ldp x10, x11, [x30, #80]",
    "ldp x12, x13, [x30, #96]",
    "ldp x14, x15, [x30, #112]",
    "ldp x16, x17, [x30, #128]",
    "ldp x18, x19, [x30, #144]",
    "ldp x20, x21, [x30, #160]",
    "ldp x22, x23, [x30, #176]",
    "ldp x24, x25, [x30, #192]",
    "ldp x26, x27, [x30, #208]",
    "ldr x28, [x30, #224]",
    "ldr x30, [sp]",
    "blr x30",
    "ldr x30, [sp, #8]",
    "stp x0, x1, [x30, #0]",
    "stp x2, x3, [x30, #16]",
    "stp x4, x5, [x30, #32]",
    "stp x6, x7, [x30, #48]",
    "stp x8, x9, [x30, #64]",
    "stp x10, x11, [x30, #80]",
    "stp x12, x13, [x30, #96]",
    "stp x14, x15, [x30, #112]",
    "stp x16, x17, [x30, #128]",
    "stp x18, x19, [x30, #144]",
    "stp x20, x21, [x30, #160]",
    "stp x22, x23, [x30, #176]",
    "stp x24, x25, [x30, #192]",
    "stp x26, x27, [x30, #208]",
    "str x28, [x30, #224]",
    "add sp, sp, #16",
    "ldp x18, xzr, [sp], #16",
    "ldp x19, x20, [sp], #16",
    "ldp x21, x22, [sp], #16",
    "ldp x23, x24, [sp], #16",
    "ldp x25, x26, [sp], #16",
    "ldp x27, x28, [sp], #16",
    "ldp x29, x30, [sp], #16",
    "ret",
    ".size axart_exec_code, . - axart_exec_code",
    ".text",
);

#[cfg(target_arch = "aarch64")]
unsafe extern "C" {
    fn axart_exec_code(code: usize, regs: *mut Arm64Regs);
}

/// Run the code at `code` with register state `regs` on the current CPU.
///
/// # Safety
/// `code` must point to executable instructions that return to the caller.
#[cfg(target_arch = "aarch64")]
pub unsafe fn exec_code(code: usize, regs: &mut Arm64Regs) {
    unsafe { axart_exec_code(code, regs as *mut Arm64Regs) }
}

/// # Safety
/// Never runs anything; unsafe only to match the AArch64 signature.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn exec_code(code: usize, _regs: &mut Arm64Regs) {
    log::warn!("exec_code: not implemented for this architecture (code={:#x})", code);
}
