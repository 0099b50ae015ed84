//! General-purpose register snapshot.

/// Number of captured registers (`x0`..`x28`).
pub const NUM_REGS: usize = 29;

/// Register state loaded before and captured after running injected code.
///
/// The layout is shared with the AArch64 trampoline, which loads `x0..x28`
/// from this structure, branches to the code and stores them back.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arm64Regs {
    pub x: [u64; NUM_REGS],
}

impl Arm64Regs {
    /// All-zero snapshot.
    pub const fn new() -> Self {
        Self { x: [0; NUM_REGS] }
    }

    /// Value of `x<idx>`, or `None` for an index past `x28`.
    pub fn get(&self, idx: usize) -> Option<u64> {
        self.x.get(idx).copied()
    }

    /// Set `x<idx>`. Out-of-range indices are ignored.
    pub fn set(&mut self, idx: usize, value: u64) {
        if let Some(slot) = self.x.get_mut(idx) {
            *slot = value;
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, idx: usize, value: u64) -> Self {
        self.set(idx, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_trampoline() {
        assert_eq!(core::mem::size_of::<Arm64Regs>(), NUM_REGS * 8);
        assert_eq!(core::mem::align_of::<Arm64Regs>(), 8);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut regs = Arm64Regs::new().with(28, 0x42);
        regs.set(29, 1);
        assert_eq!(regs.get(28), Some(0x42));
        assert_eq!(regs.get(29), None);
    }
}
