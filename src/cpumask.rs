//! Processor set bitmask.

use core::fmt;

/// Maximum number of CPUs a [`CpuMask`] can describe.
pub const MAX_CPUS: u32 = 64;

/// A set of logical CPUs: bit `i` selects CPU `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Mask selecting only CPU 0 (the default target of every plugin).
    pub const CPU0: Self = Self(1);

    /// Empty mask.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a mask from raw bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Mask selecting a single CPU.
    pub const fn single(cpu: u32) -> Self {
        if cpu >= MAX_CPUS {
            Self(0)
        } else {
            Self(1 << cpu)
        }
    }

    /// Mask selecting CPUs `0..n`.
    pub const fn first(n: u32) -> Self {
        if n >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    /// Raw bits.
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Number of selected CPUs.
    pub const fn weight(&self) -> u32 {
        self.0.count_ones()
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, cpu: u32) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    /// Whether every selected CPU is below `nr_cpus`.
    pub const fn is_subset_of_first(&self, nr_cpus: u32) -> bool {
        self.0 & !Self::first(nr_cpus).0 == 0
    }

    /// The only selected CPU, if exactly one is selected.
    pub fn only(&self) -> Option<u32> {
        (self.weight() == 1).then(|| self.0.trailing_zeros())
    }

    /// Selected CPUs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        let bits = self.0;
        (0..MAX_CPUS).filter(move |&cpu| bits & (1 << cpu) != 0)
    }
}

impl From<u64> for CpuMask {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_weight_and_only() {
        assert_eq!(CpuMask::CPU0.only(), Some(0));
        assert_eq!(CpuMask::single(5).only(), Some(5));
        assert_eq!(CpuMask::from_bits(0x3).weight(), 2);
        assert_eq!(CpuMask::from_bits(0x3).only(), None);
        assert_eq!(CpuMask::empty().only(), None);
    }

    #[test]
    fn test_iter_ascending() {
        let cpus: Vec<u32> = CpuMask::from_bits(0b1010_0101).iter().collect();
        assert_eq!(cpus, [0, 2, 5, 7]);
    }

    #[test]
    fn test_subset_of_first() {
        assert!(CpuMask::from_bits(0xf).is_subset_of_first(4));
        assert!(!CpuMask::from_bits(0x10).is_subset_of_first(4));
        assert!(CpuMask::from_bits(u64::MAX).is_subset_of_first(64));
        assert_eq!(CpuMask::single(64), CpuMask::empty());
    }
}
