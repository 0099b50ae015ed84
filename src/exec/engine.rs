use alloc::sync::Arc;

use spin::Mutex;

use super::region::ExecRegion;
use super::{Arm64Regs, Error};
use crate::cpumask::CpuMask;
use crate::kallsyms::SymbolResolver;
use crate::kfn::{KernelFn, SetMemoryFn};
use crate::platform::{AARCH64_INSN_SIZE, Kernel};

/// Runs caller-supplied instructions on a set of CPUs.
///
/// The permission primitives are resolved once when the engine is built.
/// An engine without `set_memory_x` is still constructed, but every
/// [`ExecEngine::execute`] call fails with [`Error::PermissionDenied`].
pub struct ExecEngine {
    kernel: Arc<dyn Kernel>,
    set_memory_x: Option<KernelFn<SetMemoryFn>>,
    set_memory_nx: Option<KernelFn<SetMemoryFn>>,
}

impl ExecEngine {
    pub fn new(kernel: Arc<dyn Kernel>, resolver: &SymbolResolver) -> Self {
        // SAFETY: both symbols have the `SetMemoryFn` signature in every
        // kernel that exports them.
        let set_memory_x = unsafe { resolver.resolve_fn::<SetMemoryFn>("set_memory_x") };
        let set_memory_nx = unsafe { resolver.resolve_fn::<SetMemoryFn>("set_memory_nx") };

        match set_memory_x {
            Some(f) => debug!("exec: set_memory_x at {:#x}", f.addr()),
            None => warn!("exec: set_memory_x not found, code execution disabled"),
        }
        if set_memory_nx.is_none() {
            debug!("exec: set_memory_nx not found, regions are freed without NX restore");
        }

        Self {
            kernel,
            set_memory_x,
            set_memory_nx,
        }
    }

    /// Whether the region permission primitive was resolved.
    pub fn can_execute(&self) -> bool {
        self.set_memory_x.is_some()
    }

    /// Run `code` on every CPU in `cpus` and wait for all of them.
    ///
    /// Each CPU starts from its own copy of `regs`. The snapshot of the CPU
    /// that finishes last is written back to `regs`; callers that need a
    /// deterministic result must target a single CPU. Injected code that
    /// never returns hangs the caller.
    pub fn execute(&self, code: &[u8], regs: &mut Arm64Regs, cpus: CpuMask) -> Result<(), Error> {
        if code.is_empty() {
            return Err(Error::InvalidInput("empty code"));
        }
        if code.len() % AARCH64_INSN_SIZE != 0 {
            return Err(Error::InvalidInput("code length not a multiple of 4"));
        }
        if cpus.is_empty() {
            return Err(Error::InvalidInput("empty cpu mask"));
        }
        let nr_cpus = self.kernel.num_cpus();
        if !cpus.is_subset_of_first(nr_cpus) {
            warn!("exec: cpu mask {} exceeds {} cpus", cpus, nr_cpus);
            return Err(Error::InvalidInput("cpu mask selects a missing cpu"));
        }
        let set_memory_x = self.set_memory_x.ok_or(Error::PermissionDenied)?;

        let kernel: &dyn Kernel = &*self.kernel;
        let mut region = ExecRegion::alloc(kernel, code.len(), self.set_memory_nx)?;
        region.install(code)?;
        let region = region.make_executable(set_memory_x)?;
        let entry = region.entry();

        debug!(
            "exec: running {} bytes at {:#x} on cpus {}",
            code.len(),
            entry,
            cpus
        );

        let input = *regs;
        let output: Mutex<Option<Arm64Regs>> = Mutex::new(None);
        kernel.on_each_cpu_mask(cpus, &|cpu| {
            let mut local = input;
            // SAFETY: `entry` is executable for as long as `region` lives and
            // the installed code ends in `RET`.
            unsafe { kernel.exec_code(entry, &mut local) };
            trace!("exec: cpu {} done, x0={:#x}", cpu, local.x[0]);
            *output.lock() = Some(local);
        });
        drop(region);

        if let Some(out) = output.into_inner() {
            *regs = out;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kallsyms::ResolverConfig;
    use crate::platform::mock::MockKernel;

    fn engine(mock: &Arc<MockKernel>) -> ExecEngine {
        let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
        resolver.discover().unwrap();
        ExecEngine::new(mock.clone(), &resolver)
    }

    #[test]
    fn test_undiscovered_resolver_disables_execution() {
        let mock = Arc::new(MockKernel::new());
        let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
        let engine = ExecEngine::new(mock.clone(), &resolver);
        assert!(!engine.can_execute());
    }

    #[test]
    fn test_region_sized_for_trailing_ret() {
        let mock = Arc::new(MockKernel::new());
        let engine = engine(&mock);
        // A full page of NOPs needs a second page for the RET.
        let code: alloc::vec::Vec<u8> = core::iter::repeat(0xd503_201fu32.to_le_bytes())
            .take(crate::platform::PAGE_SIZE / 4)
            .flatten()
            .collect();
        let mut regs = Arm64Regs::new();
        engine.execute(&code, &mut regs, CpuMask::CPU0).unwrap();
        assert_eq!(mock.largest_vmalloc(), 2 * crate::platform::PAGE_SIZE);
        assert_eq!(mock.faults(), 0);
    }
}
