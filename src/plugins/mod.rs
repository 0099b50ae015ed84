//! Capability plugins.
//!
//! Each submodule exports a `PLUGIN` descriptor; [`crate::plugin::PluginRegistry::builtin`]
//! collects them. The `kallsyms` plugin lives with the resolver in
//! [`crate::kallsyms`].

pub mod addr;
pub mod asm;
pub mod hvc;
pub mod kmalloc;
pub mod msr;
pub mod pmem;
pub mod smc;
pub mod smccc;
pub mod vmem;
