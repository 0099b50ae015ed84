//! axart: kernel introspection and fault-injection toolkit
//!
//! This crate exposes low-level primitives of a running AArch64 kernel
//! (system registers, physical and virtual memory, hypervisor and
//! secure-monitor calls, heap allocation and raw code execution) as a tree
//! of named attributes, for security research without rebuilding the
//! kernel.
//!
//! # Features
//!
//! - `symbols` - `ksym`-backed kallsyms table for hosts that implement
//!   symbol printing from a kallsyms blob (default)
//! - `test-utils` - [`platform::mock::MockKernel`], a host-side kernel for
//!   tests (default)
//!
//! # Quick Start
//!
//! ```ignore
//! use alloc::sync::Arc;
//! use axart::{Config, Toolkit};
//!
//! // `MyKernel` implements the traits in `axart::platform`.
//! let toolkit = Toolkit::init(Arc::new(MyKernel), Config::default())?;
//!
//! // mov x0, #0x22
//! toolkit.root().write("asm/asm", &[0x40, 0x04, 0x80, 0xd2])?;
//! assert_eq!(toolkit.root().read_to_string("asm/x0")?, "0x0000000000000022\n");
//!
//! toolkit.exit();
//! ```

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

use alloc::sync::Arc;

// =============================================================================
// Platform Abstraction
// =============================================================================

pub mod cache;
pub mod cpumask;
pub mod kfn;
pub mod platform;

// =============================================================================
// Dynamic Execution Subsystem
// =============================================================================

pub mod exec;
pub mod kallsyms;
pub mod plugin;

// =============================================================================
// Attribute Tree and Plugins
// =============================================================================

pub mod debugfs;
pub mod mount;
pub mod plugins;

#[cfg(feature = "symbols")]
pub mod symbols;

// Re-export key types for convenience
pub use cpumask::CpuMask;
pub use debugfs::Node;
pub use exec::{Arm64Regs, Error as ExecError, ExecEngine};
pub use kallsyms::{Error as ResolveError, ResolverConfig, Strategy, SymbolResolver};
pub use kfn::KernelFn;
pub use mount::MountTarget;
pub use platform::Kernel;
pub use plugin::{InitError, PluginContext, PluginDescriptor, PluginRegistry};

// =============================================================================
// Initialization
// =============================================================================

/// Toolkit configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the root directory of the attribute tree.
    pub root_name: &'static str,
    pub resolver: ResolverConfig,
    /// Filesystem mounted after the plugins are up, if any.
    pub automount: Option<MountTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_name: "art",
            resolver: ResolverConfig::default(),
            automount: Some(MountTarget::DEBUGFS),
        }
    }
}

impl Config {
    pub fn with_root_name(mut self, name: &'static str) -> Self {
        self.root_name = name;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_automount(mut self, target: Option<MountTarget>) -> Self {
        self.automount = target;
        self
    }
}

/// A loaded toolkit: the attribute tree plus the state behind it.
pub struct Toolkit {
    root: Arc<Node>,
    registry: PluginRegistry,
    ctx: PluginContext,
}

impl Toolkit {
    /// Load every built-in plugin.
    pub fn init(kernel: Arc<dyn Kernel>, config: Config) -> Result<Self, InitError> {
        Self::with_registry(kernel, config, PluginRegistry::builtin())
    }

    /// Load the plugins of `registry`.
    ///
    /// # Initialization Order
    ///
    /// 1. Root directory
    /// 2. Plugins in registry order (`kallsyms` runs symbol discovery)
    /// 3. With automount configured, `path_mount` resolution; failure
    ///    aborts the load
    /// 4. Automount; failure is only logged
    pub fn with_registry(
        kernel: Arc<dyn Kernel>,
        config: Config,
        registry: PluginRegistry,
    ) -> Result<Self, InitError> {
        info!("Initializing axart...");

        let root = Node::root(config.root_name);
        let resolver = Arc::new(SymbolResolver::new(kernel.clone(), config.resolver));
        let ctx = PluginContext::new(kernel.clone(), resolver.clone());

        registry.initialize_all(&root, &ctx)?;

        // Needs the resolver, which the kallsyms plugin brought up.
        if let Some(target) = config.automount {
            let mounter = mount::Mounter::new(kernel, &resolver)?;
            mounter.mount_or_warn(&target);
        }

        info!("axart initialization complete ({} plugins)", registry.len());
        Ok(Self {
            root,
            registry,
            ctx,
        })
    }

    /// Root of the attribute tree.
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Run plugin finalizers and tear the tree down.
    pub fn exit(self) {
        self.registry.finalize_all(&self.ctx);
        for name in self.root.list() {
            let _ = self.root.remove(&name);
        }
        info!("axart unloaded");
    }
}
