//! Plugin registry.
//!
//! Every capability module exports one [`PluginDescriptor`]. The registry
//! keeps them in a fixed order, creates one directory per plugin under the
//! toolkit root, publishes its help text and runs its initializer.

use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::AxError;
use spin::Once;

use crate::debugfs::{MODE_RO, Node};
use crate::exec::ExecEngine;
use crate::kallsyms::{self, SymbolResolver};
use crate::platform::Kernel;

/// Plugin initialization errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `kallsyms_lookup_name` could not be located.
    Discovery(kallsyms::Error),
    /// A required kernel symbol did not resolve.
    SymbolNotFound(&'static str),
    /// A plugin with this name is already registered.
    AlreadyRegistered(&'static str),
    /// Creating the plugin's files failed.
    Fs(AxError),
    /// Plugin-specific failure code.
    Failed(i32),
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Discovery(err) => write!(f, "Symbol discovery failed: {}", err),
            Self::SymbolNotFound(name) => write!(f, "Symbol not found: {}", name),
            Self::AlreadyRegistered(name) => write!(f, "Plugin already registered: {}", name),
            Self::Fs(err) => write!(f, "Failed to create plugin files: {:?}", err),
            Self::Failed(code) => write!(f, "Plugin init failed: {}", code),
        }
    }
}

impl core::error::Error for InitError {}

impl From<AxError> for InitError {
    fn from(err: AxError) -> Self {
        Self::Fs(err)
    }
}

impl From<kallsyms::Error> for InitError {
    fn from(err: kallsyms::Error) -> Self {
        Self::Discovery(err)
    }
}

/// Plugin initializer: populate `node` using the shared context.
pub type InitFn = fn(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError>;

/// Plugin finalizer.
pub type ExitFn = fn(ctx: &PluginContext);

/// Static description of one capability module.
#[derive(Clone, Copy)]
pub struct PluginDescriptor {
    /// Directory name under the toolkit root.
    pub name: &'static str,
    /// Published as a read-only `help` file when present.
    pub help: Option<&'static str>,
    pub init: InitFn,
    pub exit: Option<ExitFn>,
}

impl core::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("help", &self.help.is_some())
            .field("exit", &self.exit.is_some())
            .finish()
    }
}

/// Services shared by all plugins.
pub struct PluginContext {
    kernel: Arc<dyn Kernel>,
    resolver: Arc<SymbolResolver>,
    engine: Once<Arc<ExecEngine>>,
}

impl PluginContext {
    pub fn new(kernel: Arc<dyn Kernel>, resolver: Arc<SymbolResolver>) -> Self {
        Self {
            kernel,
            resolver,
            engine: Once::new(),
        }
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn resolver(&self) -> &Arc<SymbolResolver> {
        &self.resolver
    }

    /// The execution engine, built on first use.
    ///
    /// The engine resolves its primitives when it is built, so the first
    /// call must come after the `kallsyms` plugin ran discovery.
    pub fn engine(&self) -> Arc<ExecEngine> {
        self.engine
            .call_once(|| Arc::new(ExecEngine::new(self.kernel.clone(), &self.resolver)))
            .clone()
    }
}

/// Ordered table of plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDescriptor>,
}

impl PluginRegistry {
    pub const fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Every shipped plugin, `kallsyms` first so later plugins can resolve
    /// symbols during their own init.
    pub fn builtin() -> Self {
        use crate::plugins;

        Self {
            plugins: alloc::vec![
                kallsyms::PLUGIN,
                plugins::addr::PLUGIN,
                plugins::asm::PLUGIN,
                plugins::hvc::PLUGIN,
                plugins::kmalloc::PLUGIN,
                plugins::msr::PLUGIN,
                plugins::pmem::PLUGIN,
                plugins::smc::PLUGIN,
                plugins::vmem::PLUGIN,
            ],
        }
    }

    /// Append a plugin. Names must be unique.
    pub fn register(&mut self, desc: PluginDescriptor) -> Result<(), InitError> {
        if self.plugins.iter().any(|p| p.name == desc.name) {
            return Err(InitError::AlreadyRegistered(desc.name));
        }
        self.plugins.push(desc);
        Ok(())
    }

    pub fn list(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initialize plugins in table order.
    ///
    /// Stops at the first failing initializer and returns its error.
    /// Plugins initialized before it stay initialized.
    pub fn initialize_all(&self, root: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
        for plugin in &self.plugins {
            debug!("plugin: initializing {}", plugin.name);
            let node = root.create_dir(plugin.name)?;
            if let Some(help) = plugin.help {
                node.create_string("help", MODE_RO, help)?;
            }
            if let Err(err) = (plugin.init)(&node, ctx) {
                error!("plugin: failed to initialize {}: {}", plugin.name, err);
                return Err(err);
            }
        }
        info!("plugin: {} plugins initialized", self.plugins.len());
        Ok(())
    }

    /// Run every present finalizer in table order.
    pub fn finalize_all(&self, ctx: &PluginContext) {
        for plugin in &self.plugins {
            if let Some(exit) = plugin.exit {
                debug!("plugin: finalizing {}", plugin.name);
                exit(ctx);
            }
        }
    }
}
