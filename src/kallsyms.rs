//! Kernel symbol resolution.
//!
//! Modules cannot link against unexported kernel functions, so the toolkit
//! first locates `kallsyms_lookup_name` itself and then resolves everything
//! else through it. Two discovery strategies are available:
//!
//! - **kprobe**: register a probe on the symbol and read back the address
//!   the kprobe core resolved for it.
//! - **linear scan**: walk the kernel image one instruction at a time,
//!   printing the symbol covering each address until the target shows up.

use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

use axerrno::AxError;
use hashbrown::HashMap;
use spin::{Mutex, Once};

use crate::debugfs::{MODE_RO, MODE_RW, Node, format_x64, shared, simple_read};
use crate::kfn::{KernelFn, LookupNameFn};
use crate::platform::{AARCH64_INSN_SIZE, Kernel};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

/// Symbol the resolver bootstraps from.
pub const LOOKUP_NAME_SYMBOL: &str = "kallsyms_lookup_name";

/// Default linear scan window (`SZ_32M`).
pub const DEFAULT_SCAN_WINDOW: usize = 32 * 1024 * 1024;

/// Longest symbol name accepted by the `lookup_name` file (`NAME_MAX`).
pub const NAME_MAX: usize = 255;

/// How `kallsyms_lookup_name` is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// kprobe when the kernel has it, linear scan otherwise.
    Auto,
    Kprobe,
    LinearScan,
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub strategy: Strategy,
    /// Bytes scanned from the kernel image base by [`Strategy::LinearScan`].
    pub scan_window: usize,
    pub target: &'static str,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Auto,
            scan_window: DEFAULT_SCAN_WINDOW,
            target: LOOKUP_NAME_SYMBOL,
        }
    }
}

impl ResolverConfig {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_scan_window(mut self, bytes: usize) -> Self {
        self.scan_window = bytes;
        self
    }

    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }
}

/// Discovery errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// kprobe strategy requested but the kernel has no kprobes.
    KprobeUnavailable,
    /// `register_kprobe` failed with this errno.
    ProbeFailed(i32),
    /// The scan window was exhausted without a match.
    NotFound { target: &'static str, window: usize },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::KprobeUnavailable => write!(f, "kprobes are not available"),
            Self::ProbeFailed(err) => write!(f, "register_kprobe failed: {}", err),
            Self::NotFound { target, window } => {
                write!(f, "{} not found in first {:#x} bytes of kernel image", target, window)
            }
        }
    }
}

impl core::error::Error for Error {}

impl From<Error> for AxError {
    fn from(err: Error) -> Self {
        match err {
            Error::KprobeUnavailable => AxError::Unsupported,
            Error::ProbeFailed(_) | Error::NotFound { .. } => AxError::NotFound,
        }
    }
}

/// Whether `printed` (as produced by `sprint_symbol`) names `target` itself.
///
/// `kallsyms_lookup_name+0x0/0x124` matches `kallsyms_lookup_name`, but
/// `kallsyms_lookup_names+0x0/0x10` does not.
fn symbol_matches(printed: &str, target: &str) -> bool {
    match printed.strip_prefix(target) {
        Some(rest) => rest.is_empty() || rest.starts_with('+'),
        None => false,
    }
}

/// Name to address resolver backed by the kernel's own `kallsyms_lookup_name`.
pub struct SymbolResolver {
    kernel: Arc<dyn Kernel>,
    config: ResolverConfig,
    lookup_fn: Once<KernelFn<LookupNameFn>>,
    cache: Mutex<HashMap<String, NonZeroUsize>>,
}

impl SymbolResolver {
    pub fn new(kernel: Arc<dyn Kernel>, config: ResolverConfig) -> Self {
        Self {
            kernel,
            config,
            lookup_fn: Once::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Whether discovery has completed.
    pub fn is_ready(&self) -> bool {
        self.lookup_fn.is_completed()
    }

    /// Locate the lookup function. Repeated calls return the first result.
    pub fn discover(&self) -> Result<NonZeroUsize, Error> {
        if let Some(f) = self.lookup_fn.get() {
            return Ok(f.nonzero_addr());
        }

        let addr = match self.config.strategy {
            Strategy::Kprobe => self.find_by_kprobe()?,
            Strategy::LinearScan => self.find_by_scan()?,
            Strategy::Auto if self.kernel.kprobes_available() => match self.find_by_kprobe() {
                Ok(addr) => addr,
                Err(err) => {
                    warn!("kallsyms: kprobe lookup failed ({}), falling back to scan", err);
                    self.find_by_scan()?
                }
            },
            Strategy::Auto => {
                info!("kallsyms: kprobes not available, falling back to manual search");
                self.find_by_scan()?
            }
        };

        // SAFETY: the address was reported for `kallsyms_lookup_name`.
        let f = self
            .lookup_fn
            .call_once(|| unsafe { KernelFn::from_addr(addr) });
        info!("kallsyms: found {} at {:#x}", self.config.target, f.addr());
        Ok(f.nonzero_addr())
    }

    fn find_by_kprobe(&self) -> Result<NonZeroUsize, Error> {
        if !self.kernel.kprobes_available() {
            return Err(Error::KprobeUnavailable);
        }
        let addr = self
            .kernel
            .kprobe_symbol_addr(self.config.target)
            .map_err(Error::ProbeFailed)?;
        NonZeroUsize::new(addr).ok_or(Error::NotFound {
            target: self.config.target,
            window: 0,
        })
    }

    fn find_by_scan(&self) -> Result<NonZeroUsize, Error> {
        let start = self.kernel.kimage_vaddr();
        let end = start.saturating_add(self.config.scan_window);
        debug!("kallsyms: scanning {:#x} - {:#x} for {}", start, end, self.config.target);

        (start..end)
            .step_by(AARCH64_INSN_SIZE)
            .find(|&addr| {
                self.kernel
                    .sprint_symbol(addr)
                    .is_some_and(|printed| symbol_matches(&printed, self.config.target))
            })
            .and_then(NonZeroUsize::new)
            .ok_or(Error::NotFound {
                target: self.config.target,
                window: self.config.scan_window,
            })
    }

    /// Look `name` up. `None` before discovery, for empty names, names
    /// containing NUL and names the kernel does not know.
    pub fn lookup(&self, name: &str) -> Option<NonZeroUsize> {
        let f = *self.lookup_fn.get()?;
        if name.is_empty() {
            return None;
        }
        if let Some(addr) = self.cache.lock().get(name) {
            return Some(*addr);
        }
        let cname = CString::new(name).ok()?;
        // SAFETY: `f` was discovered as `kallsyms_lookup_name`.
        let addr = NonZeroUsize::new(unsafe { self.kernel.call_lookup_name(f, &cname) })?;
        self.cache.lock().insert(String::from(name), addr);
        trace!("kallsyms: {} -> {:#x}", name, addr);
        Some(addr)
    }

    /// Address of `name`, zero when it cannot be resolved.
    pub fn resolve(&self, name: &str) -> usize {
        self.lookup(name).map_or(0, NonZeroUsize::get)
    }

    /// Resolve `name` into a callable handle.
    ///
    /// # Safety
    /// The kernel function called `name` must have the signature `F`.
    pub unsafe fn resolve_fn<F: Copy>(&self, name: &str) -> Option<KernelFn<F>> {
        self.lookup(name).map(|addr| unsafe { KernelFn::from_addr(addr) })
    }

    /// Names currently cached, for diagnostics.
    pub fn cached(&self) -> Vec<String> {
        self.cache.lock().keys().cloned().collect()
    }
}

impl core::fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymbolResolver")
            .field("config", &self.config)
            .field("lookup_fn", &self.lookup_fn.get())
            .finish()
    }
}

// =============================================================================
// kallsyms plugin
// =============================================================================

const HELP: &str = "$ echo __sys_setuid > /d/art/kallsyms/lookup_name\n\
                    $ cat /d/art/kallsyms/addr\n\
                    0xffffffedb417da48\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "kallsyms",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    if let Err(err) = ctx.resolver().discover() {
        warn!("kallsyms: failed to find {}: {}", ctx.resolver().config().target, err);
        return Err(err.into());
    }

    let name = shared(String::new());
    let addr = shared(0u64);

    let reader = name.clone();
    let writer = name;
    let lookup_addr = addr.clone();
    let resolver = ctx.resolver().clone();
    node.create_file(
        "lookup_name",
        MODE_RW,
        Some(Box::new(move |off, len| Ok(simple_read(reader.lock().as_bytes(), off, len)))),
        Some(Box::new(move |_, data| {
            let data = &data[..data.len().min(NAME_MAX)];
            if data.is_empty() {
                *lookup_addr.lock() = 0;
                return Ok(0);
            }
            let text = core::str::from_utf8(data).map_err(|_| AxError::InvalidInput)?;
            let symbol = text.strip_suffix('\n').unwrap_or(text);
            *lookup_addr.lock() = resolver.resolve(symbol) as u64;
            *writer.lock() = String::from(symbol);
            Ok(data.len())
        })),
    )?;

    node.create_file(
        "addr",
        MODE_RO,
        Some(Box::new(move |off, len| {
            Ok(simple_read(format_x64(*addr.lock()).as_bytes(), off, len))
        })),
        None,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_matches_boundary() {
        assert!(symbol_matches("kallsyms_lookup_name+0x0/0x124", LOOKUP_NAME_SYMBOL));
        assert!(symbol_matches("kallsyms_lookup_name", LOOKUP_NAME_SYMBOL));
        assert!(!symbol_matches("kallsyms_lookup_names+0x0/0x200", LOOKUP_NAME_SYMBOL));
        assert!(!symbol_matches("0xffffffc008010000", LOOKUP_NAME_SYMBOL));
    }

    #[test]
    fn test_config_builders() {
        let config = ResolverConfig::default()
            .with_strategy(Strategy::LinearScan)
            .with_scan_window(0x1000)
            .with_target("path_mount");
        assert_eq!(config.strategy, Strategy::LinearScan);
        assert_eq!(config.scan_window, 0x1000);
        assert_eq!(config.target, "path_mount");
        assert_eq!(ResolverConfig::default().scan_window, DEFAULT_SCAN_WINDOW);
    }
}
