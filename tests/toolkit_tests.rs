//! Integration tests for toolkit load and unload.

#![cfg(feature = "test-utils")]

use std::sync::Arc;

use axart::mount::{EBUSY, Mounter};
use axart::platform::mock::{Mount, MockKernel};
use axart::{Config, InitError, MountTarget, ResolverConfig, Strategy, SymbolResolver, Toolkit};

const PLUGINS: [&str; 9] = [
    "kallsyms", "addr", "asm", "hvc", "kmalloc", "msr", "pmem", "smc", "vmem",
];

fn debugfs_mount() -> Mount {
    Mount {
        dev: "none".into(),
        path: "/sys/kernel/debug".into(),
        fstype: "debugfs".into(),
    }
}

// =============================================================================
// Load Tests
// =============================================================================

#[test]
fn test_init_creates_every_plugin() {
    let mock = Arc::new(MockKernel::new());

    let toolkit = Toolkit::init(mock.clone(), Config::default()).unwrap();

    assert_eq!(toolkit.root().name(), "art");
    assert_eq!(toolkit.root().list(), PLUGINS);
    assert_eq!(toolkit.registry().len(), PLUGINS.len());
    for plugin in PLUGINS.iter().filter(|&&p| p != "hvc") {
        assert!(
            toolkit.root().lookup(&format!("{}/help", plugin)).is_ok(),
            "{} has no help",
            plugin
        );
    }
}

#[test]
fn test_init_mounts_debugfs() {
    let mock = Arc::new(MockKernel::new());

    let _toolkit = Toolkit::init(mock.clone(), Config::default()).unwrap();

    assert_eq!(mock.mounts(), [debugfs_mount()]);
    assert_eq!(mock.live_paths(), 0);
}

#[test]
fn test_already_mounted_is_not_fatal() {
    let mock = Arc::new(MockKernel::new().with_mounted("/sys/kernel/debug"));

    let toolkit = Toolkit::init(mock.clone(), Config::default());

    assert!(toolkit.is_ok());
    assert_eq!(mock.mounts().len(), 1);
    assert_eq!(mock.live_paths(), 0);
}

#[test]
fn test_missing_mount_point_is_not_fatal() {
    let mock = Arc::new(MockKernel::new().without_path("/sys/kernel/debug"));

    assert!(Toolkit::init(mock.clone(), Config::default()).is_ok());
    assert!(mock.mounts().is_empty());
}

#[test]
fn test_automount_disabled() {
    let mock = Arc::new(MockKernel::new());

    let _toolkit = Toolkit::init(mock.clone(), Config::default().with_automount(None)).unwrap();

    assert!(mock.mounts().is_empty());
}

#[test]
fn test_missing_path_mount_is_fatal() {
    let mock = Arc::new(MockKernel::new().without_symbol("path_mount"));

    let err = Toolkit::init(mock.clone(), Config::default()).err().unwrap();

    assert_eq!(err, InitError::SymbolNotFound("path_mount"));
    assert!(mock.mounts().is_empty());
}

#[test]
fn test_path_mount_not_needed_without_automount() {
    let mock = Arc::new(MockKernel::new().without_symbol("path_mount"));

    let toolkit = Toolkit::init(mock.clone(), Config::default().with_automount(None)).unwrap();

    assert_eq!(toolkit.root().list(), PLUGINS);
    assert!(mock.mounts().is_empty());
}

#[test]
fn test_init_without_kprobes() {
    let mock = Arc::new(MockKernel::new().without_kprobes());
    let config = Config::default()
        .with_root_name("art-scan")
        .with_resolver(ResolverConfig::default().with_strategy(Strategy::LinearScan));

    let toolkit = Toolkit::init(mock.clone(), config).unwrap();

    assert_eq!(toolkit.root().name(), "art-scan");
    assert!(toolkit.context().resolver().is_ready());
    assert_eq!(mock.mounts(), [debugfs_mount()]);
}

// =============================================================================
// Unload Tests
// =============================================================================

#[test]
fn test_exit_clears_tree() {
    let mock = Arc::new(MockKernel::new());
    let toolkit = Toolkit::init(mock.clone(), Config::default()).unwrap();
    let root = toolkit.root().clone();

    toolkit.exit();

    assert!(root.list().is_empty());
}

#[test]
fn test_exit_releases_plugin_state() {
    let mock = Arc::new(MockKernel::new());
    let toolkit = Toolkit::init(mock.clone(), Config::default()).unwrap();
    let root = toolkit.root().clone();
    root.write("smc/cmd", b"0x80000000\n").unwrap();

    toolkit.exit();

    assert!(root.lookup("smc/result").is_err());
    // Only the test's own handle is left.
    assert_eq!(Arc::strong_count(&mock), 1);
}

// =============================================================================
// Mounter Tests
// =============================================================================

#[test]
fn test_mounter_reports_ebusy() {
    let mock = Arc::new(MockKernel::new().with_mounted("/sys/kernel/debug"));
    let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
    resolver.discover().unwrap();
    let mounter = Mounter::new(mock.clone(), &resolver).unwrap();

    assert_eq!(mounter.mount(&MountTarget::DEBUGFS), Err(-EBUSY));
    assert_eq!(mock.live_paths(), 0);
}

#[test]
fn test_mounter_custom_target() {
    let mock = Arc::new(MockKernel::new());
    let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
    resolver.discover().unwrap();
    let mounter = Mounter::new(mock.clone(), &resolver).unwrap();
    let target = MountTarget {
        fstype: c"tracefs",
        ..MountTarget::default()
    };

    mounter.mount(&target).unwrap();

    assert_eq!(mock.mounts()[0].fstype, "tracefs");
}
