//! Filesystem mounting through the unexported `path_mount`.
//!
//! Modules have no exported API to mount a filesystem, so the toolkit
//! resolves `path_mount` and calls it directly. It is used once at load time
//! to mount debugfs, which makes the attribute tree reachable on systems
//! that do not mount it by default.

use alloc::sync::Arc;
use core::ffi::CStr;

use crate::kallsyms::SymbolResolver;
use crate::kfn::{KernelFn, PathMountFn};
use crate::platform::Kernel;
use crate::plugin::InitError;

/// `EBUSY`: something is already mounted at the target.
pub const EBUSY: i32 = 16;

/// What to mount where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountTarget {
    pub dev: &'static CStr,
    pub path: &'static CStr,
    pub fstype: &'static CStr,
}

impl MountTarget {
    /// `mount -t debugfs none /sys/kernel/debug`
    pub const DEBUGFS: Self = Self {
        dev: c"none",
        path: c"/sys/kernel/debug",
        fstype: c"debugfs",
    };
}

impl Default for MountTarget {
    fn default() -> Self {
        Self::DEBUGFS
    }
}

/// Handle to the resolved `path_mount`.
pub struct Mounter {
    kernel: Arc<dyn Kernel>,
    path_mount: KernelFn<PathMountFn>,
}

impl Mounter {
    /// Resolve `path_mount`. Fails when the symbol cannot be found.
    pub fn new(kernel: Arc<dyn Kernel>, resolver: &SymbolResolver) -> Result<Self, InitError> {
        // SAFETY: `path_mount` has the `PathMountFn` signature.
        match unsafe { resolver.resolve_fn::<PathMountFn>("path_mount") } {
            Some(path_mount) => Ok(Self { kernel, path_mount }),
            None => {
                error!("mount: could not resolve path_mount function address");
                Err(InitError::SymbolNotFound("path_mount"))
            }
        }
    }

    /// Mount `target`; the error is a negative errno.
    pub fn mount(&self, target: &MountTarget) -> Result<(), i32> {
        let path = self.kernel.kern_path(target.path)?;
        // SAFETY: `path_mount` was resolved by name.
        let ret = unsafe {
            self.kernel
                .call_path_mount(self.path_mount, target.dev, &path, target.fstype)
        };
        self.kernel.path_put(path);
        if ret != 0 {
            return Err(ret);
        }
        info!("mount: successfully mounted {:?}", target.path);
        Ok(())
    }

    /// Mount `target`, logging failures instead of returning them.
    ///
    /// `-EBUSY` (already mounted) is reported as a warning.
    pub fn mount_or_warn(&self, target: &MountTarget) {
        match self.mount(target) {
            Ok(()) => {}
            Err(err) if err == -EBUSY => {
                warn!("mount: {:?} is already mounted at {:?}", target.fstype, target.path);
            }
            Err(err) => {
                error!("mount: failed to automatically mount {:?}: {}", target.fstype, err);
            }
        }
    }
}
