//! Raw 64-bit access to kernel virtual memory.

use alloc::boxed::Box;
use alloc::sync::Arc;

use axerrno::AxError;

use crate::debugfs::{MODE_RW, Node, shared};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

const HELP: &str = "# Write address to write to or read from to `addr`\n\
                    $ echo ffffffc009fa2378 > /d/art/vmem/addr\n\
                    \n\
                    # Read from `val` to read 64-bit hex value at address\n\
                    $ cat /d/art/vmem/val\n\
                    0xffffff80038db270\n\
                    \n\
                    # Write 64-bit hex value to `val` to write to address\n\
                    $ echo 0xdeadbeef > /d/art/vmem/val\n\
                    \n\
                    # Confirm write succeeded\n\
                    $ cat /d/art/vmem/val\n\
                    0xdeadbeef\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "vmem",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, _ctx: &PluginContext) -> Result<(), InitError> {
    let addr = shared(0u64);
    node.create_x64("addr", MODE_RW, addr.clone())?;

    let (load, store) = (addr.clone(), addr);
    node.create_attribute(
        "val",
        MODE_RW,
        Some(Box::new(move || {
            let ptr = *load.lock() as *const u64;
            if ptr.is_null() {
                return Err(AxError::BadAddress);
            }
            // SAFETY: none; the user picked the address.
            Ok(unsafe { ptr.read_volatile() })
        })),
        Some(Box::new(move |value| {
            let ptr = *store.lock() as *mut u64;
            if ptr.is_null() {
                return Err(AxError::BadAddress);
            }
            // SAFETY: none; the user picked the address.
            unsafe { ptr.write_volatile(value) };
            Ok(())
        })),
    )?;

    Ok(())
}
