//! Heap allocation probing.
//!
//! `alloc` allocates and records one object; `va`, `pa`, `pfn` and `size`
//! describe the recorded object. `free` hands any address to `kfree`, which
//! is how double frees and invalid frees are injected.

use alloc::boxed::Box;
use alloc::sync::Arc;

use axerrno::{AxError, AxResult};

use crate::debugfs::{GetFn, MODE_RO, MODE_WO, Node, Shared, shared};
use crate::platform::Kernel;
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

const PAGE_SHIFT: u64 = 12;

const HELP: &str = "# Allocate 1024 bytes\n\
                    $ echo 0x400 > /d/art/kmalloc/alloc\n\
                    \n\
                    $ cat /d/art/kmalloc/size\n\
                    0x400\n\
                    \n\
                    $ cat /d/art/kmalloc/va\n\
                    0xffffff8004048000\n\
                    \n\
                    $ cat /d/art/kmalloc/pa\n\
                    0x44048000\n\
                    \n\
                    $ cat /d/art/kmalloc/pfn\n\
                    0x44048\n\
                    \n\
                    # Free allocated memory\n\
                    $ echo $(cat /d/art/kmalloc/va) > /d/art/kmalloc/free\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "kmalloc",
    help: Some(HELP),
    init,
    exit: None,
};

/// The most recent allocation.
#[derive(Debug, Clone, Copy)]
struct Allocation {
    va: usize,
    size: u64,
}

type Record = Shared<Option<Allocation>>;

fn recorded(record: &Record) -> AxResult<Allocation> {
    match *record.lock() {
        Some(alloc) => Ok(alloc),
        None => {
            error!("kmalloc: no page has been allocated");
            Err(AxError::BadState)
        }
    }
}

fn getter(
    record: &Record,
    kernel: &Arc<dyn Kernel>,
    f: fn(&dyn Kernel, Allocation) -> u64,
) -> GetFn {
    let (record, kernel) = (record.clone(), kernel.clone());
    Box::new(move || recorded(&record).map(|alloc| f(&*kernel, alloc)))
}

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let record: Record = shared(None);
    let kernel = ctx.kernel();

    let (rec, k) = (record.clone(), kernel.clone());
    node.create_attribute(
        "alloc",
        MODE_WO,
        None,
        Some(Box::new(move |size| {
            let ptr = k.kmalloc(size as usize).ok_or_else(|| {
                error!("kmalloc: allocation of {:#x} bytes failed", size);
                AxError::NoMemory
            })?;
            debug!("kmalloc: allocated {:#x} bytes at {:p}", size, ptr);
            *rec.lock() = Some(Allocation {
                va: ptr.as_ptr() as usize,
                size,
            });
            Ok(())
        })),
    )?;

    let (rec, k) = (record.clone(), kernel.clone());
    node.create_attribute(
        "free",
        MODE_WO,
        None,
        Some(Box::new(move |va| {
            debug!("kmalloc: freeing {:#x}", va);
            // SAFETY: none; arbitrary frees are the point of this file.
            unsafe { k.kfree(va as usize as *mut u8) };
            let mut rec = rec.lock();
            if rec.is_some_and(|alloc| alloc.va as u64 == va) {
                *rec = None;
            }
            Ok(())
        })),
    )?;

    node.create_attribute("va", MODE_RO, Some(getter(&record, kernel, |_, a| a.va as u64)), None)?;
    node.create_attribute(
        "pa",
        MODE_RO,
        Some(getter(&record, kernel, |k, a| k.virt_to_phys(a.va))),
        None,
    )?;
    node.create_attribute(
        "pfn",
        MODE_RO,
        Some(getter(&record, kernel, |k, a| k.virt_to_phys(a.va) >> PAGE_SHIFT)),
        None,
    )?;
    node.create_attribute("size", MODE_RO, Some(getter(&record, kernel, |_, a| a.size)), None)?;

    Ok(())
}
