//! Physical memory access.
//!
//! RAM is reached one page at a time through `kmap`; anything else (device
//! memory) is mapped with `ioremap` and accessed byte by byte.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use axerrno::{AxError, AxResult};

use crate::debugfs::{MODE_RW, Node, shared};
use crate::platform::{Kernel, PAGE_MASK, PAGE_SIZE};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

/// Default size of a `bytes` read.
pub const DEFAULT_BYTES_READ_SIZE: u64 = 8;

enum Direction<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Direction<'_> {
    fn len(&self) -> usize {
        match self {
            Direction::Read(buf) => buf.len(),
            Direction::Write(buf) => buf.len(),
        }
    }
}

fn copy_phys_ram(kernel: &dyn Kernel, mut paddr: u64, mut dir: Direction<'_>) -> AxResult<usize> {
    let total = dir.len();
    if paddr == 0 || total == 0 {
        return Err(AxError::InvalidInput);
    }

    let mut done = 0;
    while done < total {
        let page_offset = (paddr as usize) & !PAGE_MASK;
        let chunk = (total - done).min(PAGE_SIZE - page_offset);

        // SAFETY: `paddr` was checked to be RAM by the caller.
        let page = unsafe { kernel.kmap(paddr) }.ok_or(AxError::BadAddress)?;
        unsafe {
            let kaddr = page.as_ptr().add(page_offset);
            match &mut dir {
                Direction::Read(buf) => {
                    core::ptr::copy_nonoverlapping(kaddr, buf[done..].as_mut_ptr(), chunk)
                }
                Direction::Write(buf) => {
                    core::ptr::copy_nonoverlapping(buf[done..].as_ptr(), kaddr, chunk)
                }
            }
            kernel.kunmap(page);
        }

        paddr += chunk as u64;
        done += chunk;
    }
    Ok(done)
}

fn copy_phys_io(kernel: &dyn Kernel, paddr: u64, dir: Direction<'_>) -> AxResult<usize> {
    let len = dir.len();
    // SAFETY: device side effects are what the user asked for.
    let io = unsafe { kernel.ioremap(paddr, len) }.ok_or(AxError::InvalidInput)?;
    let base = io.as_ptr();
    unsafe {
        match dir {
            Direction::Read(buf) => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = base.add(i).read_volatile();
                }
            }
            Direction::Write(buf) => {
                for (i, byte) in buf.iter().enumerate() {
                    base.add(i).write_volatile(*byte);
                }
            }
        }
        kernel.iounmap(io);
    }
    Ok(len)
}

/// Read `buf.len()` bytes of physical memory at `paddr`.
pub fn read_phys(kernel: &dyn Kernel, paddr: u64, buf: &mut [u8]) -> AxResult<usize> {
    if kernel.is_ram(paddr) {
        copy_phys_ram(kernel, paddr, Direction::Read(buf))
    } else {
        copy_phys_io(kernel, paddr, Direction::Read(buf))
    }
}

/// Write `buf` to physical memory at `paddr`.
pub fn write_phys(kernel: &dyn Kernel, paddr: u64, buf: &[u8]) -> AxResult<usize> {
    if kernel.is_ram(paddr) {
        copy_phys_ram(kernel, paddr, Direction::Write(buf))
    } else {
        copy_phys_io(kernel, paddr, Direction::Write(buf))
    }
}

const HELP: &str = "# Write 32-bit value in base 10 to addr:\n\
                    $ echo 0xB62CE0DC > /d/art/pmem/addr\n\
                    $ echo 12345678 > /d/art/pmem/val\n\
                    \n\
                    # Write string to addr:\n\
                    $ echo 0xB62CE0DC > /d/art/pmem/addr\n\
                    $ echo -n 'helloworld' > /d/art/pmem/bytes\n\
                    \n\
                    # Write hex value to addr:\n\
                    $ echo 0xB62CE0DC > /d/art/pmem/addr\n\
                    $ echo -n '56 67 89 ab cd ef' | xxd -r -p | dd of=/d/art/pmem/bytes\n\
                    \n\
                    # Read 5 hex values from addr:\n\
                    $ echo 0x5 > /d/art/pmem/bytes-read-size\n\
                    $ xxd -p /d/art/pmem/bytes\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "pmem",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let addr = shared(0u64);
    let bytes_read_size = shared(DEFAULT_BYTES_READ_SIZE);

    node.create_x64("addr", MODE_RW, addr.clone())?;
    node.create_x64("bytes-read-size", MODE_RW, bytes_read_size.clone())?;

    let (load, store) = (addr.clone(), addr.clone());
    let (kr, kw) = (ctx.kernel().clone(), ctx.kernel().clone());
    node.create_attribute(
        "val",
        MODE_RW,
        Some(Box::new(move || {
            let mut buf = [0u8; 8];
            read_phys(&*kr, *load.lock(), &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        })),
        Some(Box::new(move |value| {
            write_phys(&*kw, *store.lock(), &value.to_le_bytes())?;
            Ok(())
        })),
    )?;

    let (load, store) = (addr.clone(), addr);
    let (kr, kw) = (ctx.kernel().clone(), ctx.kernel().clone());
    node.create_file(
        "bytes",
        MODE_RW,
        Some(Box::new(move |off, len| {
            let limit = *bytes_read_size.lock() as usize;
            if off >= limit {
                return Ok(Vec::new());
            }
            let mut buf = vec![0u8; len.min(limit - off)];
            let n = read_phys(&*kr, *load.lock() + off as u64, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })),
        Some(Box::new(move |off, data| {
            write_phys(&*kw, *store.lock() + off as u64, data)
        })),
    )?;

    Ok(())
}
