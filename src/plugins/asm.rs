//! Raw code execution.
//!
//! Bytes written to `asm` are executed on the CPU selected by `cpumask`
//! with the registers shown in `x0`..`x28` as input; the registers are
//! updated with the values the code left behind.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;

use axerrno::AxError;

use crate::cpumask::CpuMask;
use crate::debugfs::{MODE_RO, MODE_RW, MODE_WO, Node, format_x64, shared, simple_read};
use crate::exec::{Arm64Regs, NUM_REGS};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

const HELP: &str = "# mov x0, 042; mov x9, 42; mov x28, 0x42\n\
                    $ echo 400480d2490580d25c0880d2 | xxd -r -p > /d/art/asm/asm\n\
                    $ cat /d/art/asm/x0\n\
                    0x0000000000000022\n\
                    $ cat /d/art/asm/x9\n\
                    0x000000000000002a\n\
                    $ cat /d/art/asm/x28\n\
                    0x0000000000000042\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "asm",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let engine = ctx.engine();
    if !engine.can_execute() {
        error!("asm: could not resolve set_memory_x function address");
        return Err(InitError::SymbolNotFound("set_memory_x"));
    }

    let regs = shared(Arm64Regs::new());
    let cpumask = shared(CpuMask::CPU0.bits());

    let snapshot = regs.clone();
    let mask = cpumask.clone();
    node.create_file(
        "asm",
        MODE_WO,
        None,
        Some(Box::new(move |_, code| {
            let cpus = CpuMask::from_bits(*mask.lock());
            if cpus.weight() != 1 {
                error!("asm: exactly one CPU must be selected (cpumask={})", cpus);
                return Err(AxError::InvalidInput);
            }
            // Held across the run so concurrent writers cannot interleave.
            let mut regs = snapshot.lock();
            engine.execute(code, &mut regs, cpus)?;
            Ok(code.len())
        })),
    )?;
    node.create_ulong("cpumask", MODE_RW, cpumask)?;

    for idx in 0..NUM_REGS {
        let regs = regs.clone();
        node.create_file(
            &format!("x{}", idx),
            MODE_RO,
            Some(Box::new(move |off, len| {
                let text = format_x64(regs.lock().x[idx]);
                Ok(simple_read(text.as_bytes(), off, len))
            })),
            None,
        )?;
    }

    Ok(())
}
