//! Virtual/physical address translation through the linear map.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::debugfs::{MODE_RW, Node, shared};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

const HELP: &str = "$ echo 0xffffff800468b400 > /d/art/addr/va\n\
                    $ cat /d/art/addr/pa\n\
                    0x4468b400\n\
                    \n\
                    $ echo 0x4468b400 > /d/art/addr/pa\n\
                    $ cat /d/art/addr/va\n\
                    0xffffff800468b400\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "addr",
    help: Some(HELP),
    init,
    exit: None,
};

/// Last translated pair.
#[derive(Debug, Default, Clone, Copy)]
struct Translation {
    va: u64,
    pa: u64,
}

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let state = shared(Translation::default());

    let (va_r, va_w) = (state.clone(), state.clone());
    let kernel = ctx.kernel().clone();
    node.create_attribute(
        "va",
        MODE_RW,
        Some(Box::new(move || Ok(va_r.lock().va))),
        Some(Box::new(move |va| {
            let pa = kernel.virt_to_phys(va as usize);
            *va_w.lock() = Translation { va, pa };
            Ok(())
        })),
    )?;

    let (pa_r, pa_w) = (state.clone(), state);
    let kernel = ctx.kernel().clone();
    node.create_attribute(
        "pa",
        MODE_RW,
        Some(Box::new(move || Ok(pa_r.lock().pa))),
        Some(Box::new(move |pa| {
            let va = kernel.phys_to_virt(pa) as u64;
            *pa_w.lock() = Translation { va, pa };
            Ok(())
        })),
    )?;

    Ok(())
}
