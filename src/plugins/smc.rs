//! Secure monitor calls (`SMC #0`).

use alloc::sync::Arc;

use super::smccc::{self, Conduit};
use crate::debugfs::Node;
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

const HELP: &str = "# Execute SMCCC_VERSION with some unused arguments in different numeric \
                    formats (supports up to 8 arguments including SMC ID)\n\
                    $ echo 0x80000000 0xdeadbeef 0777 42 > /d/art/smc/cmd\n\
                    \n\
                    # Result is SMC Version 1.2, unused arguments are returned as is (in hex)\n\
                    $ cat /d/art/smc/result\n\
                    0x10002 0xdeadbeef 0x1ff 0x2a\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "smc",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    smccc::init(Conduit::Smc, node, ctx)
}
