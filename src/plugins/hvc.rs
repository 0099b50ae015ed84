//! Hypervisor calls (`HVC #0`).

use alloc::sync::Arc;

use super::smccc::{self, Conduit};
use crate::debugfs::Node;
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "hvc",
    help: None,
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    smccc::init(Conduit::Hvc, node, ctx)
}
