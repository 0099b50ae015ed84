//! SMC Calling Convention plumbing shared by the `hvc` and `smc` plugins.
//!
//! Writing `cmd` stores the command line, parses up to eight integers (the
//! function id first) and issues the call; `result` then holds
//! `a0 a1 a2 a3` of the response.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use axerrno::{AxError, AxResult};

use crate::debugfs::{MODE_RO, MODE_RW, Node, Shared, parse_u64, shared, simple_read};
use crate::platform::Kernel;
use crate::plugin::{InitError, PluginContext};

/// Longest command line kept (`SMCCC_BUF_SIZE - 1`).
pub const SMCCC_CMD_MAX: usize = 127;

/// Registers passed to the call (`x0`..`x7`).
pub const MAX_SMCCC_ARGS: usize = 8;

/// `SMCCC_RET_NOT_SUPPORTED`
pub const SMCCC_RET_NOT_SUPPORTED: u64 = u64::MAX;

/// Instruction used to enter the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conduit {
    /// Hypervisor call (`HVC #0`).
    Hvc,
    /// Secure monitor call (`SMC #0`).
    Smc,
}

/// `struct arm_smccc_res`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmcccRes {
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
}

#[cfg(target_arch = "aarch64")]
macro_rules! smccc_call {
    ($insn:literal, $args:ident) => {{
        let (a0, a1, a2, a3): (u64, u64, u64, u64);
        unsafe {
            core::arch::asm!(
                $insn,
                inout("x0") $args[0] => a0,
                inout("x1") $args[1] => a1,
                inout("x2") $args[2] => a2,
                inout("x3") $args[3] => a3,
                inout("x4") $args[4] => _,
                inout("x5") $args[5] => _,
                inout("x6") $args[6] => _,
                inout("x7") $args[7] => _,
                options(nostack)
            );
        }
        SmcccRes { a0, a1, a2, a3 }
    }};
}

/// `arm_smccc_1_1_{hvc,smc}` with all eight argument registers.
#[cfg(target_arch = "aarch64")]
pub fn arm_smccc_1_1(conduit: Conduit, args: [u64; MAX_SMCCC_ARGS]) -> SmcccRes {
    match conduit {
        Conduit::Hvc => smccc_call!("hvc #0", args),
        Conduit::Smc => smccc_call!("smc #0", args),
    }
}

#[cfg(not(target_arch = "aarch64"))]
pub fn arm_smccc_1_1(conduit: Conduit, args: [u64; MAX_SMCCC_ARGS]) -> SmcccRes {
    warn!("smccc: {:?} {:#x} not available on this architecture", conduit, args[0]);
    SmcccRes {
        a0: SMCCC_RET_NOT_SUPPORTED,
        ..SmcccRes::default()
    }
}

/// Split a command line into call arguments.
///
/// Arguments are separated by single spaces and parsed like
/// `kstrtoull(.., 0)`. Missing trailing arguments are zero.
pub fn parse_args(cmd: &str) -> AxResult<[u64; MAX_SMCCC_ARGS]> {
    let cmd = cmd.strip_suffix('\n').unwrap_or(cmd);
    let mut args = [0u64; MAX_SMCCC_ARGS];
    for (idx, arg) in cmd.split(' ').enumerate() {
        if idx >= MAX_SMCCC_ARGS {
            error!("smccc: number of arguments exceeds maximum of {}", MAX_SMCCC_ARGS);
            return Err(AxError::InvalidInput);
        }
        args[idx] = parse_u64(arg)?;
    }
    Ok(args)
}

/// Text stored in `result`.
pub fn format_result(res: &SmcccRes) -> String {
    format!("{:#x} {:#x} {:#x} {:#x}\n", res.a0, res.a1, res.a2, res.a3)
}

#[derive(Default)]
struct SmcccState {
    cmd: String,
    result: String,
}

fn execute(kernel: &dyn Kernel, conduit: Conduit, state: &Shared<SmcccState>) -> AxResult<()> {
    let cmd = state.lock().cmd.clone();
    let args = parse_args(&cmd).inspect_err(|_| {
        error!("smccc: failed to parse command buffer");
    })?;
    let text = format_result(&kernel.smccc(conduit, args));
    info!("smccc: result: {}", text.trim_end());
    state.lock().result = text;
    Ok(())
}

/// Publish `cmd` and `result` for `conduit` under `node`.
pub fn init(conduit: Conduit, node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let state = shared(SmcccState::default());

    let reader = state.clone();
    let writer = state.clone();
    let kernel = ctx.kernel().clone();
    node.create_file(
        "cmd",
        MODE_RW,
        Some(Box::new(move |off, len| Ok(simple_read(reader.lock().cmd.as_bytes(), off, len)))),
        Some(Box::new(move |_, data| {
            let data = &data[..data.len().min(SMCCC_CMD_MAX)];
            let text = core::str::from_utf8(data).map_err(|_| AxError::InvalidInput)?;
            writer.lock().cmd = String::from(text);
            execute(&*kernel, conduit, &writer)?;
            Ok(data.len())
        })),
    )?;

    node.create_file(
        "result",
        MODE_RO,
        Some(Box::new(move |off, len| {
            Ok(simple_read(state.lock().result.as_bytes(), off, len))
        })),
        None,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_mixed_bases() {
        let args = parse_args("0x80000000 0xdeadbeef 0777 42\n").unwrap();
        assert_eq!(args[..4], [0x8000_0000, 0xdead_beef, 0o777, 42]);
        assert_eq!(args[4..], [0; 4]);
    }

    #[test]
    fn test_parse_args_limits() {
        assert!(parse_args("1 2 3 4 5 6 7 8").is_ok());
        assert!(parse_args("1 2 3 4 5 6 7 8 9").is_err());
        assert!(parse_args("1  2").is_err());
        assert!(parse_args("").is_err());
        assert!(parse_args("0x1 zz").is_err());
    }

    #[test]
    fn test_format_result() {
        let res = SmcccRes {
            a0: 0x10002,
            a1: 0xdead_beef,
            a2: 0x1ff,
            a3: 0x2a,
        };
        assert_eq!(format_result(&res), "0x10002 0xdeadbeef 0x1ff 0x2a\n");
    }
}
