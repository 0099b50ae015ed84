//! System register access.
//!
//! The register is selected either by name through `regname` or by its
//! encoding fields (`op0`, `op1`, `CRn`, `CRm`, `op2`). Reading `msr` runs
//! `MRS x0, <reg>` on the single selected CPU; writing it runs
//! `MSR <reg>, x0` on every CPU in `cpumask`.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{AxError, AxResult};

use crate::cpumask::CpuMask;
use crate::debugfs::{MODE_RW, Node, Shared, shared, simple_read};
use crate::exec::{AARCH64_RET, Arm64Regs, ExecEngine};
use crate::plugin::{InitError, PluginContext, PluginDescriptor};

/// `MRS x0, <sysreg>` with all encoding fields zero.
pub const MRS_X0: u32 = 0xd530_0000;
/// `MSR <sysreg>, x0` with all encoding fields zero.
pub const MSR_X0: u32 = 0xd510_0000;
/// `LDR x0, [pc, #16]`
pub const LDR_X0_PC16: u32 = 0x5800_0080;

/// System register encoding `S<op0>_<op1>_C<CRn>_C<CRm>_<op2>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysReg {
    pub op0: u32,
    pub op1: u32,
    pub crn: u32,
    pub crm: u32,
    pub op2: u32,
}

impl SysReg {
    pub const SCTLR_EL1: Self = Self::new(3, 0, 1, 0, 0);

    pub const fn new(op0: u32, op1: u32, crn: u32, crm: u32, op2: u32) -> Self {
        Self {
            op0,
            op1,
            crn,
            crm,
            op2,
        }
    }

    /// OR the register fields into an `MRS`/`MSR` instruction.
    pub fn encode(&self, insn: u32) -> AxResult<u32> {
        if !(2..=3).contains(&self.op0)
            || self.op1 > 7
            || self.crn > 15
            || self.crm > 15
            || self.op2 > 7
        {
            warn!("msr: invalid register encoding {}", self);
            return Err(AxError::InvalidInput);
        }
        Ok(insn
            | (self.op0 - 2) << 19
            | self.op1 << 16
            | self.crn << 12
            | self.crm << 8
            | self.op2 << 5)
    }
}

impl Default for SysReg {
    fn default() -> Self {
        Self::new(2, 0, 0, 0, 0)
    }
}

impl core::fmt::Display for SysReg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "s{}_{}_c{}_c{}_{}", self.op0, self.op1, self.crn, self.crm, self.op2)
    }
}

/// Registers accepted by name.
pub const KNOWN_SYSREGS: &[(&str, SysReg)] = &[
    ("midr_el1", SysReg::new(3, 0, 0, 0, 0)),
    ("mpidr_el1", SysReg::new(3, 0, 0, 0, 5)),
    ("sctlr_el1", SysReg::SCTLR_EL1),
    ("actlr_el1", SysReg::new(3, 0, 1, 0, 1)),
    ("cpacr_el1", SysReg::new(3, 0, 1, 0, 2)),
    ("ttbr0_el1", SysReg::new(3, 0, 2, 0, 0)),
    ("ttbr1_el1", SysReg::new(3, 0, 2, 0, 1)),
    ("tcr_el1", SysReg::new(3, 0, 2, 0, 2)),
    ("mair_el1", SysReg::new(3, 0, 10, 2, 0)),
    ("vbar_el1", SysReg::new(3, 0, 12, 0, 0)),
    ("tpidr_el1", SysReg::new(3, 0, 13, 0, 4)),
];

/// Parse a register name: a known name (case-insensitive) or any text
/// containing five numbers, such as `s3_0_c1_c0_0`.
pub fn parse_regname(input: &str) -> AxResult<SysReg> {
    let name = input.split('\n').next().unwrap_or("").to_ascii_lowercase();
    if let Some((_, reg)) = KNOWN_SYSREGS.iter().find(|(known, _)| *known == name) {
        return Ok(*reg);
    }

    let digits: String = name
        .chars()
        .map(|c| if c.is_ascii_digit() { c } else { ' ' })
        .collect();
    let fields = digits
        .split_whitespace()
        .take(5)
        .map(|n| n.parse::<u32>().map_err(|_| AxError::InvalidInput))
        .collect::<AxResult<Vec<u32>>>()?;
    match fields[..] {
        [op0, op1, crn, crm, op2] => Ok(SysReg::new(op0, op1, crn, crm, op2)),
        _ => Err(AxError::InvalidInput),
    }
}

/// Read `reg` on the single CPU in `cpus`.
pub fn read_sysreg(engine: &ExecEngine, reg: SysReg, cpus: CpuMask) -> AxResult<u64> {
    if cpus.weight() != 1 {
        error!("msr: exactly one CPU must be selected (cpumask={})", cpus);
        return Err(AxError::InvalidInput);
    }
    let insn = reg.encode(MRS_X0)?;
    let mut regs = Arm64Regs::new();
    engine.execute(&insn.to_le_bytes(), &mut regs, cpus)?;
    Ok(regs.x[0])
}

/// Write `value` to `reg` on every CPU in `cpus`.
pub fn write_sysreg(engine: &ExecEngine, reg: SysReg, value: u64, cpus: CpuMask) -> AxResult<()> {
    let insns = [
        LDR_X0_PC16,
        reg.encode(MSR_X0)?,
        AARCH64_RET,
        0,
        value as u32,
        (value >> 32) as u32,
    ];
    let code: Vec<u8> = insns.iter().flat_map(|insn| insn.to_le_bytes()).collect();
    let mut regs = Arm64Regs::new();
    engine.execute(&code, &mut regs, cpus)?;
    Ok(())
}

/// The five encoding files.
#[derive(Clone)]
struct SysRegCells {
    op0: Shared<u32>,
    op1: Shared<u32>,
    crn: Shared<u32>,
    crm: Shared<u32>,
    op2: Shared<u32>,
}

impl SysRegCells {
    fn new(reg: SysReg) -> Self {
        Self {
            op0: shared(reg.op0),
            op1: shared(reg.op1),
            crn: shared(reg.crn),
            crm: shared(reg.crm),
            op2: shared(reg.op2),
        }
    }

    fn load(&self) -> SysReg {
        SysReg::new(
            *self.op0.lock(),
            *self.op1.lock(),
            *self.crn.lock(),
            *self.crm.lock(),
            *self.op2.lock(),
        )
    }

    fn store(&self, reg: SysReg) {
        *self.op0.lock() = reg.op0;
        *self.op1.lock() = reg.op1;
        *self.crn.lock() = reg.crn;
        *self.crm.lock() = reg.crm;
        *self.op2.lock() = reg.op2;
    }
}

const HELP: &str = "# Read SCTLR_EL1\n\
                    $ echo sctlr_el1 > /d/art/msr/regname\n\
                    $ cat /d/art/msr/regname\n\
                    s3_0_c1_c0_0\n\
                    $ cat /d/art/msr/msr\n\
                    0x200000034f4d91d\n\
                    \n\
                    # Set cpumask to CPU 0 and CPU 1\n\
                    $ echo 0x3 > /d/art/msr/cpumask\n\
                    \n\
                    # Disable EPAN and SPAN on CPU 0 and CPU 1\n\
                    $ echo 0x3474d91d > /d/art/msr/msr\n\
                    \n\
                    # Set CPU mask back to individual CPUs when reading\n\
                    $ echo 0x1 > /d/art/msr/cpumask\n\
                    $ cat /d/art/msr/msr\n\
                    0x3474d91d\n\
                    \n\
                    # SCTLR_EL1 is unchanged on CPU 2\n\
                    $ echo 0x4 > /d/art/msr/cpumask\n\
                    $ cat /d/art/msr/msr\n\
                    0x200000034f4d91d\n";

pub const PLUGIN: PluginDescriptor = PluginDescriptor {
    name: "msr",
    help: Some(HELP),
    init,
    exit: None,
};

fn init(node: &Arc<Node>, ctx: &PluginContext) -> Result<(), InitError> {
    let cells = SysRegCells::new(SysReg::default());
    let cpumask = shared(CpuMask::CPU0.bits());

    let engine = ctx.engine();
    let (reg_r, mask_r) = (cells.clone(), cpumask.clone());
    let (reg_w, mask_w) = (cells.clone(), cpumask.clone());
    node.create_attribute(
        "msr",
        MODE_RW,
        Some(Box::new({
            let engine = engine.clone();
            move || read_sysreg(&engine, reg_r.load(), CpuMask::from_bits(*mask_r.lock()))
        })),
        Some(Box::new(move |value| {
            write_sysreg(&engine, reg_w.load(), value, CpuMask::from_bits(*mask_w.lock()))
        })),
    )?;
    node.create_ulong("cpumask", MODE_RW, cpumask)?;

    let (reader, writer) = (cells.clone(), cells.clone());
    node.create_file(
        "regname",
        MODE_RW,
        Some(Box::new(move |off, len| {
            let text = format!("{}\n", reader.load());
            Ok(simple_read(text.as_bytes(), off, len))
        })),
        Some(Box::new(move |_, data| {
            let text = core::str::from_utf8(data).map_err(|_| AxError::InvalidInput)?;
            writer.store(parse_regname(text)?);
            Ok(data.len())
        })),
    )?;

    node.create_u32("op0", MODE_RW, cells.op0)?;
    node.create_u32("op1", MODE_RW, cells.op1)?;
    node.create_u32("CRn", MODE_RW, cells.crn)?;
    node.create_u32("CRm", MODE_RW, cells.crm)?;
    node.create_u32("op2", MODE_RW, cells.op2)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sctlr() {
        assert_eq!(SysReg::SCTLR_EL1.encode(MRS_X0).unwrap(), 0xd538_1000);
        assert_eq!(SysReg::SCTLR_EL1.encode(MSR_X0).unwrap(), 0xd518_1000);
    }

    #[test]
    fn test_encode_rejects_bad_fields() {
        assert!(SysReg::new(1, 0, 1, 0, 0).encode(MRS_X0).is_err());
        assert!(SysReg::new(3, 8, 1, 0, 0).encode(MRS_X0).is_err());
        assert!(SysReg::new(3, 0, 16, 0, 0).encode(MRS_X0).is_err());
    }

    #[test]
    fn test_parse_regname() {
        assert_eq!(parse_regname("SCTLR_EL1\n").unwrap(), SysReg::SCTLR_EL1);
        assert_eq!(parse_regname("s3_0_c1_c0_0").unwrap(), SysReg::SCTLR_EL1);
        assert_eq!(parse_regname("3 0 2 0 2").unwrap(), SysReg::new(3, 0, 2, 0, 2));
        assert!(parse_regname("s3_0_c1").is_err());
        assert!(parse_regname("bogus_reg").is_err());
    }

    #[test]
    fn test_display_matches_regname_format() {
        assert_eq!(format!("{}", SysReg::SCTLR_EL1), "s3_0_c1_c0_0");
    }
}
