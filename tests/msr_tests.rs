//! Integration tests for system register access.

#![cfg(feature = "test-utils")]

use std::sync::Arc;

use axart::platform::mock::{MockKernel, SCTLR_EL1_RESET};
use axart::plugins::msr::{SysReg, read_sysreg, write_sysreg};
use axart::{Config, CpuMask, ResolverConfig, SymbolResolver, Toolkit};

fn toolkit() -> (Arc<MockKernel>, Toolkit) {
    let mock = Arc::new(MockKernel::new());
    let toolkit = Toolkit::init(mock.clone(), Config::default()).unwrap();
    (mock, toolkit)
}

// =============================================================================
// Attribute Tests
// =============================================================================

#[test]
fn test_regname_by_name() {
    let (_mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/regname", b"sctlr_el1\n").unwrap();

    assert_eq!(root.read_to_string("msr/regname").unwrap(), "s3_0_c1_c0_0\n");
    assert_eq!(root.read_to_string("msr/op0").unwrap(), "3\n");
    assert_eq!(root.read_to_string("msr/CRn").unwrap(), "1\n");
}

#[test]
fn test_regname_by_encoding() {
    let (_mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/regname", b"s3_0_c13_c0_4\n").unwrap();

    assert_eq!(root.read_to_string("msr/regname").unwrap(), "s3_0_c13_c0_4\n");
    assert_eq!(root.read_to_string("msr/op2").unwrap(), "4\n");
}

#[test]
fn test_invalid_regname_keeps_selection() {
    let (_mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/regname", b"sctlr_el1\n").unwrap();
    assert!(root.write("msr/regname", b"no_such_reg\n").is_err());

    assert_eq!(root.read_to_string("msr/regname").unwrap(), "s3_0_c1_c0_0\n");
}

#[test]
fn test_fields_select_register() {
    let (_mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/op0", b"3\n").unwrap();
    root.write("msr/CRn", b"1\n").unwrap();

    assert_eq!(root.read_to_string("msr/regname").unwrap(), "s3_0_c1_c0_0\n");
    assert_eq!(
        root.read_to_string("msr/msr").unwrap(),
        format!("{:#x}\n", SCTLR_EL1_RESET)
    );
}

#[test]
fn test_help_example() {
    let (mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/regname", b"sctlr_el1\n").unwrap();
    assert_eq!(root.read_to_string("msr/msr").unwrap(), "0x200000034f4d91d\n");

    root.write("msr/cpumask", b"0x3\n").unwrap();
    root.write("msr/msr", b"0x3474d91d\n").unwrap();

    root.write("msr/cpumask", b"0x1\n").unwrap();
    assert_eq!(root.read_to_string("msr/msr").unwrap(), "0x3474d91d\n");

    root.write("msr/cpumask", b"0x4\n").unwrap();
    assert_eq!(root.read_to_string("msr/msr").unwrap(), "0x200000034f4d91d\n");

    assert_eq!(mock.sysreg(0, SysReg::SCTLR_EL1), 0x3474_d91d);
    assert_eq!(mock.sysreg(1, SysReg::SCTLR_EL1), 0x3474_d91d);
    assert_eq!(mock.sysreg(2, SysReg::SCTLR_EL1), SCTLR_EL1_RESET);
    assert_eq!(mock.sysreg(3, SysReg::SCTLR_EL1), SCTLR_EL1_RESET);
}

#[test]
fn test_read_with_multi_cpu_mask_fails() {
    let (_mock, toolkit) = toolkit();
    let root = toolkit.root();

    root.write("msr/regname", b"sctlr_el1\n").unwrap();
    root.write("msr/cpumask", b"0x3\n").unwrap();

    assert!(root.read("msr/msr").is_err());
}

#[test]
fn test_invalid_encoding_rejected() {
    let (mock, toolkit) = toolkit();
    let root = toolkit.root();

    // op0 must be 2 or 3 for MRS/MSR.
    root.write("msr/op0", b"1\n").unwrap();

    assert!(root.read("msr/msr").is_err());
    assert!(root.write("msr/msr", b"0x1\n").is_err());
    assert!(mock.executions().is_empty());
}

#[test]
fn test_field_wider_than_u32_rejected() {
    let (_mock, toolkit) = toolkit();

    assert!(toolkit.root().write("msr/op1", b"0x100000000\n").is_err());
}

// =============================================================================
// Direct API Tests
// =============================================================================

#[test]
fn test_write_then_read_tpidr() {
    let mock = Arc::new(MockKernel::new());
    let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
    resolver.discover().unwrap();
    let engine = axart::ExecEngine::new(mock.clone(), &resolver);
    let tpidr = SysReg::new(3, 0, 13, 0, 4);

    write_sysreg(&engine, tpidr, 0xdead_beef_cafe_f00d, CpuMask::single(3)).unwrap();

    assert_eq!(mock.sysreg(3, tpidr), 0xdead_beef_cafe_f00d);
    assert_eq!(
        read_sysreg(&engine, tpidr, CpuMask::single(3)).unwrap(),
        0xdead_beef_cafe_f00d
    );
    assert_eq!(read_sysreg(&engine, tpidr, CpuMask::single(0)).unwrap(), 0);
    assert!(read_sysreg(&engine, tpidr, CpuMask::empty()).is_err());
}
