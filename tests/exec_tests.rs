//! Integration tests for the code execution engine.
//!
//! Tests run on the mock kernel, whose CPUs interpret the installed code
//! and fault on anything that was not made executable first.

#![cfg(feature = "test-utils")]

use std::sync::Arc;

use axart::exec::{Error, ExecEngine};
use axart::platform::mock::MockKernel;
use axart::plugins::msr::SysReg;
use axart::{Arm64Regs, CpuMask, ResolverConfig, SymbolResolver};

fn setup(mock: MockKernel) -> (Arc<MockKernel>, ExecEngine) {
    let mock = Arc::new(mock);
    let resolver = SymbolResolver::new(mock.clone(), ResolverConfig::default());
    resolver.discover().unwrap();
    let engine = ExecEngine::new(mock.clone(), &resolver);
    (mock, engine)
}

fn code(insns: &[u32]) -> Vec<u8> {
    insns.iter().flat_map(|insn| insn.to_le_bytes()).collect()
}

/// `movz x<rd>, #imm`
fn movz(rd: u32, imm: u16) -> u32 {
    0xd280_0000 | ((imm as u32) << 5) | rd
}

/// `mrs x0, tpidr_el1`
const MRS_X0_TPIDR_EL1: u32 = 0xd538_d080;

// =============================================================================
// Basic Execution Tests
// =============================================================================

#[test]
fn test_immediate_into_register() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new().with(1, 0x1111).with(28, 0x2828);

    engine
        .execute(&code(&[movz(0, 0x22)]), &mut regs, CpuMask::CPU0)
        .unwrap();

    assert_eq!(regs.x[0], 0x22);
    assert_eq!(regs.x[1], 0x1111);
    assert_eq!(regs.x[28], 0x2828);
    assert_eq!(mock.faults(), 0);
}

#[test]
fn test_help_example_sequence() {
    let (_mock, engine) = setup(MockKernel::new());
    let bytes = [
        0x40, 0x04, 0x80, 0xd2, 0x49, 0x05, 0x80, 0xd2, 0x5c, 0x08, 0x80, 0xd2,
    ];
    let mut regs = Arm64Regs::new();

    engine.execute(&bytes, &mut regs, CpuMask::CPU0).unwrap();

    assert_eq!(regs.x[0], 0x22);
    assert_eq!(regs.x[9], 0x2a);
    assert_eq!(regs.x[28], 0x42);
}

#[test]
fn test_sequential_runs_do_not_leak_state() {
    let (mock, engine) = setup(MockKernel::new());

    let mut first = Arm64Regs::new();
    engine
        .execute(&code(&[movz(3, 0x33)]), &mut first, CpuMask::single(0))
        .unwrap();

    let mut second = Arm64Regs::new();
    engine
        .execute(&code(&[movz(4, 0x44)]), &mut second, CpuMask::single(1))
        .unwrap();

    assert_eq!(first.x[3], 0x33);
    assert_eq!(first.x[4], 0);
    assert_eq!(second.x[3], 0);
    assert_eq!(second.x[4], 0x44);

    let cpus: Vec<u32> = mock.executions().iter().map(|e| e.cpu).collect();
    assert_eq!(cpus, [0, 1]);
    assert_eq!(mock.live_vmallocs(), 0);
}

#[test]
fn test_region_released_and_not_left_executable() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new();

    engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::CPU0)
        .unwrap();

    assert_eq!(mock.live_vmallocs(), 0);
    assert_eq!(mock.executable_regions(), 0);
}

#[test]
fn test_input_registers_reach_code() {
    let (_mock, engine) = setup(MockKernel::new());
    // mov x2, x7 ; add x2, x2, #1
    let mut regs = Arm64Regs::new().with(7, 41);

    engine
        .execute(&code(&[0xaa07_03e2, 0x9100_0442]), &mut regs, CpuMask::CPU0)
        .unwrap();

    assert_eq!(regs.x[2], 42);
}

// =============================================================================
// Multi-CPU Tests
// =============================================================================

#[test]
fn test_every_cpu_in_mask_runs() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new();

    engine
        .execute(&code(&[movz(0, 7)]), &mut regs, CpuMask::from_bits(0b1011))
        .unwrap();

    let cpus: Vec<u32> = mock.executions().iter().map(|e| e.cpu).collect();
    assert_eq!(cpus, [0, 1, 3]);
    assert!(mock.executions().iter().all(|e| e.completed));
}

#[test]
fn test_multi_cpu_last_writer_wins() {
    let (mock, engine) = setup(MockKernel::new());
    let tpidr = SysReg::new(3, 0, 13, 0, 4);
    for cpu in 0..4 {
        mock.set_sysreg(cpu, tpidr, 0x100 * (cpu as u64 + 1));
    }
    let mut regs = Arm64Regs::new();

    engine
        .execute(&code(&[MRS_X0_TPIDR_EL1]), &mut regs, CpuMask::from_bits(0b0110))
        .unwrap();

    // The mock dispatches in ascending order, so CPU 2 finishes last.
    assert_eq!(regs.x[0], 0x300);
}

#[test]
fn test_each_cpu_starts_from_same_input() {
    let (_mock, engine) = setup(MockKernel::new());
    // add x5, x5, #1
    let mut regs = Arm64Regs::new().with(5, 10);

    engine
        .execute(&code(&[0x9100_04a5]), &mut regs, CpuMask::from_bits(0xf))
        .unwrap();

    assert_eq!(regs.x[5], 11);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_empty_mask_rejected_without_allocation() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new();

    let err = engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::empty())
        .unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(mock.largest_vmalloc(), 0);
    assert!(mock.executions().is_empty());
}

#[test]
fn test_empty_code_rejected() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new();

    let err = engine.execute(&[], &mut regs, CpuMask::CPU0).unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(mock.largest_vmalloc(), 0);
}

#[test]
fn test_partial_instruction_rejected_without_allocation() {
    let (mock, engine) = setup(MockKernel::new());
    let mut regs = Arm64Regs::new();
    let mut bytes = code(&[movz(0, 1)]);
    bytes.push(0x00);

    let err = engine.execute(&bytes, &mut regs, CpuMask::CPU0).unwrap_err();

    assert_eq!(err, Error::InvalidInput("code length not a multiple of 4"));
    assert_eq!(mock.largest_vmalloc(), 0);
    assert!(mock.executions().is_empty());
    assert_eq!(regs, Arm64Regs::new());
}

#[test]
fn test_missing_cpu_rejected_before_dispatch() {
    let (mock, engine) = setup(MockKernel::new().with_cpus(2));
    let mut regs = Arm64Regs::new();

    let err = engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::from_bits(0b101))
        .unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(mock.executions().is_empty());
    assert_eq!(mock.largest_vmalloc(), 0);
}

// =============================================================================
// Failure Path Tests
// =============================================================================

#[test]
fn test_unresolved_set_memory_x_is_permission_denied() {
    let (mock, engine) = setup(MockKernel::new().without_symbol("set_memory_x"));
    let mut regs = Arm64Regs::new();

    assert!(!engine.can_execute());
    let err = engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::CPU0)
        .unwrap_err();

    assert_eq!(err, Error::PermissionDenied);
    assert!(mock.executions().is_empty());
    assert_eq!(mock.live_vmallocs(), 0);
}

#[test]
fn test_set_memory_x_failure_releases_region() {
    let (mock, engine) = setup(MockKernel::new());
    mock.set_set_memory_x_result(-12);
    let mut regs = Arm64Regs::new().with(0, 5);

    let err = engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::CPU0)
        .unwrap_err();

    assert_eq!(err, Error::PermissionDenied);
    assert_eq!(regs.x[0], 5);
    assert_eq!(mock.live_vmallocs(), 0);
    assert!(mock.executions().is_empty());
}

#[test]
fn test_allocation_failure() {
    let (mock, engine) = setup(MockKernel::new());
    mock.set_fail_vmalloc(true);
    let mut regs = Arm64Regs::new();

    let err = engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::CPU0)
        .unwrap_err();

    assert_eq!(err, Error::AllocationFailed);
    assert!(mock.executions().is_empty());
}

#[test]
fn test_without_set_memory_nx_still_frees() {
    let (mock, engine) = setup(MockKernel::new().without_symbol("set_memory_nx"));
    let mut regs = Arm64Regs::new();

    engine
        .execute(&code(&[movz(0, 1)]), &mut regs, CpuMask::CPU0)
        .unwrap();

    assert_eq!(regs.x[0], 1);
    assert_eq!(mock.live_vmallocs(), 0);
}

// =============================================================================
// Error Conversion Tests
// =============================================================================

#[test]
fn test_error_into_axerror() {
    use axerrno::AxError;

    assert!(matches!(AxError::from(Error::AllocationFailed), AxError::NoMemory));
    assert!(matches!(
        AxError::from(Error::PermissionDenied),
        AxError::PermissionDenied
    ));
    assert!(matches!(
        AxError::from(Error::InvalidInput("x")),
        AxError::InvalidInput
    ));
}

#[test]
fn test_error_display() {
    assert!(format!("{}", Error::InvalidInput("empty code")).contains("empty code"));
    assert!(format!("{}", Error::AllocationFailed).contains("allocate"));
}
