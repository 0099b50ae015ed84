//! Integration tests for the `ksym`-backed kallsyms table.
//!
//! Full lookups need a real kallsyms blob, which is not available in the
//! test environment; these tests cover construction errors and formatting.

#![cfg(feature = "symbols")]

use axart::symbols::{Error, KsymTable, format_symbol};

fn leak(data: &[u8]) -> &'static [u8] {
    Box::leak(data.to_vec().into_boxed_slice())
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_empty_range_rejected() {
    let result = KsymTable::from_blob(leak(&[0; 16]), 0x2000, 0x2000);
    assert_eq!(result.err(), Some(Error::InvalidRange));
}

#[test]
fn test_inverted_range_rejected() {
    let result = KsymTable::from_blob(leak(&[0; 16]), 0x2000, 0x1000);
    assert_eq!(result.err(), Some(Error::InvalidRange));
}

#[test]
fn test_empty_blob() {
    let result = KsymTable::from_blob(&[], 0x1000, 0x2000);
    assert!(matches!(result, Err(Error::ParseError(_))));
}

#[test]
fn test_invalid_blob() {
    let result = KsymTable::from_blob(leak(&[0xff, 0xff, 0xff, 0xff]), 0x1000, 0x2000);
    assert!(matches!(result, Err(Error::ParseError(_))));
}

// =============================================================================
// Formatting Tests
// =============================================================================

#[test]
fn test_format_symbol_matches_sprint_symbol() {
    assert_eq!(format_symbol("path_mount", 0x10, 0x400), "path_mount+0x10/0x400");
}

#[test]
fn test_error_display_invalid_range() {
    let msg = format!("{}", Error::InvalidRange);
    assert!(msg.contains("text range"));
}

#[test]
fn test_error_display_parse_error() {
    let msg = format!("{}", Error::ParseError("invalid format"));
    assert!(msg.contains("invalid format"));
}
