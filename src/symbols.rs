//! Kallsyms table backed by `ksym`.
//!
//! Kernels that ship a kallsyms blob (rather than exporting
//! `sprint_symbol`) can implement [`crate::platform::SymbolOps`] on top of
//! a [`KsymTable`]: [`KsymTable::sprint_symbol`] produces exactly the
//! `name+0xoff/0xsize` text the linear-scan resolver matches against, and
//! [`KsymTable::lookup_name`] backs `kallsyms_lookup_name`.

use alloc::format;
use alloc::string::String;

use ksym::KallsymsMapped;

const KSYM_NAME_LEN: usize = 1024;

/// Error types for symbol table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The text range is empty or inverted.
    InvalidRange,
    /// Failed to parse the symbol table blob.
    ParseError(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidRange => write!(f, "Invalid kernel text range"),
            Self::ParseError(e) => write!(f, "Failed to parse symbol table: {}", e),
        }
    }
}

impl core::error::Error for Error {}

/// A symbol covering some address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    /// Type character (`T`, `t`, `D`, ...).
    pub ty: char,
}

/// `sprint_symbol` formatting: `name+0xoff/0xsize`.
pub fn format_symbol(name: &str, offset: u64, size: u64) -> String {
    format!("{}+{:#x}/{:#x}", name, offset, size)
}

/// Parsed kallsyms blob.
pub struct KsymTable {
    table: KallsymsMapped<'static>,
    stext: u64,
    etext: u64,
}

impl KsymTable {
    /// Parse `data` describing the text range `stext..etext`.
    ///
    /// `ksym` expects the blob to be page-aligned in memory; a misaligned
    /// blob is accepted but logged.
    pub fn from_blob(data: &'static [u8], stext: u64, etext: u64) -> Result<Self, Error> {
        if stext >= etext {
            return Err(Error::InvalidRange);
        }
        let ptr = data.as_ptr() as usize;
        if ptr % 4096 != 0 {
            warn!("symbols: kallsyms data is not page-aligned (ptr % 4096 = {})", ptr % 4096);
        }
        let table = KallsymsMapped::from_blob(data, stext, etext).map_err(Error::ParseError)?;
        info!(
            "symbols: loaded {} bytes, text range {:#x} - {:#x}",
            data.len(),
            stext,
            etext
        );
        Ok(Self {
            table,
            stext,
            etext,
        })
    }

    /// Kernel text range the table covers.
    pub fn text_range(&self) -> (u64, u64) {
        (self.stext, self.etext)
    }

    /// Symbol covering `addr`.
    pub fn lookup_symbol(&self, addr: u64) -> Option<SymbolInfo> {
        let mut name_buf = [0u8; KSYM_NAME_LEN];
        self.table
            .lookup_address(addr, &mut name_buf)
            .map(|(name, size, offset, ty)| SymbolInfo {
                name: String::from(name),
                size,
                offset,
                ty,
            })
    }

    /// `name+0xoff/0xsize` of the symbol covering `addr`, or the bare
    /// address in hex.
    pub fn sprint_symbol(&self, addr: u64) -> String {
        match self.lookup_symbol(addr) {
            Some(sym) => format_symbol(&sym.name, sym.offset, sym.size),
            None => format!("{:#x}", addr),
        }
    }

    /// Address of symbol `name`.
    pub fn lookup_name(&self, name: &str) -> Option<u64> {
        if name.is_empty() {
            return None;
        }
        self.table.lookup_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_symbol() {
        assert_eq!(
            format_symbol("kallsyms_lookup_name", 0, 0x124),
            "kallsyms_lookup_name+0x0/0x124"
        );
    }
}
