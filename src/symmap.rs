//! Support for text symbol maps in the `nm`/`kallsyms` line format.

use std::fs::File;
use std::io::BufRead as _;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use crate::log;
use crate::symbolize::source::SymbolSource;
use crate::table::SymEntry;
use crate::table::SymbolTable;
use crate::Addr;
use crate::ErrorExt as _;
use crate::Result;


/// A [`SymbolSource`] backed by a text symbol map file.
///
/// Each line carries a hexadecimal address, an optional one-character
/// symbol type, and a symbol name, separated by whitespace. Lines that
/// do not follow this shape are skipped.
#[derive(Clone, Debug)]
pub struct SymMap {
    path: PathBuf,
}

impl SymMap {
    /// Create a new [`SymMap`] source reading from the file at the given
    /// path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the underlying symbol map file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_line(line: &str) -> Option<SymEntry> {
        let mut tokens = line.split_ascii_whitespace();
        let addr_str = tokens.next()?;
        let second = tokens.next()?;
        // A single-character second token is the symbol type marker and
        // the name follows; otherwise the second token is the name.
        let name = if second.len() == 1 {
            tokens.next()?
        } else {
            second
        };

        let addr = Addr::from_str_radix(addr_str, 16).ok()?;
        Some(SymEntry {
            addr,
            name: name.to_string(),
            size: None,
        })
    }
}

impl SymbolSource for SymMap {
    fn build_symbol_table(&self) -> Result<SymbolTable> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open symbol map {}", self.path.display()))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line =
                line.with_context(|| format!("failed to read {}", self.path.display()))?;
            if line.is_empty() {
                continue
            }
            match Self::parse_line(&line) {
                Some(entry) => entries.push(entry),
                None => log::debug!(
                    "skipping malformed symbol map line in {}: {line}",
                    self.path.display()
                ),
            }
        }
        Ok(SymbolTable::new(entries))
    }
}
