//! Support for Breakpad symbol files as a symbol source.

mod parser;

use std::cell::OnceCell;
use std::fs::read as read_file;
use std::path::Path;
use std::path::PathBuf;

use crate::log;
use crate::symbolize::source::SymbolSource;
use crate::table::LineEntry;
use crate::table::LineTable;
use crate::table::SymEntry;
use crate::table::SymbolTable;
use crate::ErrorExt as _;
use crate::Result;

use parser::SymbolData;


/// A [`SymbolSource`] backed by a Breakpad symbol file.
///
/// The file is read and parsed once, on first use, and the parsed data
/// then serves both symbol and line table construction.
#[derive(Debug)]
pub struct SymFile {
    path: PathBuf,
    data: OnceCell<SymbolData>,
}

impl SymFile {
    /// Create a new [`SymFile`] source reading from the file at the
    /// given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: OnceCell::new(),
        }
    }

    /// The path of the underlying symbol file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> Result<&SymbolData> {
        if let Some(data) = self.data.get() {
            return Ok(data)
        }

        let bytes = read_file(&self.path)
            .with_context(|| format!("failed to read symbol file {}", self.path.display()))?;
        let data = parser::parse(&bytes)
            .with_context(|| format!("failed to parse symbol file {}", self.path.display()))?;
        Ok(self.data.get_or_init(|| data))
    }
}

impl SymbolSource for SymFile {
    fn build_symbol_table(&self) -> Result<SymbolTable> {
        let data = self.data()?;
        let mut entries = Vec::with_capacity(data.functions.len() + data.publics.len());
        for function in &data.functions {
            let () = entries.push(SymEntry {
                addr: function.addr,
                name: function.name.clone(),
                size: Some(u64::from(function.size)),
            });
        }
        for public in &data.publics {
            let () = entries.push(SymEntry {
                addr: public.addr,
                name: public.name.clone(),
                size: None,
            });
        }
        Ok(SymbolTable::new(entries))
    }

    fn build_line_table(&self) -> Result<Option<LineTable>> {
        let data = self.data()?;
        let mut entries = Vec::new();
        for function in &data.functions {
            for line in &function.lines {
                let Some(file) = data.files.get(&line.file) else {
                    log::debug!(
                        "line record in {} references unknown file ID {}; skipping",
                        self.path.display(),
                        line.file
                    );
                    continue
                };
                let () = entries.push(LineEntry {
                    addr: line.addr,
                    path: PathBuf::from(file),
                    line: line.line,
                });
            }
        }
        if entries.is_empty() {
            return Ok(None)
        }
        Ok(Some(LineTable::new(entries)))
    }
}
