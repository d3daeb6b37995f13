//! Definitions of symbol sources and their providers.

use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

use crate::registry::ImageId;
use crate::table::LineTable;
use crate::table::SymbolTable;
use crate::Result;


/// A source of symbol data for a single image.
///
/// Sources are ranked by fidelity: a provider hands them out in
/// decreasing order of quality (debug data before export tables, say)
/// and the symbolizer consults them in that order. Table construction is
/// deferred until the first address falls into the owning image.
pub trait SymbolSource: Debug {
    /// Build the symbol table for the image this source describes.
    fn build_symbol_table(&self) -> Result<SymbolTable>;

    /// Build the line table for the image this source describes, if the
    /// source carries source line data at all.
    fn build_line_table(&self) -> Result<Option<LineTable>> {
        Ok(None)
    }
}


/// A factory handing out the symbol sources available for an image.
pub trait SourceProvider: Debug {
    /// Retrieve the sources available for the image with the given ID,
    /// ordered from highest to lowest fidelity.
    fn sources_for(&self, id: &ImageId) -> Vec<Rc<dyn SymbolSource>>;
}


/// A [`SymbolSource`] backed by in-memory tables.
///
/// Mostly useful when symbol data was already parsed by other means, as
/// well as for tests.
#[derive(Clone, Debug, Default)]
pub struct TableSource {
    symbols: SymbolTable,
    lines: Option<LineTable>,
}

impl TableSource {
    /// Create a new [`TableSource`] serving the provided symbol table.
    pub fn new(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            lines: None,
        }
    }

    /// Attach a line table to the source.
    pub fn with_line_table(mut self, lines: LineTable) -> Self {
        self.lines = Some(lines);
        self
    }
}

impl SymbolSource for TableSource {
    fn build_symbol_table(&self) -> Result<SymbolTable> {
        Ok(self.symbols.clone())
    }

    fn build_line_table(&self) -> Result<Option<LineTable>> {
        Ok(self.lines.clone())
    }
}


/// A [`SourceProvider`] over a fixed in-memory mapping of image IDs to
/// sources.
#[derive(Debug, Default)]
pub struct StaticProvider {
    sources: HashMap<ImageId, Vec<Rc<dyn SymbolSource>>>,
}

impl StaticProvider {
    /// Create a new, empty [`StaticProvider`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source for the image with the given ID.
    ///
    /// Sources registered earlier for the same image rank higher in
    /// fidelity.
    pub fn register(&mut self, id: ImageId, source: Rc<dyn SymbolSource>) {
        let () = self.sources.entry(id).or_default().push(source);
    }
}

impl SourceProvider for StaticProvider {
    fn sources_for(&self, id: &ImageId) -> Vec<Rc<dyn SymbolSource>> {
        self.sources.get(id).cloned().unwrap_or_default()
    }
}
