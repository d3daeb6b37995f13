use std::cell::Cell;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::insert_map::InsertMap;
use crate::log;
use crate::registry::Image;
use crate::registry::ImageId;
use crate::registry::ImageRegistry;
use crate::symbolize::source::SourceProvider;
use crate::symbolize::source::SymbolSource;
use crate::symbolize::MatchPolicy;
use crate::symbolize::Reason;
use crate::symbolize::ResolvedSymbol;
use crate::table::LineTable;
use crate::table::SymEntry;
use crate::table::SymbolTable;
use crate::Addr;


/// A builder for configurable construction of [`Symbolizer`] objects.
///
/// By default line records are reported, demangling happens (where
/// enabled at compile time), and symbol sizes do not bound matches.
#[derive(Clone, Debug)]
pub struct Builder {
    /// Whether to report source code location information.
    code_info: bool,
    /// Whether to demangle symbol names.
    #[cfg(feature = "demangle")]
    demangle: bool,
    /// The policy deciding how symbol sizes bound matches.
    match_policy: MatchPolicy,
}

impl Builder {
    /// Enable/disable reporting of source code location information.
    pub fn enable_code_info(mut self, enable: bool) -> Self {
        self.code_info = enable;
        self
    }

    /// Enable/disable demangling of symbol names.
    #[cfg(feature = "demangle")]
    pub fn enable_demangling(mut self, enable: bool) -> Self {
        self.demangle = enable;
        self
    }

    /// Set the policy deciding how symbol sizes bound matches.
    pub fn match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    /// Create the [`Symbolizer`] object, bound to the provided image
    /// registry and symbol source provider.
    pub fn build(self, registry: ImageRegistry, provider: Box<dyn SourceProvider>) -> Symbolizer {
        let Self {
            code_info,
            #[cfg(feature = "demangle")]
            demangle,
            match_policy,
        } = self;

        Symbolizer {
            registry,
            provider,
            images: InsertMap::new(),
            resolved: InsertMap::new(),
            code_info,
            #[cfg(feature = "demangle")]
            demangle,
            match_policy,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            code_info: true,
            #[cfg(feature = "demangle")]
            demangle: true,
            match_policy: MatchPolicy::default(),
        }
    }
}


/// The tables built from one symbol source.
#[derive(Debug)]
struct SourceTables {
    symbols: SymbolTable,
    lines: Option<LineTable>,
}


/// A successful symbol match, decoupled from table borrows.
#[derive(Debug)]
struct Hit {
    entry: SymEntry,
    offset: u64,
    code: Option<(PathBuf, u32)>,
}


/// Per-image symbolization state.
///
/// Sources are materialized into tables lazily, one at a time and in
/// fidelity order, and only as far as lookups require.
#[derive(Debug)]
struct ImageState {
    /// The image's sources, from highest to lowest fidelity.
    sources: Vec<Rc<dyn SymbolSource>>,
    /// Tables built so far, parallel to the prefix of usable sources.
    tables: RefCell<Vec<SourceTables>>,
    /// The index of the next source to materialize.
    next: Cell<usize>,
}

impl ImageState {
    fn new(sources: Vec<Rc<dyn SymbolSource>>) -> Self {
        Self {
            sources,
            tables: RefCell::new(Vec::new()),
            next: Cell::new(0),
        }
    }

    /// Look up the symbol covering `addr`, materializing additional
    /// sources as long as already built ones yield no usable match.
    fn lookup(&self, addr: Addr, policy: MatchPolicy) -> Option<Hit> {
        let mut idx = 0;
        loop {
            let hit = {
                let tables = self.tables.borrow();
                loop {
                    let Some(built) = tables.get(idx) else {
                        break None
                    };
                    idx += 1;

                    let Some((entry, offset)) = built.symbols.lookup(addr) else {
                        continue
                    };
                    if entry.size.is_some_and(|size| offset >= size) {
                        if matches!(policy, MatchPolicy::Bounded) {
                            continue
                        }
                        log::debug!(
                            "offset {offset:#x} into symbol {} exceeds its reported size; \
                             match is low-confidence",
                            entry.name
                        );
                    }
                    // A line record only applies if it belongs to the
                    // matched symbol's span; one starting before the
                    // symbol is leftover data of an earlier function.
                    let code = built
                        .lines
                        .as_ref()
                        .and_then(|lines| lines.lookup(addr))
                        .filter(|record| record.addr >= entry.addr)
                        .map(|record| (record.path.clone(), record.line));
                    break Some(Hit {
                        entry: entry.clone(),
                        offset,
                        code,
                    })
                }
            };

            if hit.is_some() {
                return hit
            }
            if !self.materialize_next() {
                return None
            }
        }
    }

    /// Materialize the tables of the next pending source, skipping over
    /// sources that fail to build or come up empty.
    ///
    /// Returns whether a usable table was added.
    fn materialize_next(&self) -> bool {
        loop {
            let idx = self.next.get();
            let Some(source) = self.sources.get(idx) else {
                return false
            };
            let () = self.next.set(idx + 1);

            let symbols = match source.build_symbol_table() {
                Ok(symbols) => symbols,
                Err(err) => {
                    log::warn!("failed to build symbol table from {source:?}: {err}");
                    continue
                }
            };
            if symbols.is_empty() {
                log::debug!("symbol source {source:?} yielded no symbols; skipping");
                continue
            }
            let lines = match source.build_line_table() {
                Ok(lines) => lines,
                Err(err) => {
                    log::warn!("failed to build line table from {source:?}: {err}");
                    None
                }
            };

            let () = self.tables.borrow_mut().push(SourceTables { symbols, lines });
            return true
        }
    }
}


/// A symbolizer resolving the raw addresses of one crash report.
///
/// An instance is scoped to a single report: it owns the report's image
/// registry and keeps per-image state for the duration of the report's
/// resolution. Create a fresh instance for each report.
#[derive(Debug)]
pub struct Symbolizer {
    registry: ImageRegistry,
    provider: Box<dyn SourceProvider>,
    images: InsertMap<ImageId, ImageState>,
    /// Memoized resolution results, keyed by image and unslid address.
    resolved: InsertMap<(ImageId, Addr), ResolvedSymbol>,
    code_info: bool,
    #[cfg(feature = "demangle")]
    demangle: bool,
    match_policy: MatchPolicy,
}

impl Symbolizer {
    /// Create a new [`Symbolizer`] with default settings, bound to the
    /// provided image registry and symbol source provider.
    pub fn new(registry: ImageRegistry, provider: Box<dyn SourceProvider>) -> Self {
        Builder::default().build(registry, provider)
    }

    /// Retrieve a [`Builder`] object for configurable construction of a
    /// [`Symbolizer`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The registry of images this symbolizer works against.
    #[inline]
    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    /// Demangle the provided symbol name, if demangling is enabled and
    /// the name parses as a Rust or C++ mangled symbol.
    #[cfg(feature = "demangle")]
    fn maybe_demangle(&self, name: &str) -> String {
        if !self.demangle {
            return name.to_string()
        }
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return format!("{demangled:#}")
        }
        if let Ok(symbol) = cpp_demangle::Symbol::new(name.as_bytes()) {
            if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
                return demangled
            }
        }
        name.to_string()
    }

    #[cfg(not(feature = "demangle"))]
    fn maybe_demangle(&self, name: &str) -> String {
        name.to_string()
    }

    /// Resolve a single raw address to a symbol record.
    ///
    /// Resolution is best-effort and infallible: when it stops short of
    /// a full match the returned record carries the data obtained up to
    /// that point and names the [`Reason`].
    pub fn symbolize_single(&self, addr: Addr) -> ResolvedSymbol {
        let Some(image) = self.registry.find_owning_image(addr) else {
            log::debug!("no loaded image contains address {addr:#x}");
            return ResolvedSymbol::degraded(addr, addr, PathBuf::new(), Reason::NoOwningImage)
        };

        let unslid = match image.unslide(addr) {
            Ok(unslid) => unslid,
            Err(err) => {
                log::warn!("failed to unslide address {addr:#x}: {err}");
                return ResolvedSymbol::degraded(
                    addr,
                    addr,
                    image.path().to_path_buf(),
                    Reason::SlideUnderflow,
                )
            }
        };

        self.resolved
            .get_or_insert((image.id().clone(), unslid), || {
                self.resolve_in_image(image, addr, unslid)
            })
            .clone()
    }

    fn resolve_in_image(&self, image: &Image, addr: Addr, unslid: Addr) -> ResolvedSymbol {
        let state = self
            .images
            .get_or_insert(image.id().clone(), || {
                ImageState::new(self.provider.sources_for(image.id()))
            });

        let Some(hit) = state.lookup(unslid, self.match_policy) else {
            return ResolvedSymbol::degraded(
                addr,
                unslid - image.link_base(),
                image.path().to_path_buf(),
                Reason::NoSymbolMatch,
            )
        };

        let (source_path, source_line) = if self.code_info {
            hit.code.unwrap_or_default()
        } else {
            Default::default()
        };

        ResolvedSymbol {
            name: self.maybe_demangle(&hit.entry.name),
            addr,
            offset: hit.offset,
            size: hit.entry.size,
            module: image.path().to_path_buf(),
            source_path,
            source_line,
            reason: None,
            _non_exhaustive: (),
        }
    }

    /// Resolve a batch of raw addresses, in input order.
    ///
    /// Resolution of each address is independent: one address degrading
    /// never influences the records of the others.
    pub fn symbolize(&self, addrs: &[Addr]) -> Vec<ResolvedSymbol> {
        addrs.iter().map(|addr| self.symbolize_single(*addr)).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell as StdCell;

    use test_log::test;

    use crate::registry::Image;
    use crate::symbolize::source::StaticProvider;
    use crate::symbolize::source::TableSource;
    use crate::table::LineEntry;
    use crate::table::LineTable;
    use crate::table::SymbolTable;
    use crate::Error;
    use crate::Result;


    fn sym(addr: Addr, name: &str, size: Option<u64>) -> SymEntry {
        SymEntry {
            addr,
            name: name.to_string(),
            size,
        }
    }

    fn simple_symbolizer(entries: Vec<SymEntry>) -> Symbolizer {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x1000, 0x5000, 0x1000));
        let mut provider = StaticProvider::new();
        let () = provider.register(id, Rc::new(TableSource::new(SymbolTable::new(entries))));
        Symbolizer::new(registry, Box::new(provider))
    }

    /// Check that an address inside a registered image resolves to the
    /// nearest preceding symbol with the right offset.
    #[test]
    fn full_resolution() {
        let symbolizer = simple_symbolizer(vec![
            sym(0x1100, "foo", None),
            sym(0x1200, "bar", None),
        ]);

        let resolved = symbolizer.symbolize_single(0x5150);
        assert_eq!(resolved.name, "foo");
        assert_eq!(resolved.offset, 0x50);
        assert_eq!(resolved.module, PathBuf::from("/bin/fixture"));
        assert_eq!(resolved.reason, None);
    }

    /// Check the degraded record emitted when no image owns the address.
    #[test]
    fn no_owning_image() {
        let symbolizer = simple_symbolizer(vec![sym(0x1100, "foo", None)]);

        let resolved = symbolizer.symbolize_single(0x9999_0000);
        assert_eq!(resolved.name, "");
        assert_eq!(resolved.offset, 0x9999_0000);
        assert_eq!(resolved.module, PathBuf::new());
        assert_eq!(resolved.reason, Some(Reason::NoOwningImage));
    }

    /// Check the degraded record emitted when the image's sources have
    /// no symbol at or before the address.
    #[test]
    fn no_symbol_match() {
        let symbolizer = simple_symbolizer(vec![sym(0x1100, "foo", None)]);

        let resolved = symbolizer.symbolize_single(0x5050);
        assert_eq!(resolved.name, "");
        // Offset into the image, not the raw address.
        assert_eq!(resolved.offset, 0x50);
        assert_eq!(resolved.module, PathBuf::from("/bin/fixture"));
        assert_eq!(resolved.reason, Some(Reason::NoSymbolMatch));
    }

    /// Check that the default policy returns matches past the symbol's
    /// reported size.
    #[test]
    fn unbounded_match_past_size() {
        let symbolizer = simple_symbolizer(vec![sym(0x1100, "foo", Some(0x20))]);

        let resolved = symbolizer.symbolize_single(0x5150);
        assert_eq!(resolved.name, "foo");
        assert_eq!(resolved.offset, 0x50);
        assert_eq!(resolved.reason, None);
    }

    /// Check that the bounded match policy rejects matches past the
    /// symbol's reported size.
    #[test]
    fn bounded_match_policy() {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x1000, 0x5000, 0x1000));
        let mut provider = StaticProvider::new();
        let table = SymbolTable::new(vec![sym(0x1100, "foo", Some(0x20))]);
        let () = provider.register(id, Rc::new(TableSource::new(table)));

        let symbolizer = Symbolizer::builder()
            .match_policy(MatchPolicy::Bounded)
            .build(registry, Box::new(provider));

        let resolved = symbolizer.symbolize_single(0x5110);
        assert_eq!(resolved.name, "foo");
        assert_eq!(resolved.offset, 0x10);

        let resolved = symbolizer.symbolize_single(0x5150);
        assert_eq!(resolved.reason, Some(Reason::NoSymbolMatch));
    }

    /// Check that source line records accompany symbol matches when
    /// available and requested.
    #[test]
    fn code_info_reporting() {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x0, 0x5000, 0x1000));
        let table = SymbolTable::new(vec![sym(0x100, "foo", None)]);
        let lines = LineTable::new(vec![
            LineEntry {
                addr: 0x100,
                path: PathBuf::from("a.c"),
                line: 10,
            },
            LineEntry {
                addr: 0x180,
                path: PathBuf::from("a.c"),
                line: 20,
            },
        ]);
        let mut provider = StaticProvider::new();
        let () = provider.register(
            id.clone(),
            Rc::new(TableSource::new(table.clone()).with_line_table(lines.clone())),
        );
        let symbolizer = Symbolizer::new(registry, Box::new(provider));

        let resolved = symbolizer.symbolize_single(0x5170);
        assert_eq!(resolved.source_path, PathBuf::from("a.c"));
        assert_eq!(resolved.source_line, 10);

        let resolved = symbolizer.symbolize_single(0x5190);
        assert_eq!(resolved.source_line, 20);

        // With code info disabled the fields stay empty.
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x0, 0x5000, 0x1000));
        let mut provider = StaticProvider::new();
        let () = provider.register(id, Rc::new(TableSource::new(table).with_line_table(lines)));
        let symbolizer = Symbolizer::builder()
            .enable_code_info(false)
            .build(registry, Box::new(provider));

        let resolved = symbolizer.symbolize_single(0x5170);
        assert_eq!(resolved.source_path, PathBuf::new());
        assert_eq!(resolved.source_line, 0);
    }

    /// A source that fails to build, for fault isolation tests.
    #[derive(Debug)]
    struct FailingSource;

    impl SymbolSource for FailingSource {
        fn build_symbol_table(&self) -> Result<SymbolTable> {
            Err(Error::with_invalid_data("unparsable symbol data"))
        }
    }

    /// A source counting how often its table was built.
    #[derive(Debug)]
    struct CountingSource {
        builds: Rc<StdCell<usize>>,
        table: SymbolTable,
    }

    impl SymbolSource for CountingSource {
        fn build_symbol_table(&self) -> Result<SymbolTable> {
            let () = self.builds.set(self.builds.get() + 1);
            Ok(self.table.clone())
        }
    }

    /// Check that a failing high-fidelity source degrades gracefully to
    /// the next source in line.
    #[test]
    fn source_fallback() {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x0, 0x5000, 0x1000));
        let mut provider = StaticProvider::new();
        let () = provider.register(id.clone(), Rc::new(FailingSource));
        let () = provider.register(
            id,
            Rc::new(TableSource::new(SymbolTable::new(vec![sym(
                0x100,
                "fallback_sym",
                None,
            )]))),
        );
        let symbolizer = Symbolizer::new(registry, Box::new(provider));

        let resolved = symbolizer.symbolize_single(0x5100);
        assert_eq!(resolved.name, "fallback_sym");
        assert_eq!(resolved.reason, None);
    }

    /// Check that a miss in a high-fidelity source falls through to a
    /// lower-fidelity one covering the address.
    #[test]
    fn lower_fidelity_fallback() {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x0, 0x5000, 0x1000));
        let mut provider = StaticProvider::new();
        let () = provider.register(
            id.clone(),
            Rc::new(TableSource::new(SymbolTable::new(vec![sym(
                0x800,
                "late_sym",
                None,
            )]))),
        );
        let () = provider.register(
            id,
            Rc::new(TableSource::new(SymbolTable::new(vec![sym(
                0x100,
                "early_sym",
                None,
            )]))),
        );
        let symbolizer = Symbolizer::new(registry, Box::new(provider));

        // Covered by the high-fidelity source.
        let resolved = symbolizer.symbolize_single(0x5810);
        assert_eq!(resolved.name, "late_sym");

        // Only the low-fidelity source precedes this address.
        let resolved = symbolizer.symbolize_single(0x5200);
        assert_eq!(resolved.name, "early_sym");
        assert_eq!(resolved.reason, None);
    }

    /// Check that repeated resolution of the same address builds each
    /// source's tables at most once and yields identical records.
    #[test]
    fn idempotent_resolution() {
        let id = ImageId::from("fixture");
        let mut registry = ImageRegistry::new();
        let () = registry.register(Image::new(id.clone(), "/bin/fixture", 0x0, 0x5000, 0x1000));
        let builds = Rc::new(StdCell::new(0));
        let mut provider = StaticProvider::new();
        let () = provider.register(
            id,
            Rc::new(CountingSource {
                builds: Rc::clone(&builds),
                table: SymbolTable::new(vec![sym(0x100, "foo", None)]),
            }),
        );
        let symbolizer = Symbolizer::new(registry, Box::new(provider));

        let first = symbolizer.symbolize_single(0x5150);
        let second = symbolizer.symbolize_single(0x5150);
        assert_eq!(first, second);
        assert_eq!(builds.get(), 1);
    }

    /// Check that mangled C++ names come out demangled.
    #[cfg(feature = "demangle")]
    #[test]
    fn demangling() {
        let symbolizer = simple_symbolizer(vec![sym(0x1100, "_Z3addii", None)]);

        let resolved = symbolizer.symbolize_single(0x5100);
        assert_eq!(resolved.name, "add(int, int)");
    }
}
