//! Resolution of raw crash report addresses to symbol records.
//!
//! ```
//! use std::rc::Rc;
//!
//! use crashsym::registry::Image;
//! use crashsym::registry::ImageId;
//! use crashsym::registry::ImageRegistry;
//! use crashsym::symbolize::source::StaticProvider;
//! use crashsym::symbolize::source::TableSource;
//! use crashsym::symbolize::Symbolizer;
//! use crashsym::table::SymEntry;
//! use crashsym::table::SymbolTable;
//!
//! let id = ImageId::from("demo-build-id");
//! let mut registry = ImageRegistry::new();
//! registry.register(Image::new(id.clone(), "/bin/demo", 0x1000, 0x5000, 0x1000));
//!
//! let table = SymbolTable::new(vec![SymEntry {
//!     addr: 0x1040,
//!     name: "demo_init".to_string(),
//!     size: None,
//! }]);
//! let mut provider = StaticProvider::new();
//! provider.register(id, Rc::new(TableSource::new(table)));
//!
//! let symbolizer = Symbolizer::new(registry, Box::new(provider));
//! let resolved = symbolizer.symbolize_single(0x5050);
//! assert_eq!(resolved.name, "demo_init");
//! assert_eq!(resolved.offset, 0x10);
//! assert_eq!(resolved.reason, None);
//! ```

use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::path::PathBuf;

pub mod source;
mod symbolizer;

pub use symbolizer::Builder;
pub use symbolizer::Symbolizer;

use crate::Addr;


/// The reason why resolution of an address stopped short of a full
/// symbol match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Reason {
    /// No registered image's runtime range contains the address.
    NoOwningImage,
    /// Undoing the owning image's slide would move the address below the
    /// image's load address.
    SlideUnderflow,
    /// The owning image's symbol sources contain no symbol at or before
    /// the unslid address.
    NoSymbolMatch,
}

impl Reason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NoOwningImage => "no loaded image contains the address",
            Self::SlideUnderflow => "address undercuts the containing image's load address",
            Self::NoSymbolMatch => "no symbol covers the address",
        }
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self.as_str(), f)
    }
}


/// The policy deciding whether a symbol covers addresses past its
/// reported size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// A symbol covers every address from its start up to the next
    /// symbol's start, regardless of its reported size.
    ///
    /// Sources commonly under-report sizes or omit them entirely, so
    /// this is the default.
    #[default]
    Unbounded,
    /// A symbol only covers addresses within its reported size. Matches
    /// past the size degrade to [`Reason::NoSymbolMatch`]. Symbols
    /// without a size are treated as unbounded.
    Bounded,
}


/// The result of resolving one raw address.
///
/// Resolution never fails outright: when full resolution is impossible
/// the record carries the best data obtainable and [`reason`][Self::reason]
/// explains what is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// The name of the matched symbol, or the empty string if no symbol
    /// matched.
    pub name: String,
    /// The raw address as it appeared in the report.
    pub addr: Addr,
    /// The offset of the address into the matched symbol. Without a
    /// match this is the offset into the image, or the raw address when
    /// no image owns it.
    pub offset: u64,
    /// The size of the matched symbol, if known.
    pub size: Option<u64>,
    /// The path of the image owning the address, or empty if none does.
    pub module: PathBuf,
    /// The path of the source file containing the address, or empty if
    /// no line data is available.
    pub source_path: PathBuf,
    /// The one-based source line number, or zero if no line data is
    /// available.
    pub source_line: u32,
    /// The reason resolution stopped short of a full symbol match, if it
    /// did.
    pub reason: Option<Reason>,
    /// The struct is non-exhaustive and open to extension.
    #[doc(hidden)]
    pub _non_exhaustive: (),
}

impl ResolvedSymbol {
    pub(crate) fn degraded(addr: Addr, offset: u64, module: PathBuf, reason: Reason) -> Self {
        Self {
            name: String::new(),
            addr,
            offset,
            size: None,
            module,
            source_path: PathBuf::new(),
            source_line: 0,
            reason: Some(reason),
            _non_exhaustive: (),
        }
    }
}
