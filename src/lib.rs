//! **crashsym** is a library for turning raw addresses captured in a process
//! crash report into symbolic locations: the owning binary image, the symbol
//! name, the byte offset into that symbol, and, when debug information is
//! available, the source file and line number.
//!
//! The library is organized around a few small components:
//! - [`registry`] tracks the binary images a crashed process had loaded and
//!   undoes the per-image ASLR slide.
//! - [`table`] provides sorted address-to-symbol and address-to-source-line
//!   lookup tables with nearest-preceding search semantics.
//! - [`symbolize`] contains the [`Symbolizer`][symbolize::Symbolizer], which
//!   orchestrates image lookup, address translation, and table queries, and
//!   degrades gracefully when data is missing or malformed.
//!
//! Symbol and line data is obtained through the
//! [`SymbolSource`][symbolize::source::SymbolSource] trait. Adapters for
//! plain-text symbol maps ([`symmap`]) and Breakpad symbol files
//! ([`breakpad`], feature `breakpad`) ship with the crate; callers with other
//! debug-info formats plug in their own sources.
//!
//! A [`Symbolizer`][symbolize::Symbolizer] is scoped to a single crash
//! report: it owns the report's image registry and all per-image caches.
//! Independent reports use independent symbolizer instances and can be
//! processed on separate threads without any shared state.

#[allow(unused_imports)]
pub(crate) mod log {
    pub(crate) use tracing::debug;
    pub(crate) use tracing::error;
    pub(crate) use tracing::info;
    pub(crate) use tracing::trace;
    pub(crate) use tracing::warn;
}

#[cfg(feature = "breakpad")]
pub mod breakpad;
mod error;
mod insert_map;
pub mod registry;
pub mod symbolize;
pub mod symmap;
pub mod table;
mod util;

pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::Result;


/// A type representing addresses, slid or unslid.
pub type Addr = u64;
