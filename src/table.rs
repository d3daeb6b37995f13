//! Address-keyed lookup tables for symbols and source line records.

use std::path::PathBuf;

use crate::log;
use crate::util::find_match_or_lower_bound_by;
use crate::Addr;


/// A single symbol as extracted from a symbol source, keyed by its
/// link-time start address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymEntry {
    /// The symbol's link-time start address.
    pub addr: Addr,
    /// The symbol's name, as found in the source (possibly mangled).
    pub name: String,
    /// The symbol's size, if the source knows it.
    pub size: Option<u64>,
}


/// A single source line record, mapping a link-time address to a file
/// and line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineEntry {
    /// The link-time address at which this record starts applying.
    pub addr: Addr,
    /// The path of the source file.
    pub path: PathBuf,
    /// The one-based line number.
    pub line: u32,
}


fn dedup_sorted<T, F>(entries: &mut Vec<T>, mut key: F) -> usize
where
    F: FnMut(&T) -> Addr,
{
    let before = entries.len();
    // `dedup_by` keeps the first of each run of equal keys, which after a
    // stable sort is the first-seen entry.
    let () = entries.dedup_by(|a, b| key(a) == key(b));
    before - entries.len()
}


/// A symbol table supporting nearest-preceding address lookup.
///
/// Entries are sorted by address at construction time. When multiple
/// entries report the same start address the first-seen one wins and the
/// losers are counted as collisions.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymEntry>,
    collisions: usize,
}

impl SymbolTable {
    /// Create a new [`SymbolTable`] from a list of entries in source
    /// order.
    pub fn new(mut entries: Vec<SymEntry>) -> Self {
        let () = entries.sort_by_key(|entry| entry.addr);
        let collisions = dedup_sorted(&mut entries, |entry| entry.addr);
        if collisions > 0 {
            log::warn!("symbol table contains {collisions} colliding start addresses");
        }
        Self { entries, collisions }
    }

    /// Look up the symbol covering `addr`: the entry with the greatest
    /// start address less than or equal to `addr`.
    ///
    /// On success the entry is returned together with the offset of
    /// `addr` into it.
    pub fn lookup(&self, addr: Addr) -> Option<(&SymEntry, u64)> {
        let idx = find_match_or_lower_bound_by(&self.entries, addr, |entry| entry.addr)?;
        let entry = &self.entries[idx];
        Some((entry, addr - entry.addr))
    }

    /// Whether the table contains no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The table's entries, sorted by address.
    #[inline]
    pub fn entries(&self) -> &[SymEntry] {
        &self.entries
    }

    /// The number of entries discarded because another entry reported
    /// the same start address.
    #[inline]
    pub fn collisions(&self) -> usize {
        self.collisions
    }
}


/// A source line table supporting nearest-preceding address lookup.
///
/// Each entry applies from its start address up to the start of the next
/// entry.
#[derive(Clone, Debug, Default)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    /// Create a new [`LineTable`] from a list of entries in source
    /// order.
    pub fn new(mut entries: Vec<LineEntry>) -> Self {
        let () = entries.sort_by_key(|entry| entry.addr);
        let collisions = dedup_sorted(&mut entries, |entry| entry.addr);
        if collisions > 0 {
            log::debug!("line table contains {collisions} colliding start addresses");
        }
        Self { entries }
    }

    /// Look up the source location for `addr`: the record with the
    /// greatest start address less than or equal to `addr`.
    pub fn lookup(&self, addr: Addr) -> Option<&LineEntry> {
        let idx = find_match_or_lower_bound_by(&self.entries, addr, |entry| entry.addr)?;
        Some(&self.entries[idx])
    }

    /// Whether the table contains no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
