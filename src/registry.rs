//! Tracking of the binary images loaded by a crashed process.
//!
//! A crash report describes which images (executable and shared objects)
//! were mapped at which addresses. The [`ImageRegistry`] answers the two
//! questions the resolution engine has about them: which image owns a
//! given raw address, and what that address looks like in the image's
//! link-time address space once the ASLR slide is undone.

use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::path::Path;
use std::path::PathBuf;

use crate::log;
use crate::util::find_match_or_lower_bound_by;
use crate::Addr;
use crate::Error;
use crate::Result;


/// A stable identifier for a binary image, typically a build ID or
/// content hash as recorded in the crash report.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(String);

impl ImageId {
    /// Create a new [`ImageId`] from the provided identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Retrieve the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}


/// A binary image loaded by the crashed process.
///
/// The slide (the difference between the runtime load address and the
/// link-time base address) is computed once at construction and stays
/// fixed for the image's lifetime within a report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    id: ImageId,
    path: PathBuf,
    link_base: Addr,
    load_addr: Addr,
    size: u64,
    slide: i64,
}

impl Image {
    /// Create a new [`Image`] from the data of a loaded-image descriptor.
    pub fn new(
        id: ImageId,
        path: impl Into<PathBuf>,
        link_base: Addr,
        load_addr: Addr,
        size: u64,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            link_base,
            load_addr,
            size,
            slide: load_addr.wrapping_sub(link_base) as i64,
        }
    }

    /// The image's stable build identifier.
    #[inline]
    pub fn id(&self) -> &ImageId {
        &self.id
    }

    /// The image's filesystem path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The image's link-time base address.
    #[inline]
    pub fn link_base(&self) -> Addr {
        self.link_base
    }

    /// The address at which the image was observed loaded.
    #[inline]
    pub fn load_addr(&self) -> Addr {
        self.load_addr
    }

    /// The image's size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The image's ASLR slide.
    #[inline]
    pub fn slide(&self) -> i64 {
        self.slide
    }

    /// Check whether the image's runtime range contains `addr`.
    #[inline]
    pub fn contains(&self, addr: Addr) -> bool {
        addr >= self.load_addr && addr - self.load_addr < self.size
    }

    /// Translate a raw runtime address back into the image's link-time
    /// address space by undoing the slide.
    ///
    /// The result is guaranteed to be at or above the image's link-time
    /// base; anything else fails with an [`ErrorKind::InvalidInput`]
    /// [`Error`].
    ///
    /// [`ErrorKind::InvalidInput`]: crate::ErrorKind::InvalidInput
    pub fn unslide(&self, addr: Addr) -> Result<Addr> {
        let offset = addr.checked_sub(self.load_addr).ok_or_else(|| {
            Error::with_invalid_input(format!(
                "address {addr:#x} underflows load address {:#x} of {}",
                self.load_addr,
                self.path.display()
            ))
        })?;
        self.link_base.checked_add(offset).ok_or_else(|| {
            Error::with_invalid_input(format!(
                "address {addr:#x} overflows link-time space of {}",
                self.path.display()
            ))
        })
    }
}


/// Check whether `lower`'s runtime range reaches into `upper`'s. A
/// range wrapping past the end of the address space counts as
/// overlapping.
fn reaches_into(lower: &Image, upper: &Image) -> bool {
    lower
        .load_addr
        .checked_add(lower.size)
        .map_or(true, |end| end > upper.load_addr)
}


/// The registry of binary images loaded in one crashed process.
///
/// A registry is owned by a single report resolution session and is not
/// shared across reports.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    /// All registered images, sorted by load address.
    images: Vec<Image>,
    /// Whether any two registered images have overlapping runtime
    /// ranges, which points at malformed report input.
    overlapping: bool,
}

impl ImageRegistry {
    /// Create a new, empty [`ImageRegistry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from a list of images.
    pub fn with_images(images: Vec<Image>) -> Self {
        let mut registry = Self::new();
        for image in images {
            let () = registry.register(image);
        }
        registry
    }

    /// Register a loaded image.
    ///
    /// Overlapping runtime ranges are tolerated but flagged: lookups stay
    /// deterministic (see [`find_owning_image`][Self::find_owning_image])
    /// and [`is_suspect`][Self::is_suspect] reports the condition.
    pub fn register(&mut self, image: Image) {
        let idx = self
            .images
            .partition_point(|other| other.load_addr <= image.load_addr);
        if let Some(prev) = idx.checked_sub(1).and_then(|idx| self.images.get(idx)) {
            if reaches_into(prev, &image) {
                log::warn!(
                    "images {} and {} have overlapping load ranges; input is suspect",
                    prev.path.display(),
                    image.path.display()
                );
                self.overlapping = true;
            }
        }
        if let Some(next) = self.images.get(idx) {
            if reaches_into(&image, next) {
                log::warn!(
                    "images {} and {} have overlapping load ranges; input is suspect",
                    image.path.display(),
                    next.path.display()
                );
                self.overlapping = true;
            }
        }
        let () = self.images.insert(idx, image);
    }

    /// Whether the registered images had overlapping runtime ranges, an
    /// indication of malformed report input.
    #[inline]
    pub fn is_suspect(&self) -> bool {
        self.overlapping
    }

    /// Iterate over all registered images.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    /// Find the image whose runtime range contains `addr`.
    ///
    /// With well-formed input at most one image can match. Should ranges
    /// overlap, the image with the smallest load address not exceeding
    /// `addr` wins, deterministically.
    pub fn find_owning_image(&self, addr: Addr) -> Option<&Image> {
        let idx = find_match_or_lower_bound_by(&self.images, addr, |image| image.load_addr)?;
        if !self.overlapping {
            return self.images[idx].contains(addr).then(|| &self.images[idx])
        }
        // Overlap means images left of `idx` may reach over the one found
        // by the search. Pick the containing image with the smallest load
        // address.
        self.images[..=idx].iter().find(|image| image.contains(addr))
    }
}
