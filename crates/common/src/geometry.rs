use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Monotonically increasing chapter identifier over the life of the index.
pub type VirtualChapterNumber = u64;

/// Shorthand used throughout the core, matching spec terminology.
pub type Vcn = VirtualChapterNumber;

/// A chapter's position in the physical ring (`vcn mod chapters_per_volume`).
pub type PhysicalChapterNumber = u64;

/// Sentinel for `Index::last_checkpoint`. An explicit variant rather than a
/// magic `u64::MAX`, per the design note in spec §9: "use an explicit
/// variant (`None | Chapter(vcn)`), not `UINT_MAX`." The mapping
/// `None <-> open_chapter_number == 0` must hold across the save/load
/// boundary for on-disk compatibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    None,
    Chapter(Vcn),
}

impl Checkpoint {
    pub fn as_vcn(self) -> Option<Vcn> {
        match self {
            Checkpoint::None => None,
            Checkpoint::Chapter(vcn) => Some(vcn),
        }
    }

    /// The VCN to encode on disk as the "open chapter number" at save time:
    /// `last_checkpoint + 1`, or `0` if there is no checkpoint yet.
    pub fn next_open_chapter(self) -> Vcn {
        match self {
            Checkpoint::None => 0,
            Checkpoint::Chapter(vcn) => vcn + 1,
        }
    }
}

/// Immutable physical/virtual chapter arithmetic, fixed once the volume is
/// formatted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Size of the physical ring: number of chapter slots on the volume.
    pub chapters_per_volume: u64,
    /// Pages holding the chapter's index (delta-list checkpoint) structure.
    pub index_pages_per_chapter: u32,
    /// Pages holding the chapter's record data.
    pub record_pages_per_chapter: u32,
    /// Records that fit in a single record page.
    pub records_per_page: u32,
    /// Trailing window (within `[oldest, newest)`) of chapters treated as
    /// sparse: only sampled names are indexed there.
    pub sparse_chapters_per_volume: u64,
}

impl Geometry {
    pub fn new(
        chapters_per_volume: u64,
        index_pages_per_chapter: u32,
        record_pages_per_chapter: u32,
        records_per_page: u32,
        sparse_chapters_per_volume: u64,
    ) -> Result<Self, IndexError> {
        if chapters_per_volume == 0 || records_per_page == 0 {
            return Err(IndexError::InvalidArgument(
                "chapters_per_volume and records_per_page must be nonzero".into(),
            ));
        }
        if sparse_chapters_per_volume >= chapters_per_volume {
            return Err(IndexError::InvalidArgument(
                "sparse window cannot cover the whole ring".into(),
            ));
        }
        Ok(Self {
            chapters_per_volume,
            index_pages_per_chapter,
            record_pages_per_chapter,
            records_per_page,
            sparse_chapters_per_volume,
        })
    }

    /// Total pages in a chapter: `index_pages + record_pages`.
    pub fn pages_per_chapter(&self) -> u32 {
        self.index_pages_per_chapter + self.record_pages_per_chapter
    }

    /// `map_to_physical(vcn) = vcn mod chapters_per_volume`.
    pub fn map_to_physical_chapter(&self, vcn: Vcn) -> PhysicalChapterNumber {
        vcn % self.chapters_per_volume
    }

    pub fn are_same_physical_chapter(&self, a: Vcn, b: Vcn) -> bool {
        self.map_to_physical_chapter(a) == self.map_to_physical_chapter(b)
    }

    /// True iff this geometry carries a nonempty sparse window at all.
    pub fn is_sparse(&self) -> bool {
        self.sparse_chapters_per_volume > 0
    }

    /// `is_chapter_sparse(from, upto, vcn)`: true iff `vcn` falls inside the
    /// trailing sparse window of `[from, upto)` — i.e. it is recent enough
    /// to be within `sparse_chapters_per_volume` of `upto`, but not the open
    /// chapter itself (`vcn < upto`).
    pub fn is_chapter_sparse(&self, from: Vcn, upto: Vcn, vcn: Vcn) -> bool {
        if !self.is_sparse() || vcn >= upto {
            return false;
        }
        if vcn < from {
            return false;
        }
        upto - vcn <= self.sparse_chapters_per_volume
    }
}
