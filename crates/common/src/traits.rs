use std::sync::atomic::{AtomicBool, Ordering};

use crate::chunk::ChunkName;
use crate::error::IndexError;
use crate::geometry::{PhysicalChapterNumber, Vcn};

/// Scoped RAII guard for the volume's `LOOKUP_FOR_REBUILD` mode (spec §9:
/// "model as a scoped guard that restores the prior mode on all exit paths,
/// including error"). Holding the guard sets the flag; dropping it restores
/// the flag to `false`, whether the scope exited normally or via `?`.
pub struct LookupModeGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LookupModeGuard<'a> {
    pub fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for LookupModeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One index page's checkpoint summary, read back during replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexPageSummary {
    pub lowest_list_number: u32,
    pub highest_list_number: u32,
}

/// What `Volume::get_page` returns: exactly one of the two shapes is
/// meaningful for a given page number, mirroring spec §6's "exactly one of
/// the two out-parameters is used by the caller per call."
pub enum PageContent {
    Index(IndexPageSummary),
    Record(Vec<ChunkName>),
}

/// The physical volume: page I/O, chapter boundary discovery, and the
/// rebuild-lookup scoped mode. Out of scope per spec §1 ("assumed
/// available"); this trait is the capability seam the core dispatches
/// through, so tests can substitute an in-memory double.
pub trait Volume: Send + Sync {
    /// Scan the volume for the lowest and highest virtual chapter with a
    /// valid boundary marker. `is_empty` is true when no chapter has ever
    /// been written.
    fn find_chapter_boundaries(&self) -> Result<(Vcn, Vcn, bool), IndexError>;

    fn get_page(
        &self,
        physical_chapter: PhysicalChapterNumber,
        page: u32,
    ) -> Result<PageContent, IndexError>;

    fn prefetch_pages(&self, physical_chapter: PhysicalChapterNumber, count: u32);

    /// Disk/cache confirmation: does this physical chapter actually still
    /// contain a record for `name`? Used to resolve overflow records and to
    /// disambiguate non-collision hints that point at a stale chapter.
    fn chapter_contains_name(
        &self,
        physical_chapter: PhysicalChapterNumber,
        name: &ChunkName,
    ) -> Result<bool, IndexError>;

    fn begin_rebuild_lookup(&self) -> LookupModeGuard<'_>;
}

/// Triage result from a cheap, lock-free-ish master-index lookup, used to
/// decide whether a sparse-cache barrier is needed before processing a
/// request (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterIndexTriage {
    pub in_sampled_chapter: bool,
    pub virtual_chapter: Vcn,
}

/// A handle into the master index's delta list, obtained from `get_record`
/// and passed back into `set_record_chapter`/`put_record`/`remove_record`.
/// Plain data rather than an opaque cursor type, since the in-memory
/// delta-list implementation re-resolves the slot from `name`/`zone` — but
/// callers must treat it as a private handle, not construct one by hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterIndexRecord {
    pub name: ChunkName,
    pub zone: usize,
    pub found: bool,
    pub collision: bool,
    pub virtual_chapter: Vcn,
}

impl MasterIndexRecord {
    pub fn not_found(name: ChunkName, zone: usize) -> Self {
        Self {
            name,
            zone,
            found: false,
            collision: false,
            virtual_chapter: 0,
        }
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn is_collision(&self) -> bool {
        self.collision
    }

    /// An overflow record (spec GLOSSARY): a collision entry whose chapter
    /// no longer actually contains the name. Computed by the caller once it
    /// has confirmed presence on the volume; not stored on the handle.
    pub fn overflow_record(&self, confirmed_present: bool) -> bool {
        self.found && self.collision && !confirmed_present
    }
}

/// The master-index delta-list store: fingerprint -> (virtual chapter,
/// collision bit), sharded per zone. Out of scope per spec §1; this trait is
/// the capability seam.
pub trait MasterIndex: Send + Sync {
    fn get_record(&self, zone: usize, name: &ChunkName) -> Result<MasterIndexRecord, IndexError>;

    fn set_record_chapter(&self, record: &MasterIndexRecord, vcn: Vcn) -> Result<(), IndexError>;

    /// May return `IndexError::DuplicateName` or `IndexError::Overflow`;
    /// both are transient-tolerated by the core (spec §7).
    fn put_record(&self, record: &MasterIndexRecord, vcn: Vcn) -> Result<(), IndexError>;

    fn remove_record(&self, record: &MasterIndexRecord) -> Result<(), IndexError>;

    fn is_sample(&self, name: &ChunkName) -> bool;

    fn set_open_chapter(&self, vcn: Vcn);

    fn lookup_name(&self, zone: usize, name: &ChunkName) -> MasterIndexTriage;
}
