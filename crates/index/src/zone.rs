use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dedupe_index_common::{
    ChunkName, Geometry, IndexError, IndexPageSummary, Location, MasterIndex, MasterIndexRecord,
    PageContent, PhysicalChapterNumber, RecordData, Request, RequestAction, Vcn, Volume,
};
use dedupe_index_master::SparseChapterCache;
use dedupe_index_volume::ChapterWriter;

/// Spreads synthetic delta-list ranges evenly across an index page's worth
/// of bookkeeping at chapter-close time. Not the master index's real list
/// count (that lives inside `dedupe-index-master` and isn't exposed to this
/// crate) — only internal consistency between what a zone writes here and
/// what `replay` expects back matters, not numeric fidelity to the delta
/// list itself.
const LIST_NUMBER_SPACE: u32 = 997;

/// `OVERFLOW`/`DUPLICATE_NAME` from the delta-list contract are transient-
/// tolerated (spec §7): a dropped or redundant record is reported to the
/// caller as success, never surfaced as a zone-fatal error.
fn tolerate_transient(result: Result<(), IndexError>) -> Result<(), IndexError> {
    match result {
        Ok(()) => Ok(()),
        Err(error) if error.is_transient_tolerated() => Ok(()),
        Err(error) => Err(error),
    }
}

fn build_index_page_summaries(pages: u32) -> Vec<IndexPageSummary> {
    if pages == 0 {
        return Vec::new();
    }
    let span = (LIST_NUMBER_SPACE / pages).max(1);
    (0..pages)
        .map(|i| {
            let lowest = i * span;
            let highest = if i + 1 == pages {
                LIST_NUMBER_SPACE.saturating_sub(1)
            } else {
                (i + 1) * span - 1
            };
            IndexPageSummary { lowest_list_number: lowest, highest_list_number: highest }
        })
        .collect()
}

fn partition_into_pages(names: Vec<ChunkName>, pages: u32, per_page: u32) -> Vec<Vec<ChunkName>> {
    let per_page = per_page.max(1) as usize;
    let page_count = pages.max(1) as usize;
    let mut result: Vec<Vec<ChunkName>> = (0..page_count).map(|_| Vec::new()).collect();
    for (i, name) in names.into_iter().enumerate() {
        let page_index = (i / per_page).min(page_count - 1);
        result[page_index].push(name);
    }
    result
}

/// The record set for the chapter currently being filled. Grounded on the
/// teacher's `compute::BufferPool` (bounded map with explicit full/evict
/// semantics), generalized from LRU eviction to a hard capacity — an open
/// chapter never evicts, it closes and rotates instead.
struct OpenChapter {
    capacity: usize,
    entries: HashMap<ChunkName, RecordData>,
}

impl OpenChapter {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new() }
    }

    fn find(&self, name: &ChunkName) -> Option<RecordData> {
        self.entries.get(name).copied()
    }

    fn put(&mut self, name: ChunkName, data: RecordData) -> Result<(), IndexError> {
        if !self.entries.contains_key(&name) && self.entries.len() >= self.capacity {
            return Err(IndexError::Overflow);
        }
        self.entries.insert(name, data);
        Ok(())
    }

    fn remove(&mut self, name: &ChunkName) -> bool {
        self.entries.remove(name).is_some()
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Vec<(ChunkName, RecordData)> {
        self.entries.iter().map(|(name, data)| (*name, *data)).collect()
    }

    fn restore(&mut self, entries: Vec<(ChunkName, RecordData)>) {
        self.entries = entries.into_iter().collect();
    }
}

/// One shard of the index: its own open chapter, its own slice of the
/// master index, and the active-chapter window it currently covers.
/// Grounded on the teacher's `storage::Inner` (per-shard mutable state
/// behind a lock, with an injected `StorageApi` collaborator) generalized
/// from a single storage tier to a zone's request-dispatch pipeline.
pub struct IndexZone {
    zone_number: usize,
    geometry: Geometry,
    volume: Arc<dyn Volume>,
    master_index: Arc<dyn MasterIndex>,
    chapter_writer: Arc<ChapterWriter>,
    sparse_cache: Arc<SparseChapterCache>,
    open_chapter: Mutex<OpenChapter>,
    oldest: AtomicU64,
    newest: AtomicU64,
    /// True only for the sole zone of a single-zone, sparse-geometry index.
    /// A multi-zone index always triages through a dedicated lookup rather
    /// than having each zone simulate the barrier itself.
    single_zone_sparse: bool,
}

impl IndexZone {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zone_number: usize,
        geometry: Geometry,
        volume: Arc<dyn Volume>,
        master_index: Arc<dyn MasterIndex>,
        chapter_writer: Arc<ChapterWriter>,
        sparse_cache: Arc<SparseChapterCache>,
        open_chapter_capacity: usize,
        single_zone_sparse: bool,
    ) -> Self {
        Self {
            zone_number,
            geometry,
            volume,
            master_index,
            chapter_writer,
            sparse_cache,
            open_chapter: Mutex::new(OpenChapter::new(open_chapter_capacity)),
            oldest: AtomicU64::new(0),
            newest: AtomicU64::new(0),
            single_zone_sparse,
        }
    }

    pub fn zone_number(&self) -> usize {
        self.zone_number
    }

    pub fn set_active_chapters(&self, oldest: Vcn, newest: Vcn) {
        self.oldest.store(oldest, Ordering::SeqCst);
        self.newest.store(newest, Ordering::SeqCst);
    }

    pub fn oldest(&self) -> Vcn {
        self.oldest.load(Ordering::SeqCst)
    }

    pub fn newest(&self) -> Vcn {
        self.newest.load(Ordering::SeqCst)
    }

    pub fn open_chapter_size(&self) -> usize {
        self.open_chapter.lock().unwrap().size()
    }

    pub fn open_chapter_snapshot(&self) -> Vec<(ChunkName, RecordData)> {
        self.open_chapter.lock().unwrap().snapshot()
    }

    pub fn restore_open_chapter(&self, entries: Vec<(ChunkName, RecordData)>) {
        self.open_chapter.lock().unwrap().restore(entries);
    }

    /// Hand the open chapter's pages to the chapter writer and start a
    /// fresh one at `vcn + 1` (spec §4.5 "advance active chapters").
    pub fn close_open_chapter(&self, vcn: Vcn) -> Result<(), IndexError> {
        let entries = {
            let mut open = self.open_chapter.lock().unwrap();
            let snapshot = open.snapshot();
            open.clear();
            snapshot
        };

        let physical_chapter: PhysicalChapterNumber = self.geometry.map_to_physical_chapter(vcn);
        let index_pages = build_index_page_summaries(self.geometry.index_pages_per_chapter);
        let record_pages = partition_into_pages(
            entries.iter().map(|(name, _)| *name).collect(),
            self.geometry.record_pages_per_chapter,
            self.geometry.records_per_page,
        );

        self.chapter_writer.submit(physical_chapter, vcn, index_pages, record_pages)?;
        self.master_index.set_open_chapter(vcn + 1);
        Ok(())
    }

    fn already_in_open_chapter(&self, name: &ChunkName) -> bool {
        self.open_chapter.lock().unwrap().find(name).is_some()
    }

    fn get_record_from_zone(&self, name: &ChunkName) -> Result<MasterIndexRecord, IndexError> {
        self.master_index.get_record(self.zone_number, name)
    }

    fn put_record_in_zone(&self, name: &ChunkName, vcn: Vcn) -> Result<(), IndexError> {
        self.master_index.put_record(&MasterIndexRecord::not_found(*name, self.zone_number), vcn)
    }

    /// Load a sparse chapter's record pages into the sparse cache wholesale
    /// (spec §4.4: sparse chapters are consulted only for sampled names, so
    /// caching the whole chapter's name set is cheap relative to the dense
    /// per-page cache).
    fn load_sparse_chapter(&self, vcn: Vcn) -> Result<(), IndexError> {
        let physical = self.geometry.map_to_physical_chapter(vcn);
        let mut names = Vec::new();
        for page in 0..self.geometry.record_pages_per_chapter {
            let page_number = self.geometry.index_pages_per_chapter + page;
            if let PageContent::Record(page_names) = self.volume.get_page(physical, page_number)? {
                names.extend(page_names);
            }
        }
        self.sparse_cache.insert(vcn, names);
        Ok(())
    }

    /// Single-zone-sparse barrier simulation (spec §4.3 point 1, §4.4): when
    /// this zone alone stands in for the triage stage a multi-zone index
    /// would otherwise run, warm the sparse cache for the name's chapter
    /// before letting the request proceed, then requeue it once so the
    /// warmed cache is actually consulted.
    fn simulate_sparse_barrier(&self, request: &mut Request) -> Result<Option<Result<(), IndexError>>, IndexError> {
        let triage = self.master_index.lookup_name(self.zone_number, &request.chunk_name);
        if !triage.in_sampled_chapter {
            return Ok(None);
        }
        if self.sparse_cache.get(triage.virtual_chapter).is_none() {
            self.load_sparse_chapter(triage.virtual_chapter)?;
        }
        request.requeued = true;
        let result = self.dispatch(request);
        request.requeued = false;
        Ok(Some(result))
    }

    /// Route one request through this zone (spec §4.3). `Delete` goes
    /// through `remove`; every other action goes through `search`.
    pub fn dispatch(&self, request: &mut Request) -> Result<(), IndexError> {
        if !request.requeued && self.single_zone_sparse {
            if let Some(result) = self.simulate_sparse_barrier(request)? {
                return result;
            }
        }
        match request.action {
            RequestAction::Delete => self.remove(request),
            _ => self.search(request),
        }
    }

    fn search(&self, request: &mut Request) -> Result<(), IndexError> {
        let name = request.chunk_name;
        let already_open = self.already_in_open_chapter(&name);
        let record = self.get_record_from_zone(&name)?;
        let found = record.is_found();

        // Disk/cache confirmation (spec §4.3) applies to every found record,
        // not only collision entries — only `overflow_record` is
        // collision-specific. An entry already resident in this zone's open
        // chapter is trusted without a volume check: its physical chapter
        // may not exist on disk yet.
        let confirmed_present = if !found {
            false
        } else if already_open {
            true
        } else {
            let physical = self.geometry.map_to_physical_chapter(record.virtual_chapter);
            self.volume.chapter_contains_name(physical, &name)?
        };
        let overflow = record.overflow_record(confirmed_present);
        let resolved = confirmed_present || overflow;

        if already_open {
            request.location = Location::InOpenChapter;
        } else if resolved {
            let from = self.newest().saturating_sub(self.geometry.chapters_per_volume);
            request.location =
                if self.geometry.is_chapter_sparse(from, self.newest(), record.virtual_chapter) {
                    Location::InSparse
                } else {
                    Location::InDense
                };
        } else {
            let hit_in_sparse = self.single_zone_sparse && self.sparse_cache.contains(&name);
            request.location = if hit_in_sparse { Location::InSparse } else { Location::Unavailable };
            if request.action == RequestAction::Query && (!hit_in_sparse || !request.update) {
                return Ok(());
            }
        }

        if request.action == RequestAction::Query {
            if request.update && (already_open || resolved) {
                tolerate_transient(self.master_index.set_record_chapter(&record, self.newest()))?;
                let mut open = self.open_chapter.lock().unwrap();
                open.put(name, request.new_metadata.unwrap_or_default())?;
            }
            return Ok(());
        }

        if found || overflow {
            tolerate_transient(self.master_index.set_record_chapter(&record, self.newest()))?;
        } else if request.action != RequestAction::Query {
            tolerate_transient(self.put_record_in_zone(&name, self.newest()))?;
        }

        if matches!(request.action, RequestAction::Update | RequestAction::Index) {
            let mut open = self.open_chapter.lock().unwrap();
            open.put(name, request.new_metadata.unwrap_or_default())?;
        }

        Ok(())
    }

    /// Spec §4.3 `remove`: a non-collision hint is confirmed against the
    /// volume before deleting; the reported `location` reflects where the
    /// record lived, and only an open-chapter hit also clears the zone's
    /// in-memory buffer.
    fn remove(&self, request: &mut Request) -> Result<(), IndexError> {
        let name = request.chunk_name;
        let record = self.get_record_from_zone(&name)?;
        if !record.is_found() {
            request.location = Location::Unavailable;
            return Ok(());
        }

        let already_open = self.already_in_open_chapter(&name);
        // Spec §4.3: confirm non-collision hints against the volume before
        // deleting. A colliding name in the same chapter may yield a stale
        // hint later and is accepted (probability ~2^-21). An entry still in
        // this zone's open chapter is trusted without a volume check: it
        // hasn't been written to a physical chapter yet.
        let confirmed_present = if record.is_collision() || already_open {
            true
        } else {
            let physical = self.geometry.map_to_physical_chapter(record.virtual_chapter);
            self.volume.chapter_contains_name(physical, &name)?
        };
        if !confirmed_present {
            request.location = Location::Unavailable;
            return Ok(());
        }

        request.location = if already_open {
            Location::InOpenChapter
        } else {
            let from = self.newest().saturating_sub(self.geometry.chapters_per_volume);
            if self.geometry.is_chapter_sparse(from, self.newest(), record.virtual_chapter) {
                Location::InSparse
            } else {
                Location::InDense
            }
        };

        self.master_index.remove_record(&record)?;
        if request.location == Location::InOpenChapter {
            self.open_chapter.lock().unwrap().remove(&name);
        }
        Ok(())
    }
}
