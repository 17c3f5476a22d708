use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dedupe_index_common::{
    Checkpoint, Geometry, IndexError, LoadedType, MasterIndex, Request, Vcn, Volume,
};
use dedupe_index_master::DeltaListMasterIndex;
use dedupe_index_volume::ChapterWriter;

use crate::load_context::LoadContext;
use crate::stats::IndexStats;
use crate::zone::IndexZone;

/// Container of zones; owns Geometry, Volume, MasterIndex, ChapterWriter;
/// routing and lifecycle (spec §2 row "Index", §3 "Index" entity).
///
/// `free_index` has no explicit counterpart here: every collaborator is
/// held behind an `Arc`, so dropping an `Index` releases them the moment
/// the last reference goes away. Field declaration order below still
/// mirrors the construction order spec §9 asks `free_index` to reverse —
/// zones (which hold their own clones of the shared collaborators) are
/// declared, and therefore dropped, before the collaborators themselves.
pub struct Index {
    base_dir: PathBuf,
    geometry: Geometry,
    zones: Vec<IndexZone>,
    chapter_writer: Arc<ChapterWriter>,
    master_index: Arc<DeltaListMasterIndex>,
    volume: Arc<dyn Volume>,
    oldest_virtual_chapter: AtomicU64,
    newest_virtual_chapter: AtomicU64,
    last_checkpoint: Mutex<Checkpoint>,
    prev_checkpoint: Mutex<Checkpoint>,
    loaded_type: Mutex<LoadedType>,
    has_saved_open_chapter: AtomicBool,
    load_context: Arc<LoadContext>,
}

impl Index {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        base_dir: PathBuf,
        geometry: Geometry,
        zones: Vec<IndexZone>,
        chapter_writer: Arc<ChapterWriter>,
        master_index: Arc<DeltaListMasterIndex>,
        volume: Arc<dyn Volume>,
        load_context: Arc<LoadContext>,
    ) -> Self {
        Self {
            base_dir,
            geometry,
            zones,
            chapter_writer,
            master_index,
            volume,
            oldest_virtual_chapter: AtomicU64::new(0),
            newest_virtual_chapter: AtomicU64::new(0),
            last_checkpoint: Mutex::new(Checkpoint::None),
            prev_checkpoint: Mutex::new(Checkpoint::None),
            loaded_type: Mutex::new(LoadedType::Create),
            has_saved_open_chapter: AtomicBool::new(false),
            load_context,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn oldest_virtual_chapter(&self) -> Vcn {
        self.oldest_virtual_chapter.load(Ordering::SeqCst)
    }

    pub fn newest_virtual_chapter(&self) -> Vcn {
        self.newest_virtual_chapter.load(Ordering::SeqCst)
    }

    pub fn last_checkpoint(&self) -> Checkpoint {
        *self.last_checkpoint.lock().unwrap()
    }

    pub fn loaded_type(&self) -> LoadedType {
        *self.loaded_type.lock().unwrap()
    }

    pub fn has_saved_open_chapter(&self) -> bool {
        self.has_saved_open_chapter.load(Ordering::SeqCst)
    }

    pub fn load_context(&self) -> &Arc<LoadContext> {
        &self.load_context
    }

    pub(crate) fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub(crate) fn volume(&self) -> &Arc<dyn Volume> {
        &self.volume
    }

    pub(crate) fn master_index(&self) -> &Arc<DeltaListMasterIndex> {
        &self.master_index
    }

    pub(crate) fn zones(&self) -> &[IndexZone] {
        &self.zones
    }

    pub(crate) fn chapter_writer_memory_allocated(&self) -> u64 {
        self.chapter_writer.memory_allocated()
    }

    pub(crate) fn set_oldest_virtual_chapter(&self, vcn: Vcn) {
        self.oldest_virtual_chapter.store(vcn, Ordering::SeqCst);
    }

    pub(crate) fn set_newest_virtual_chapter(&self, vcn: Vcn) {
        self.newest_virtual_chapter.store(vcn, Ordering::SeqCst);
    }

    pub(crate) fn set_last_checkpoint(&self, checkpoint: Checkpoint) {
        *self.last_checkpoint.lock().unwrap() = checkpoint;
    }

    pub(crate) fn set_loaded_type(&self, loaded_type: LoadedType) {
        *self.loaded_type.lock().unwrap() = loaded_type;
    }

    pub(crate) fn set_has_saved_open_chapter(&self, value: bool) {
        self.has_saved_open_chapter.store(value, Ordering::SeqCst);
    }

    /// Synchronize every zone's active-chapter view with the index-wide
    /// `[oldest, newest)` window (spec §4.1 "finalize each zone's active-
    /// chapter view").
    pub(crate) fn finalize_zones(&self) {
        let oldest = self.oldest_virtual_chapter();
        let newest = self.newest_virtual_chapter();
        for zone in &self.zones {
            zone.set_active_chapters(oldest, newest);
        }
    }

    /// Route `request` to the zone it names (spec §4.3 `dispatch_request`).
    /// Any `Err` returned here is, per spec, escalated by the embedding
    /// caller to index-fatal — this layer only propagates it.
    pub fn dispatch_request(&self, request: &mut Request) -> Result<(), IndexError> {
        let zone = self.zones.get(request.zone_number).ok_or_else(|| {
            IndexError::InvalidArgument(format!(
                "zone_number {} is out of range (zone_count = {})",
                request.zone_number,
                self.zones.len()
            ))
        })?;
        zone.dispatch(request)
    }

    /// Close every zone's open chapter at the current `newest`, then
    /// advance the ring (spec §4.5 `advance_active_chapters`).
    pub fn advance_active_chapters(&self) -> Result<(), IndexError> {
        let current_newest = self.newest_virtual_chapter();
        for zone in &self.zones {
            zone.close_open_chapter(current_newest)?;
        }

        let new_newest = current_newest + 1;
        self.newest_virtual_chapter.store(new_newest, Ordering::SeqCst);

        let oldest = self.oldest_virtual_chapter();
        let new_oldest = if self.geometry.are_same_physical_chapter(new_newest, oldest) {
            let bumped = oldest + 1;
            self.oldest_virtual_chapter.store(bumped, Ordering::SeqCst);
            bumped
        } else {
            oldest
        };

        for zone in &self.zones {
            zone.set_active_chapters(new_oldest, new_newest);
        }
        Ok(())
    }

    /// Spec §4.5 `save`: drain the chapter writer, snapshot `last_checkpoint`
    /// for rollback, persist component state, and roll back on failure.
    pub async fn save(&self) -> Result<(), IndexError> {
        self.chapter_writer.wait_for_idle().await?;
        tracing::debug!("chapter writer drained prior to save");

        let newest = self.newest_virtual_chapter();
        let oldest = self.oldest_virtual_chapter();

        let new_checkpoint =
            if newest == 0 { Checkpoint::None } else { Checkpoint::Chapter(newest - 1) };
        let prev = {
            let mut last_checkpoint = self.last_checkpoint.lock().unwrap();
            let prev = *last_checkpoint;
            *self.prev_checkpoint.lock().unwrap() = prev;
            *last_checkpoint = new_checkpoint;
            prev
        };

        let zone_open_chapters: Vec<_> =
            self.zones.iter().map(|zone| zone.open_chapter_snapshot()).collect();
        let master_index_entries = self.master_index.snapshot();

        let state = crate::state::PersistedIndexState::new(
            Some(new_checkpoint.next_open_chapter()),
            oldest,
            zone_open_chapters,
            master_index_entries,
        );

        match crate::state::save(&self.base_dir, &state) {
            Ok(()) => {
                self.has_saved_open_chapter.store(true, Ordering::SeqCst);
                tracing::info!(newest, "index saved");
                Ok(())
            }
            Err(error) => {
                *self.last_checkpoint.lock().unwrap() = prev;
                tracing::warn!(%error, "save failed, rolled back last_checkpoint");
                Err(error)
            }
        }
    }

    /// Read-only aggregation across the index's collaborators (spec §2 row
    /// "Stats", SPEC_FULL EXPANSION C). Safe from any thread (spec §5).
    pub fn stats(&self) -> IndexStats {
        IndexStats::collect(self)
    }

    /// Block until every chapter closed so far is durable on the volume,
    /// without persisting index state the way `save` does.
    pub async fn wait_for_idle(&self) -> Result<(), IndexError> {
        self.chapter_writer.wait_for_idle().await
    }
}
