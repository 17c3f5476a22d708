use std::sync::Arc;

use dedupe_index_common::{
    Checkpoint, IndexError, LoadType, LoadedType, MasterIndex, Vcn, Volume,
};
use dedupe_index_master::{DeltaListMasterIndex, SparseChapterCache};
use dedupe_index_volume::{ChapterWriter, PhysicalVolume};

use crate::config::{IndexConfig, IndexLayout, UserParams};
use crate::index::Index;
use crate::load_context::LoadContext;
use crate::replay;
use crate::state;
use crate::zone::IndexZone;

/// `make_index` (spec §4.1): assembles every collaborator, then branches on
/// `load_type` to bring the index up to a READY state. Never leaves the
/// host with a half-built index — any failure drops every collaborator
/// built so far and returns the error after `load_context` has still been
/// published READY, so a thread suspended on it never hangs.
pub fn make_index(
    layout: IndexLayout,
    config: IndexConfig,
    user_params: UserParams,
    zone_count: usize,
    load_type: LoadType,
    load_context: Arc<LoadContext>,
) -> Result<Arc<Index>, IndexError> {
    let geometry = config.geometry.build()?;
    let zone_count = zone_count.max(1);
    let base_dir = layout.base_dir;

    let volume_concrete = Arc::new(match load_type {
        LoadType::Create => PhysicalVolume::create(&base_dir, geometry, config.volume_nonce)?,
        LoadType::Load | LoadType::Rebuild => {
            PhysicalVolume::open(&base_dir, geometry, config.volume_nonce)?
        }
    });
    let volume: Arc<dyn Volume> = volume_concrete.clone();
    let chapter_writer = Arc::new(ChapterWriter::spawn(Arc::clone(&volume_concrete)));

    let master_index =
        Arc::new(DeltaListMasterIndex::new(geometry, zone_count, user_params.max_list_size));
    let master_index_dyn: Arc<dyn MasterIndex> = master_index.clone();
    let sparse_cache = Arc::new(SparseChapterCache::new(user_params.sparse_cache_capacity));

    let single_zone_sparse = zone_count == 1 && geometry.is_sparse();
    let open_chapter_capacity =
        (geometry.record_pages_per_chapter as u64 * geometry.records_per_page as u64) as usize;

    let zones: Vec<IndexZone> = (0..zone_count)
        .map(|zone_number| {
            IndexZone::new(
                zone_number,
                geometry,
                Arc::clone(&volume),
                Arc::clone(&master_index_dyn),
                Arc::clone(&chapter_writer),
                Arc::clone(&sparse_cache),
                open_chapter_capacity,
                single_zone_sparse,
            )
        })
        .collect();

    let index = Index::new(
        base_dir,
        geometry,
        zones,
        chapter_writer,
        master_index,
        volume,
        Arc::clone(&load_context),
    );

    let outcome = match load_type {
        LoadType::Create => {
            state::discard(index.base_dir())?;
            index.set_loaded_type(LoadedType::Create);
            Ok(())
        }
        LoadType::Load => load(&index, false, &load_context),
        LoadType::Rebuild => match load(&index, false, &load_context) {
            Ok(()) => Ok(()),
            Err(IndexError::OutOfMemory) => Err(IndexError::OutOfMemory),
            Err(error) => {
                tracing::warn!(%error, "load failed during REBUILD, falling through to rebuild");
                rebuild(&index, &load_context)
            }
        },
    };

    load_context.mark_ready();
    outcome?;

    index.set_has_saved_open_chapter(matches!(index.loaded_type(), LoadedType::Load));
    Ok(Arc::new(index))
}

/// Spec §4.1 `load`: restore the delta-list snapshot and every zone's open
/// chapter, then catch up with replay if the volume holds chapters the
/// last clean save never saw.
fn load(index: &Index, allow_replay: bool, load_context: &LoadContext) -> Result<(), IndexError> {
    let volume = index.volume().as_ref();
    let persisted = state::load(index.base_dir())?;
    let Some(persisted) = persisted else {
        let (_, _, is_empty) = volume.find_chapter_boundaries()?;
        return Err(if is_empty { IndexError::NoIndex } else { IndexError::NotSavedCleanly });
    };

    index.master_index().restore(&persisted.master_index_entries());
    for zone in index.zones() {
        zone.restore_open_chapter(persisted.zone_open_chapter(zone.zone_number()));
    }
    index.set_oldest_virtual_chapter(persisted.oldest_virtual_chapter);

    let saved_open_chapter = match persisted.saved_open_chapter_number {
        Some(n) => n,
        None if allow_replay => persisted.oldest_virtual_chapter,
        None => return Err(IndexError::NotSavedCleanly),
    };
    let checkpoint = if saved_open_chapter == 0 {
        Checkpoint::None
    } else {
        Checkpoint::Chapter(saved_open_chapter - 1)
    };
    index.set_last_checkpoint(checkpoint);

    let (_, highest_on_volume, volume_is_empty) = volume.find_chapter_boundaries()?;
    let actual_newest: Vcn = if volume_is_empty { 0 } else { highest_on_volume + 1 };
    let replay_required = actual_newest > saved_open_chapter;
    if replay_required && !allow_replay {
        return Err(IndexError::NotSavedCleanly);
    }

    let newest = actual_newest.max(saved_open_chapter);
    index.set_newest_virtual_chapter(newest);

    if replay_required {
        let first_replay = checkpoint.as_vcn().unwrap_or(0).max(persisted.oldest_virtual_chapter);
        replay::replay(
            index.geometry(),
            volume,
            index.master_index().as_ref(),
            load_context,
            index.zone_count(),
            first_replay,
            newest,
        )?;
        index.set_loaded_type(LoadedType::Replay);
    } else {
        index.set_loaded_type(LoadedType::Load);
    }

    index.finalize_zones();
    Ok(())
}

/// Spec §4.1 `rebuild`: full boundary rediscovery from the volume, ignoring
/// any persisted state. Runs under the volume's `LOOKUP_FOR_REBUILD` mode
/// for the duration of the replay scan.
fn rebuild(index: &Index, load_context: &LoadContext) -> Result<(), IndexError> {
    let volume = index.volume().as_ref();
    let _lookup_mode = volume.begin_rebuild_lookup();

    let (lowest, highest, is_empty) = volume.find_chapter_boundaries()?;
    if is_empty {
        index.set_oldest_virtual_chapter(0);
        index.set_newest_virtual_chapter(0);
        index.set_loaded_type(LoadedType::Empty);
        index.finalize_zones();
        return Ok(());
    }

    let newest = highest + 1;
    let oldest = if newest - lowest == index.geometry().chapters_per_volume {
        lowest + 1
    } else {
        lowest
    };
    index.set_oldest_virtual_chapter(oldest);
    index.set_newest_virtual_chapter(newest);

    index.master_index().set_open_chapter(0);
    replay::replay(
        index.geometry(),
        volume,
        index.master_index().as_ref(),
        load_context,
        index.zone_count(),
        oldest,
        newest,
    )?;

    index.set_loaded_type(LoadedType::Rebuild);
    index.finalize_zones();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::{ChunkName, Request, RequestAction, CHUNK_NAME_SIZE};
    use tempfile::TempDir;

    fn config() -> IndexConfig {
        use crate::config::GeometryConfig;
        IndexConfig {
            geometry: GeometryConfig {
                chapters_per_volume: 8,
                index_pages_per_chapter: 1,
                record_pages_per_chapter: 1,
                records_per_page: 16,
                sparse_chapters_per_volume: 0,
            },
            volume_nonce: 1,
        }
    }

    fn name(b: u8) -> ChunkName {
        ChunkName::new([b; CHUNK_NAME_SIZE])
    }

    #[test]
    fn create_with_no_prior_state_starts_empty() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path());
        let index = make_index(
            layout,
            config(),
            UserParams::default(),
            1,
            LoadType::Create,
            LoadContext::new(),
        )
        .unwrap();
        assert_eq!(index.loaded_type(), LoadedType::Create);
        assert_eq!(index.oldest_virtual_chapter(), 0);
        assert_eq!(index.newest_virtual_chapter(), 0);
    }

    #[tokio::test]
    async fn load_after_clean_save_restores_checkpoint() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path());
        let index = make_index(
            layout.clone(),
            config(),
            UserParams::default(),
            1,
            LoadType::Create,
            LoadContext::new(),
        )
        .unwrap();

        for chapter in 0..3u8 {
            let mut request =
                Request::new(name(chapter), 0, RequestAction::Index).with_new_metadata(
                    dedupe_index_common::RecordData(chapter as u64),
                );
            index.dispatch_request(&mut request).unwrap();
            index.advance_active_chapters().unwrap();
        }
        index.save().await.unwrap();
        assert_eq!(index.newest_virtual_chapter(), 3);

        let loaded = make_index(
            layout,
            config(),
            UserParams::default(),
            1,
            LoadType::Load,
            LoadContext::new(),
        )
        .unwrap();
        assert_eq!(loaded.loaded_type(), LoadedType::Load);
        assert!(loaded.has_saved_open_chapter());
        assert_eq!(loaded.last_checkpoint(), Checkpoint::Chapter(2));
        assert_eq!(loaded.newest_virtual_chapter(), 3);
    }

    #[test]
    fn load_without_prior_save_fails_not_saved_cleanly() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path());
        // CREATE initializes the volume but is never followed by a save.
        make_index(
            layout.clone(),
            config(),
            UserParams::default(),
            1,
            LoadType::Create,
            LoadContext::new(),
        )
        .unwrap();

        let result = make_index(
            layout,
            config(),
            UserParams::default(),
            1,
            LoadType::Load,
            LoadContext::new(),
        );
        assert!(matches!(result, Err(IndexError::NotSavedCleanly)));
    }

    #[tokio::test]
    async fn rebuild_recovers_after_crash_with_no_saved_state() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path());
        let index = make_index(
            layout.clone(),
            config(),
            UserParams::default(),
            1,
            LoadType::Create,
            LoadContext::new(),
        )
        .unwrap();

        for chapter in 0..3u8 {
            let mut request = Request::new(name(chapter), 0, RequestAction::Index)
                .with_new_metadata(dedupe_index_common::RecordData(chapter as u64));
            index.dispatch_request(&mut request).unwrap();
            index.advance_active_chapters().unwrap();
        }
        // Chapters are durable on the volume (chapter writer flushed them),
        // but `save` was never called, so `index_state.json` is absent.
        index.wait_for_idle().await.unwrap();
        drop(index);

        let rebuilt = make_index(
            layout,
            config(),
            UserParams::default(),
            1,
            LoadType::Rebuild,
            LoadContext::new(),
        )
        .unwrap();
        assert_eq!(rebuilt.loaded_type(), LoadedType::Rebuild);
        assert_eq!(rebuilt.newest_virtual_chapter(), 3);
        for chapter in 0..3u8 {
            let mut query = Request::query(name(chapter), 0);
            rebuilt.dispatch_request(&mut query).unwrap();
            assert_ne!(query.location, dedupe_index_common::Location::Unavailable);
        }
    }
}
