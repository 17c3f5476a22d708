use dedupe_index_common::{
    zone_for_name, ChunkName, Geometry, IndexError, MasterIndex, MasterIndexRecord, PageContent,
    Vcn, Volume,
};
use dedupe_index_volume::IndexPageMap;

use crate::load_context::LoadContext;

/// Walk every chapter in `[from_vcn, newest_virtual_chapter)` and replay its
/// records into `master_index` (spec §4.2). Preconditions mirror the spec
/// text verbatim: `newest_virtual_chapter` must already be authoritative
/// (the caller has either trusted a clean checkpoint or freshly discovered
/// chapter boundaries), and the volume must already be in its scoped
/// rebuild-lookup mode if the caller is doing a full rebuild.
#[allow(clippy::too_many_arguments)]
pub fn replay(
    geometry: &Geometry,
    volume: &dyn Volume,
    master_index: &dyn MasterIndex,
    load_context: &LoadContext,
    zone_count: usize,
    from_vcn: Vcn,
    newest_virtual_chapter: Vcn,
) -> Result<(), IndexError> {
    // Flush sequence: park the open-chapter marker at `newest` then back to
    // `from_vcn` so every zone's stale per-chapter state drains before the
    // walk below starts mutating the delta lists.
    master_index.set_open_chapter(newest_virtual_chapter);
    master_index.set_open_chapter(from_vcn);
    let mut last_page_count = 0u32;

    for vcn in from_vcn..newest_virtual_chapter {
        load_context.check_for_suspend()?;

        let will_be_sparse =
            geometry.is_chapter_sparse(from_vcn, newest_virtual_chapter, vcn);
        let physical = geometry.map_to_physical_chapter(vcn);
        volume.prefetch_pages(physical, geometry.record_pages_per_chapter);

        master_index.set_open_chapter(vcn);

        let mut expected_next = 0u32;
        let mut summaries = Vec::with_capacity(geometry.index_pages_per_chapter as usize);
        for page in 0..geometry.index_pages_per_chapter {
            match volume.get_page(physical, page)? {
                PageContent::Index(summary) => {
                    if summary.lowest_list_number != expected_next {
                        return Err(IndexError::CorruptData(format!(
                            "chapter {vcn} index page {page}: expected lowest_list_number {expected_next}, found {}",
                            summary.lowest_list_number
                        )));
                    }
                    expected_next = summary.highest_list_number + 1;
                    summaries.push(summary);
                }
                PageContent::Record(_) => {
                    return Err(IndexError::CorruptComponent(format!(
                        "chapter {vcn} page {page} was expected to be an index page"
                    )));
                }
            }
        }
        // Rebuilding the index-page-map is this chapter's only use of it
        // during replay (spec §4.2); request dispatch resolves hits
        // through the volume's page cache directly rather than through a
        // persisted map, so nothing downstream of replay consults it.
        let page_map = IndexPageMap::build(summaries);
        if page_map.page_count() != last_page_count {
            tracing::debug!(vcn, pages = page_map.page_count(), "index-page-map updated");
            last_page_count = page_map.page_count();
        }

        for record_page in 0..geometry.record_pages_per_chapter {
            let page_number = geometry.index_pages_per_chapter + record_page;
            if let PageContent::Record(names) = volume.get_page(physical, page_number)? {
                for name in names {
                    replay_record(
                        geometry,
                        volume,
                        master_index,
                        zone_count,
                        &name,
                        vcn,
                        will_be_sparse,
                    )?;
                }
            }
        }
    }

    // Reaps the chapter the eventual open chapter will shadow.
    master_index.set_open_chapter(newest_virtual_chapter);
    tracing::debug!(from_vcn, newest_virtual_chapter, "replay complete");
    Ok(())
}

/// Spec §4.2 `replay_record`. `DUPLICATE_NAME` and `OVERFLOW` from the
/// delta-list contract are transient-tolerated: the record is accepted
/// as-is (or dropped) without failing the replay.
fn replay_record(
    geometry: &Geometry,
    volume: &dyn Volume,
    master_index: &dyn MasterIndex,
    zone_count: usize,
    name: &ChunkName,
    vcn: Vcn,
    will_be_sparse_chapter: bool,
) -> Result<(), IndexError> {
    if will_be_sparse_chapter && !master_index.is_sample(name) {
        return Ok(());
    }

    let zone = zone_for_name(name, zone_count);
    let record = master_index.get_record(zone, name)?;

    let update_record = if !record.is_found() {
        false
    } else if record.is_collision() {
        if record.virtual_chapter == vcn {
            return Ok(());
        }
        true
    } else if record.virtual_chapter == vcn {
        false
    } else {
        let existing_physical = geometry.map_to_physical_chapter(record.virtual_chapter);
        volume.chapter_contains_name(existing_physical, name)?
    };

    let result = if update_record {
        master_index.set_record_chapter(&record, vcn)
    } else {
        master_index.put_record(&MasterIndexRecord::not_found(*name, zone), vcn)
    };

    match result {
        Ok(()) => Ok(()),
        Err(error) if error.is_transient_tolerated() => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::{IndexPageSummary, CHUNK_NAME_SIZE};
    use dedupe_index_master::DeltaListMasterIndex;
    use dedupe_index_volume::PhysicalVolume;
    use tempfile::TempDir;

    fn geo() -> Geometry {
        Geometry::new(8, 1, 2, 8, 0).unwrap()
    }

    fn name(b: u8) -> ChunkName {
        ChunkName::new([b; CHUNK_NAME_SIZE])
    }

    fn write_chapter(volume: &PhysicalVolume, physical: u64, vcn: Vcn, names: Vec<ChunkName>) {
        volume
            .write_chapter(
                physical,
                vcn,
                &[IndexPageSummary { lowest_list_number: 0, highest_list_number: 996 }],
                &[names, vec![]],
            )
            .unwrap();
    }

    #[test]
    fn replay_reconstructs_master_index_across_chapters() {
        let dir = TempDir::new().unwrap();
        let geometry = geo();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        write_chapter(&volume, 0, 0, vec![name(1)]);
        write_chapter(&volume, 1, 1, vec![name(2)]);
        write_chapter(&volume, 2, 2, vec![name(3)]);

        let master_index = DeltaListMasterIndex::new(geometry, 1, 100);
        let load_context = LoadContext::new();

        replay(&geometry, &volume, &master_index, &load_context, 1, 0, 3).unwrap();

        assert_eq!(master_index.get_record(0, &name(1)).unwrap().virtual_chapter, 0);
        assert_eq!(master_index.get_record(0, &name(2)).unwrap().virtual_chapter, 1);
        assert_eq!(master_index.get_record(0, &name(3)).unwrap().virtual_chapter, 2);
    }

    #[test]
    fn sparse_chapter_skips_non_sample_names() {
        let dir = TempDir::new().unwrap();
        // Sparse window covers the whole (small) range so every chapter
        // below `newest` is sparse.
        let geometry = Geometry::new(8, 1, 2, 8, 3).unwrap();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        // name(0): leading_u64 == 0 => is_master_index_sample (0 % 32 == 0).
        // name(1): leading_u64 == 0x0101010101010101 => not a sample.
        write_chapter(&volume, 0, 0, vec![name(0), name(1)]);

        let master_index = DeltaListMasterIndex::new(geometry, 1, 100);
        let load_context = LoadContext::new();
        // newest=1 => window [max(0,1-3), 1) = [0,1): chapter 0 is sparse.
        replay(&geometry, &volume, &master_index, &load_context, 1, 0, 1).unwrap();

        assert!(master_index.get_record(0, &name(0)).unwrap().is_found());
        assert!(!master_index.get_record(0, &name(1)).unwrap().is_found());
    }

    #[test]
    fn corrupt_index_page_sequence_is_rejected() {
        let dir = TempDir::new().unwrap();
        let geometry = Geometry::new(8, 2, 1, 8, 0).unwrap();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        // Two index pages whose lowest_list_number both start at 0 instead
        // of the second continuing from the first's highest + 1.
        volume
            .write_chapter(
                0,
                0,
                &[
                    IndexPageSummary { lowest_list_number: 0, highest_list_number: 10 },
                    IndexPageSummary { lowest_list_number: 0, highest_list_number: 20 },
                ],
                &[vec![]],
            )
            .unwrap();

        let master_index = DeltaListMasterIndex::new(geometry, 1, 100);
        let load_context = LoadContext::new();
        let result = replay(&geometry, &volume, &master_index, &load_context, 1, 0, 1);
        assert!(matches!(result, Err(IndexError::CorruptData(_))));
    }

    #[test]
    fn shutting_down_context_aborts_replay() {
        let dir = TempDir::new().unwrap();
        let geometry = geo();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        write_chapter(&volume, 0, 0, vec![name(1)]);
        write_chapter(&volume, 1, 1, vec![name(2)]);

        let master_index = DeltaListMasterIndex::new(geometry, 1, 100);
        let load_context = LoadContext::new();
        load_context.request_free();

        let result = replay(&geometry, &volume, &master_index, &load_context, 1, 0, 2);
        assert!(matches!(result, Err(IndexError::ShuttingDown)));
    }
}
