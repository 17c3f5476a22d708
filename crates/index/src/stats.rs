use dedupe_index_common::Checkpoint;

use crate::index::Index;

/// Read-only aggregation over an `Index`'s collaborators (SPEC_FULL
/// EXPANSION C). Collectible from any thread concurrently with request
/// dispatch — every field is read through the same atomics/locks the live
/// path uses, never a separate counted copy.
#[derive(Clone, Debug)]
pub struct IndexStats {
    pub entries_per_zone: Vec<usize>,
    pub oldest_virtual_chapter: u64,
    pub newest_virtual_chapter: u64,
    pub last_checkpoint: Checkpoint,
    pub chapter_writer_bytes_in_flight: u64,
    /// Chapters in `[oldest, newest)` currently inside the sparse window.
    pub sparse_chapters: usize,
    /// Chapters in `[oldest, newest)` outside the sparse window (dense).
    pub dense_chapters: usize,
}

impl IndexStats {
    pub(crate) fn collect(index: &Index) -> Self {
        let entries_per_zone: Vec<usize> =
            index.zones().iter().map(|zone| zone.open_chapter_size()).collect();
        let oldest = index.oldest_virtual_chapter();
        let newest = index.newest_virtual_chapter();
        let geometry = index.geometry();
        let active_chapters = newest.saturating_sub(oldest);

        let (sparse_chapters, dense_chapters) = if geometry.is_sparse() {
            let sparse_window = geometry.sparse_chapters_per_volume.min(active_chapters);
            (sparse_window as usize, (active_chapters - sparse_window) as usize)
        } else {
            (0, active_chapters as usize)
        };

        Self {
            entries_per_zone,
            oldest_virtual_chapter: oldest,
            newest_virtual_chapter: newest,
            last_checkpoint: index.last_checkpoint(),
            chapter_writer_bytes_in_flight: index.chapter_writer_memory_allocated(),
            sparse_chapters,
            dense_chapters,
        }
    }
}
