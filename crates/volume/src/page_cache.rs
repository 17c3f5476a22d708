use dedupe_index_common::{ChunkName, PhysicalChapterNumber};
use moka::sync::{Cache, CacheBuilder};

/// LRU cache of decoded record pages, keyed by physical chapter slot and
/// record-page index within that slot. Grounded on the teacher's
/// `pagestore::PageCache` (a moka `Cache` in front of the page store),
/// generalized from a flat block address to the volume's two-level
/// chapter/page address and given chapter-wide invalidation so a
/// rewritten ring slot never serves stale pages.
pub struct VolumePageCache {
    cache: Cache<(PhysicalChapterNumber, u32), Vec<ChunkName>>,
}

impl VolumePageCache {
    pub fn new(capacity: u64) -> Self {
        let cache = CacheBuilder::new(capacity)
            .support_invalidation_closures()
            .build();
        Self { cache }
    }

    pub fn get(&self, physical_chapter: PhysicalChapterNumber, record_page_index: u32) -> Option<Vec<ChunkName>> {
        self.cache.get(&(physical_chapter, record_page_index))
    }

    pub fn insert(&self, physical_chapter: PhysicalChapterNumber, record_page_index: u32, records: Vec<ChunkName>) {
        self.cache.insert((physical_chapter, record_page_index), records);
    }

    /// Drop every cached page belonging to a ring slot that is about to be
    /// (or was just) overwritten, so a rebuilt chapter never mixes its
    /// pages with the previous occupant's.
    pub fn invalidate_chapter(&self, physical_chapter: PhysicalChapterNumber) {
        let _ = self
            .cache
            .invalidate_entries_if(move |key, _| key.0 == physical_chapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::CHUNK_NAME_SIZE;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = VolumePageCache::new(16);
        let name = ChunkName::new([3u8; CHUNK_NAME_SIZE]);
        cache.insert(1, 0, vec![name]);
        assert_eq!(cache.get(1, 0), Some(vec![name]));
        assert_eq!(cache.get(1, 1), None);
    }

    #[test]
    fn invalidate_chapter_drops_only_that_chapters_pages() {
        let cache = VolumePageCache::new(16);
        let name = ChunkName::new([3u8; CHUNK_NAME_SIZE]);
        cache.insert(1, 0, vec![name]);
        cache.insert(2, 0, vec![name]);
        cache.invalidate_chapter(1);
        cache.cache.run_pending_tasks();
        assert_eq!(cache.get(1, 0), None);
        assert_eq!(cache.get(2, 0), Some(vec![name]));
    }
}
