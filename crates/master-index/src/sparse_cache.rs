use std::sync::Arc;

use dedupe_index_common::{ChunkName, Vcn};
use moka::sync::Cache;

/// Caches the sampled names of a sparse chapter's record pages, so that
/// repeated barrier lookups against the same sparse chapter don't re-read
/// the volume. Grounded on the teacher's `pagestore::PageCache`
/// (moka-backed, keyed by identity), repurposed from decoded pages keyed
/// by LSN to a sparse chapter's full sampled-name set keyed by virtual
/// chapter number — sparse chapters are consulted only for sampled names
/// (spec §4.4), so caching the whole set per chapter is cheap relative to
/// the dense per-page cache in the volume.
pub struct SparseChapterCache {
    cache: Cache<Vcn, Arc<Vec<ChunkName>>>,
}

impl SparseChapterCache {
    pub fn new(capacity: u64) -> Self {
        Self { cache: Cache::new(capacity) }
    }

    pub fn get(&self, vcn: Vcn) -> Option<Arc<Vec<ChunkName>>> {
        self.cache.get(&vcn)
    }

    pub fn insert(&self, vcn: Vcn, names: Vec<ChunkName>) {
        self.cache.insert(vcn, Arc::new(names));
    }

    pub fn invalidate(&self, vcn: Vcn) {
        self.cache.invalidate(&vcn);
    }

    /// Scan every currently cached sparse chapter for `name` — backs
    /// `search_sparse_cache(chapter_hint = UINT64_MAX)` (spec §6), used when
    /// the caller has no specific chapter in hand.
    pub fn contains(&self, name: &ChunkName) -> bool {
        self.cache.iter().any(|(_, names)| names.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::CHUNK_NAME_SIZE;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = SparseChapterCache::new(8);
        let name = ChunkName::new([2u8; CHUNK_NAME_SIZE]);
        cache.insert(5, vec![name]);
        assert_eq!(cache.get(5).unwrap().as_slice(), &[name]);
        assert!(cache.get(6).is_none());
    }

    #[test]
    fn invalidate_drops_the_entry() {
        let cache = SparseChapterCache::new(8);
        cache.insert(5, vec![]);
        cache.invalidate(5);
        assert!(cache.get(5).is_none());
    }
}
