use std::path::PathBuf;

use dedupe_index_common::Geometry;
use serde::{Deserialize, Serialize};

/// Where the index's on-disk state lives — the `layout` argument to
/// `make_index` (spec §4.1).
#[derive(Clone, Debug)]
pub struct IndexLayout {
    pub base_dir: PathBuf,
}

impl IndexLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

/// Geometry plus the identity fields `make_index` needs before it can even
/// attempt to open the volume. Mirrors the teacher's `StoragePreset`/
/// `TieredConfig` pair in shape: a small serde-friendly bundle handed to the
/// constructor rather than threaded argument-by-argument.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub geometry: GeometryConfig,
    /// Opaque identity tag checked against the volume header on `LOAD`/
    /// `REBUILD` to catch a volume reused with a stale master-index
    /// checkpoint (SPEC_FULL EXPANSION C).
    pub volume_nonce: u64,
}

/// Serde-friendly restatement of [`Geometry`] at the config layer, kept
/// distinct so `IndexConfig` can evolve config-only fields (defaults,
/// validation messages) without coupling to the arithmetic type itself.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub chapters_per_volume: u64,
    pub index_pages_per_chapter: u32,
    pub record_pages_per_chapter: u32,
    pub records_per_page: u32,
    pub sparse_chapters_per_volume: u64,
}

impl GeometryConfig {
    pub fn build(self) -> Result<Geometry, dedupe_index_common::IndexError> {
        Geometry::new(
            self.chapters_per_volume,
            self.index_pages_per_chapter,
            self.record_pages_per_chapter,
            self.records_per_page,
            self.sparse_chapters_per_volume,
        )
    }
}

/// Tunables the spec leaves to an embedding collaborator to pick (delta-list
/// capacity, cache sizes) rather than deriving from `Geometry`.
#[derive(Clone, Copy, Debug)]
pub struct UserParams {
    pub max_list_size: usize,
    pub sparse_cache_capacity: u64,
    pub record_page_cache_capacity: u64,
}

impl Default for UserParams {
    fn default() -> Self {
        Self {
            max_list_size: 1000,
            sparse_cache_capacity: 100,
            record_page_cache_capacity: 1024,
        }
    }
}
