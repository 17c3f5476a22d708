mod chunk;
mod error;
mod geometry;
mod request;
mod traits;

pub use chunk::{ChunkName, CHUNK_NAME_SIZE};
pub use error::IndexError;
pub use geometry::{Checkpoint, Geometry, PhysicalChapterNumber, Vcn, VirtualChapterNumber};
pub use request::{Location, RecordData, Request, RequestAction};
pub use traits::{
    IndexPageSummary, LookupModeGuard, MasterIndex, MasterIndexRecord, MasterIndexTriage,
    PageContent, Volume,
};

/// How `make_index` should bring the index up: discard prior state, load it
/// cleanly, or (if loading fails) fall back to a full rebuild (spec §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadType {
    Create,
    Load,
    Rebuild,
}

/// What actually happened during construction — distinct from `LoadType`
/// because `Rebuild` may resolve to `Replay` (clean scan from a checkpoint)
/// rather than a full `Rebuild` (boundary rediscovery from scratch), and an
/// empty volume resolves to `Empty`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadedType {
    Create,
    Load,
    Replay,
    Rebuild,
    Empty,
}

/// Deterministically routes a chunk name to one of `zone_count` zones.
/// Uses the trailing bytes of the fingerprint, kept distinct from
/// [`ChunkName::leading_u64`] (sampling, delta-list placement) so the
/// three hash-derived decisions don't alias each other.
pub fn zone_for_name(name: &ChunkName, zone_count: usize) -> usize {
    if zone_count == 0 {
        return 0;
    }
    (name.trailing_u64() % zone_count as u64) as usize
}
