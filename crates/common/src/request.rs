use crate::chunk::ChunkName;

/// Opaque metadata the block-layer caller associates with a chunk — a
/// physical block address, reference count, or similar. The index stores
/// and returns it but never interprets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RecordData(pub u64);

/// Where a located record currently lives, reported back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Unavailable,
    InOpenChapter,
    InDense,
    InSparse,
}

/// The dispatch is closed over four actions — a tagged variant, not dynamic
/// dispatch, per spec §9 "Polymorphism over actions."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestAction {
    Query,
    Update,
    Index,
    Delete,
}

/// One fingerprint request routed to a single [`IndexZone`](../index zone).
#[derive(Clone, Debug)]
pub struct Request {
    pub chunk_name: ChunkName,
    pub zone_number: usize,
    pub action: RequestAction,
    /// When `action == Query`, whether a hit should also promote the record
    /// into the open chapter (LRU-style refresh).
    pub update: bool,
    pub new_metadata: Option<RecordData>,
    pub old_metadata: Option<RecordData>,
    /// Output: where the index found (or placed) the record.
    pub location: Location,
    /// True if this request is being replayed after a sparse-cache barrier
    /// or similar internal requeue; suppresses re-triage.
    pub requeued: bool,
}

impl Request {
    pub fn new(chunk_name: ChunkName, zone_number: usize, action: RequestAction) -> Self {
        Self {
            chunk_name,
            zone_number,
            action,
            update: false,
            new_metadata: None,
            old_metadata: None,
            location: Location::Unavailable,
            requeued: false,
        }
    }

    pub fn query(chunk_name: ChunkName, zone_number: usize) -> Self {
        Self::new(chunk_name, zone_number, RequestAction::Query)
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_new_metadata(mut self, metadata: RecordData) -> Self {
        self.new_metadata = Some(metadata);
        self
    }

    pub fn with_old_metadata(mut self, metadata: RecordData) -> Self {
        self.old_metadata = Some(metadata);
        self
    }
}
