use std::fmt;

/// Size in bytes of a [`ChunkName`] — matches the 128-bit fingerprint used by
/// the block-layer deduplicator that embeds this index.
pub const CHUNK_NAME_SIZE: usize = 16;

/// Opaque chunk fingerprint. Equality is byte-wise; the index never
/// interprets the bytes beyond using them as a lookup key and, for sampling
/// and delta-list placement, as a source of uniformly distributed bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkName(pub [u8; CHUNK_NAME_SIZE]);

impl ChunkName {
    pub const fn new(bytes: [u8; CHUNK_NAME_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_NAME_SIZE] {
        &self.0
    }

    /// First 8 bytes as a u64, used by sampling and test fixtures.
    pub fn leading_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[0..8].try_into().unwrap())
    }

    /// Last 8 bytes as a u64. Used for zone assignment, kept distinct from
    /// [`Self::leading_u64`] (used for sampling and delta-list placement) so
    /// the three hash-derived decisions don't alias each other on small
    /// synthetic test fixtures.
    pub fn trailing_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[CHUNK_NAME_SIZE - 8..].try_into().unwrap())
    }
}

impl fmt::Debug for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkName(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}
