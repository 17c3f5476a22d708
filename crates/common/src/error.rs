/// Errors surfaced by the index to its embedding caller (spec §6/§7).
///
/// `Success` is not a variant here — success is `Ok(())`/`Ok(T)`, matching
/// the teacher's `StorageError` convention of only enumerating failure
/// modes.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index was not saved cleanly")]
    NotSavedCleanly,

    #[error("no index exists on the volume")]
    NoIndex,

    #[error("corrupt index component: {0}")]
    CorruptComponent(String),

    #[error("corrupt on-disk data: {0}")]
    CorruptData(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("delta list overflow")]
    Overflow,

    #[error("duplicate chunk name")]
    DuplicateName,

    #[error("index is in the wrong state for this operation: {0}")]
    BadState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shutting down")]
    ShuttingDown,
}

impl IndexError {
    /// Transient-tolerated errors from the master-index delta-list contract
    /// (spec §7): treated as soft success by `search`/`replay_record`, never
    /// propagated to the caller.
    pub fn is_transient_tolerated(&self) -> bool {
        matches!(self, IndexError::Overflow | IndexError::DuplicateName)
    }
}
