//! Storage guards: the index size limit and the free disk space floor.

/// Indexing stops this many bytes before the configured limit.
pub const STORAGE_HEADROOM: u64 = 2_000;

/// Free disk space below which indexing stops (100 MB).
pub const DEFAULT_LOW_STORAGE_BYTES: u64 = 100_000_000;

/// Reports free space on the volume holding the index.
///
/// Supplied by the host, which knows the platform's storage APIs.
pub trait DiskSpace: Send + Sync {
    /// Free bytes, or `None` if the platform cannot tell.
    fn available_bytes(&self) -> Option<u64>;
}

/// True once the index has grown into the headroom below `limit`.
pub fn exceeds_limit(index_size: u64, limit: Option<u64>) -> bool {
    match limit {
        Some(limit) => index_size > limit.saturating_sub(STORAGE_HEADROOM),
        None => false,
    }
}

/// True if the device reported less free space than `floor`.
pub fn is_low(available: Option<u64>, floor: u64) -> bool {
    available.is_some_and(|bytes| bytes < floor)
}
