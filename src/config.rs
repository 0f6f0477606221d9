//! Constructor-argument configuration (SPEC_FULL.md §2[ADDED]-L). No file
//! format is parsed anywhere in this crate — these are plain structs a host
//! process fills in and passes to the constructors in [`crate::task::pool`]
//! and [`crate::file`], the idiomatic replacement for the original's loose
//! setter calls (`SetMaxBuffers`, `SetBuffIncValue`, `AllocateFileCache`).

/// Tunables for a [`crate::task::pool::TaskPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of cooperative worker threads, excluding the dedicated
    /// event-routing thread (spec §4.E).
    pub worker_count: usize,
    /// Upper bound passed to the event notifier's `wait`, per spec §5
    /// "implementations SHOULD cap notifier wait at ≤ 15 s".
    pub notifier_wait_cap_millis: u64,
    /// Fallback sleep when a worker's timer heap is empty and nothing is
    /// queued; spec §4.E step 3 calls this "a large default".
    pub idle_sleep_millis: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            worker_count: 4,
            notifier_wait_cap_millis: 15_000,
            idle_sleep_millis: 60_000,
        }
    }
}

/// Tunables for a [`crate::file::block_pool::FileBlockPool`], mirroring
/// `FileSource::AllocateFileCache`'s parameter list one for one.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bytes per cache block; default 32 KiB per spec §4.G.
    pub unit_bytes: u32,
    /// Initial buffer budget (`max`).
    pub max_buffers: u32,
    /// Step by which `max_buffers` grows/shrinks via `inc_max`/`dec_max`.
    pub increment: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            unit_bytes: 32 * 1024,
            max_buffers: 8,
            increment: 1,
        }
    }
}

/// Whether [`crate::net_addr::local_ipv4_addrs`] reverse-resolves local
/// addresses at startup, matching spec §6 "`initialize(lookupDNS: bool)`".
#[derive(Debug, Clone, Copy, Default)]
pub struct InitConfig {
    pub lookup_dns: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cache = CacheConfig::default();
        assert_eq!(cache.unit_bytes, 32 * 1024);
        let pool = PoolConfig::default();
        assert!(pool.notifier_wait_cap_millis <= 15_000);
    }
}
