//! `cf_core`: task scheduler/thread pool, event-driven socket layer, and
//! block-cached random-access file source for a streaming-media server's
//! HTTP/RTSP session layer (spec.md §1). This crate is the foundation
//! layer only — no protocol semantics, media muxing, or configuration file
//! formats live here (spec §1 Non-goals).
//!
//! Ported from the `CFCore`/`CFSocket` triad of the original C++ tree,
//! restructured per spec §9's redesign notes: trait objects instead of
//! virtual `entry`/`run` hooks, index-based arena handles instead of raw
//! owning pointers, and an explicit [`initialize`]/[`uninitialize`] pair
//! instead of hidden global constructors.

pub mod config;
pub mod error;
pub mod event;
pub mod file;
pub mod heap;
pub mod net_addr;
pub mod session;
pub mod socket;
pub mod string_parser;
pub mod task;
pub mod thread;
pub mod time;

use config::{CacheConfig, InitConfig, PoolConfig};
use error::CfResult;
use file::FileBlockPool;
use std::sync::Arc;
use task::pool::TaskPool;
use time::Mutex as CfMutex;

/// Everything [`initialize`] hands back to a host process: the task
/// scheduler and the shared file block pool, both process-wide singletons
/// per spec §5 ("Global thread-local keys and the notifier instance are
/// created by an `initialize()` entry point called exactly once ... and
/// released by a matching `uninitialize()`").
pub struct Runtime {
    pub tasks: Arc<TaskPool>,
    pub file_pool: Arc<CfMutex<FileBlockPool>>,
    lookup_dns: bool,
}

impl Runtime {
    /// Enumerates local IPv4 addresses, honoring the `lookupDNS` flag this
    /// [`Runtime`] was initialized with (spec §6 "Environment").
    pub fn local_addrs(&self) -> Vec<net_addr::LocalAddr> {
        net_addr::local_ipv4_addrs(self.lookup_dns)
    }

    /// Stops and joins every worker and the event-routing thread, in
    /// reverse creation order (spec §5). Safe to call more than once.
    pub fn uninitialize(&self) {
        self.tasks.shutdown();
    }
}

/// Builds the process-wide [`TaskPool`] and [`FileBlockPool`] exactly once.
/// Never call this more than once per process — a second `TaskPool` would
/// spawn a second, independent set of worker threads with no relation to
/// the first, violating spec §9's "Process-wide singletons" note.
pub fn initialize(
    init: InitConfig,
    pool_config: PoolConfig,
    cache_config: CacheConfig,
) -> CfResult<Runtime> {
    let tasks = TaskPool::new(pool_config)?;
    let file_pool = Arc::new(CfMutex::new(FileBlockPool::new(
        cache_config.unit_bytes,
        cache_config.max_buffers,
        cache_config.increment,
    )));
    Ok(Runtime {
        tasks,
        file_pool,
        lookup_dns: init.lookup_dns,
    })
}

/// Installs a global `tracing` subscriber reading filter directives from
/// `RUST_LOG` (falling back to `info`), matching spec §2[ADDED]-K — an
/// explicit call a host process makes once, never a hidden global
/// initializer. Returns without effect if a subscriber is already set (so
/// a host embedding this crate alongside its own `tracing` setup doesn't
/// panic on a double-init).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_then_uninitialize_is_clean() {
        let runtime = initialize(
            InitConfig { lookup_dns: false },
            PoolConfig {
                worker_count: 1,
                ..PoolConfig::default()
            },
            CacheConfig::default(),
        )
        .unwrap();
        runtime.uninitialize();
        // Idempotent: a second call must not panic.
        runtime.uninitialize();
    }
}
