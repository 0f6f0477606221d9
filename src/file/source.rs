//! Random-access cached file reader (spec.md §4.H "FileSource"), ported
//! from `CFCore/include/CF/FileSource.h` / `FileSource.cpp`. Thin façade
//! over [`super::block_pool::FileBlockPool`] (shared across every
//! `FileSource`) and a private [`super::file_map::FileMap`] (one per open
//! file) — matching spec §4.G "Separate FileSources share only the pool;
//! pool mutation is serialized by the pool's own mutex."

use super::block_pool::FileBlockPool;
use super::file_map::FileMap;
use crate::error::{CfError, CfResult};
use crate::time::Mutex as CfMutex;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Everything serialized by a single [`FileSource`]'s own mutex: concurrent
/// reads of the same source are safe but not parallelized (spec §4.G).
struct Inner {
    file: Option<File>,
    length: u64,
    mod_time: Option<SystemTime>,
    logical_offset: u64,
    cache_enabled: bool,
    should_close: bool,
    map: FileMap,
}

/// `FileSource::set(path)` / `read` / `advise` / `seek` / `close` façade
/// (spec §4.H). Blocks from the shared pool are addressed via `map`; the
/// pool itself lives behind its own mutex so reclamation never blocks a
/// concurrent read on a *different* `FileSource`.
pub struct FileSource {
    pool: Arc<CfMutex<FileBlockPool>>,
    inner: CfMutex<Inner>,
    /// Count of blocks actually fetched from disk (as opposed to served from
    /// `pool`), matching spec §8 scenario 5/6's "observable via a counting
    /// mock fd layer" — a plain atomic counter is the equivalent hook in a
    /// crate with no separate mock-fd abstraction to intercept.
    disk_reads: AtomicU64,
}

impl FileSource {
    pub fn new(pool: Arc<CfMutex<FileBlockPool>>) -> FileSource {
        FileSource {
            pool,
            inner: CfMutex::new(Inner {
                file: None,
                length: 0,
                mod_time: None,
                logical_offset: 0,
                cache_enabled: true,
                should_close: true,
                map: FileMap::new(0),
            }),
            disk_reads: AtomicU64::new(0),
        }
    }

    /// Number of blocks fetched from disk (cache misses) since this source
    /// was opened. Test-observable proxy for spec §8 scenarios 5 and 6.
    pub fn disk_read_count(&self) -> u64 {
        self.disk_reads.load(Ordering::Acquire)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.inner.lock().cache_enabled = enabled;
    }

    /// Clears `should_close`; `close()` then leaves the fd open on exit,
    /// matching `FileSource::DontCloseFD`.
    pub fn dont_close_fd(&self) {
        self.inner.lock().should_close = false;
    }

    /// Opens and `fstat`s `path`, recording `length`/`mod_time`. Matches
    /// `FileSource::Set(char const*)`.
    pub fn set(&self, path: impl AsRef<Path>) -> CfResult<()> {
        let file = File::open(path).map_err(CfError::from)?;
        let metadata = file.metadata().map_err(CfError::from)?;
        let length = metadata.len();
        let mod_time = metadata.modified().ok();

        let mut guard = self.inner.lock();
        guard.file = Some(file);
        guard.length = length;
        guard.mod_time = mod_time;
        guard.logical_offset = 0;
        guard.map = FileMap::new(0);
        self.disk_reads.store(0, Ordering::Release);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().file.is_some()
    }

    pub fn length(&self) -> u64 {
        self.inner.lock().length
    }

    pub fn mod_time(&self) -> Option<SystemTime> {
        self.inner.lock().mod_time
    }

    pub fn seek(&self, pos: u64) {
        self.inner.lock().logical_offset = pos;
    }

    /// `posix_fadvise(POSIX_FADV_WILLNEED)` on Linux; a no-op elsewhere,
    /// matching spec §4.H "a hint (may be a no-op)".
    #[cfg(target_os = "linux")]
    pub fn advise(&self, pos: u64, len: u64) {
        let guard = self.inner.lock();
        if let Some(file) = &guard.file {
            unsafe {
                libc::posix_fadvise(
                    file.as_raw_fd(),
                    pos as libc::off_t,
                    len as libc::off_t,
                    libc::POSIX_FADV_WILLNEED,
                );
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn advise(&self, _pos: u64, _len: u64) {}

    /// Reads from the current logical cursor, advancing it — the
    /// non-positional overload spec §4.H names alongside `read(pos, buf)`.
    pub fn read_from_cursor(&self, buf: &mut [u8]) -> CfResult<usize> {
        let pos = self.inner.lock().logical_offset;
        let n = self.read(pos, buf)?;
        self.inner.lock().logical_offset = pos + n as u64;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes starting at `pos`, dispatching to the
    /// block-cached path when caching is enabled, else a direct positional
    /// `pread`. Implements spec §4.G's "File read algorithm (cached path)".
    pub fn read(&self, pos: u64, buf: &mut [u8]) -> CfResult<usize> {
        let mut guard = self.inner.lock();
        let Some(file) = guard.file.as_ref() else {
            return Err(CfError::NotFound);
        };
        let fd = file.as_raw_fd();

        if !guard.cache_enabled {
            return pread_exact(fd, pos, buf);
        }

        let unit = {
            let pool = self.pool.lock();
            pool.buffer_unit_size_bytes() as u64
        };
        if unit == 0 {
            return pread_exact(fd, pos, buf);
        }

        let mut total = 0usize;
        let mut cursor = pos;
        let mut remaining = buf.len();

        while remaining > 0 {
            let block = (cursor / unit) as usize;
            let block_start = block as u64 * unit;
            let offset_in_block = (cursor - block_start) as usize;

            // Step 1: try a cache hit. The pool lock is only ever held for
            // metadata bookkeeping here, never across the disk read below
            // (spec §5: "they must not acquire the pool mutex across the
            // read").
            let mut handle = {
                let mut pool = self.pool.lock();
                match guard.map.slot(block) {
                    Some(h) if pool.block_index(h) == block as i64 => {
                        pool.mark_used(h);
                        Some(h)
                    }
                    Some(_) => {
                        guard.map.set_slot(block, None);
                        None
                    }
                    None => None,
                }
            };

            if handle.is_none() {
                // Step 2: miss. Read the block from disk into a scratch
                // buffer with no lock held, then install it.
                let mut scratch = vec![0u8; unit as usize];
                let filled = pread_into(fd, block_start, &mut scratch).map_err(CfError::from)?;
                self.disk_reads.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(block, filled, "file block cache miss");

                let mut pool = self.pool.lock();
                let fresh = pool.get_buffer_element(unit as u32);
                pool.bytes_mut(fresh)[..filled as usize]
                    .copy_from_slice(&scratch[..filled as usize]);
                pool.set_block_index(fresh, block as i64);
                pool.set_fill_size(fresh, filled);
                guard.map.set_slot(block, Some(fresh));
                handle = Some(fresh);
            }
            let handle = handle.expect("handle is always installed above on a miss");

            let fill = {
                let pool = self.pool.lock();
                pool.fill_size(handle) as usize
            };
            if offset_in_block >= fill {
                break;
            }
            let available = fill - offset_in_block;
            let to_copy = available.min(remaining);
            {
                let pool = self.pool.lock();
                let src = &pool.filled_bytes(handle)[offset_in_block..offset_in_block + to_copy];
                buf[total..total + to_copy].copy_from_slice(src);
            }
            total += to_copy;
            cursor += to_copy as u64;
            remaining -= to_copy;

            // Short read at a non-terminal block: stop early (spec §4.G step 2).
            if (fill as u64) < unit {
                break;
            }
        }

        Ok(total)
    }

    pub fn close(&self) {
        let mut guard = self.inner.lock();
        if !guard.should_close {
            // Leak the fd deliberately: the caller owns it past this call.
            if let Some(file) = guard.file.take() {
                std::mem::forget(file);
            }
            return;
        }
        guard.file = None;
    }
}

fn pread_exact(fd: i32, pos: u64, buf: &mut [u8]) -> CfResult<usize> {
    pread_into(fd, pos, buf).map_err(CfError::from)
}

fn pread_into(fd: i32, pos: u64, buf: &mut [u8]) -> std::io::Result<u32> {
    let n = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            pos as libc::off_t,
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as u32)
}
