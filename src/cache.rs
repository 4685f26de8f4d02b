use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use image::RgbaImage;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::assets::pixels::PixelAccess;
use crate::foundation::error::{MosaicError, MosaicResult};

/// Cache key: a reference image resized to an exact size.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Counters describing cache behaviour over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub evictions: u64,
}

struct Slot {
    cell: OnceCell<Arc<RgbaImage>>,
    last_used: AtomicU64,
    // Set once the populated buffer has been added to `Inner::bytes`.
    accounted: AtomicBool,
}

impl Slot {
    fn new(tick: u64) -> Self {
        Self {
            cell: OnceCell::new(),
            last_used: AtomicU64::new(tick),
            accounted: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<CacheKey, Arc<Slot>>,
    bytes: u64,
}

/// Process-wide memo of "reference image resized to WxH" buffers.
///
/// Concurrent misses on the same key are coalesced: one caller decodes and resizes, the others
/// block on the slot and receive the finished buffer. A failed population is dropped from the map
/// once no other caller waits on it, so a later request retries. With `max_bytes` set, least-recently-used entries are evicted once
/// the retained total exceeds the cap; evicted keys are simply recomputed on their next request.
pub struct ResizedCache {
    pixels: Arc<dyn PixelAccess>,
    max_bytes: Option<u64>,
    inner: Mutex<Inner>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ResizedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizedCache")
            .field("max_bytes", &self.max_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResizedCache {
    pub fn new(pixels: Arc<dyn PixelAccess>) -> Self {
        Self::with_max_bytes(pixels, None)
    }

    pub fn with_max_bytes(pixels: Arc<dyn PixelAccess>, max_bytes: Option<u64>) -> Self {
        Self {
            pixels,
            max_bytes,
            inner: Mutex::new(Inner::default()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return `path` resized to `width` x `height`, computing it on first use.
    pub fn get(&self, path: &Path, width: u32, height: u32) -> MosaicResult<Arc<RgbaImage>> {
        let key = CacheKey {
            path: path.to_path_buf(),
            width,
            height,
        };
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let slot = {
            let mut inner = self.inner.lock();
            Arc::clone(
                inner
                    .slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Slot::new(tick))),
            )
        };
        slot.last_used.store(tick, Ordering::Relaxed);

        if let Some(buf) = slot.cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(buf));
        }

        let mut populated = false;
        let result = slot.cell.get_or_try_init(|| {
            populated = true;
            self.misses.fetch_add(1, Ordering::Relaxed);
            let source = self.pixels.decode(path)?;
            let resized = self.pixels.resize(&source, width, height)?;
            Ok::<_, MosaicError>(Arc::new(resized))
        });

        let buf = match result {
            Ok(buf) => Arc::clone(buf),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.discard_empty(&key, &slot);
                return Err(e);
            }
        };

        if populated {
            self.account(&key, &slot, byte_len(&buf));
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(buf)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let inner = self.inner.lock();
            let entries = inner
                .slots
                .values()
                .filter(|s| s.cell.get().is_some())
                .count();
            (entries, inner.bytes)
        };
        CacheStats {
            entries,
            bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove `slot` if it is still unpopulated and no other caller holds it.
    fn discard_empty(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let mut inner = self.inner.lock();
        // Two owners: the map and this caller. Clones are only taken under this lock.
        let unused = inner
            .slots
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && Arc::strong_count(slot) == 2);
        if unused && slot.cell.get().is_none() {
            inner.slots.remove(key);
        }
    }

    fn account(&self, key: &CacheKey, slot: &Arc<Slot>, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.bytes = inner.bytes.saturating_add(bytes);
        slot.accounted.store(true, Ordering::Release);

        let Some(max) = self.max_bytes else {
            return;
        };
        while inner.bytes > max {
            let victim = inner
                .slots
                .iter()
                .filter(|(k, s)| *k != key && s.accounted.load(Ordering::Acquire))
                .min_by_key(|(_, s)| s.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(evicted) = inner.slots.remove(&victim) {
                let freed = evicted.cell.get().map_or(0, |b| byte_len(b));
                inner.bytes = inner.bytes.saturating_sub(freed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(path = %victim.path.display(), freed, "evicted resized reference");
            }
        }
    }
}

fn byte_len(img: &RgbaImage) -> u64 {
    img.as_raw().len() as u64
}
