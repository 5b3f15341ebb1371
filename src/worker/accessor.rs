//! Debounced lazy cache accessor
//!
//! The cache handle is opened on first use and released after an idle
//! window in which nobody asked for it. The bookkeeping is a small state
//! machine kept separate from the timers so it can be driven directly:
//!
//! | State | Meaning |
//! |-------|---------|
//! | Closed | No handle held |
//! | Open | Handle held, no release armed (only inside `acquire`) |
//! | PendingRelease | Handle held, release armed for `deadline` |
//!
//! Every arm bumps a generation counter. A release timer only closes the
//! slot if its generation is still current, so a superseded timer that
//! fires late is a no-op even if aborting it raced with its wake-up.

use crate::error::PrefetchResult;
use crate::host::{CacheHandle, CacheStorage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Slot state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState<H> {
    Closed,
    Open(H),
    PendingRelease { handle: H, deadline: Instant },
}

/// Debounce state machine for one lazily opened resource
#[derive(Debug)]
pub struct DebounceSlot<H> {
    state: SlotState<H>,
    generation: u64,
}

impl<H: Clone> DebounceSlot<H> {
    /// Create a closed slot
    pub fn new() -> Self {
        Self {
            state: SlotState::Closed,
            generation: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> &SlotState<H> {
        &self.state
    }

    /// Whether a handle is held
    pub fn is_open(&self) -> bool {
        !matches!(self.state, SlotState::Closed)
    }

    /// Take the held handle for a new use
    ///
    /// Open or PendingRelease move to Open, cancelling the pending release.
    /// Returns `None` when Closed: the caller must open and call [`opened`].
    ///
    /// [`opened`]: DebounceSlot::opened
    pub fn acquire(&mut self) -> Option<H> {
        let handle = match &self.state {
            SlotState::Closed => return None,
            SlotState::Open(handle) => handle.clone(),
            SlotState::PendingRelease { handle, .. } => handle.clone(),
        };
        self.state = SlotState::Open(handle.clone());
        Some(handle)
    }

    /// Record a freshly opened handle (Closed -> Open)
    ///
    /// A handle recorded while one is already held replaces it.
    pub fn opened(&mut self, handle: H) {
        self.state = SlotState::Open(handle);
    }

    /// Arm the release for `deadline` (Open -> PendingRelease)
    ///
    /// Returns the generation the release timer must present to [`expire`],
    /// or `None` when there is no handle to release.
    ///
    /// [`expire`]: DebounceSlot::expire
    pub fn arm(&mut self, deadline: Instant) -> Option<u64> {
        let handle = match &self.state {
            SlotState::Closed => return None,
            SlotState::Open(handle) => handle.clone(),
            SlotState::PendingRelease { handle, .. } => handle.clone(),
        };
        self.generation += 1;
        self.state = SlotState::PendingRelease { handle, deadline };
        Some(self.generation)
    }

    /// Timer fire (PendingRelease -> Closed)
    ///
    /// Only honored for the current generation once `now` has reached the
    /// deadline. Returns the released handle.
    pub fn expire(&mut self, generation: u64, now: Instant) -> Option<H> {
        if generation != self.generation {
            return None;
        }
        match &self.state {
            SlotState::PendingRelease { deadline, .. } if now >= *deadline => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.state, SlotState::Closed) {
            SlotState::PendingRelease { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Drop any held handle and invalidate outstanding timers
    pub fn reset(&mut self) -> Option<H> {
        self.generation += 1;
        match std::mem::replace(&mut self.state, SlotState::Closed) {
            SlotState::Closed => None,
            SlotState::Open(handle) | SlotState::PendingRelease { handle, .. } => Some(handle),
        }
    }
}

impl<H: Clone> Default for DebounceSlot<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Open/release counters
#[derive(Debug, Default)]
pub struct AccessorStats {
    opens: AtomicU64,
    releases: AtomicU64,
}

impl AccessorStats {
    /// Number of times the store was opened
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of idle releases that fired
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

type Handle = Arc<dyn CacheHandle>;

struct Guarded {
    slot: DebounceSlot<Handle>,
    timer: Option<AbortHandle>,
}

/// Lazily opened, idle-released cache handle shared by all worker events
pub struct CacheAccessor {
    storage: Arc<dyn CacheStorage>,
    cache_name: String,
    idle: Duration,
    guarded: Arc<Mutex<Guarded>>,
    stats: Arc<AccessorStats>,
}

impl CacheAccessor {
    /// Create a closed accessor; nothing is opened until [`acquire`]
    ///
    /// [`acquire`]: CacheAccessor::acquire
    pub fn new(storage: Arc<dyn CacheStorage>, cache_name: impl Into<String>, idle: Duration) -> Self {
        Self {
            storage,
            cache_name: cache_name.into(),
            idle,
            guarded: Arc::new(Mutex::new(Guarded {
                slot: DebounceSlot::new(),
                timer: None,
            })),
            stats: Arc::new(AccessorStats::default()),
        }
    }

    /// Name of the cache opened in the store
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Idle window before release
    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Open/release counters
    pub fn stats(&self) -> &AccessorStats {
        &self.stats
    }

    /// Whether a handle is currently held
    pub async fn is_open(&self) -> bool {
        self.guarded.lock().await.slot.is_open()
    }

    /// Get the cache handle, opening it if needed, and restart the idle window
    ///
    /// Concurrent callers serialize on the slot, so at most one open is in
    /// flight and they all receive the same handle. The returned handle
    /// stays valid after the accessor releases its own reference. If the
    /// open fails the slot stays Closed and the next call tries again.
    pub async fn acquire(&self) -> PrefetchResult<Handle> {
        let mut guarded = self.guarded.lock().await;

        let handle = match guarded.slot.acquire() {
            Some(handle) => handle,
            None => {
                let handle = self.storage.open(&self.cache_name).await?;
                self.stats.opens.fetch_add(1, Ordering::SeqCst);
                info!("Opened cache {}", self.cache_name);
                guarded.slot.opened(Arc::clone(&handle));
                handle
            }
        };

        let deadline = Instant::now() + self.idle;
        if let Some(generation) = guarded.slot.arm(deadline) {
            let timer = self.schedule_release(generation, deadline);
            if let Some(previous) = guarded.timer.replace(timer) {
                previous.abort();
            }
        }

        Ok(handle)
    }

    /// Release any held handle and cancel the pending timer
    pub async fn reset(&self) {
        let mut guarded = self.guarded.lock().await;
        if let Some(timer) = guarded.timer.take() {
            timer.abort();
        }
        if guarded.slot.reset().is_some() {
            debug!("Dropped cache handle for {}", self.cache_name);
        }
    }

    fn schedule_release(&self, generation: u64, deadline: Instant) -> AbortHandle {
        let guarded = Arc::clone(&self.guarded);
        let stats = Arc::clone(&self.stats);
        let name = self.cache_name.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut guarded = guarded.lock().await;
            if guarded.slot.expire(generation, Instant::now()).is_some() {
                guarded.timer = None;
                stats.releases.fetch_add(1, Ordering::SeqCst);
                info!("Released idle cache {}", name);
            }
        });
        task.abort_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrefetchError;
    use crate::host::MemoryCacheStorage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const IDLE: Duration = Duration::from_millis(5000);

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn slot_transitions() {
        let now = Instant::now();
        let mut slot: DebounceSlot<u32> = DebounceSlot::new();

        assert_eq!(slot.acquire(), None);
        slot.opened(7);
        assert_eq!(slot.state(), &SlotState::Open(7));

        let gen1 = slot.arm(now + IDLE).unwrap();
        assert!(matches!(slot.state(), SlotState::PendingRelease { handle: 7, .. }));

        // Reuse cancels the pending release
        assert_eq!(slot.acquire(), Some(7));
        assert_eq!(slot.state(), &SlotState::Open(7));
        let gen2 = slot.arm(now + IDLE * 2).unwrap();
        assert!(gen2 > gen1);

        // Superseded generation is ignored
        assert_eq!(slot.expire(gen1, now + IDLE * 3), None);
        // Current generation before its deadline is ignored
        assert_eq!(slot.expire(gen2, now + IDLE), None);
        assert_eq!(slot.expire(gen2, now + IDLE * 2), Some(7));
        assert_eq!(slot.state(), &SlotState::Closed);
        assert_eq!(slot.arm(now), None);
    }

    #[test]
    fn slot_reset_invalidates_timers() {
        let now = Instant::now();
        let mut slot: DebounceSlot<u32> = DebounceSlot::new();
        slot.opened(1);
        let generation = slot.arm(now).unwrap();

        assert_eq!(slot.reset(), Some(1));
        slot.opened(2);
        slot.arm(now + IDLE);
        assert_eq!(slot.expire(generation, now + IDLE), None);
        assert!(slot.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_reuses_handle_within_window() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let accessor = CacheAccessor::new(storage.clone(), "bundles", IDLE);

        let a = accessor.acquire().await.unwrap();
        tokio::time::advance(Duration::from_millis(1000)).await;
        let b = accessor.acquire().await.unwrap();
        tokio::time::advance(Duration::from_millis(1000)).await;
        let c = accessor.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(storage.open_count(), 1);
        assert_eq!(accessor.stats().opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn release_fires_once_after_last_call() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let accessor = CacheAccessor::new(storage.clone(), "bundles", IDLE);

        accessor.acquire().await.unwrap();
        tokio::time::advance(Duration::from_millis(3000)).await;
        accessor.acquire().await.unwrap();

        // 5s after the first call, but only 2s after the last
        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        assert!(accessor.is_open().await);
        assert_eq!(accessor.stats().releases(), 0);

        tokio::time::advance(Duration::from_millis(2999)).await;
        settle().await;
        assert!(accessor.is_open().await);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(!accessor.is_open().await);
        assert_eq!(accessor.stats().releases(), 1);

        tokio::time::advance(IDLE * 4).await;
        settle().await;
        assert_eq!(accessor.stats().releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reopens_after_release() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let accessor = CacheAccessor::new(storage.clone(), "bundles", IDLE);

        let first = accessor.acquire().await.unwrap();
        tokio::time::advance(IDLE).await;
        settle().await;
        assert!(!accessor.is_open().await);

        // Released handle is still usable by whoever holds it
        assert!(first.keys().await.unwrap().is_empty());

        accessor.acquire().await.unwrap();
        assert_eq!(storage.open_count(), 2);
        assert_eq!(accessor.stats().opens(), 2);
    }

    /// Store whose open takes a while, so callers can pile up behind it
    struct SlowStorage {
        delay: Duration,
        started: AtomicUsize,
        inner: MemoryCacheStorage,
    }

    #[async_trait]
    impl CacheStorage for SlowStorage {
        async fn open(&self, name: &str) -> PrefetchResult<Handle> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.open(name).await
        }

        async fn delete(&self, name: &str) -> PrefetchResult<bool> {
            self.inner.delete(name).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_share_one_open() {
        let storage = Arc::new(SlowStorage {
            delay: Duration::from_millis(200),
            started: AtomicUsize::new(0),
            inner: MemoryCacheStorage::new(),
        });
        let accessor = Arc::new(CacheAccessor::new(storage.clone(), "bundles", IDLE));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let accessor = Arc::clone(&accessor);
                tokio::spawn(async move { accessor.acquire().await })
            })
            .collect();

        // One open is in flight and nothing has completed yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.started.load(Ordering::SeqCst), 1);
        assert_eq!(storage.inner.open_count(), 0);

        let handles: Vec<Handle> = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        for handle in &handles {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
        assert_eq!(handles.len(), 8);
        assert_eq!(storage.started.load(Ordering::SeqCst), 1);
        assert_eq!(storage.inner.open_count(), 1);
        assert_eq!(accessor.stats().opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_release() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let accessor = CacheAccessor::new(storage.clone(), "bundles", IDLE);

        accessor.acquire().await.unwrap();
        accessor.reset().await;
        assert!(!accessor.is_open().await);

        tokio::time::advance(IDLE * 2).await;
        settle().await;
        assert_eq!(accessor.stats().releases(), 0);
    }

    struct FlakyStorage {
        failures_left: AtomicUsize,
        inner: MemoryCacheStorage,
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        async fn open(&self, name: &str) -> PrefetchResult<Handle> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PrefetchError::cache_open(name, "store unavailable"));
            }
            self.inner.open(name).await
        }

        async fn delete(&self, name: &str) -> PrefetchResult<bool> {
            self.inner.delete(name).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_propagates_and_allows_retry() {
        let storage = Arc::new(FlakyStorage {
            failures_left: AtomicUsize::new(1),
            inner: MemoryCacheStorage::new(),
        });
        let accessor = CacheAccessor::new(storage, "bundles", IDLE);

        let err = accessor.acquire().await.err().unwrap();
        assert!(matches!(err, PrefetchError::CacheOpen { .. }));
        assert!(!accessor.is_open().await);

        accessor.acquire().await.unwrap();
        assert!(accessor.is_open().await);
        assert_eq!(accessor.stats().opens(), 1);
    }
}
