use crate::Result;
use chrono::NaiveDate;
use dashmap::DashMap;
use pnl_core::PriceSeries;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

/// Composite key for one memoized historical series: which asset, fetched on
/// which calendar day, at which resolution. The day component retires
/// entries naturally as a long-running process crosses midnight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset: String,
    pub day: NaiveDate,
    pub resolution: String,
}

impl CacheKey {
    pub fn new(asset: impl Into<String>, day: NaiveDate, resolution: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            day,
            resolution: resolution.into(),
        }
    }
}

struct CacheEntry {
    cell: Arc<OnceCell<Arc<PriceSeries>>>,
    inserted_at: Instant,
}

/// Process-wide memo of historical price series, shared read-mostly across
/// concurrent scans. The check-then-insert sequence is guarded per key: the
/// first miss installs a `OnceCell` and runs the upstream fetch inside it,
/// so concurrent misses for one key produce exactly one upstream call. A
/// failed fetch leaves the cell empty and a later request may retry.
///
/// Growth is bounded: at most `max_entries` series are kept (FIFO eviction
/// by insertion order) and entries past the optional TTL are dropped and
/// refetched.
pub struct PriceHistoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    insertion_order: Mutex<VecDeque<CacheKey>>,
    max_entries: usize,
    ttl: Option<Duration>,
}

impl PriceHistoryCache {
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            insertion_order: Mutex::new(VecDeque::new()),
            // a zero bound would make every insert evict itself
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &config_manager::CacheConfig) -> Self {
        Self::new(
            config.max_entries,
            config.ttl_seconds.map(Duration::from_secs),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached series for `key`, running `fetch` at most once per
    /// distinct key to populate it. A hit returns the identical `Arc` that
    /// the populating fetch produced.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<PriceSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PriceSeries>>,
    {
        self.drop_if_expired(&key);

        let cell = match self.entries.get(&key) {
            Some(entry) => Arc::clone(&entry.cell),
            None => self.install_cell(&key),
        };

        let series = cell
            .get_or_try_init(|| async {
                debug!(
                    "Price history cache miss for {} ({} / {})",
                    key.asset, key.day, key.resolution
                );
                fetch().await.map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(series))
    }

    fn drop_if_expired(&self, key: &CacheKey) {
        if let Some(ttl) = self.ttl {
            let expired = self
                .entries
                .get(key)
                .map(|entry| entry.inserted_at.elapsed() > ttl)
                .unwrap_or(false);
            if expired {
                debug!("Evicting expired price history entry for {}", key.asset);
                self.entries.remove(key);
            }
        }
    }

    fn install_cell(&self, key: &CacheKey) -> Arc<OnceCell<Arc<PriceSeries>>> {
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            let mut order = self.insertion_order.lock().expect("cache order lock");
            order.push_back(key.clone());
            CacheEntry {
                cell: Arc::new(OnceCell::new()),
                inserted_at: Instant::now(),
            }
        });
        let cell = Arc::clone(&entry.cell);
        drop(entry);

        self.enforce_bound(key);
        cell
    }

    /// FIFO eviction down to the configured bound. The key just inserted is
    /// never the one evicted.
    fn enforce_bound(&self, just_inserted: &CacheKey) {
        while self.entries.len() > self.max_entries {
            let victim = {
                let mut order = self.insertion_order.lock().expect("cache order lock");
                order.pop_front()
            };
            match victim {
                Some(ref key) if key == just_inserted => {
                    let mut order = self.insertion_order.lock().expect("cache order lock");
                    order.push_back(key.clone());
                }
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
