use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::platform::error::CacheError;

pub type CacheResult<T> = Result<T, CacheError>;

pub const TOTAL_DEPLOYS_KEY: &str = "stats:total_deploys";
pub const DEPLOYS_BY_APP_KEY: &str = "stats:deploys_by_app";

pub fn logs_key(app_id: &str) -> String {
    format!("logs:{app_id}")
}

pub fn latest_release_key(app_id: &str) -> String {
    format!("release:{app_id}:latest")
}

/// Fast, non-authoritative key-value store backing the recent-log lists, the
/// latest-release projection and the deployment statistics.
///
/// Every operation is atomic on its own key; sequences of operations are not.
#[tonic::async_trait]
pub trait RecentLogCache: Send + Sync {
    /// Push onto the head of a list, returning the new length
    async fn push_front(&self, key: &str, value: String) -> CacheResult<usize>;

    /// Keep only the elements at indices `start..=stop`
    async fn trim(&self, key: &str, start: usize, stop: usize) -> CacheResult<()>;

    /// Returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Whole list, head to tail
    async fn list(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Stores a string value with no expiry
    async fn set(&self, key: &str, value: String) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// Insert a member or move it to a new score
    async fn sorted_insert(&self, key: &str, score: f64, member: &str) -> CacheResult<()>;

    /// Members ordered by descending score
    async fn sorted_desc(&self, key: &str, limit: usize) -> CacheResult<Vec<String>>;
}

#[derive(Debug)]
enum CacheValue {
    Str(String),
    List(VecDeque<String>),
    Sorted(Vec<(f64, String)>),
}

#[derive(Debug)]
struct CacheSlot {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheSlot {
    fn new(value: CacheValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local [`RecentLogCache`]. Expired keys are dropped lazily on access and
/// periodically by [`InMemoryCache::spawn_sweeper`].
///
/// Nothing survives a restart or is shared between servers: deployment stats
/// start again from zero, while log lists and release projections refill from
/// the durable store.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    slots: DashMap<String, CacheSlot>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    log::debug!("Cache sweeper dropped {purged} expired keys");
                }
            }
        })
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.slots.remove_if(key, |_, slot| slot.is_expired(now));
    }
}

#[tonic::async_trait]
impl RecentLogCache for InMemoryCache {
    async fn push_front(&self, key: &str, value: String) -> CacheResult<usize> {
        self.evict_if_expired(key);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot::new(CacheValue::List(VecDeque::new())));
        match &mut slot.value {
            CacheValue::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn trim(&self, key: &str, start: usize, stop: usize) -> CacheResult<()> {
        self.evict_if_expired(key);
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(());
        };
        match &mut slot.value {
            CacheValue::List(list) => {
                list.truncate(stop.saturating_add(1));
                list.drain(..start.min(list.len()));
            }
            _ => return Err(CacheError::WrongType(key.to_string())),
        }
        let emptied = matches!(&slot.value, CacheValue::List(list) if list.is_empty());
        drop(slot);
        if emptied {
            self.slots.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.evict_if_expired(key);
        match self.slots.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, key: &str) -> CacheResult<Vec<String>> {
        self.evict_if_expired(key);
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                CacheValue::List(list) => Ok(list.iter().cloned().collect()),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        self.slots
            .insert(key.to_string(), CacheSlot::new(CacheValue::Str(value)));
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.evict_if_expired(key);
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                CacheValue::Str(value) => Ok(Some(value.clone())),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.slots.remove(key).is_some())
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.evict_if_expired(key);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot::new(CacheValue::Str("0".to_string())));
        match &mut slot.value {
            CacheValue::Str(value) => {
                let next = value
                    .parse::<i64>()
                    .map_err(|_| CacheError::WrongType(key.to_string()))?
                    + 1;
                *value = next.to_string();
                Ok(next)
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn sorted_insert(&self, key: &str, score: f64, member: &str) -> CacheResult<()> {
        self.evict_if_expired(key);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot::new(CacheValue::Sorted(Vec::new())));
        match &mut slot.value {
            CacheValue::Sorted(members) => {
                members.retain(|(_, existing)| existing != member);
                members.push((score, member.to_string()));
                Ok(())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn sorted_desc(&self, key: &str, limit: usize) -> CacheResult<Vec<String>> {
        self.evict_if_expired(key);
        let mut members = match self.slots.get(key) {
            Some(slot) => match &slot.value {
                CacheValue::Sorted(members) => members.clone(),
                _ => return Err(CacheError::WrongType(key.to_string())),
            },
            None => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });
        Ok(members
            .into_iter()
            .take(limit)
            .map(|(_, member)| member)
            .collect())
    }
}
