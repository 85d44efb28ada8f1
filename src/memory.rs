//! In-process implementations of [`FlagRepository`] and [`FlagCache`], for tests, demos, and
//! single-node deployments.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
    time::{Duration, Instant},
};

use crate::{
    cache::{CacheEntry, FlagCache},
    repository::FlagRepository,
    Conflict, Environment, Error, FeatureFlag, FlagId, Result,
};

/// Thread-safe in-memory flag storage with `(name, environment)` uniqueness and optimistic
/// concurrency checks.
#[derive(Default)]
pub struct InMemoryFlagRepository {
    flags: RwLock<HashMap<FlagId, FeatureFlag>>,
}

impl InMemoryFlagRepository {
    pub fn new() -> Self {
        InMemoryFlagRepository::default()
    }

    pub fn len(&self) -> usize {
        self.flags
            .read()
            .expect("thread holding flags lock should not panic")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlagRepository for InMemoryFlagRepository {
    fn save(&self, mut flag: FeatureFlag) -> Result<FeatureFlag> {
        let mut flags = self
            .flags
            .write()
            .expect("thread holding flags lock should not panic");

        let stored_version = flags.get(flag.id()).map_or(0, FeatureFlag::version);
        if stored_version != flag.version() {
            return Err(Conflict::StaleVersion {
                flag_id: flag.id().clone(),
                expected: flag.version(),
                actual: stored_version,
            }
            .into());
        }

        let duplicate = flags.values().any(|other| {
            other.id() != flag.id()
                && other.name() == flag.name()
                && other.environment() == flag.environment()
        });
        if duplicate {
            return Err(Conflict::AlreadyExists {
                name: flag.name().to_owned(),
                environment: flag.environment().clone(),
            }
            .into());
        }

        flag.bump_version();
        flags.insert(flag.id().clone(), flag.clone());
        Ok(flag)
    }

    fn find_by_id(&self, id: &FlagId) -> Result<Option<FeatureFlag>> {
        let flags = self
            .flags
            .read()
            .expect("thread holding flags lock should not panic");
        Ok(flags.get(id).cloned())
    }

    fn find_by_name_and_environment(
        &self,
        name: &str,
        environment: &Environment,
    ) -> Result<Option<FeatureFlag>> {
        let flags = self
            .flags
            .read()
            .expect("thread holding flags lock should not panic");
        Ok(flags
            .values()
            .find(|flag| flag.name() == name && flag.environment() == environment)
            .cloned())
    }

    fn find_by_environment(&self, environment: &Environment) -> Result<Vec<FeatureFlag>> {
        let flags = self
            .flags
            .read()
            .expect("thread holding flags lock should not panic");
        let mut found = flags
            .values()
            .filter(|flag| flag.environment() == environment)
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(found)
    }

    fn delete(&self, id: &FlagId) -> Result<()> {
        let mut flags = self
            .flags
            .write()
            .expect("thread holding flags lock should not panic");
        flags
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::FlagNotFound(id.to_string()))
    }
}

/// Hit/miss/eviction counters of an [`InMemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that were hits; `0.0` before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        match self.requests() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

/// Thread-safe in-memory [`FlagCache`] honouring entry TTLs.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (CacheEntry, Instant)>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        InMemoryCache::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entries, including entries that expired since the last `put`.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("thread holding cache lock should not panic")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .expect("thread holding cache lock should not panic")
            .clear();
    }
}

impl FlagCache for InMemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self
            .entries
            .read()
            .expect("thread holding cache lock should not panic");

        let found = entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(entry, _)| entry.clone());

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    fn put(&self, key: &str, value: CacheEntry, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .expect("thread holding cache lock should not panic");
        // Results cached under superseded flag versions are never read again; drop them here.
        entries.retain(|_, (_, expires_at)| now < *expires_at);
        entries.insert(key.to_owned(), (value, now + ttl));
        Ok(())
    }

    fn evict(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .expect("thread holding cache lock should not panic");
        if entries.remove(key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
