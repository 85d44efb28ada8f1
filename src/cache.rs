//! External cache in front of the repository.
//!
//! The cache is only a performance optimization. Reads may be stale until the entry is evicted
//! or expires; mutations evict before they return, so the next read after a mutation is fresh.
use std::{sync::Arc, time::Duration};

use crate::{Environment, EvaluationResult, FeatureFlag, FlagId, Result};

/// Value stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Flag(Box<FeatureFlag>),
    Evaluation(EvaluationResult),
}

/// Key/value cache with per-entry TTL. Keys are opaque strings built by [`flag_key`] and
/// [`evaluation_key`].
///
/// Errors are reported as [`Error::Cache`](crate::Error::Cache); the service logs and ignores
/// them.
pub trait FlagCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    fn put(&self, key: &str, value: CacheEntry, ttl: Duration) -> Result<()>;

    fn evict(&self, key: &str) -> Result<()>;
}

impl<T: FlagCache + ?Sized> FlagCache for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: CacheEntry, ttl: Duration) -> Result<()> {
        (**self).put(key, value, ttl)
    }

    fn evict(&self, key: &str) -> Result<()> {
        (**self).evict(key)
    }
}

/// Cache that never stores anything. Every lookup goes to the repository.
pub struct NoopCache;

impl FlagCache for NoopCache {
    fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: CacheEntry, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Key of the cached flag for `(name, environment)`.
pub fn flag_key(name: &str, environment: &Environment) -> String {
    format!("flag:{name}:{environment}")
}

/// Key of a cached evaluation result.
///
/// The flag id and version are part of the key: once a mutation evicts the flag entry, the next
/// read loads the new version and results cached under older versions are never looked up again.
/// A flag recreated under the same name gets a new id, so it never sees its predecessor's
/// results.
pub fn evaluation_key(
    name: &str,
    environment: &Environment,
    flag_id: &FlagId,
    version: u64,
    subject_id: &str,
) -> String {
    format!("evaluation:{name}:{environment}:{flag_id}:v{version}:{subject_id}")
}

#[cfg(test)]
mod tests {
    use super::{evaluation_key, flag_key};
    use crate::{Environment, FlagId};

    #[test]
    fn keys() {
        let env = Environment::new("Dev").unwrap();
        let id = FlagId::new("f-1").unwrap();
        assert_eq!(flag_key("checkout", &env), "flag:checkout:dev");
        assert_eq!(
            evaluation_key("checkout", &env, &id, 3, "alice"),
            "evaluation:checkout:dev:f-1:v3:alice"
        );
    }
}
