use std::sync::Arc;

use crate::{Environment, FeatureFlag, FlagId, Result};

/// Durable storage of flags: the source of truth.
///
/// Implementations must:
/// - reject a save that would create a second flag with the same `(name, environment)` with
///   [`Conflict::AlreadyExists`](crate::Conflict::AlreadyExists);
/// - reject a save whose [`FeatureFlag::version`] does not match the stored version with
///   [`Conflict::StaleVersion`](crate::Conflict::StaleVersion), instead of overwriting state the
///   writer never read;
/// - call [`FeatureFlag::bump_version`] on successful saves and return the stored flag.
///
/// Infrastructure failures are reported as [`Error::Repository`](crate::Error::Repository).
pub trait FlagRepository {
    fn save(&self, flag: FeatureFlag) -> Result<FeatureFlag>;

    fn find_by_id(&self, id: &FlagId) -> Result<Option<FeatureFlag>>;

    fn find_by_name_and_environment(
        &self,
        name: &str,
        environment: &Environment,
    ) -> Result<Option<FeatureFlag>>;

    fn exists_by_name_and_environment(
        &self,
        name: &str,
        environment: &Environment,
    ) -> Result<bool> {
        Ok(self.find_by_name_and_environment(name, environment)?.is_some())
    }

    fn find_by_environment(&self, environment: &Environment) -> Result<Vec<FeatureFlag>>;

    fn delete(&self, id: &FlagId) -> Result<()>;
}

impl<T: FlagRepository + ?Sized> FlagRepository for Arc<T> {
    fn save(&self, flag: FeatureFlag) -> Result<FeatureFlag> {
        (**self).save(flag)
    }

    fn find_by_id(&self, id: &FlagId) -> Result<Option<FeatureFlag>> {
        (**self).find_by_id(id)
    }

    fn find_by_name_and_environment(
        &self,
        name: &str,
        environment: &Environment,
    ) -> Result<Option<FeatureFlag>> {
        (**self).find_by_name_and_environment(name, environment)
    }

    fn exists_by_name_and_environment(
        &self,
        name: &str,
        environment: &Environment,
    ) -> Result<bool> {
        (**self).exists_by_name_and_environment(name, environment)
    }

    fn find_by_environment(&self, environment: &Environment) -> Result<Vec<FeatureFlag>> {
        (**self).find_by_environment(environment)
    }

    fn delete(&self, id: &FlagId) -> Result<()> {
        (**self).delete(id)
    }
}
