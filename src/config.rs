use std::time::Duration;

use crate::{
    cache::{FlagCache, NoopCache},
    events::{EventPublisher, NoopEventPublisher},
    repository::FlagRepository,
    FlagService,
};

/// Configuration for [`FlagService`]: its collaborators and cache tuning.
pub struct ServiceConfig<'a> {
    pub(crate) repository: Box<dyn FlagRepository + Send + Sync + 'a>,
    pub(crate) cache: Box<dyn FlagCache + Send + Sync + 'a>,
    pub(crate) event_publisher: Box<dyn EventPublisher + Send + Sync + 'a>,
    pub(crate) flag_ttl: Duration,
    pub(crate) ttl_jitter: Duration,
    pub(crate) evaluation_ttl: Option<Duration>,
}

impl<'a> ServiceConfig<'a> {
    /// Default time cached flags live for.
    pub const DEFAULT_FLAG_TTL: Duration = Duration::from_secs(5 * 60);

    /// Default upper bound of the random extra TTL added to each cached entry.
    pub const DEFAULT_TTL_JITTER: Duration = Duration::from_secs(30);

    /// Create a configuration backed by `repository`, with no cache and no event publisher.
    ///
    /// ```
    /// # use togglefox::{InMemoryFlagRepository, ServiceConfig};
    /// ServiceConfig::new(InMemoryFlagRepository::new());
    /// ```
    pub fn new(repository: impl FlagRepository + Send + Sync + 'a) -> Self {
        ServiceConfig {
            repository: Box::new(repository),
            cache: Box::new(NoopCache),
            event_publisher: Box::new(NoopEventPublisher),
            flag_ttl: Self::DEFAULT_FLAG_TTL,
            ttl_jitter: Self::DEFAULT_TTL_JITTER,
            evaluation_ttl: None,
        }
    }

    /// Put a cache in front of the repository.
    pub fn cache(mut self, cache: impl FlagCache + Send + Sync + 'a) -> Self {
        self.cache = Box::new(cache);
        self
    }

    /// Set the publisher that receives domain events after each persisted mutation.
    ///
    /// ```
    /// # use togglefox::{events::DomainEvent, InMemoryFlagRepository, ServiceConfig};
    /// let config = ServiceConfig::new(InMemoryFlagRepository::new())
    ///     .event_publisher(|event: DomainEvent| println!("{}", event.event_type()));
    /// ```
    pub fn event_publisher(
        mut self,
        event_publisher: impl EventPublisher + Send + Sync + 'a,
    ) -> Self {
        self.event_publisher = Box::new(event_publisher);
        self
    }

    /// How long a flag stays cached. Bounds how long a read racing a mutation can see stale
    /// state.
    pub fn flag_ttl(mut self, ttl: Duration) -> Self {
        self.flag_ttl = ttl;
        self
    }

    /// Upper bound of a random extra TTL, so entries filled together do not expire together.
    /// `Duration::ZERO` disables jitter.
    pub fn ttl_jitter(mut self, jitter: Duration) -> Self {
        self.ttl_jitter = jitter;
        self
    }

    /// Cache evaluation results of named subjects for `ttl`. Off by default.
    pub fn evaluation_ttl(mut self, ttl: Duration) -> Self {
        self.evaluation_ttl = Some(ttl);
        self
    }

    /// Create a new [`FlagService`] using this configuration.
    ///
    /// ```
    /// # use togglefox::{FlagService, InMemoryCache, InMemoryFlagRepository, ServiceConfig};
    /// let service: FlagService = ServiceConfig::new(InMemoryFlagRepository::new())
    ///     .cache(InMemoryCache::new())
    ///     .to_service();
    /// ```
    pub fn to_service(self) -> FlagService<'a> {
        FlagService::new(self)
    }
}
