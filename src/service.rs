use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::{
    cache::{self, CacheEntry},
    events::{DomainEvent, EventRecorder},
    Conflict, Environment, Error, EvaluationContext, EvaluationRequest, EvaluationResponse,
    EvaluationResult, FeatureFlag, FlagId, FlagMutation, Result, RolloutStrategy, ServiceConfig,
};

/// Application service coordinating flag evaluation and management.
///
/// Reads go through the cache (cache-aside): on a miss the flag is loaded from the repository
/// and cached for the configured TTL. Mutations always read the repository, persist, evict the
/// cached flag and only then publish the produced events.
///
/// Cache failures never fail an operation; they are logged and the repository is used instead.
///
/// # Examples
/// ```
/// # use togglefox::{
/// #     Environment, EvaluationContext, InMemoryFlagRepository, RolloutStrategy, ServiceConfig,
/// # };
/// let service = ServiceConfig::new(InMemoryFlagRepository::new()).to_service();
/// let flag = service.create_flag(
///     "checkout",
///     "",
///     Environment::development(),
///     RolloutStrategy::percentage(100)?,
/// )?;
/// service.enable_flag(flag.id())?;
///
/// let result = service.evaluate(
///     "checkout",
///     &Environment::development(),
///     &EvaluationContext::for_subject("alice"),
/// )?;
/// assert!(result.is_enabled());
/// # Ok::<(), togglefox::Error>(())
/// ```
pub struct FlagService<'a> {
    config: ServiceConfig<'a>,
}

impl<'a> FlagService<'a> {
    /// Create a new `FlagService` using the specified configuration.
    pub fn new(config: ServiceConfig<'a>) -> Self {
        FlagService { config }
    }

    /// Create a new disabled flag and publish its `Created` event.
    ///
    /// Fails with [`Conflict::AlreadyExists`] if a flag with the same name exists in
    /// `environment`.
    pub fn create_flag(
        &self,
        name: &str,
        description: &str,
        environment: Environment,
        strategy: RolloutStrategy,
    ) -> Result<FeatureFlag> {
        let (flag, created) = FeatureFlag::create(name, description, environment, strategy)?;

        if self
            .config
            .repository
            .exists_by_name_and_environment(flag.name(), flag.environment())?
        {
            return Err(Conflict::AlreadyExists {
                name: flag.name().to_owned(),
                environment: flag.environment().clone(),
            }
            .into());
        }

        let flag = self.config.repository.save(flag)?;
        log::info!(target: "togglefox",
                   flag_id:display = flag.id(),
                   flag_name = flag.name(),
                   environment:display = flag.environment(),
                   strategy:display = flag.strategy();
                   "created flag");

        self.publish(vec![created]);
        Ok(flag)
    }

    /// Load the flag used for evaluation, preferring the cache.
    pub fn get_for_evaluation(&self, name: &str, environment: &Environment) -> Result<FeatureFlag> {
        let key = cache::flag_key(name, environment);

        match self.config.cache.get(&key) {
            Ok(Some(CacheEntry::Flag(flag))) => {
                log::debug!(target: "togglefox", key = key.as_str(); "flag cache hit");
                return Ok(*flag);
            }
            Ok(Some(_)) => {
                log::warn!(target: "togglefox",
                           key = key.as_str();
                           "unexpected cache entry under flag key, ignoring");
            }
            Ok(None) => {
                log::debug!(target: "togglefox", key = key.as_str(); "flag cache miss");
            }
            Err(err) => {
                log::warn!(target: "togglefox",
                           key = key.as_str(),
                           error:display = err;
                           "failed to read flag from cache, falling back to repository");
            }
        }

        let flag = self
            .config
            .repository
            .find_by_name_and_environment(name, environment)?
            .ok_or_else(|| Error::FlagNotFound(name.to_owned()))?;

        self.cache_put(
            &key,
            CacheEntry::Flag(Box::new(flag.clone())),
            self.config.flag_ttl,
        );
        Ok(flag)
    }

    /// Evaluate flag `name` in `environment` for `context`.
    ///
    /// A missing flag is not an error: the result is disabled with reason
    /// `"flag not found: <name>"`. Repository failures are returned as errors.
    pub fn evaluate(
        &self,
        name: &str,
        environment: &Environment,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult> {
        self.resolve(name, environment, context)
            .map(|(_flag_id, result)| result)
    }

    /// Evaluate a request coming from the presentation layer.
    ///
    /// Like [`FlagService::evaluate`], bad input degrades to a disabled response: an environment
    /// name that fails validation yields reason `"invalid environment: <name>"`.
    pub fn evaluate_request(&self, request: &EvaluationRequest) -> Result<EvaluationResponse> {
        let environment = match Environment::new(&request.environment) {
            Ok(environment) => environment,
            Err(err) => {
                log::debug!(target: "togglefox",
                            flag_name = request.flag_name.as_str(),
                            environment = request.environment.as_str(),
                            error:display = err;
                            "evaluating a flag in an invalid environment");
                let reason = format!("invalid environment: {}", request.environment);
                return Ok(EvaluationResponse::new(None, EvaluationResult::disabled(reason)));
            }
        };
        let (flag_id, result) =
            self.resolve(&request.flag_name, &environment, &request.context())?;
        Ok(EvaluationResponse::new(flag_id, result))
    }

    fn resolve(
        &self,
        name: &str,
        environment: &Environment,
        context: &EvaluationContext,
    ) -> Result<(Option<FlagId>, EvaluationResult)> {
        let flag = match self.get_for_evaluation(name, environment) {
            Ok(flag) => flag,
            Err(Error::FlagNotFound(_)) => {
                log::debug!(target: "togglefox",
                            flag_name = name,
                            environment:display = environment;
                            "evaluating a flag that does not exist");
                return Ok((None, EvaluationResult::disabled(format!("flag not found: {name}"))));
            }
            Err(err) => {
                log::warn!(target: "togglefox",
                           flag_name = name,
                           environment:display = environment;
                           "error occurred while loading a flag: {:?}", err);
                return Err(err);
            }
        };

        let result = match self.evaluation_cache(&flag, context) {
            Some((key, ttl)) => self.cached_evaluation(&key, ttl, || flag.evaluate(context)),
            None => flag.evaluate(context),
        };

        log::trace!(target: "togglefox",
                    flag_name = name,
                    environment:display = environment,
                    subject_id = context.subject_id(),
                    attributes:serde = context.attributes(),
                    enabled = result.is_enabled(),
                    reason = result.reason();
                    "evaluated a flag");

        Ok((Some(flag.id().clone()), result))
    }

    /// Key and TTL of the cached evaluation result, if results of this evaluation may be cached.
    ///
    /// Only subject-based results are cached: attribute rules depend on the full context, and
    /// anonymous contexts have nothing to key on.
    fn evaluation_cache(
        &self,
        flag: &FeatureFlag,
        context: &EvaluationContext,
    ) -> Option<(String, Duration)> {
        let ttl = self.config.evaluation_ttl?;
        let subject_id = context.subject_id()?;
        if matches!(flag.strategy(), RolloutStrategy::AttributeRules { .. }) {
            return None;
        }
        let key = cache::evaluation_key(
            flag.name(),
            flag.environment(),
            flag.id(),
            flag.version(),
            subject_id,
        );
        Some((key, ttl))
    }

    fn cached_evaluation(
        &self,
        key: &str,
        ttl: Duration,
        evaluate: impl FnOnce() -> EvaluationResult,
    ) -> EvaluationResult {
        match self.config.cache.get(key) {
            Ok(Some(CacheEntry::Evaluation(result))) => {
                log::debug!(target: "togglefox", key; "evaluation cache hit");
                return result;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!(target: "togglefox",
                           key,
                           error:display = err;
                           "failed to read evaluation from cache");
            }
        }

        let result = evaluate();
        self.cache_put(key, CacheEntry::Evaluation(result.clone()), ttl);
        result
    }

    /// Load flag `id` from the repository, apply `mutations` in order, and persist the result.
    ///
    /// All mutations are applied before anything is written: if one of them is invalid the
    /// stored flag is left untouched. If the mutations leave the flag unchanged, nothing is
    /// persisted or published. Otherwise the flag is saved, its cache entry evicted, and the
    /// produced events published in order.
    ///
    /// Fails with [`Error::FlagNotFound`] if there is no flag `id`, and with
    /// [`Conflict::StaleVersion`] if the flag was modified concurrently.
    pub fn apply_mutation(
        &self,
        id: &FlagId,
        mutations: impl IntoIterator<Item = FlagMutation>,
    ) -> Result<FeatureFlag> {
        let mut flag = self.load(id)?;
        let original = flag.clone();

        let mut recorder = EventRecorder::new();
        for mutation in mutations {
            recorder.record(flag.apply(mutation)?);
        }

        if flag == original {
            log::debug!(target: "togglefox", flag_id:display = id; "mutation left flag unchanged");
            return Ok(flag);
        }

        let flag = self.config.repository.save(flag)?;
        self.cache_evict(&cache::flag_key(flag.name(), flag.environment()));

        log::info!(target: "togglefox",
                   flag_id:display = flag.id(),
                   flag_name = flag.name(),
                   environment:display = flag.environment(),
                   enabled = flag.is_enabled(),
                   strategy:display = flag.strategy(),
                   version = flag.version();
                   "updated flag");

        self.publish(recorder.drain());
        Ok(flag)
    }

    pub fn enable_flag(&self, id: &FlagId) -> Result<FeatureFlag> {
        self.apply_mutation(id, [FlagMutation::Enable])
    }

    pub fn disable_flag(&self, id: &FlagId) -> Result<FeatureFlag> {
        self.apply_mutation(id, [FlagMutation::Disable])
    }

    pub fn update_strategy(&self, id: &FlagId, strategy: RolloutStrategy) -> Result<FeatureFlag> {
        self.apply_mutation(id, [FlagMutation::UpdateStrategy(strategy)])
    }

    pub fn update_description(
        &self,
        id: &FlagId,
        description: impl Into<String>,
    ) -> Result<FeatureFlag> {
        self.apply_mutation(id, [FlagMutation::UpdateDescription(description.into())])
    }

    /// Delete flag `id` and evict it from the cache.
    pub fn delete_flag(&self, id: &FlagId) -> Result<()> {
        let flag = self.load(id)?;
        self.config.repository.delete(id)?;
        self.cache_evict(&cache::flag_key(flag.name(), flag.environment()));

        log::info!(target: "togglefox",
                   flag_id:display = id,
                   flag_name = flag.name(),
                   environment:display = flag.environment();
                   "deleted flag");
        Ok(())
    }

    /// Get flag `id` straight from the repository.
    pub fn get_flag(&self, id: &FlagId) -> Result<Option<FeatureFlag>> {
        self.config.repository.find_by_id(id)
    }

    /// List all flags of `environment`.
    pub fn list_flags(&self, environment: &Environment) -> Result<Vec<FeatureFlag>> {
        self.config.repository.find_by_environment(environment)
    }

    fn load(&self, id: &FlagId) -> Result<FeatureFlag> {
        self.config
            .repository
            .find_by_id(id)?
            .ok_or_else(|| Error::FlagNotFound(id.to_string()))
    }

    fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            log::trace!(target: "togglefox",
                        event:serde;
                        "publishing event");
            self.config.event_publisher.publish(event);
        }
    }

    fn cache_put(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        let ttl = jitter(ttl, self.config.ttl_jitter);
        if let Err(err) = self.config.cache.put(key, entry, ttl) {
            log::warn!(target: "togglefox",
                       key,
                       error:display = err;
                       "failed to write to cache");
        }
    }

    fn cache_evict(&self, key: &str) {
        match self.config.cache.evict(key) {
            Ok(()) => log::debug!(target: "togglefox", key; "evicted cache entry"),
            Err(err) => log::warn!(target: "togglefox",
                                   key,
                                   error:display = err;
                                   "failed to evict cache entry, stale until it expires"),
        }
    }
}

/// Apply randomized `jitter` to `ttl`.
fn jitter(ttl: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return ttl;
    }
    ttl + thread_rng().gen_range(Duration::ZERO..jitter)
}
