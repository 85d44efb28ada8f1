//! The feature flag aggregate.
//!
//! [`FeatureFlag`] is an in-memory state machine with two independent axes: enablement (disabled
//! or enabled) and the current [`RolloutStrategy`] (replaced wholesale). Every operation that
//! changes state returns the [`DomainEvent`] describing the change; operations that would not
//! change anything return `None` and leave the flag untouched. The aggregate never talks to
//! storage, caches or publishers; [`FlagService`](crate::FlagService) does.
use std::{fmt, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    events::{DomainEvent, DomainEventKind},
    sharder::{Sha256Sharder, Sharder},
    Environment, Error, EvaluationContext, EvaluationResult, Result, RolloutStrategy,
};

pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Opaque unique identity of a flag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlagId(String);

impl FlagId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        FlagId(Uuid::new_v4().to_string())
    }

    /// Use an externally supplied id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid("flag id cannot be empty"));
        }
        Ok(FlagId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FlagId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        FlagId::new(value)
    }
}

impl From<FlagId> for String {
    fn from(value: FlagId) -> Self {
        value.0
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[a-zA-Z0-9._-]+$").expect("name pattern is a valid regex"))
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("feature flag name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::invalid(format!(
            "feature flag name cannot exceed {MAX_NAME_LENGTH} characters"
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(Error::invalid(
            "feature flag name can only contain letters, digits, dots, underscores and hyphens",
        ));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(Error::invalid(format!(
            "feature flag description cannot exceed {MAX_DESCRIPTION_LENGTH} characters"
        )));
    }
    Ok(())
}

/// A named, per-environment flag with a rollout strategy.
///
/// New flags start disabled. `(name, environment)` uniqueness is enforced by the repository, not
/// by the aggregate.
///
/// Deserialization goes through [`FeatureFlag::reconstruct`], so persisted state that violates
/// the name or description rules fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "FlagRecord")]
pub struct FeatureFlag {
    id: FlagId,
    name: String,
    description: String,
    enabled: bool,
    environment: Environment,
    strategy: RolloutStrategy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

/// Persisted shape of a [`FeatureFlag`] before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagRecord {
    id: FlagId,
    name: String,
    #[serde(default)]
    description: String,
    enabled: bool,
    environment: Environment,
    strategy: RolloutStrategy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    version: u64,
}

impl TryFrom<FlagRecord> for FeatureFlag {
    type Error = Error;

    fn try_from(record: FlagRecord) -> Result<Self> {
        FeatureFlag::reconstruct(
            record.id,
            record.name,
            record.description,
            record.enabled,
            record.environment,
            record.strategy,
            record.created_at,
            record.updated_at,
            record.version,
        )
    }
}

/// A state change that can be applied to a loaded flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagMutation {
    Enable,
    Disable,
    UpdateStrategy(RolloutStrategy),
    UpdateDescription(String),
}

impl FeatureFlag {
    /// Create a new, disabled flag with a generated id. Returns the flag along with its
    /// `Created` event.
    pub fn create(
        name: impl Into<String>,
        description: impl Into<String>,
        environment: Environment,
        strategy: RolloutStrategy,
    ) -> Result<(FeatureFlag, DomainEvent)> {
        FeatureFlag::create_with_id(FlagId::generate(), name, description, environment, strategy)
    }

    /// Same as [`FeatureFlag::create`], but with an externally supplied id.
    pub fn create_with_id(
        id: FlagId,
        name: impl Into<String>,
        description: impl Into<String>,
        environment: Environment,
        strategy: RolloutStrategy,
    ) -> Result<(FeatureFlag, DomainEvent)> {
        let name = name.into();
        let description = description.into();
        validate_name(&name)?;
        validate_description(&description)?;
        strategy.validate()?;

        let now = Utc::now();
        let event = DomainEvent::new(
            &id,
            &name,
            DomainEventKind::Created {
                environment: environment.clone(),
            },
        );
        let flag = FeatureFlag {
            id,
            name,
            description,
            enabled: false,
            environment,
            strategy,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        Ok((flag, event))
    }

    /// Rebuild a flag from persisted state. Validates like [`FeatureFlag::create`] but emits no
    /// event.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: FlagId,
        name: impl Into<String>,
        description: impl Into<String>,
        enabled: bool,
        environment: Environment,
        strategy: RolloutStrategy,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Result<FeatureFlag> {
        let name = name.into();
        let description = description.into();
        validate_name(&name)?;
        validate_description(&description)?;
        strategy.validate()?;

        Ok(FeatureFlag {
            id,
            name,
            description,
            enabled,
            environment,
            strategy,
            created_at,
            updated_at,
            version,
        })
    }

    /// Enable the flag. No-op (and no event) if it is already enabled.
    pub fn enable(&mut self) -> Option<DomainEvent> {
        if self.enabled {
            return None;
        }
        self.enabled = true;
        self.touch();
        Some(self.event(DomainEventKind::Enabled))
    }

    /// Disable the flag. No-op (and no event) if it is already disabled.
    pub fn disable(&mut self) -> Option<DomainEvent> {
        if !self.enabled {
            return None;
        }
        self.enabled = false;
        self.touch();
        Some(self.event(DomainEventKind::Disabled))
    }

    /// Replace the rollout strategy. No-op (and no event) if `strategy` is structurally equal to
    /// the current one.
    pub fn update_strategy(&mut self, strategy: RolloutStrategy) -> Result<Option<DomainEvent>> {
        strategy.validate()?;
        if self.strategy == strategy {
            return Ok(None);
        }
        let old_strategy = std::mem::replace(&mut self.strategy, strategy);
        self.touch();
        Ok(Some(self.event(DomainEventKind::StrategyUpdated {
            old_strategy,
            new_strategy: self.strategy.clone(),
        })))
    }

    /// Replace the description. Emits no event.
    pub fn update_description(&mut self, description: impl Into<String>) -> Result<()> {
        let description = description.into();
        validate_description(&description)?;
        if self.description != description {
            self.description = description;
            self.touch();
        }
        Ok(())
    }

    /// Apply a [`FlagMutation`], returning the event it produced, if any.
    pub fn apply(&mut self, mutation: FlagMutation) -> Result<Option<DomainEvent>> {
        match mutation {
            FlagMutation::Enable => Ok(self.enable()),
            FlagMutation::Disable => Ok(self.disable()),
            FlagMutation::UpdateStrategy(strategy) => self.update_strategy(strategy),
            FlagMutation::UpdateDescription(description) => {
                self.update_description(description)?;
                Ok(None)
            }
        }
    }

    /// Evaluate the flag for `context`.
    ///
    /// A disabled flag is off for everyone; the strategy is not consulted.
    pub fn evaluate(&self, context: &EvaluationContext) -> EvaluationResult {
        self.evaluate_with(context, &Sha256Sharder)
    }

    pub fn evaluate_with(
        &self,
        context: &EvaluationContext,
        sharder: &impl Sharder,
    ) -> EvaluationResult {
        if !self.enabled {
            return EvaluationResult::disabled("feature flag is disabled");
        }
        self.strategy.evaluate(&self.id, context, sharder)
    }

    /// Increment the persisted version. Repositories call this when a save succeeds.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn id(&self) -> &FlagId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn strategy(&self) -> &RolloutStrategy {
        &self.strategy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Version of the persisted state this flag was loaded from; `0` if it has never been saved.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn event(&self, kind: DomainEventKind) -> DomainEvent {
        DomainEvent::new(&self.id, &self.name, kind)
    }
}
