//! Togglefox is a feature flag management and evaluation library.
//!
//! # Overview
//!
//! A [`FeatureFlag`] is a named on/off switch scoped to an [`Environment`]. An enabled flag
//! delegates the decision to its [`RolloutStrategy`]:
//! - percentage rollout, using consistent SHA-256 bucketing so that a subject always lands in the
//!   same bucket for the same flag;
//! - subject targeting, with whitelist or blacklist semantics;
//! - attribute rules, matching the attributes of the [`EvaluationContext`].
//!
//! Every change to a flag produces a [`DomainEvent`](events::DomainEvent).
//!
//! [`FlagService`] ties flags to their collaborators: a
//! [`FlagRepository`](repository::FlagRepository) holding the source of truth, an optional
//! [`FlagCache`](cache::FlagCache) in front of it, and an
//! [`EventPublisher`](events::EventPublisher) receiving events once changes are persisted. To
//! create a service, start from [`ServiceConfig`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Evaluating a flag that does not exist is not an error: it yields a disabled result. Cache
//! failures are logged and never returned. Repository failures and write conflicts are returned
//! to the caller.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages,
//! under the `togglefox` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into flag evaluation and cache behavior.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `togglefox` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod events;
pub mod memory;
pub mod repository;
pub mod sharder;

mod attributes;
mod config;
mod context;
mod environment;
mod error;
mod evaluation;
mod flag;
mod service;
mod strategy;

pub use attributes::{AttributeValue, Attributes};
pub use config::ServiceConfig;
pub use context::EvaluationContext;
pub use environment::Environment;
pub use error::{BoxedSource, Conflict, Error, Result};
pub use evaluation::{EvaluationRequest, EvaluationResponse, EvaluationResult};
pub use flag::{FeatureFlag, FlagId, FlagMutation};
pub use memory::{CacheStats, InMemoryCache, InMemoryFlagRepository};
pub use service::FlagService;
pub use strategy::{RolloutStrategy, StrategyConfig, TargetingMode};
