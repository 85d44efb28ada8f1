//! Rollout strategies decide which subjects see an enabled flag as on.
//!
//! Strategy evaluation is a pure function of the strategy configuration and the
//! [`EvaluationContext`]: no I/O, no randomness, no interior state. Percentage rollout relies on
//! this, as the same subject must land in the same bucket on every call and in every process.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::{
    sharder::{bucket_with, Sharder},
    AttributeValue, Error, EvaluationContext, EvaluationResult, FlagId, Result,
};

/// Highest accepted percentage threshold.
pub const MAX_PERCENTAGE: u32 = 100;

/// Rule that determines which subjects see a flag as enabled once the flag itself is enabled.
///
/// Always build strategies through the validating constructors ([`RolloutStrategy::percentage`],
/// [`RolloutStrategy::targeting`], [`RolloutStrategy::attribute_rules`]) or by deserializing
/// them. [`FeatureFlag`](crate::FeatureFlag) re-checks [`RolloutStrategy::validate`] whenever a
/// strategy is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StrategyConfig", into = "StrategyConfig")]
pub enum RolloutStrategy {
    /// Enabled for subjects whose bucket is below `threshold`.
    Percentage { threshold: u8 },
    /// Enabled for (whitelist) or for everyone but (blacklist) the listed subjects.
    SubjectTargeting {
        subjects: BTreeSet<String>,
        mode: TargetingMode,
    },
    /// Enabled when every attribute named in `rules` holds one of its allowed values.
    AttributeRules {
        rules: BTreeMap<String, BTreeSet<AttributeValue>>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetingMode {
    #[default]
    Whitelist,
    Blacklist,
}

impl fmt::Display for TargetingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetingMode::Whitelist => "whitelist",
            TargetingMode::Blacklist => "blacklist",
        })
    }
}

impl RolloutStrategy {
    /// Percentage rollout. `threshold` must be within `0..=100`.
    pub fn percentage(threshold: u32) -> Result<Self> {
        if threshold > MAX_PERCENTAGE {
            return Err(Error::invalid(format!(
                "percentage must be between 0 and {MAX_PERCENTAGE}, got {threshold}"
            )));
        }
        // threshold <= 100
        Ok(RolloutStrategy::Percentage {
            threshold: threshold as u8,
        })
    }

    /// Subject targeting. The subject list must not be empty.
    pub fn targeting<S: Into<String>>(
        subjects: impl IntoIterator<Item = S>,
        mode: TargetingMode,
    ) -> Result<Self> {
        let strategy = RolloutStrategy::SubjectTargeting {
            subjects: subjects.into_iter().map(Into::into).collect(),
            mode,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Attribute rules, AND-ed together. There must be at least one rule and every rule must
    /// allow at least one value.
    ///
    /// ```
    /// # use togglefox::RolloutStrategy;
    /// let strategy = RolloutStrategy::attribute_rules([
    ///     ("country", vec!["US", "CA"]),
    ///     ("plan", vec!["premium"]),
    /// ])
    /// .unwrap();
    /// assert_eq!(strategy.strategy_type(), "ATTRIBUTE_BASED");
    /// ```
    pub fn attribute_rules<K, V, I>(rules: impl IntoIterator<Item = (K, I)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = V>,
    {
        let strategy = RolloutStrategy::AttributeRules {
            rules: rules
                .into_iter()
                .map(|(key, values)| (key.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Build a strategy from a strategy type name (case-insensitive, e.g. `"percentage"`) and its
    /// JSON configuration object, as submitted by create/update commands.
    ///
    /// ```
    /// # use togglefox::RolloutStrategy;
    /// let strategy = RolloutStrategy::from_parts(
    ///     "user_targeting",
    ///     serde_json::json!({ "users": ["alice", "bob"] }),
    /// )
    /// .unwrap();
    /// assert_eq!(strategy.strategy_type(), "USER_TARGETING");
    /// ```
    pub fn from_parts(strategy_type: &str, config: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut fields) = config else {
            return Err(Error::invalid("strategy configuration must be a JSON object"));
        };
        fields.insert(
            "type".to_owned(),
            strategy_type.trim().to_ascii_uppercase().into(),
        );
        let config: StrategyConfig =
            serde_json::from_value(serde_json::Value::Object(fields)).map_err(|err| {
                Error::invalid(format!("invalid {strategy_type} strategy configuration: {err}"))
            })?;
        config.try_into()
    }

    /// Tag identifying the strategy in the persisted format.
    pub fn strategy_type(&self) -> &'static str {
        match self {
            RolloutStrategy::Percentage { .. } => "PERCENTAGE",
            RolloutStrategy::SubjectTargeting { .. } => "USER_TARGETING",
            RolloutStrategy::AttributeRules { .. } => "ATTRIBUTE_BASED",
        }
    }

    /// Self-check of the configuration.
    pub fn validate(&self) -> Result<()> {
        match self {
            RolloutStrategy::Percentage { threshold } => {
                if u32::from(*threshold) > MAX_PERCENTAGE {
                    return Err(Error::invalid(format!(
                        "percentage must be between 0 and {MAX_PERCENTAGE}, got {threshold}"
                    )));
                }
            }
            RolloutStrategy::SubjectTargeting { subjects, .. } => {
                if subjects.is_empty() {
                    return Err(Error::invalid("subject targeting requires at least one subject"));
                }
                if subjects.iter().any(|subject| subject.is_empty()) {
                    return Err(Error::invalid("targeted subject ids cannot be empty"));
                }
            }
            RolloutStrategy::AttributeRules { rules } => {
                if rules.is_empty() {
                    return Err(Error::invalid("attribute strategy requires at least one rule"));
                }
                if let Some((key, _)) = rules
                    .iter()
                    .find(|(key, allowed)| key.is_empty() || allowed.is_empty())
                {
                    return Err(Error::invalid(format!(
                        "attribute rule {key:?} must name an attribute and allow at least one value"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Evaluate the strategy for `context`. `flag_id` salts percentage bucketing so that
    /// different flags roll out to different subjects.
    pub fn evaluate(
        &self,
        flag_id: &FlagId,
        context: &EvaluationContext,
        sharder: &impl Sharder,
    ) -> EvaluationResult {
        match self {
            RolloutStrategy::Percentage { threshold } => {
                eval_percentage(*threshold, flag_id, context, sharder)
            }
            RolloutStrategy::SubjectTargeting { subjects, mode } => {
                eval_targeting(subjects, *mode, context)
            }
            RolloutStrategy::AttributeRules { rules } => eval_attribute_rules(rules, context),
        }
    }
}

fn eval_percentage(
    threshold: u8,
    flag_id: &FlagId,
    context: &EvaluationContext,
    sharder: &impl Sharder,
) -> EvaluationResult {
    // Anonymous subjects cannot be bucketed consistently.
    let Some(subject_id) = context.subject_id() else {
        return EvaluationResult::disabled("anonymous unsupported for percentage rollout");
    };

    let bucket = bucket_with(sharder, subject_id, flag_id.as_str());
    if bucket < threshold {
        EvaluationResult::enabled(format!(
            "subject in {threshold}% rollout (bucket: {bucket}, threshold: {threshold})"
        ))
    } else {
        EvaluationResult::disabled(format!(
            "subject not in {threshold}% rollout (bucket: {bucket}, threshold: {threshold})"
        ))
    }
}

fn eval_targeting(
    subjects: &BTreeSet<String>,
    mode: TargetingMode,
    context: &EvaluationContext,
) -> EvaluationResult {
    let Some(subject_id) = context.subject_id() else {
        return EvaluationResult::disabled("anonymous unsupported for targeting");
    };

    let in_list = subjects.contains(subject_id);
    let enabled = match mode {
        TargetingMode::Whitelist => in_list,
        TargetingMode::Blacklist => !in_list,
    };
    let reason = if in_list {
        format!("subject is in {mode}")
    } else {
        format!("subject is not in {mode}")
    };

    if enabled {
        EvaluationResult::enabled(reason)
    } else {
        EvaluationResult::disabled(reason)
    }
}

fn eval_attribute_rules(
    rules: &BTreeMap<String, BTreeSet<AttributeValue>>,
    context: &EvaluationContext,
) -> EvaluationResult {
    if rules.is_empty() {
        return EvaluationResult::disabled("no attribute rules configured");
    }

    let mut matched = Vec::new();
    let mut failed = Vec::new();
    for (key, allowed) in rules {
        match context.attribute(key) {
            None => failed.push(format!("{key} (missing)")),
            Some(value) if allowed.contains(value) => matched.push(format!("{key}={value}")),
            Some(value) => failed.push(format!("{key}={value} not allowed")),
        }
    }

    if failed.is_empty() {
        EvaluationResult::enabled(format!(
            "all attribute rules matched: [{}]",
            matched.join(", ")
        ))
    } else {
        EvaluationResult::disabled(format!(
            "attribute rules failed: [{}]; matched: [{}]",
            failed.join(", "),
            matched.join(", ")
        ))
    }
}

impl fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutStrategy::Percentage { threshold } => write!(f, "PERCENTAGE({threshold}%)"),
            RolloutStrategy::SubjectTargeting { subjects, mode } => {
                write!(f, "USER_TARGETING({mode}, {} subjects)", subjects.len())
            }
            RolloutStrategy::AttributeRules { rules } => {
                let keys = rules.keys().map(String::as_str).collect::<Vec<_>>();
                write!(f, "ATTRIBUTE_BASED({})", keys.join(", "))
            }
        }
    }
}

/// Persisted strategy format: a `"type"` tag plus the type's configuration.
///
/// ```json
/// {"type": "PERCENTAGE", "percentage": 25}
/// {"type": "USER_TARGETING", "users": ["alice"], "mode": "BLACKLIST"}
/// {"type": "ATTRIBUTE_BASED", "rules": {"country": ["US", "CA"]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    Percentage {
        percentage: i64,
    },
    UserTargeting {
        users: Vec<String>,
        #[serde(default)]
        mode: TargetingMode,
    },
    AttributeBased {
        rules: BTreeMap<String, Vec<AttributeValue>>,
    },
}

impl TryFrom<StrategyConfig> for RolloutStrategy {
    type Error = Error;

    fn try_from(value: StrategyConfig) -> Result<Self> {
        match value {
            StrategyConfig::Percentage { percentage } => {
                let threshold = u32::try_from(percentage).map_err(|_| {
                    Error::invalid(format!(
                        "percentage must be between 0 and {MAX_PERCENTAGE}, got {percentage}"
                    ))
                })?;
                RolloutStrategy::percentage(threshold)
            }
            StrategyConfig::UserTargeting { users, mode } => {
                RolloutStrategy::targeting(users, mode)
            }
            StrategyConfig::AttributeBased { rules } => RolloutStrategy::attribute_rules(rules),
        }
    }
}

impl From<RolloutStrategy> for StrategyConfig {
    fn from(value: RolloutStrategy) -> Self {
        match value {
            RolloutStrategy::Percentage { threshold } => StrategyConfig::Percentage {
                percentage: i64::from(threshold),
            },
            RolloutStrategy::SubjectTargeting { subjects, mode } => StrategyConfig::UserTargeting {
                users: subjects.into_iter().collect(),
                mode,
            },
            RolloutStrategy::AttributeRules { rules } => StrategyConfig::AttributeBased {
                rules: rules
                    .into_iter()
                    .map(|(key, allowed)| (key, allowed.into_iter().collect()))
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs::File};

    use serde_json::json;

    use super::{RolloutStrategy, TargetingMode};
    use crate::{sharder::Sha256Sharder, AttributeValue, Error, EvaluationContext, FlagId};

    fn flag_id() -> FlagId {
        FlagId::new("flag-1").unwrap()
    }

    fn eval(strategy: &RolloutStrategy, context: &EvaluationContext) -> crate::EvaluationResult {
        strategy.evaluate(&flag_id(), context, &Sha256Sharder)
    }

    #[test]
    fn percentage_rejects_out_of_range() {
        assert!(RolloutStrategy::percentage(0).is_ok());
        assert!(RolloutStrategy::percentage(100).is_ok());
        assert!(matches!(
            RolloutStrategy::percentage(101),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(!RolloutStrategy::Percentage { threshold: 150 }.is_valid());
    }

    #[test]
    fn percentage_bounds() {
        let none = RolloutStrategy::percentage(0).unwrap();
        let all = RolloutStrategy::percentage(100).unwrap();
        for i in 0..200 {
            let context = EvaluationContext::for_subject(format!("user-{i}"));
            assert!(!eval(&none, &context).is_enabled());
            assert!(eval(&all, &context).is_enabled());
        }
    }

    #[test]
    fn percentage_rollout_fraction() {
        let strategy = RolloutStrategy::percentage(25).unwrap();
        let enabled = (0..1000)
            .filter(|i| {
                eval(&strategy, &EvaluationContext::for_subject(format!("user-{i}"))).is_enabled()
            })
            .count();
        assert!((200..=300).contains(&enabled), "enabled {enabled} of 1000");
    }

    #[test]
    fn percentage_is_deterministic() {
        let strategy = RolloutStrategy::percentage(50).unwrap();
        let context = EvaluationContext::for_subject("alice");
        let first = eval(&strategy, &context);
        for _ in 0..10 {
            assert_eq!(eval(&strategy, &context), first);
        }
    }

    #[test]
    fn percentage_reason_mentions_bucket_and_threshold() {
        let strategy = RolloutStrategy::percentage(30).unwrap();
        let bucket = crate::sharder::bucket("alice", "flag-1");
        let result = eval(&strategy, &EvaluationContext::for_subject("alice"));
        assert!(result.reason().contains(&format!("bucket: {bucket}")));
        assert!(result.reason().contains("threshold: 30"));
        assert_eq!(result.is_enabled(), bucket < 30);
    }

    #[test]
    fn anonymous_is_always_disabled() {
        let anonymous = EvaluationContext::anonymous();
        let percentage = eval(&RolloutStrategy::percentage(100).unwrap(), &anonymous);
        assert!(!percentage.is_enabled());
        assert_eq!(percentage.reason(), "anonymous unsupported for percentage rollout");

        for mode in [TargetingMode::Whitelist, TargetingMode::Blacklist] {
            let targeting = eval(&RolloutStrategy::targeting(["alice"], mode).unwrap(), &anonymous);
            assert!(!targeting.is_enabled());
            assert_eq!(targeting.reason(), "anonymous unsupported for targeting");
        }
    }

    #[test]
    fn whitelist() {
        let strategy =
            RolloutStrategy::targeting(["alice", "bob"], TargetingMode::Whitelist).unwrap();

        let alice = eval(&strategy, &EvaluationContext::for_subject("alice"));
        assert!(alice.is_enabled());
        assert_eq!(alice.reason(), "subject is in whitelist");

        let carol = eval(&strategy, &EvaluationContext::for_subject("carol"));
        assert!(!carol.is_enabled());
        assert_eq!(carol.reason(), "subject is not in whitelist");
    }

    #[test]
    fn blacklist() {
        let strategy = RolloutStrategy::targeting(["alice"], TargetingMode::Blacklist).unwrap();

        let alice = eval(&strategy, &EvaluationContext::for_subject("alice"));
        assert!(!alice.is_enabled());
        assert_eq!(alice.reason(), "subject is in blacklist");

        assert!(eval(&strategy, &EvaluationContext::for_subject("carol")).is_enabled());
    }

    #[test]
    fn targeting_requires_subjects() {
        assert!(
            RolloutStrategy::targeting(Vec::<String>::new(), TargetingMode::Whitelist).is_err()
        );
        assert!(RolloutStrategy::targeting([""], TargetingMode::Whitelist).is_err());
    }

    #[test]
    fn attribute_rules_are_anded() {
        let strategy = RolloutStrategy::attribute_rules([
            ("country", vec!["US", "CA"]),
            ("plan", vec!["premium"]),
        ])
        .unwrap();

        let both = EvaluationContext::for_subject("alice")
            .with_attribute("country", "US")
            .with_attribute("plan", "premium");
        let result = eval(&strategy, &both);
        assert!(result.is_enabled());
        assert_eq!(
            result.reason(),
            r#"all attribute rules matched: [country="US", plan="premium"]"#
        );

        let missing_plan = EvaluationContext::for_subject("alice").with_attribute("country", "US");
        let result = eval(&strategy, &missing_plan);
        assert!(!result.is_enabled());
        assert_eq!(
            result.reason(),
            r#"attribute rules failed: [plan (missing)]; matched: [country="US"]"#
        );

        let wrong_country = EvaluationContext::for_subject("alice")
            .with_attribute("country", "MX")
            .with_attribute("plan", "premium");
        assert!(!eval(&strategy, &wrong_country).is_enabled());
    }

    #[test]
    fn attribute_rules_work_for_anonymous_subjects() {
        let strategy = RolloutStrategy::attribute_rules([("beta", vec![true])]).unwrap();
        let context = EvaluationContext::anonymous().with_attribute("beta", true);
        assert!(eval(&strategy, &context).is_enabled());
    }

    #[test]
    fn null_attribute_is_present() {
        let strategy = RolloutStrategy::attribute_rules([("plan", vec![AttributeValue::Null])])
            .unwrap();
        let null_plan = EvaluationContext::for_subject("alice")
            .with_attribute("plan", AttributeValue::Null);
        assert!(eval(&strategy, &null_plan).is_enabled());
        assert!(!eval(&strategy, &EvaluationContext::for_subject("alice")).is_enabled());
    }

    #[test]
    fn empty_attribute_rules() {
        assert!(RolloutStrategy::attribute_rules(Vec::<(String, Vec<String>)>::new()).is_err());
        assert!(RolloutStrategy::attribute_rules([("plan", Vec::<String>::new())]).is_err());

        let strategy = RolloutStrategy::AttributeRules {
            rules: BTreeMap::new(),
        };
        let context = EvaluationContext::for_subject("alice").with_attribute("plan", "x");
        let result = eval(&strategy, &context);
        assert!(!result.is_enabled());
        assert!(result.reason().contains("no attribute rules"));
    }

    #[test]
    fn structural_equality_ignores_order() {
        let a = RolloutStrategy::targeting(["bob", "alice"], TargetingMode::Whitelist).unwrap();
        let b = RolloutStrategy::targeting(["alice", "bob", "alice"], TargetingMode::Whitelist)
            .unwrap();
        assert_eq!(a, b);
        let c = RolloutStrategy::targeting(["alice", "bob"], TargetingMode::Blacklist).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn from_parts_is_case_insensitive() {
        let strategy =
            RolloutStrategy::from_parts("percentage", json!({ "percentage": 40 })).unwrap();
        assert_eq!(strategy, RolloutStrategy::percentage(40).unwrap());

        let strategy = RolloutStrategy::from_parts(
            "Attribute_Based",
            json!({ "rules": { "country": ["US"] } }),
        )
        .unwrap();
        assert_eq!(strategy, RolloutStrategy::attribute_rules([("country", vec!["US"])]).unwrap());
    }

    #[test]
    fn from_parts_rejects_bad_input() {
        for (strategy_type, config) in [
            ("PERCENTAGE", json!({ "percentage": -1 })),
            ("PERCENTAGE", json!({ "percentage": 101 })),
            ("PERCENTAGE", json!({})),
            ("USER_TARGETING", json!({ "users": [] })),
            ("ATTRIBUTE_BASED", json!({ "rules": {} })),
            ("GEO_FENCE", json!({})),
            ("PERCENTAGE", json!(25)),
        ] {
            assert!(
                matches!(
                    RolloutStrategy::from_parts(strategy_type, config.clone()),
                    Err(Error::InvalidConfiguration(_))
                ),
                "{strategy_type} {config}"
            );
        }
    }

    #[test]
    fn serializes_to_persisted_format() {
        let strategy =
            RolloutStrategy::targeting(["bob", "alice"], TargetingMode::Blacklist).unwrap();
        assert_eq!(
            serde_json::to_value(&strategy).unwrap(),
            json!({ "type": "USER_TARGETING", "users": ["alice", "bob"], "mode": "BLACKLIST" })
        );
    }

    #[test]
    fn parses_persisted_strategies() {
        let strategies: Vec<RolloutStrategy> =
            serde_json::from_reader(File::open("tests/data/strategies.json").unwrap()).unwrap();
        assert_eq!(
            strategies,
            vec![
                RolloutStrategy::percentage(25).unwrap(),
                RolloutStrategy::targeting(["alice", "bob"], TargetingMode::Whitelist).unwrap(),
                RolloutStrategy::targeting(["mallory"], TargetingMode::Blacklist).unwrap(),
                RolloutStrategy::attribute_rules([
                    ("country", vec![AttributeValue::from("US"), "CA".into()]),
                    ("tier", vec![2.0.into()]),
                ])
                .unwrap(),
            ]
        );
    }

    #[test]
    fn rejects_invalid_persisted_strategy() {
        let persisted = r#"{"type":"PERCENTAGE","percentage":120}"#;
        assert!(serde_json::from_str::<RolloutStrategy>(persisted).is_err());
    }
}
