use serde::{Deserialize, Serialize};

use crate::{Attributes, EvaluationContext, FlagId};

/// Outcome of evaluating a flag: whether it is on, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    enabled: bool,
    reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variation: Option<serde_json::Value>,
}

impl EvaluationResult {
    pub fn enabled(reason: impl Into<String>) -> Self {
        EvaluationResult {
            enabled: true,
            reason: reason.into(),
            variation: None,
        }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        EvaluationResult {
            enabled: false,
            reason: reason.into(),
            variation: None,
        }
    }

    pub fn with_variation(mut self, variation: serde_json::Value) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn variation(&self) -> Option<&serde_json::Value> {
        self.variation.as_ref()
    }
}

/// Evaluation request as received from the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub flag_name: String,
    pub environment: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl EvaluationRequest {
    pub fn context(&self) -> EvaluationContext {
        EvaluationContext::new(self.subject_id.clone(), self.attributes.clone())
    }
}

/// Evaluation response handed back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    /// `None` when the flag does not exist.
    pub flag_id: Option<FlagId>,
    pub enabled: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<serde_json::Value>,
}

impl EvaluationResponse {
    pub(crate) fn new(flag_id: Option<FlagId>, result: EvaluationResult) -> Self {
        EvaluationResponse {
            flag_id,
            enabled: result.enabled,
            reason: result.reason,
            variation: result.variation,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EvaluationRequest, EvaluationResult};

    #[test]
    fn results_are_value_equal() {
        assert_eq!(EvaluationResult::enabled("on"), EvaluationResult::enabled("on"));
        assert_ne!(EvaluationResult::enabled("x"), EvaluationResult::disabled("x"));
        assert_ne!(
            EvaluationResult::enabled("x"),
            EvaluationResult::enabled("x").with_variation(json!("blue"))
        );
    }

    #[test]
    fn parses_request_without_subject() {
        let request: EvaluationRequest = serde_json::from_value(json!({
            "flagName": "new-checkout",
            "environment": "dev",
        }))
        .unwrap();
        assert!(request.context().is_anonymous());
        assert!(request.attributes.is_empty());
    }
}
