use serde::{Deserialize, Serialize};

use crate::{AttributeValue, Attributes};

/// Who a flag is being evaluated for: an optional subject id and its attributes.
///
/// A context without a subject id is anonymous. Subject-based strategies (percentage rollout,
/// subject targeting) never enable a flag for anonymous contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    subject_id: Option<String>,
    #[serde(default)]
    attributes: Attributes,
}

impl EvaluationContext {
    pub fn anonymous() -> Self {
        EvaluationContext::default()
    }

    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        EvaluationContext {
            subject_id: Some(subject_id.into()),
            attributes: Attributes::new(),
        }
    }

    /// Build a context from the optional subject id and attributes of an evaluation request.
    pub fn new(subject_id: Option<String>, attributes: Attributes) -> Self {
        EvaluationContext {
            subject_id,
            attributes,
        }
    }

    /// Return a copy of the context with `key` set to `value`.
    ///
    /// ```
    /// # use togglefox::EvaluationContext;
    /// let context = EvaluationContext::for_subject("alice")
    ///     .with_attribute("country", "US")
    ///     .with_attribute("beta", true);
    /// assert_eq!(context.attribute("country"), Some(&"US".into()));
    /// ```
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject_id.is_none()
    }

    /// Look up an attribute. `None` means absent; a present null is `Some(&AttributeValue::Null)`.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}
