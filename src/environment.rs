use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length of an environment name.
pub const MAX_ENVIRONMENT_LENGTH: usize = 50;

/// Deployment environment a flag lives in (e.g., `production`).
///
/// Names are normalized to lowercase, so `Prod` and `prod` are the same environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Environment(String);

impl Environment {
    /// Validate and normalize an environment name.
    ///
    /// ```
    /// # use togglefox::Environment;
    /// let env = Environment::new("Staging").unwrap();
    /// assert_eq!(env.name(), "staging");
    /// assert!(Environment::new("no spaces").is_err());
    /// ```
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(Error::invalid("environment name cannot be empty"));
        }
        if name.len() > MAX_ENVIRONMENT_LENGTH {
            return Err(Error::invalid(format!(
                "environment name cannot exceed {MAX_ENVIRONMENT_LENGTH} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::invalid(
                "environment name can only contain letters, digits, underscores and hyphens",
            ));
        }
        Ok(Environment(name.to_ascii_lowercase()))
    }

    pub fn development() -> Self {
        Environment("development".to_owned())
    }

    pub fn staging() -> Self {
        Environment("staging".to_owned())
    }

    pub fn production() -> Self {
        Environment("production".to_owned())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Environment::new(value)
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
