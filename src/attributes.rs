use std::{
    cmp::Ordering,
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// Keys are strings representing attribute names.
///
/// # Examples
/// ```
/// # use togglefox::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("country".to_owned(), "US".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a subject attribute, or of an allowed value in an
/// attribute rule.
///
/// Values are totally ordered (numbers by [`f64::total_cmp`]) so they can live in ordered sets.
/// All numbers are `f64`, so `1` and `1.0` are the same value.
///
/// Examples:
/// ```
/// # use togglefox::AttributeValue;
/// let string_attr: AttributeValue = "example".into();
/// let number_attr: AttributeValue = 42.0.into();
/// let bool_attr: AttributeValue = true.into();
/// ```
#[derive(Debug, Serialize, Deserialize, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A list of values.
    List(Vec<AttributeValue>),
    /// An explicit null. Distinct from the attribute being absent.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            AttributeValue::Null => 0,
            AttributeValue::Boolean(_) => 1,
            AttributeValue::Number(_) => 2,
            AttributeValue::String(_) => 3,
            AttributeValue::List(_) => 4,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use AttributeValue::*;
        match (self, other) {
            (String(a), String(b)) => a.cmp(b),
            (Number(a), Number(b)) => a.total_cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            AttributeValue::String(s) => s.hash(state),
            // Consistent with total_cmp: equal iff bit patterns are equal.
            AttributeValue::Number(n) => n.to_bits().hash(state),
            AttributeValue::Boolean(b) => b.hash(state),
            AttributeValue::List(values) => values.hash(state),
            AttributeValue::Null => {}
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{s:?}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            AttributeValue::Null => f.write_str("null"),
        }
    }
}
