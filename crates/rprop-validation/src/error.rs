#![forbid(unsafe_code)]

//! Validation messages and configuration errors.

use std::fmt;

/// Non-empty, ordered set of user-facing validation messages.
///
/// These are not program faults: they describe why a value is unacceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    /// Wrap `messages`, or `None` when there are none.
    #[must_use]
    pub fn from_messages(messages: Vec<String>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self(messages))
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn first(&self) -> &str {
        &self.0[0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A declarative rule could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("string length bounds inverted: min {min} > max {max}")]
    InvertedLength { min: usize, max: usize },
    #[error("range bounds invalid: min {min} > max {max}")]
    InvertedRange { min: f64, max: f64 },
}

/// A validated cell was configured inconsistently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("async validator #{index} needs a spawner")]
    MissingSpawner { index: usize },
    #[error("debounced validator #{index} needs a scheduler")]
    MissingScheduler { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_messages_mean_no_errors() {
        assert!(ValidationErrors::from_messages(Vec::new()).is_none());
    }

    #[test]
    fn display_joins_messages() {
        let errors =
            ValidationErrors::from_messages(vec!["required".into(), "too short".into()])
                .expect("non-empty");
        assert_eq!(errors.to_string(), "required; too short");
        assert_eq!(errors.first(), "required");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn rule_error_display() {
        let err = RuleError::InvertedLength { min: 5, max: 2 };
        assert_eq!(err.to_string(), "string length bounds inverted: min 5 > max 2");
    }

    #[test]
    fn build_error_display() {
        let err = BuildError::MissingScheduler { index: 1 };
        assert_eq!(err.to_string(), "debounced validator #1 needs a scheduler");
    }
}
