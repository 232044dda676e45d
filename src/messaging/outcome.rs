//! # Handler Outcomes
//!
//! Business-level results. An outcome carrying error messages is still a
//! normal return: it does not abort the message or roll anything back.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSeverity {
    Info,
    Warning,
    Error,
}

/// Worst severity present in an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Warning,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMessage {
    pub severity: OutcomeSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    value: Option<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    messages: Vec<OutcomeMessage>,
}

impl<T> Outcome<T> {
    pub fn success(value: T) -> Self {
        Self {
            value: Some(value),
            messages: Vec::new(),
        }
    }

    /// An outcome without a value, carrying one error message
    pub fn failure(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: None,
            messages: vec![OutcomeMessage {
                severity: OutcomeSeverity::Error,
                code: Some(code.into()),
                text: text.into(),
            }],
        }
    }

    pub fn with_info(self, text: impl Into<String>) -> Self {
        self.with_message(OutcomeSeverity::Info, None, text.into())
    }

    pub fn with_warning(self, text: impl Into<String>) -> Self {
        self.with_message(OutcomeSeverity::Warning, None, text.into())
    }

    pub fn with_error(self, code: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_message(OutcomeSeverity::Error, Some(code.into()), text.into())
    }

    fn with_message(mut self, severity: OutcomeSeverity, code: Option<String>, text: String) -> Self {
        self.messages.push(OutcomeMessage {
            severity,
            code,
            text,
        });
        self
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn messages(&self) -> &[OutcomeMessage] {
        &self.messages
    }

    pub fn errors(&self) -> impl Iterator<Item = &OutcomeMessage> {
        self.messages
            .iter()
            .filter(|m| m.severity == OutcomeSeverity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == OutcomeSeverity::Warning)
    }

    pub fn status(&self) -> OutcomeStatus {
        if self.has_errors() {
            OutcomeStatus::Error
        } else if self.has_warnings() {
            OutcomeStatus::Warning
        } else {
            OutcomeStatus::Success
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: self.value.map(f),
            messages: self.messages,
        }
    }
}

impl Outcome<()> {
    /// Successful fire-and-forget outcome
    pub fn done() -> Self {
        Self::success(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_errors() {
        let outcome = Outcome::success(5);
        assert_eq!(outcome.value(), Some(&5));
        assert!(!outcome.has_errors());
        assert_eq!(outcome.status(), OutcomeStatus::Success);
    }

    #[test]
    fn test_failure_outcome() {
        let outcome: Outcome<i64> = Outcome::failure("not_found", "no such account");
        assert!(outcome.value().is_none());
        assert!(outcome.has_errors());
        assert_eq!(outcome.errors().count(), 1);
        assert_eq!(outcome.status(), OutcomeStatus::Error);
    }

    #[test]
    fn test_warnings_do_not_count_as_errors() {
        let outcome = Outcome::done().with_warning("slow path taken").with_info("cached");
        assert!(outcome.has_warnings());
        assert!(!outcome.has_errors());
        assert_eq!(outcome.status(), OutcomeStatus::Warning);
        assert_eq!(outcome.messages().len(), 2);
    }

    #[test]
    fn test_map_keeps_messages() {
        let outcome = Outcome::success(2).with_warning("rounded").map(|v| v * 10);
        assert_eq!(outcome.messages().len(), 1);
        assert_eq!(outcome.into_value(), Some(20));
    }
}
