//! Canonical test result model.
//!
//! Every reader in [`crate::format`] normalizes its source schema into
//! [`CanonicalResult`]. Nothing downstream of the readers knows which test
//! runner produced a result other than through [`Format`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::Format;

/// Name of the attachment carrying captured console output.
pub const CONSOLE_OUTPUT: &str = "Console_Output";

/// Name of the attachment carrying captured standard error.
pub const CONSOLE_ERROR: &str = "Console_Error";

/// Outcome of one observed test execution.
///
/// This is a closed set. Source values that do not map onto one of these
/// variants are dropped by the readers rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
}

impl Outcome {
    /// Maps a source outcome string onto the canonical set.
    ///
    /// Accepts the spellings the supported runners emit (`Pass`, `Passed`,
    /// `pass`, `Fail`, `Failed`, `Skip`, `Skipped`, ...). Returns `None` for
    /// anything else.
    ///
    /// ```
    /// use testpost::model::Outcome;
    ///
    /// assert_eq!(Outcome::parse("Pass"), Some(Outcome::Pass));
    /// assert_eq!(Outcome::parse("failed"), Some(Outcome::Fail));
    /// assert_eq!(Outcome::parse("Inconclusive"), None);
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" => Some(Outcome::Pass),
            "fail" | "failed" => Some(Outcome::Fail),
            "skip" | "skipped" => Some(Outcome::Skip),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Pass => "Pass",
            Outcome::Fail => "Fail",
            Outcome::Skip => "Skip",
        };
        f.write_str(s)
    }
}

/// A named text blob captured alongside a result (console output, logs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub text: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// One observed test execution, normalized across source schemas.
///
/// Created once per parsed record and never mutated after the reader hands
/// it out. `name` is not unique: data-driven invocations share the part of
/// the name before the first `(`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    /// Full test name, possibly carrying a trailing `(...)` parameter list.
    pub name: String,

    /// Schema the result was read from.
    pub kind: Format,

    /// Declaring type / class name.
    pub type_name: String,

    /// Test method name.
    pub method: String,

    /// Execution time in seconds, never negative.
    pub duration_seconds: f64,

    pub outcome: Outcome,

    pub exception_type: Option<String>,

    /// Failure message; populated for failed results whenever the source has one.
    pub failure_message: Option<String>,

    pub stack_trace: Option<String>,

    /// Skip reason; populated for skipped results.
    pub skip_reason: Option<String>,

    /// Captured text blobs in the order the source listed them.
    pub attachments: Vec<Attachment>,
}

impl CanonicalResult {
    /// Creates a result with the given name and outcome and empty details.
    pub fn new(name: impl Into<String>, kind: Format, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            kind,
            type_name: String::new(),
            method: String::new(),
            duration_seconds: 0.0,
            outcome,
            exception_type: None,
            failure_message: None,
            stack_trace: None,
            skip_reason: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the duration, clamping negative or non-finite values to zero.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            0.0
        };
        self
    }

    pub fn with_exception_type(mut self, exception_type: impl Into<String>) -> Self {
        self.exception_type = Some(exception_type.into());
        self
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn with_skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_attachment(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.attachments.push(Attachment::new(name, text));
        self
    }

    /// Returns `true` if this is one invocation of a data-driven test.
    ///
    /// A result is data-driven iff its name ends with `)`.
    pub fn is_data_driven(&self) -> bool {
        self.name.ends_with(')')
    }

    /// The name shared by all invocations of a data-driven test: everything
    /// before the first `(`. Names without `(` are returned unchanged.
    ///
    /// ```
    /// use testpost::format::Format;
    /// use testpost::model::{CanonicalResult, Outcome};
    ///
    /// let r = CanonicalResult::new("Ns.Foo(a: (1, 2))", Format::XUnit, Outcome::Pass);
    /// assert_eq!(r.base_name(), "Ns.Foo");
    /// ```
    pub fn base_name(&self) -> &str {
        match self.name.find('(') {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parse_known_spellings() {
        assert_eq!(Outcome::parse("Pass"), Some(Outcome::Pass));
        assert_eq!(Outcome::parse("Passed"), Some(Outcome::Pass));
        assert_eq!(Outcome::parse(" fail "), Some(Outcome::Fail));
        assert_eq!(Outcome::parse("Skipped"), Some(Outcome::Skip));
    }

    #[test]
    fn test_outcome_parse_rejects_unknown() {
        assert_eq!(Outcome::parse("NotRunnable"), None);
        assert_eq!(Outcome::parse(""), None);
        assert_eq!(Outcome::parse("Error"), None);
    }

    #[test]
    fn test_data_driven_detection() {
        let ddt = CanonicalResult::new("Foo(1)", Format::XUnit, Outcome::Pass);
        assert!(ddt.is_data_driven());
        assert_eq!(ddt.base_name(), "Foo");

        let plain = CanonicalResult::new("Foo", Format::XUnit, Outcome::Pass);
        assert!(!plain.is_data_driven());
        assert_eq!(plain.base_name(), "Foo");
    }

    #[test]
    fn test_paren_in_middle_is_not_data_driven() {
        let r = CanonicalResult::new("Foo(1).Bar", Format::JUnit, Outcome::Pass);
        assert!(!r.is_data_driven());
    }

    #[test]
    fn test_duration_is_clamped() {
        let r = CanonicalResult::new("t", Format::Yaml, Outcome::Pass).with_duration(-3.0);
        assert_eq!(r.duration_seconds, 0.0);
        let r = r.with_duration(f64::NAN);
        assert_eq!(r.duration_seconds, 0.0);
        let r = r.with_duration(1.5);
        assert_eq!(r.duration_seconds, 1.5);
    }
}
