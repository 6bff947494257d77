//! The validator's diagnostic vocabulary: `(severity, message, path,
//! profile, kind?)` records (spec §4.5) plus a richer `IssueCode` list
//! that mirrors FHIR's own `OperationOutcome.issue.code` value set, so a
//! host can render `ValidationResults` as an `OperationOutcome` directly.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Unknown,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    TooLong,
    CodeInvalid,
    Extension,
    BusinessRule,
    Informational,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Structure => "structure",
            Self::Required => "required",
            Self::Value => "value",
            Self::Invariant => "invariant",
            Self::Security => "security",
            Self::Unknown => "unknown",
            Self::NotSupported => "not-supported",
            Self::Duplicate => "duplicate",
            Self::MultipleMatches => "multiple-matches",
            Self::NotFound => "not-found",
            Self::TooLong => "too-long",
            Self::CodeInvalid => "code-invalid",
            Self::Extension => "extension",
            Self::BusinessRule => "business-rule",
            Self::Informational => "informational",
        };
        write!(f, "{s}")
    }
}

/// One diagnostic raised while walking a resource against its activated
/// profile(s) (spec §4.5's `(severity, message, path, profile, kind?)`).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub message: String,
    pub path: String,
    pub profile: Option<String>,
    /// The constraint key, when this issue came from an invariant.
    pub kind: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: IssueSeverity, code: IssueCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self { severity, code, message: message.into(), path: path.into(), profile: None, kind: None }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// The aggregate result of one `Validator::validate` run: every issue
/// accumulated during the walk, in discovery order, plus the highest
/// severity seen (a host maps this to a protocol status, e.g. HTTP 400
/// for `error`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResults {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResults {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn highest_severity(&self) -> Option<IssueSeverity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity >= IssueSeverity::Error)
    }

    pub fn of_severity(&self, severity: IssueSeverity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(IssueSeverity::Fatal > IssueSeverity::Error);
        assert!(IssueSeverity::Error > IssueSeverity::Warning);
        assert!(IssueSeverity::Warning > IssueSeverity::Information);
        assert!(IssueSeverity::Information > IssueSeverity::Debug);
    }

    #[test]
    fn highest_severity_picks_the_worst() {
        let mut results = ValidationResults::default();
        results.push(ValidationIssue::new(IssueSeverity::Warning, IssueCode::Value, "m", "Patient.name"));
        results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Required, "m", "Patient.name"));
        assert_eq!(results.highest_severity(), Some(IssueSeverity::Error));
        assert!(!results.is_valid());
    }
}
