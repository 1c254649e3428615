//! Structured diagnostics.
//!
//! Every public operation returns its result alongside a [`Diagnostics`] list
//! instead of failing outright, so partial failures are data the caller can
//! inspect, aggregate, and decide on.

use crate::error::EngineError;
use crate::value::AttributePath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A position in a configuration source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePos {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
    /// 0-based byte offset.
    pub byte: u32,
}

/// A range within a configuration source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    /// Source address of the file.
    pub filename: String,
    /// Start of the range.
    pub start: SourcePos,
    /// End of the range.
    pub end: SourcePos,
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: Severity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributePath>,
    /// The configuration source location, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, summary)
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, summary)
    }

    fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
            subject: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: AttributePath) -> Self {
        if !attribute.is_root() {
            self.attribute = Some(attribute);
        }
        self
    }

    /// Set the source location for this diagnostic.
    pub fn with_subject(mut self, subject: SourceRange) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.summary)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(attr) = &self.attribute {
            write!(f, " (at {})", attr)?;
        }
        Ok(())
    }
}

impl From<EngineError> for Diagnostic {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::SchemaMismatch(mismatch) => {
                Diagnostic::error("Value does not conform to schema")
                    .with_detail(mismatch.detail)
                    .with_attribute(mismatch.path)
            },
            EngineError::Transport { code, message } => Diagnostic::error("Plugin error")
                .with_detail(format!("The plugin returned an unexpected error ({:?}): {}", code, message)),
            other => Diagnostic::error(other.to_string()),
        }
    }
}

/// An ordered list of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one diagnostic.
    pub fn push(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.0.push(diagnostic.into());
    }

    /// Append all diagnostics from another list.
    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(other);
    }

    /// Whether any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Whether any diagnostic is a warning.
    pub fn has_warnings(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Warning)
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the diagnostics.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    /// Only the error diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Consume into the inner vector.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<EngineError> for Diagnostics {
    fn from(err: EngineError) -> Self {
        Self(vec![err.into()])
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self(diagnostics)
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaMismatchError;

    #[test]
    fn test_diagnostic_builders() {
        let diag = Diagnostic::error("Missing attribute")
            .with_detail("attr is required")
            .with_attribute(AttributePath::root().attr("attr"));
        assert!(diag.is_error());
        assert_eq!(diag.detail.as_deref(), Some("attr is required"));
        assert_eq!(diag.to_string(), "[Error] Missing attribute: attr is required (at attr)");

        let warn = Diagnostic::warning("Deprecated").with_attribute(AttributePath::root());
        assert!(!warn.is_error());
        assert!(warn.attribute.is_none());
    }

    #[test]
    fn test_collection_queries() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags.push(Diagnostic::warning("careful"));
        assert!(diags.has_warnings());
        assert!(!diags.has_errors());
        diags.push(EngineError::UnknownType("nope".to_string()));
        assert!(diags.has_errors());
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.errors().count(), 1);
    }

    #[test]
    fn test_schema_mismatch_becomes_attributed_error() {
        let err = EngineError::from(SchemaMismatchError::new(
            AttributePath::root().attr("attr_new"),
            "unsupported attribute",
        ));
        let diag: Diagnostic = err.into();
        assert!(diag.is_error());
        assert_eq!(diag.attribute, Some(AttributePath::root().attr("attr_new")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let diags: Diagnostics = vec![Diagnostic::error("boom").with_detail("bang")].into();
        let json = serde_json::to_string(&diags).unwrap();
        assert!(json.starts_with('['));
        let back: Diagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diags);
    }
}
