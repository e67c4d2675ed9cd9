//! Categorized warnings shared by the policy, compiler and validator.

use serde::{Deserialize, Serialize};

/// Whether a warning blocks a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Structural problem; the batch must not be applied.
    Error,
    /// Advisory only.
    Warning,
}

/// Machine-readable warning code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// Operation kind is not one of the five primitives.
    UnknownOperation,
    /// Target selector missing or blank.
    MissingTarget,
    /// Target is a document-root-level selector.
    BlockedTarget,
    /// Target selector does not parse.
    MalformedTarget,
    /// Insert without content.
    MissingContent,
    /// Insert or move with an unknown position.
    InvalidPosition,
    /// Move without a destination.
    MissingDestination,
    /// Update without a value.
    MissingValue,
    /// Attribute update without an attribute name.
    MissingAttributeName,
    /// Target unknown to the registry and the element model.
    OrphanedTarget,
    /// Two or more absolute elements share a z-index.
    DuplicateZIndex,
    /// Two absolute elements overlap at desktop.
    ElementOverlap,
    /// Overlap detection skipped because of element count.
    OverlapCheckSkipped,
    /// Requested z-index clamped into the absolute range.
    ZIndexClamped,
    /// Absolute z-index range exhausted.
    ZIndexExhausted,
    /// Reorder requested on a flow element.
    FlowElementNotOrderable,
    /// Derived mobile width clamped to the usable viewport width.
    MobileOverflow,
}

/// A single categorized finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Blocking or advisory.
    pub severity: Severity,
    /// Category.
    pub code: WarningCode,
    /// Human-readable description.
    pub message: String,
    /// Primary subject (element id or operation index).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Every subject involved, for findings that name several elements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_ids: Vec<String>,
    /// Suggested fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    /// Create an error-severity finding.
    #[must_use]
    pub fn error(code: WarningCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Create an advisory finding.
    #[must_use]
    pub fn warning(code: WarningCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    fn new(severity: Severity, code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            subject_id: None,
            subject_ids: Vec::new(),
            suggestion: None,
        }
    }

    /// Set the primary subject.
    #[must_use]
    pub fn with_subject(mut self, id: impl Into<String>) -> Self {
        self.subject_id = Some(id.into());
        self
    }

    /// Set every subject; the first becomes the primary subject.
    #[must_use]
    pub fn with_subjects<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_ids = ids.into_iter().map(Into::into).collect();
        if self.subject_id.is_none() {
            self.subject_id = self.subject_ids.first().cloned();
        }
        self
    }

    /// Attach a suggested fix.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Whether this finding blocks a commit.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A value produced by an auto-correcting policy, with the corrections it made.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjusted<T> {
    /// The (possibly corrected) value.
    pub value: T,
    /// Corrections applied on the way.
    pub warnings: Vec<ValidationWarning>,
}

impl<T> Adjusted<T> {
    /// A value that needed no correction.
    #[must_use]
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// A value with one correction.
    #[must_use]
    pub fn corrected(value: T, warning: ValidationWarning) -> Self {
        Self {
            value,
            warnings: vec![warning],
        }
    }

    /// Whether any correction was made.
    #[must_use]
    pub fn was_adjusted(&self) -> bool {
        !self.warnings.is_empty()
    }
}
