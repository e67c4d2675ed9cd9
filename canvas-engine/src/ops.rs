//! Primitive document operations.
//!
//! [`MutationOp`] is the typed form the compiler emits and the apply step
//! consumes. [`RawOp`] is the loose wire form: every field optional, the kind
//! a free string. AI collaborators produce `RawOp`s, and the validator
//! inspects `RawOp`s so that malformed input can be reported instead of
//! failing to deserialize.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Where an inserted or moved node lands relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    /// Immediately before the target, as a sibling.
    Before,
    /// Immediately after the target, as a sibling.
    After,
    /// As the target's first child.
    Prepend,
    /// As the target's last child.
    Append,
}

impl InsertPosition {
    /// Parse a position name. Accepts the DOM `insertAdjacent` spellings too.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "before" | "beforebegin" => Some(Self::Before),
            "after" | "afterend" => Some(Self::After),
            "prepend" | "afterbegin" => Some(Self::Prepend),
            "append" | "beforeend" => Some(Self::Append),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Prepend => "prepend",
            Self::Append => "append",
        }
    }
}

/// A structured markup fragment carried by `insert`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkupNode {
    /// Tag name.
    pub tag: String,
    /// Attributes in name order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Text content.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Child fragments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MarkupNode>,
}

impl MarkupNode {
    /// Create an element with a tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Set an attribute.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Append a child.
    #[must_use]
    pub fn child(mut self, child: MarkupNode) -> Self {
        self.children.push(child);
        self
    }

    /// Whether the fragment has no tag (and therefore no content).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tag.trim().is_empty()
    }

    /// Render as HTML.
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        let _ = write!(out, "<{}", self.tag);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {name}=\"{}\"", escape(value, true));
        }
        out.push('>');
        if is_void(&self.tag) {
            return;
        }
        out.push_str(&escape(&self.text, false));
        for child in &self.children {
            child.write_html(out);
        }
        let _ = write!(out, "</{}>", self.tag);
    }
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag.to_ascii_lowercase().as_str(),
        "img" | "br" | "hr" | "input" | "meta" | "link" | "source"
    )
}

fn escape(value: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// One atomic, typed document edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    /// Insert new content relative to a target.
    Insert {
        /// Reference node selector.
        parent: String,
        /// Placement relative to the reference node.
        position: InsertPosition,
        /// Markup to insert.
        content: MarkupNode,
    },
    /// Remove a node and its descendants.
    Delete {
        /// Node selector.
        target: String,
    },
    /// Replace a node's text content.
    UpdateText {
        /// Node selector.
        target: String,
        /// New text.
        value: String,
    },
    /// Set an attribute on a node.
    UpdateAttribute {
        /// Node selector.
        target: String,
        /// Attribute name.
        name: String,
        /// New value.
        value: String,
    },
    /// Relocate a node.
    Move {
        /// Node selector.
        target: String,
        /// Reference node selector at the destination.
        new_parent: String,
        /// Placement relative to the destination.
        position: InsertPosition,
    },
}

impl MutationOp {
    /// Operation kind name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::UpdateText { .. } => "update_text",
            Self::UpdateAttribute { .. } => "update_attribute",
            Self::Move { .. } => "move",
        }
    }

    /// The selector this operation is addressed to.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Insert { parent, .. } => parent,
            Self::Delete { target }
            | Self::UpdateText { target, .. }
            | Self::UpdateAttribute { target, .. }
            | Self::Move { target, .. } => target,
        }
    }
}

/// Loosely-typed operation as produced by external collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOp {
    /// Operation kind.
    #[serde(default, rename = "op", alias = "kind", alias = "type")]
    pub kind: String,
    /// Target selector (the reference node for `insert`).
    #[serde(default, alias = "parent", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Insert/move position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    /// Insert content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MarkupNode>,
    /// Text or attribute value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Attribute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Move destination selector.
    #[serde(default, alias = "new_parent", skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl RawOp {
    /// Normalized kind name (`updateText` and `update-text` become `update_text`).
    #[must_use]
    pub fn normalized_kind(&self) -> String {
        let mut out = String::with_capacity(self.kind.len() + 2);
        for (i, c) in self.kind.trim().chars().enumerate() {
            if c == '-' || c == ' ' {
                out.push('_');
            } else if c.is_ascii_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Convert to the typed form.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidOperation`] for any structural problem the
    /// validator would report as an error.
    pub fn into_typed(self) -> EngineResult<MutationOp> {
        let kind = self.normalized_kind();
        let target = self
            .target
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| EngineError::InvalidOperation(format!("{kind}: missing target")))?;
        let position = |name: Option<String>| -> EngineResult<InsertPosition> {
            let name = name.unwrap_or_else(|| "append".to_string());
            InsertPosition::parse(&name).ok_or_else(|| {
                EngineError::InvalidOperation(format!("{kind}: invalid position {name:?}"))
            })
        };
        let value = |value: Option<String>| {
            value.ok_or_else(|| EngineError::InvalidOperation(format!("{kind}: missing value")))
        };

        match kind.as_str() {
            "insert" => {
                let content = self
                    .content
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| EngineError::InvalidOperation("insert: missing content".into()))?;
                Ok(MutationOp::Insert {
                    parent: target,
                    position: position(self.position)?,
                    content,
                })
            }
            "delete" => Ok(MutationOp::Delete { target }),
            "update_text" => Ok(MutationOp::UpdateText {
                target,
                value: value(self.value)?,
            }),
            "update_attribute" => {
                let name = self.name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
                    EngineError::InvalidOperation("update_attribute: missing name".into())
                })?;
                Ok(MutationOp::UpdateAttribute {
                    target,
                    name,
                    value: value(self.value)?,
                })
            }
            "move" => {
                let new_parent = self
                    .destination
                    .filter(|d| !d.trim().is_empty())
                    .ok_or_else(|| EngineError::InvalidOperation("move: missing destination".into()))?;
                Ok(MutationOp::Move {
                    target,
                    new_parent,
                    position: position(self.position)?,
                })
            }
            other => Err(EngineError::InvalidOperation(format!(
                "unknown operation kind {other:?}"
            ))),
        }
    }
}

impl From<&MutationOp> for RawOp {
    fn from(op: &MutationOp) -> Self {
        let mut raw = RawOp {
            kind: op.kind().to_string(),
            target: Some(op.target().to_string()),
            ..RawOp::default()
        };
        match op {
            MutationOp::Insert {
                position, content, ..
            } => {
                raw.position = Some(position.as_str().to_string());
                raw.content = Some(content.clone());
            }
            MutationOp::Delete { .. } => {}
            MutationOp::UpdateText { value, .. } => raw.value = Some(value.clone()),
            MutationOp::UpdateAttribute { name, value, .. } => {
                raw.name = Some(name.clone());
                raw.value = Some(value.clone());
            }
            MutationOp::Move {
                new_parent,
                position,
                ..
            } => {
                raw.destination = Some(new_parent.clone());
                raw.position = Some(position.as_str().to_string());
            }
        }
        raw
    }
}
