//! The live-document seam.
//!
//! The rendering surface that displays the document is an external
//! collaborator. The engine only needs to locate nodes by selector, read
//! their rendered box and computed style, enumerate tagged nodes, and apply
//! primitive operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DocumentError;
use crate::ops::MutationOp;
use crate::transform::Rect;

/// Opaque handle to a node in the live document.
///
/// A handle may go stale at any time the engine did not itself just mutate
/// the document; check [`LiveDocument::is_live`] before trusting one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(pub u64);

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Computed visual properties (property -> value).
pub type ComputedStyle = BTreeMap<String, String>;

/// Who caused a document mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOrigin {
    /// The engine's own apply step.
    Compiler,
    /// Anything else: paste, third-party script, devtools.
    External,
}

/// A mutation seen on the live document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMutation {
    /// Who caused it.
    pub origin: MutationOrigin,
    /// Stable ids of tagged nodes affected; empty when unattributable.
    pub affected_ids: Vec<String>,
    /// Whether the mutation happened inside the absolute-canvas subtree.
    pub in_canvas_subtree: bool,
}

impl ObservedMutation {
    /// An external mutation touching the given ids.
    #[must_use]
    pub fn external<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin: MutationOrigin::External,
            affected_ids: ids.into_iter().map(Into::into).collect(),
            in_canvas_subtree: false,
        }
    }
}

/// Operations the engine needs from the rendering surface.
pub trait LiveDocument {
    /// First node matching `selector`, in document order.
    fn query(&self, selector: &str) -> Option<NodeHandle>;

    /// Whether `node` is still attached to the document.
    fn is_live(&self, node: NodeHandle) -> bool;

    /// Whether `node` matches `selector`.
    fn matches(&self, node: NodeHandle, selector: &str) -> bool;

    /// Lower-case tag name.
    fn tag_name(&self, node: NodeHandle) -> Option<String>;

    /// Attribute value.
    fn attribute(&self, node: NodeHandle, name: &str) -> Option<String>;

    /// Text content.
    fn text_content(&self, node: NodeHandle) -> Option<String>;

    /// Current rendered box in document coordinates.
    fn rendered_box(&self, node: NodeHandle) -> Option<Rect>;

    /// Computed visual style.
    fn computed_style(&self, node: NodeHandle) -> Option<ComputedStyle>;

    /// A selector that currently locates `node` uniquely.
    fn selector_path(&self, node: NodeHandle) -> Option<String>;

    /// Every node carrying `attribute`, with the attribute's value.
    fn tagged_nodes(&self, attribute: &str) -> Vec<(String, NodeHandle)>;

    /// Whether `node` lies inside the subtree rooted at the first match of
    /// `ancestor_selector` (the root itself included).
    fn is_within(&self, node: NodeHandle, ancestor_selector: &str) -> bool;

    /// Apply one primitive operation.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] if the target cannot be located or the
    /// operation is impossible for it.
    fn apply(&mut self, op: &MutationOp) -> Result<(), DocumentError>;

    /// Apply a batch in order, all or nothing.
    ///
    /// The default resolves every target up front and applies nothing if one
    /// is missing, so a batch may not address nodes it creates itself.
    /// Documents that can snapshot themselves should override this to roll
    /// back failures that only show up mid-batch.
    ///
    /// # Errors
    ///
    /// Returns the first [`DocumentError`]; see [`apply`](Self::apply).
    fn apply_batch(&mut self, ops: &[MutationOp]) -> Result<(), DocumentError> {
        for op in ops {
            let destination = match op {
                MutationOp::Move { new_parent, .. } => Some(new_parent.as_str()),
                _ => None,
            };
            for selector in std::iter::once(op.target()).chain(destination) {
                if self.query(selector).is_none() {
                    return Err(DocumentError::TargetNotFound(selector.to_string()));
                }
            }
        }
        ops.iter().try_for_each(|op| self.apply(op))
    }
}
