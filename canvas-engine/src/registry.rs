//! Addressing registry: stable element ids to live document nodes.
//!
//! Two id namespaces share one registry:
//!
//! | Origin | Id form                 | Resolution paths (in order)                       |
//! |--------|-------------------------|---------------------------------------------------|
//! | flow   | `flow-<content hash>`   | captured selector, then `[data-flow-id="…"]`     |
//! | canvas | `canvas-<uuid>`         | `[data-canvas-id="…"]`                            |
//!
//! The registry is a cache. Handles go stale whenever something other than
//! the engine touches the document, so [`AddressingRegistry::resolve`] always
//! re-checks a cached handle and [`AddressingRegistry::sync`] rebuilds all of
//! them after a reload, import or undo/redo.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DocumentConfig;
use crate::document::{LiveDocument, NodeHandle};
use crate::element::{ElementId, FLOW_ID_PREFIX};
use crate::selector::quote_attr_value;

/// Which namespace an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Existing node in document flow.
    Flow,
    /// Node created by the engine for an absolute element.
    Canvas,
}

/// How to locate the node for an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionPath {
    /// A captured CSS-like selector.
    Selector {
        /// Selector text.
        selector: String,
    },
    /// Direct id-based lookup through a tagging attribute.
    Attribute {
        /// Attribute name.
        name: String,
        /// Attribute value (the stable id).
        value: String,
    },
}

impl ResolutionPath {
    /// The selector this path queries.
    #[must_use]
    pub fn to_selector(&self) -> String {
        match self {
            Self::Selector { selector } => selector.clone(),
            Self::Attribute { name, value } => format!("[{name}={}]", quote_attr_value(value)),
        }
    }
}

/// One registered id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Stable id.
    pub id: ElementId,
    /// Namespace.
    pub origin: Origin,
    /// Resolution paths, tried in order.
    pub paths: Vec<ResolutionPath>,
    /// Last resolved handle; possibly stale.
    #[serde(skip)]
    handle: Option<NodeHandle>,
}

impl RegistryEntry {
    /// Last resolved handle, without checking liveness.
    #[must_use]
    pub fn cached_handle(&self) -> Option<NodeHandle> {
        self.handle
    }

    /// Selector of the first path.
    #[must_use]
    pub fn primary_selector(&self) -> Option<String> {
        self.paths.first().map(ResolutionPath::to_selector)
    }
}

/// Outcome of a full rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Ids that resolved to a live node.
    pub resolved: usize,
    /// Ids that did not resolve.
    pub missing: Vec<ElementId>,
    /// Tagged nodes registered during the scan.
    pub adopted: Vec<ElementId>,
    /// Wall time spent.
    pub elapsed_ms: u64,
    /// Whether the rescan exceeded its budget.
    pub over_budget: bool,
}

/// Bidirectional map between stable ids and live nodes.
#[derive(Debug, Clone)]
pub struct AddressingRegistry {
    entries: HashMap<ElementId, RegistryEntry>,
    document: DocumentConfig,
    rescan_budget: Duration,
}

impl Default for AddressingRegistry {
    fn default() -> Self {
        Self::new(DocumentConfig::default(), Duration::from_millis(50))
    }
}

impl AddressingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(document: DocumentConfig, rescan_budget: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            document,
            rescan_budget,
        }
    }

    /// Register a canvas-origin id with a path synthesized from the id.
    pub fn register_canvas(&mut self, id: &ElementId) -> &RegistryEntry {
        let path = ResolutionPath::Attribute {
            name: self.document.canvas_attribute.clone(),
            value: id.to_string(),
        };
        self.upsert(id.clone(), Origin::Canvas, vec![path])
    }

    /// Register an existing flow node.
    ///
    /// The id is the node's flow tag if it already carries one, otherwise a
    /// content hash of its tag, current path and text, so the same node maps to
    /// the same id across reloads. Returns `None` if the node is not live.
    pub fn register_flow(&mut self, doc: &dyn LiveDocument, node: NodeHandle) -> Option<ElementId> {
        if !doc.is_live(node) {
            return None;
        }
        let path = doc.selector_path(node)?;
        let id = doc
            .attribute(node, &self.document.flow_attribute)
            .map(ElementId::from)
            .unwrap_or_else(|| {
                let tag = doc.tag_name(node).unwrap_or_default();
                let text = doc.text_content(node).unwrap_or_default();
                flow_content_id(&tag, &path, &text)
            });
        self.register_flow_with_id(&id, &path);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.handle = Some(node);
        }
        Some(id)
    }

    /// Register a flow id whose path the caller already knows.
    pub fn register_flow_with_id(&mut self, id: &ElementId, selector: &str) -> &RegistryEntry {
        let paths = vec![
            ResolutionPath::Selector {
                selector: selector.to_string(),
            },
            ResolutionPath::Attribute {
                name: self.document.flow_attribute.clone(),
                value: id.to_string(),
            },
        ];
        self.upsert(id.clone(), Origin::Flow, paths)
    }

    fn upsert(&mut self, id: ElementId, origin: Origin, paths: Vec<ResolutionPath>) -> &RegistryEntry {
        let entry = self.entries.entry(id.clone()).or_insert_with(|| RegistryEntry {
            id,
            origin,
            paths: Vec::new(),
            handle: None,
        });
        entry.origin = origin;
        entry.paths = paths;
        entry
    }

    /// Resolve an id to a live node.
    ///
    /// Paths are tried in order (flow-origin first). A cached handle is reused
    /// only while it is live and still matches one of the paths. Unknown ids
    /// and misses are `None`, an ordinary outcome.
    pub fn resolve(&mut self, doc: &dyn LiveDocument, id: &ElementId) -> Option<NodeHandle> {
        let entry = self.entries.get_mut(id)?;
        if let Some(handle) = entry.handle {
            if doc.is_live(handle)
                && entry
                    .paths
                    .iter()
                    .any(|p| doc.matches(handle, &p.to_selector()))
            {
                return Some(handle);
            }
        }
        entry.handle = entry
            .paths
            .iter()
            .find_map(|p| doc.query(&p.to_selector()));
        if entry.handle.is_none() {
            tracing::debug!("Registry miss for {id}");
        }
        entry.handle
    }

    /// Resolve several ids; returns how many resolved.
    pub fn resolve_many<'a, I>(&mut self, doc: &dyn LiveDocument, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a ElementId>,
    {
        ids.into_iter()
            .filter(|id| self.resolve(doc, id).is_some())
            .count()
    }

    /// The selector that currently locates `id`, or its primary selector if
    /// nothing resolves.
    ///
    /// Attribute paths are preferred when they match, since structural paths
    /// shift as siblings are inserted or removed.
    pub fn target_for(&mut self, doc: &dyn LiveDocument, id: &ElementId) -> Option<String> {
        let handle = self.resolve(doc, id);
        let entry = self.entries.get(id)?;
        handle
            .and_then(|h| {
                let attribute_first = entry
                    .paths
                    .iter()
                    .filter(|p| matches!(p, ResolutionPath::Attribute { .. }))
                    .chain(
                        entry
                            .paths
                            .iter()
                            .filter(|p| matches!(p, ResolutionPath::Selector { .. })),
                    );
                attribute_first
                    .map(ResolutionPath::to_selector)
                    .find(|s| doc.matches(h, s))
            })
            .or_else(|| entry.primary_selector())
    }

    /// Full rescan against a freshly loaded document.
    ///
    /// Every handle is dropped and re-resolved; tagged nodes that are not yet
    /// registered are adopted. Exceeding the rescan budget is logged only.
    pub fn sync(&mut self, doc: &dyn LiveDocument) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport::default();

        for entry in self.entries.values_mut() {
            entry.handle = None;
        }

        let canvas_attr = self.document.canvas_attribute.clone();
        for (value, node) in doc.tagged_nodes(&canvas_attr) {
            let id = ElementId::from(value);
            if !self.entries.contains_key(&id) {
                self.register_canvas(&id);
                report.adopted.push(id.clone());
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.handle = Some(node);
            }
        }
        let flow_attr = self.document.flow_attribute.clone();
        for (value, node) in doc.tagged_nodes(&flow_attr) {
            let id = ElementId::from(value);
            if !self.entries.contains_key(&id) {
                let Some(path) = doc.selector_path(node) else {
                    continue;
                };
                self.register_flow_with_id(&id, &path);
                report.adopted.push(id.clone());
            }
        }

        for id in self.ids() {
            if self.resolve(doc, &id).is_some() {
                report.resolved += 1;
            } else {
                report.missing.push(id);
            }
        }

        let elapsed = started.elapsed();
        report.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if elapsed > self.rescan_budget {
            report.over_budget = true;
            tracing::warn!(
                elapsed_ms = report.elapsed_ms,
                budget_ms = u64::try_from(self.rescan_budget.as_millis()).unwrap_or(u64::MAX),
                entries = self.entries.len(),
                "Registry rescan exceeded budget"
            );
        }
        tracing::debug!(
            "Registry sync: {} resolved, {} missing, {} adopted",
            report.resolved,
            report.missing.len(),
            report.adopted.len()
        );
        report
    }

    /// Forget an id.
    pub fn unregister(&mut self, id: &ElementId) -> Option<RegistryEntry> {
        self.entries.remove(id)
    }

    /// Entry for an id.
    #[must_use]
    pub fn entry(&self, id: &ElementId) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// Whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether any registered path has exactly this selector.
    #[must_use]
    pub fn knows_target(&self, selector: &str) -> bool {
        let selector = selector.trim();
        self.entries
            .values()
            .flat_map(|e| e.paths.iter())
            .any(|p| p.to_selector() == selector)
    }

    /// Registered ids of one origin.
    #[must_use]
    pub fn ids_with_origin(&self, origin: Origin) -> Vec<ElementId> {
        let mut ids: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.origin == origin)
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// All registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ElementId> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Document anchors this registry tags with.
    #[must_use]
    pub fn document_config(&self) -> &DocumentConfig {
        &self.document
    }
}

/// Content-hash id for a flow node.
#[must_use]
pub fn flow_content_id(tag: &str, path: &str, text: &str) -> ElementId {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update([0]);
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(text.trim().as_bytes());
    let digest = hasher.finalize();
    let mut id = String::from(FLOW_ID_PREFIX);
    for byte in digest.iter().take(6) {
        let _ = write!(id, "{byte:02x}");
    }
    ElementId::from(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocument;

    fn doc_with_heading() -> (MemoryDocument, NodeHandle) {
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let h1 = doc
            .append_element(content, "h1", &[], "Welcome")
            .expect("append");
        (doc, h1)
    }

    #[test]
    fn test_canvas_path_is_synthesized_from_id() {
        let mut registry = AddressingRegistry::default();
        let entry = registry.register_canvas(&ElementId::from("canvas-1"));
        assert_eq!(entry.origin, Origin::Canvas);
        assert_eq!(
            entry.primary_selector().as_deref(),
            Some("[data-canvas-id=\"canvas-1\"]")
        );
    }

    #[test]
    fn test_flow_id_is_stable_across_reloads() {
        let (doc, h1) = doc_with_heading();
        let mut registry = AddressingRegistry::default();
        let first = registry.register_flow(&doc, h1).expect("registered");
        assert!(first.as_str().starts_with(FLOW_ID_PREFIX));

        let (reloaded, h1_again) = doc_with_heading();
        let mut fresh = AddressingRegistry::default();
        let second = fresh.register_flow(&reloaded, h1_again).expect("registered");
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_flow_tag_wins_over_hash() {
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let p = doc
            .append_element(content, "p", &[("data-flow-id", "flow-abc")], "x")
            .expect("append");
        let mut registry = AddressingRegistry::default();
        assert_eq!(
            registry.register_flow(&doc, p),
            Some(ElementId::from("flow-abc"))
        );
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let (doc, h1) = doc_with_heading();
        let mut registry = AddressingRegistry::default();
        let id = registry.register_flow(&doc, h1).expect("registered");
        let a = registry.resolve(&doc, &id);
        let b = registry.resolve(&doc, &id);
        assert_eq!(a, Some(h1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_id_is_a_miss_not_an_error() {
        let doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        assert_eq!(registry.resolve(&doc, &ElementId::from("nope")), None);
    }

    #[test]
    fn test_stale_handle_is_refreshed() {
        let (mut doc, h1) = doc_with_heading();
        let mut registry = AddressingRegistry::default();
        let id = registry.register_flow(&doc, h1).expect("registered");

        let (replacement, new_h1) = doc_with_heading();
        doc.replace_with(replacement);
        assert!(!doc.is_live(h1));

        let resolved = registry.resolve(&doc, &id).expect("re-resolved");
        assert_ne!(resolved, h1);
        assert_eq!(doc.text_content(resolved).as_deref(), Some("Welcome"));
        let _ = new_h1;
    }

    #[test]
    fn test_sync_adopts_tagged_nodes_and_reports_missing() {
        let mut doc = MemoryDocument::new();
        let canvas = doc.query("#canvas-root").expect("canvas root");
        let node = doc
            .append_element(canvas, "div", &[("data-canvas-id", "canvas-x")], "")
            .expect("append");

        let mut registry = AddressingRegistry::default();
        registry.register_canvas(&ElementId::from("canvas-gone"));
        let report = registry.sync(&doc);

        assert_eq!(report.adopted, vec![ElementId::from("canvas-x")]);
        assert_eq!(report.missing, vec![ElementId::from("canvas-gone")]);
        assert_eq!(report.resolved, 1);
        assert_eq!(
            registry.entry(&ElementId::from("canvas-x")).and_then(RegistryEntry::cached_handle),
            Some(node)
        );
    }

    #[test]
    fn test_unregister_and_knows_target() {
        let mut registry = AddressingRegistry::default();
        let id = ElementId::from("canvas-1");
        registry.register_canvas(&id);
        assert!(registry.knows_target("[data-canvas-id=\"canvas-1\"]"));
        assert!(registry.unregister(&id).is_some());
        assert!(!registry.knows_target("[data-canvas-id=\"canvas-1\"]"));
        assert!(registry.is_empty());
    }
}
