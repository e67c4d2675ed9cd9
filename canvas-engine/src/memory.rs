//! In-memory [`LiveDocument`] for headless hosts and tests.
//!
//! ```text
//! html
//! ├── head
//! │   └── style#canvas-breakpoint-styles   ← breakpoint rules
//! └── body
//!     ├── main#content                     ← flow content
//!     └── div#canvas-root                  ← absolute canvas subtree
//! ```
//!
//! There is no layout engine. A node's rendered box is, in order of
//! preference: a box set explicitly with [`MemoryDocument::set_box`], the
//! `left/top/width/height` of its inline `style` attribute, or the same
//! properties from top-level (desktop) rules of the breakpoint stylesheet.

use std::collections::BTreeMap;

use crate::config::DocumentConfig;
use crate::document::{ComputedStyle, LiveDocument, MutationOrigin, NodeHandle, ObservedMutation};
use crate::error::DocumentError;
use crate::ops::{InsertPosition, MarkupNode, MutationOp};
use crate::selector::{Selector, SelectorTree};
use crate::transform::Rect;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    children: Vec<u64>,
    parent: Option<u64>,
    rect: Option<Rect>,
    style: ComputedStyle,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent: None,
            rect: None,
            style: ComputedStyle::new(),
        }
    }
}

/// A small DOM-like tree implementing [`LiveDocument`].
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    nodes: BTreeMap<u64, Node>,
    root: u64,
    next_id: u64,
    config: DocumentConfig,
    observed: Vec<ObservedMutation>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Create a document with the default anchors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DocumentConfig::default())
    }

    /// Create a document whose anchors follow `config`.
    ///
    /// The canvas root and stylesheet anchors are created from their `#id`
    /// selectors; other selector forms are left for the caller to build.
    #[must_use]
    pub fn with_config(config: DocumentConfig) -> Self {
        let mut doc = Self {
            nodes: BTreeMap::new(),
            root: 0,
            next_id: 0,
            config,
            observed: Vec::new(),
        };
        let html = doc.alloc(Node::new("html"));
        doc.root = html;
        let head = doc.attach(html, Node::new("head"));
        let body = doc.attach(html, Node::new("body"));
        let mut main = Node::new("main");
        main.attributes.insert("id".to_string(), "content".to_string());
        doc.attach(body, main);

        if let Some(id) = doc.config.stylesheet.strip_prefix('#').map(str::to_string) {
            let mut style = Node::new("style");
            style.attributes.insert("id".to_string(), id);
            doc.attach(head, style);
        }
        if let Some(id) = doc.config.canvas_root.strip_prefix('#').map(str::to_string) {
            let mut canvas = Node::new("div");
            canvas.attributes.insert("id".to_string(), id);
            doc.attach(body, canvas);
        }
        doc
    }

    /// The `<html>` element.
    #[must_use]
    pub fn root(&self) -> NodeHandle {
        NodeHandle(self.root)
    }

    /// The `<body>` element.
    #[must_use]
    pub fn body(&self) -> NodeHandle {
        self.query("body").unwrap_or(NodeHandle(self.root))
    }

    /// The flow content container (`main#content`), or `<body>` if absent.
    #[must_use]
    pub fn content(&self) -> NodeHandle {
        self.query("#content").unwrap_or_else(|| self.body())
    }

    /// Append a new element under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Detached`] if `parent` is not in the document.
    pub fn append_element(
        &mut self,
        parent: NodeHandle,
        tag: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> Result<NodeHandle, DocumentError> {
        self.check_live(parent)?;
        let mut node = Node::new(tag);
        for (name, value) in attributes {
            node.attributes.insert((*name).to_string(), (*value).to_string());
        }
        node.text = text.to_string();
        Ok(NodeHandle(self.attach(parent.0, node)))
    }

    /// Set the rendered box of a node.
    pub fn set_box(&mut self, node: NodeHandle, rect: Rect) {
        if let Some(n) = self.nodes.get_mut(&node.0) {
            n.rect = Some(rect);
        }
    }

    /// Set one computed style property.
    pub fn set_computed_style(&mut self, node: NodeHandle, property: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(&node.0) {
            n.style.insert(property.to_string(), value.to_string());
        }
    }

    /// Edit a node's text from outside the engine (a paste, a script).
    pub fn external_set_text(&mut self, node: NodeHandle, text: &str) {
        if let Some(n) = self.nodes.get_mut(&node.0) {
            n.text = text.to_string();
        } else {
            return;
        }
        let mutation = self.describe(node.0, MutationOrigin::External);
        self.observed.push(mutation);
    }

    /// Remove a node from outside the engine.
    pub fn external_remove(&mut self, node: NodeHandle) {
        if !self.nodes.contains_key(&node.0) || node.0 == self.root {
            return;
        }
        let mutation = self.describe(node.0, MutationOrigin::External);
        self.remove_subtree(node.0);
        self.observed.push(mutation);
    }

    /// Replace the whole document (reload, import, undo of a wholesale edit).
    ///
    /// Every previously issued handle becomes stale.
    pub fn replace_with(&mut self, other: MemoryDocument) {
        let offset = self.next_id;
        self.nodes = other
            .nodes
            .into_iter()
            .map(|(id, mut node)| {
                node.parent = node.parent.map(|p| p + offset);
                node.children = node.children.iter().map(|c| c + offset).collect();
                (id + offset, node)
            })
            .collect();
        self.root = other.root + offset;
        self.next_id = offset + other.next_id;
        self.config = other.config;
        self.observed.push(ObservedMutation {
            origin: MutationOrigin::External,
            affected_ids: Vec::new(),
            in_canvas_subtree: false,
        });
    }

    /// Mutations observed since the last call.
    pub fn take_observed(&mut self) -> Vec<ObservedMutation> {
        std::mem::take(&mut self.observed)
    }

    /// Number of attached nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Serialize the document as HTML.
    #[must_use]
    pub fn to_html(&self) -> String {
        self.markup(self.root).map(|m| m.to_html()).unwrap_or_default()
    }

    fn markup(&self, id: u64) -> Option<MarkupNode> {
        let node = self.nodes.get(&id)?;
        Some(MarkupNode {
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
            text: node.text.clone(),
            children: node.children.iter().filter_map(|c| self.markup(*c)).collect(),
        })
    }

    fn alloc(&mut self, node: Node) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn attach(&mut self, parent: u64, mut node: Node) -> u64 {
        node.parent = Some(parent);
        let id = self.alloc(node);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    fn build(&mut self, markup: &MarkupNode) -> u64 {
        let mut node = Node::new(&markup.tag);
        node.attributes.clone_from(&markup.attributes);
        node.text.clone_from(&markup.text);
        let id = self.alloc(node);
        for child in &markup.children {
            let child_id = self.build(child);
            if let Some(c) = self.nodes.get_mut(&child_id) {
                c.parent = Some(id);
            }
            if let Some(n) = self.nodes.get_mut(&id) {
                n.children.push(child_id);
            }
        }
        id
    }

    fn check_live(&self, node: NodeHandle) -> Result<(), DocumentError> {
        if self.nodes.contains_key(&node.0) {
            Ok(())
        } else {
            Err(DocumentError::Detached(node.to_string()))
        }
    }

    fn resolve_target(&self, selector: &str) -> Result<u64, DocumentError> {
        self.query(selector)
            .map(|h| h.0)
            .ok_or_else(|| DocumentError::TargetNotFound(selector.to_string()))
    }

    fn detach(&mut self, id: u64) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        if let Some(n) = self.nodes.get_mut(&id) {
            n.parent = None;
        }
    }

    fn remove_subtree(&mut self, id: u64) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }

    fn place(
        &mut self,
        id: u64,
        reference: u64,
        position: InsertPosition,
        selector: &str,
    ) -> Result<(), DocumentError> {
        let invalid = || DocumentError::InvalidPosition {
            position: position.as_str().to_string(),
            target: selector.to_string(),
        };
        match position {
            InsertPosition::Prepend | InsertPosition::Append => {
                let parent = self.nodes.get_mut(&reference).ok_or_else(invalid)?;
                if position == InsertPosition::Prepend {
                    parent.children.insert(0, id);
                } else {
                    parent.children.push(id);
                }
                if let Some(n) = self.nodes.get_mut(&id) {
                    n.parent = Some(reference);
                }
            }
            InsertPosition::Before | InsertPosition::After => {
                let parent_id = self
                    .nodes
                    .get(&reference)
                    .and_then(|n| n.parent)
                    .ok_or_else(invalid)?;
                let parent = self.nodes.get_mut(&parent_id).ok_or_else(invalid)?;
                let index = parent
                    .children
                    .iter()
                    .position(|c| *c == reference)
                    .ok_or_else(invalid)?;
                let at = if position == InsertPosition::Before {
                    index
                } else {
                    index + 1
                };
                parent.children.insert(at, id);
                if let Some(n) = self.nodes.get_mut(&id) {
                    n.parent = Some(parent_id);
                }
            }
        }
        Ok(())
    }

    fn tagged_ids_of(&self, id: u64) -> Vec<String> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for attr in [&self.config.canvas_attribute, &self.config.flow_attribute] {
                if let Some(value) = node.attributes.get(attr.as_str()) {
                    ids.push(value.clone());
                }
            }
            stack.extend(node.children.iter().copied());
        }
        ids
    }

    fn describe(&self, id: u64, origin: MutationOrigin) -> ObservedMutation {
        let canvas_root = self.config.canvas_root.clone();
        ObservedMutation {
            origin,
            affected_ids: self.tagged_ids_of(id),
            in_canvas_subtree: self.is_within(NodeHandle(id), &canvas_root),
        }
    }

    fn document_order(&self) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    fn stylesheet_box(&self, id: u64) -> Option<Rect> {
        let sheet = self.query(&self.config.stylesheet)?;
        let css = &self.nodes.get(&sheet.0)?.text;
        let mut decls = BTreeMap::new();
        for (selector, block) in top_level_rules(css) {
            let matched = Selector::parse(&selector)
                .map(|s| s.matches(self, NodeHandle(id)))
                .unwrap_or(false);
            if matched {
                decls.extend(parse_declarations(&block));
            }
        }
        box_from_declarations(&decls)
    }

    fn inline_declarations(&self, id: u64) -> BTreeMap<String, String> {
        self.nodes
            .get(&id)
            .and_then(|n| n.attributes.get("style"))
            .map(|s| parse_declarations(s))
            .unwrap_or_default()
    }
}

impl SelectorTree for MemoryDocument {
    type Node = NodeHandle;

    fn tag(&self, node: NodeHandle) -> Option<String> {
        self.nodes.get(&node.0).map(|n| n.tag.clone())
    }

    fn attr(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.nodes.get(&node.0)?.attributes.get(name).cloned()
    }

    fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.nodes.get(&node.0)?.parent.map(NodeHandle)
    }

    fn preceding_siblings(&self, node: NodeHandle) -> Vec<NodeHandle> {
        let Some(parent) = self.nodes.get(&node.0).and_then(|n| n.parent) else {
            return Vec::new();
        };
        let Some(siblings) = self.nodes.get(&parent).map(|p| &p.children) else {
            return Vec::new();
        };
        let index = siblings.iter().position(|c| *c == node.0).unwrap_or(0);
        siblings[..index].iter().rev().map(|c| NodeHandle(*c)).collect()
    }

    fn following_siblings(&self, node: NodeHandle) -> Vec<NodeHandle> {
        let Some(parent) = self.nodes.get(&node.0).and_then(|n| n.parent) else {
            return Vec::new();
        };
        let Some(siblings) = self.nodes.get(&parent).map(|p| &p.children) else {
            return Vec::new();
        };
        let index = siblings
            .iter()
            .position(|c| *c == node.0)
            .map_or(siblings.len(), |i| i + 1);
        siblings[index..].iter().map(|c| NodeHandle(*c)).collect()
    }

    fn is_root(&self, node: NodeHandle) -> bool {
        node.0 == self.root
    }
}

impl LiveDocument for MemoryDocument {
    fn query(&self, selector: &str) -> Option<NodeHandle> {
        let selector = Selector::parse(selector).ok()?;
        self.document_order()
            .into_iter()
            .map(NodeHandle)
            .find(|node| selector.matches(self, *node))
    }

    fn is_live(&self, node: NodeHandle) -> bool {
        let mut current = node.0;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes.get(&current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn matches(&self, node: NodeHandle, selector: &str) -> bool {
        self.nodes.contains_key(&node.0)
            && Selector::parse(selector).is_ok_and(|s| s.matches(self, node))
    }

    fn tag_name(&self, node: NodeHandle) -> Option<String> {
        self.tag(node)
    }

    fn attribute(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.attr(node, name)
    }

    fn text_content(&self, node: NodeHandle) -> Option<String> {
        let root = self.nodes.get(&node.0)?;
        let mut out = root.text.clone();
        for child in &root.children {
            if let Some(text) = self.text_content(NodeHandle(*child)) {
                out.push_str(&text);
            }
        }
        Some(out)
    }

    fn rendered_box(&self, node: NodeHandle) -> Option<Rect> {
        let n = self.nodes.get(&node.0)?;
        if let Some(rect) = n.rect {
            return Some(rect);
        }
        box_from_declarations(&self.inline_declarations(node.0))
            .or_else(|| self.stylesheet_box(node.0))
            .or(Some(Rect::new(0.0, 0.0, 0.0, 0.0)))
    }

    fn computed_style(&self, node: NodeHandle) -> Option<ComputedStyle> {
        let n = self.nodes.get(&node.0)?;
        let mut style = n.style.clone();
        style.extend(self.inline_declarations(node.0));
        Some(style)
    }

    fn selector_path(&self, node: NodeHandle) -> Option<String> {
        if !self.is_live(node) {
            return None;
        }
        if let Some(id) = self.attr(node, "id") {
            let candidate = format!("#{id}");
            if self.query(&candidate) == Some(node) {
                return Some(candidate);
            }
        }
        let mut segments = Vec::new();
        let mut current = node;
        while !self.is_root(current) {
            let tag = self.tag(current)?;
            let index = self
                .preceding_siblings(current)
                .into_iter()
                .filter(|s| self.tag(*s).as_deref() == Some(tag.as_str()))
                .count()
                + 1;
            segments.push(format!("{tag}:nth-of-type({index})"));
            current = self.parent(current)?;
        }
        segments.push(":root".to_string());
        segments.reverse();
        Some(segments.join(" > "))
    }

    fn tagged_nodes(&self, attribute: &str) -> Vec<(String, NodeHandle)> {
        self.document_order()
            .into_iter()
            .filter_map(|id| {
                self.nodes
                    .get(&id)
                    .and_then(|n| n.attributes.get(attribute))
                    .map(|v| (v.clone(), NodeHandle(id)))
            })
            .collect()
    }

    fn is_within(&self, node: NodeHandle, ancestor_selector: &str) -> bool {
        let Some(ancestor) = self.query(ancestor_selector) else {
            return false;
        };
        let mut current = Some(node.0);
        while let Some(id) = current {
            if id == ancestor.0 {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn apply(&mut self, op: &MutationOp) -> Result<(), DocumentError> {
        let touched = match op {
            MutationOp::Insert {
                parent,
                position,
                content,
            } => {
                let reference = self.resolve_target(parent)?;
                let id = self.build(content);
                if let Err(e) = self.place(id, reference, *position, parent) {
                    self.remove_subtree(id);
                    return Err(e);
                }
                id
            }
            MutationOp::Delete { target } => {
                let id = self.resolve_target(target)?;
                if id == self.root {
                    return Err(DocumentError::InvalidPosition {
                        position: "delete".to_string(),
                        target: target.clone(),
                    });
                }
                let mutation = self.describe(id, MutationOrigin::Compiler);
                self.remove_subtree(id);
                self.observed.push(mutation);
                return Ok(());
            }
            MutationOp::UpdateText { target, value } => {
                let id = self.resolve_target(target)?;
                let children = self
                    .nodes
                    .get(&id)
                    .map(|n| n.children.clone())
                    .unwrap_or_default();
                for child in children {
                    self.remove_subtree(child);
                }
                if let Some(n) = self.nodes.get_mut(&id) {
                    n.text.clone_from(value);
                }
                id
            }
            MutationOp::UpdateAttribute {
                target,
                name,
                value,
            } => {
                let id = self.resolve_target(target)?;
                if let Some(n) = self.nodes.get_mut(&id) {
                    if name == "textContent" {
                        n.text.clone_from(value);
                    } else {
                        n.attributes.insert(name.clone(), value.clone());
                    }
                }
                id
            }
            MutationOp::Move {
                target,
                new_parent,
                position,
            } => {
                let id = self.resolve_target(target)?;
                let reference = self.resolve_target(new_parent)?;
                if id == self.root || self.is_within(NodeHandle(reference), target) {
                    return Err(DocumentError::InvalidPosition {
                        position: position.as_str().to_string(),
                        target: new_parent.clone(),
                    });
                }
                let old_parent = self.nodes.get(&id).and_then(|n| n.parent);
                let old_index = old_parent
                    .and_then(|p| self.nodes.get(&p))
                    .and_then(|p| p.children.iter().position(|c| *c == id));
                self.detach(id);
                if let Err(e) = self.place(id, reference, *position, new_parent) {
                    if let (Some(p), Some(i)) = (old_parent, old_index) {
                        if let Some(parent) = self.nodes.get_mut(&p) {
                            parent.children.insert(i.min(parent.children.len()), id);
                        }
                        if let Some(n) = self.nodes.get_mut(&id) {
                            n.parent = Some(p);
                        }
                    }
                    return Err(e);
                }
                id
            }
        };
        let mutation = self.describe(touched, MutationOrigin::Compiler);
        self.observed.push(mutation);
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[MutationOp]) -> Result<(), DocumentError> {
        let snapshot = self.clone();
        for op in ops {
            if let Err(e) = self.apply(op) {
                tracing::debug!("Rolling back batch after {} failed: {e}", op.kind());
                *self = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Top-level `selector { declarations }` rules; `@`-blocks are skipped.
fn top_level_rules(css: &str) -> Vec<(String, String)> {
    let mut rules = Vec::new();
    let mut rest = css;
    while let Some(open) = rest.find('{') {
        let prelude = rest[..open].trim().to_string();
        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in rest[open..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            break;
        };
        if !prelude.starts_with('@') {
            rules.push((prelude, rest[open + 1..close].to_string()));
        }
        rest = &rest[close + 1..];
    }
    rules
}

/// Parse `prop: value; prop: value` into a map.
fn parse_declarations(block: &str) -> BTreeMap<String, String> {
    block
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim();
            (!prop.is_empty()).then(|| (prop.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn box_from_declarations(decls: &BTreeMap<String, String>) -> Option<Rect> {
    let px = |name: &str| {
        decls
            .get(name)
            .and_then(|v| v.trim().trim_end_matches("px").trim().parse::<f64>().ok())
    };
    Some(Rect::new(
        px("left")?,
        px("top")?,
        px("width")?,
        px("height")?,
    ))
}
