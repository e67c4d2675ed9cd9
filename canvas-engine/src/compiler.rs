//! Mutation compiler: element model in, ordered primitive operations out.
//!
//! ```text
//!   ElementModel ──► MutationCompiler ──► CompiledBatch
//!                       │    │              ├── element ops (document order)
//!             registry ◄┘    └► z policy    └── stylesheet op (always last)
//! ```
//!
//! Geometry never travels as inline style. Every absolute element gets one
//! desktop rule plus tablet and mobile `@media` overrides in a single
//! stylesheet fragment keyed by its canvas attribute.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{BreakpointConfig, BudgetConfig, DocumentConfig, EngineConfig};
use crate::document::{LiveDocument, NodeHandle};
use crate::element::{CanvasElement, ElementId, ElementKind, ElementModel};
use crate::error::{EngineError, EngineResult};
use crate::ops::{InsertPosition, MarkupNode, MutationOp, RawOp};
use crate::registry::{AddressingRegistry, Origin};
use crate::selector::quote_attr_value;
use crate::transform::{round_to, Breakpoint, BreakpointModel, Transform};
use crate::warning::{Adjusted, ValidationWarning, WarningCode};
use crate::zindex::{ZIndex, ZIndexPolicy};

/// Visual properties captured when a flow element is unlocked.
pub const CAPTURED_PROPERTIES: &[&str] = &[
    "background-color",
    "border",
    "border-radius",
    "color",
    "font-family",
    "font-size",
    "font-style",
    "font-weight",
    "letter-spacing",
    "line-height",
    "opacity",
    "padding",
    "text-align",
    "text-decoration",
    "text-transform",
];

/// Output of one compile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledBatch {
    /// Element operations in application order.
    pub element_ops: Vec<MutationOp>,
    /// The stylesheet (re)install, applied after every element op.
    pub style_op: Option<MutationOp>,
    /// Stylesheet text carried by `style_op`.
    pub stylesheet: String,
    /// Policy corrections made while compiling.
    pub warnings: Vec<ValidationWarning>,
    /// Canvas ids whose elements left the model; unregister after apply.
    pub retired: Vec<ElementId>,
    /// Flow ids replaced by unlocked elements; unregister after apply.
    pub replaced: Vec<ElementId>,
    /// Wall time spent compiling.
    pub elapsed_ms: u64,
}

impl CompiledBatch {
    /// Every operation in application order.
    #[must_use]
    pub fn operations(&self) -> Vec<MutationOp> {
        self.element_ops
            .iter()
            .chain(self.style_op.iter())
            .cloned()
            .collect()
    }

    /// Operations in wire form, for the validator.
    #[must_use]
    pub fn raw_operations(&self) -> Vec<RawOp> {
        self.element_ops
            .iter()
            .chain(self.style_op.iter())
            .map(RawOp::from)
            .collect()
    }

    /// Number of operations, stylesheet included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.element_ops.len() + usize::from(self.style_op.is_some())
    }

    /// Whether there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compiles an element model against a live document.
#[derive(Debug, Clone, Default)]
pub struct MutationCompiler {
    breakpoints: BreakpointModel,
    policy: ZIndexPolicy,
    document: DocumentConfig,
    budgets: BudgetConfig,
}

impl MutationCompiler {
    /// Create a compiler from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            breakpoints: BreakpointModel::new(config.breakpoints.clone()),
            policy: ZIndexPolicy::new(config.z_index.clone()),
            document: config.document.clone(),
            budgets: config.budgets.clone(),
        }
    }

    /// The z-index policy in use.
    #[must_use]
    pub const fn policy(&self) -> &ZIndexPolicy {
        &self.policy
    }

    /// The breakpoint model in use.
    #[must_use]
    pub const fn breakpoints(&self) -> &BreakpointModel {
        &self.breakpoints
    }

    /// Compile the model into operations.
    ///
    /// Registers every element id, reads the document to decide what to emit,
    /// and never mutates the document itself.
    pub fn compile(
        &self,
        model: &ElementModel,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
    ) -> CompiledBatch {
        let started = Instant::now();
        let mut batch = CompiledBatch::default();
        let mut rules = Vec::new();

        for element in &model.elements {
            if element.is_absolute() {
                registry.register_canvas(&element.id);
                let z = self.policy.assign(element);
                batch.warnings.extend(z.warnings);
                rules.push(self.css_rules(element, z.value));
                self.compile_absolute(element, registry, doc, &mut batch);
            } else {
                self.compile_flow(element, registry, doc, &mut batch);
            }
        }

        let in_model: BTreeSet<&ElementId> = model.elements.iter().map(|e| &e.id).collect();
        for id in registry.ids_with_origin(Origin::Canvas) {
            if in_model.contains(&id) {
                continue;
            }
            if registry.resolve(doc, &id).is_some() {
                if let Some(target) = registry.target_for(doc, &id) {
                    batch.element_ops.push(MutationOp::Delete { target });
                }
            }
            batch.retired.push(id);
        }

        batch.stylesheet = rules.concat();
        batch.style_op = Some(MutationOp::UpdateAttribute {
            target: self.document.stylesheet.clone(),
            name: "textContent".to_string(),
            value: batch.stylesheet.clone(),
        });

        let elapsed = started.elapsed();
        batch.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let budget = self.budgets.compile_budget_ms(model.len());
        if elapsed > Duration::from_millis(budget) {
            tracing::warn!(
                elapsed_ms = batch.elapsed_ms,
                budget_ms = budget,
                elements = model.len(),
                "Compile exceeded budget"
            );
        }
        tracing::debug!(
            "Compiled {} elements into {} operations",
            model.len(),
            batch.len()
        );
        batch
    }

    fn compile_absolute(
        &self,
        element: &CanvasElement,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
        batch: &mut CompiledBatch,
    ) {
        if let Some(node) = registry.resolve(doc, &element.id) {
            let Some(target) = registry.target_for(doc, &element.id) else {
                return;
            };
            self.diff_content(element, node, &target, doc, batch);
            return;
        }

        let markup = self.markup_for(element);
        let original = element.original_id.as_ref().filter(|orig| {
            self.adopt_tagged_flow(orig, registry, doc);
            registry.resolve(doc, orig).is_some()
        });
        match original.and_then(|orig| registry.target_for(doc, orig).map(|t| (orig, t))) {
            Some((orig, target)) => {
                tracing::debug!("Unlocking {orig} into {}", element.id);
                batch.element_ops.push(MutationOp::Insert {
                    parent: target.clone(),
                    position: InsertPosition::After,
                    content: markup,
                });
                batch.element_ops.push(MutationOp::Delete { target });
                batch.replaced.push(orig.clone());
            }
            None => batch.element_ops.push(MutationOp::Insert {
                parent: self.document.canvas_root.clone(),
                position: InsertPosition::Append,
                content: markup,
            }),
        }
    }

    /// Register a flow id the registry has not seen yet (e.g. a model loaded
    /// into a fresh session) if a node tagged with it is in the document.
    fn adopt_tagged_flow(
        &self,
        id: &ElementId,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
    ) {
        if registry.contains(id) {
            return;
        }
        let tagged = format!(
            "[{}={}]",
            self.document.flow_attribute,
            quote_attr_value(id.as_str())
        );
        if doc.query(&tagged).is_some() {
            registry.register_flow_with_id(id, &tagged);
        }
    }

    fn compile_flow(
        &self,
        element: &CanvasElement,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
        batch: &mut CompiledBatch,
    ) {
        self.adopt_tagged_flow(&element.id, registry, doc);
        let node = registry.resolve(doc, &element.id);
        let target = node.and_then(|_| registry.target_for(doc, &element.id));
        let (Some(node), Some(target)) = (node, target) else {
            batch.warnings.push(
                ValidationWarning::warning(
                    WarningCode::OrphanedTarget,
                    format!("flow element {} is not in the document; skipped", element.id),
                )
                .with_subject(element.id.to_string()),
            );
            return;
        };

        self.diff_content(element, node, &target, doc, batch);
        if !element.styles.is_empty() {
            let inline = declarations(&element.styles);
            if doc.attribute(node, "style").as_deref() != Some(inline.as_str()) {
                batch.element_ops.push(MutationOp::UpdateAttribute {
                    target,
                    name: "style".to_string(),
                    value: inline,
                });
            }
        }
    }

    /// Emit text and attribute updates only where the live node differs.
    fn diff_content(
        &self,
        element: &CanvasElement,
        node: NodeHandle,
        target: &str,
        doc: &dyn LiveDocument,
        batch: &mut CompiledBatch,
    ) {
        if let Some(text) = element.kind.text() {
            let live = doc.text_content(node).unwrap_or_default();
            if live != text {
                let target = match element.kind {
                    ElementKind::Section { .. } if element.is_absolute() => format!("{target} > h2"),
                    _ => target.to_string(),
                };
                batch.element_ops.push(MutationOp::UpdateText {
                    target,
                    value: text.to_string(),
                });
            }
        }
        for (name, value) in kind_attributes(&element.kind) {
            if doc.attribute(node, &name).as_deref() != Some(value.as_str()) {
                batch.element_ops.push(MutationOp::UpdateAttribute {
                    target: target.to_string(),
                    name,
                    value,
                });
            }
        }
    }

    /// Markup for a new absolute element, tagged with its canvas id.
    #[must_use]
    pub fn markup_for(&self, element: &CanvasElement) -> MarkupNode {
        let base = match &element.kind {
            ElementKind::Text { content } => MarkupNode::new("p").text(content.as_str()),
            ElementKind::Image { .. } => MarkupNode::new("img"),
            ElementKind::Button { label, href } => {
                MarkupNode::new(if href.is_some() { "a" } else { "button" }).text(label.as_str())
            }
            ElementKind::Video { .. } => MarkupNode::new("video"),
            ElementKind::Section { heading } => {
                let section = MarkupNode::new("section");
                match heading {
                    Some(h) => section.child(MarkupNode::new("h2").text(h.as_str())),
                    None => section,
                }
            }
            ElementKind::Custom { tag, text, .. } => MarkupNode::new(tag.as_str()).text(text.as_str()),
        };
        kind_attributes(&element.kind)
            .into_iter()
            .fold(base, |node, (name, value)| node.attr(name, value))
            .attr(self.document.canvas_attribute.as_str(), element.id.as_str())
            .attr("class", format!("canvas-element canvas-{}", element.kind.name()))
    }

    fn css_rules(&self, element: &CanvasElement, z: ZIndex) -> String {
        let Some(set) = element.breakpoints() else {
            return String::new();
        };
        let selector = format!(
            "[{}={}]",
            self.document.canvas_attribute,
            quote_attr_value(element.id.as_str())
        );
        let cfg = self.breakpoints.config();

        let mut desktop = BTreeMap::new();
        desktop.insert("position".to_string(), "absolute".to_string());
        desktop.insert("z-index".to_string(), z.to_string());
        desktop.extend(geometry(&set.desktop, cfg));
        desktop.extend(element.styles.clone());

        let mut css = format!("{selector} {{ {} }}\n", declarations(&desktop));
        for (breakpoint, max) in [
            (Breakpoint::Tablet, cfg.tablet_media_max),
            (Breakpoint::Mobile, cfg.mobile_media_max),
        ] {
            let overrides = geometry(&set.resolved(breakpoint), cfg);
            let _ = writeln!(
                css,
                "@media (max-width: {max}px) {{ {selector} {{ {} }} }}",
                declarations(&overrides)
            );
        }
        css
    }


    /// Convert a flow node into an absolute element that renders identically.
    ///
    /// The node's rendered box becomes the desktop transform, tablet and mobile
    /// are derived, and the captured visual properties become style overrides.
    /// The returned element sits at the bottom of the absolute range; callers
    /// usually raise it with [`ZIndexPolicy::next_available`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ElementNotFound`] if the node is not live.
    pub fn unlock_flow_element(
        &self,
        id: &ElementId,
        node: NodeHandle,
        viewport_width: f64,
        doc: &dyn LiveDocument,
    ) -> EngineResult<Adjusted<CanvasElement>> {
        if !doc.is_live(node) {
            return Err(EngineError::ElementNotFound(id.to_string()));
        }
        let rect = doc
            .rendered_box(node)
            .ok_or_else(|| EngineError::ElementNotFound(id.to_string()))?;
        let desktop = Transform::rect(rect.x, rect.y, rect.width, rect.height);
        let derived = self.breakpoints.derive_responsive(desktop, viewport_width);

        let mut element = CanvasElement::absolute(
            kind_from_node(node, doc),
            derived.value,
            self.policy.config().absolute_min,
        );
        element.original_id = Some(id.clone());
        if let Some(style) = doc.computed_style(node) {
            element.styles = style
                .into_iter()
                .filter(|(prop, value)| {
                    CAPTURED_PROPERTIES.contains(&prop.as_str()) && !value.trim().is_empty()
                })
                .collect();
        }
        tracing::debug!(
            "Unlocked {id} as {} at ({}, {}) {}x{}",
            element.id,
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );

        Ok(Adjusted {
            value: element,
            warnings: derived
                .warnings
                .into_iter()
                .map(|w| w.with_subject(id.to_string()))
                .collect(),
        })
    }
}

fn geometry(t: &Transform, cfg: &BreakpointConfig) -> BTreeMap<String, String> {
    let px = |v: f64| format!("{}px", round_to(v, cfg.precision));
    let mut out = BTreeMap::new();
    out.insert("left".to_string(), px(t.x));
    out.insert("top".to_string(), px(t.y));
    out.insert("width".to_string(), px(t.width));
    out.insert("height".to_string(), px(t.height));
    if t.rotation != 0.0 {
        out.insert(
            "transform".to_string(),
            format!("rotate({}deg)", round_to(t.rotation, cfg.precision)),
        );
    }
    out
}

fn declarations(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(prop, value)| format!("{prop}: {value};"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn kind_attributes(kind: &ElementKind) -> Vec<(String, String)> {
    match kind {
        ElementKind::Image { src, alt } => vec![
            ("src".to_string(), src.clone()),
            ("alt".to_string(), alt.clone()),
        ],
        ElementKind::Button { href: Some(href), .. } => vec![("href".to_string(), href.clone())],
        ElementKind::Video { src, autoplay } => {
            let mut attrs = vec![("src".to_string(), src.clone())];
            if *autoplay {
                attrs.push(("autoplay".to_string(), String::new()));
            }
            attrs
        }
        ElementKind::Custom { attributes, .. } => attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        ElementKind::Text { .. } | ElementKind::Button { .. } | ElementKind::Section { .. } => {
            Vec::new()
        }
    }
}

/// Content attributes carried over when an arbitrary tag is unlocked.
const CARRIED_ATTRIBUTES: &[&str] = &["href", "src", "alt", "title", "lang", "role", "aria-label"];

fn kind_from_node(node: NodeHandle, doc: &dyn LiveDocument) -> ElementKind {
    let tag = doc.tag_name(node).unwrap_or_else(|| "div".to_string());
    let text = doc.text_content(node).unwrap_or_default();
    let attr = |name: &str| doc.attribute(node, name);
    match tag.as_str() {
        "p" => ElementKind::Text { content: text },
        "img" => ElementKind::Image {
            src: attr("src").unwrap_or_default(),
            alt: attr("alt").unwrap_or_default(),
        },
        "a" | "button" => ElementKind::Button {
            label: text,
            href: attr("href"),
        },
        "video" => ElementKind::Video {
            src: attr("src").unwrap_or_default(),
            autoplay: attr("autoplay").is_some(),
        },
        "section" => ElementKind::Section {
            heading: (!text.trim().is_empty()).then(|| text.trim().to_string()),
        },
        _ => {
            let attributes = CARRIED_ATTRIBUTES
                .iter()
                .filter_map(|&name| attr(name).map(|v| (name.to_string(), v)))
                .collect();
            ElementKind::Custom {
                tag,
                attributes,
                text,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocument;
    use crate::transform::{BreakpointSet, Rect};

    fn text_element(id: &str, x: f64, z: i32) -> CanvasElement {
        CanvasElement::absolute(
            ElementKind::Text {
                content: format!("text {id}"),
            },
            BreakpointSet::desktop_only(Transform::rect(x, 100.0, 200.0, 50.0)),
            z,
        )
        .with_id(id)
    }

    #[test]
    fn test_new_absolute_element_appends_to_canvas_root() {
        let compiler = MutationCompiler::default();
        let doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut model = ElementModel::default();
        model.push(text_element("canvas-a", 100.0, 10_001));

        let batch = compiler.compile(&model, &mut registry, &doc);
        assert_eq!(batch.element_ops.len(), 1);
        match &batch.element_ops[0] {
            MutationOp::Insert {
                parent,
                position,
                content,
            } => {
                assert_eq!(parent, "#canvas-root");
                assert_eq!(*position, InsertPosition::Append);
                assert_eq!(
                    content.attributes.get("data-canvas-id").map(String::as_str),
                    Some("canvas-a")
                );
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert!(registry.contains(&ElementId::from("canvas-a")));
    }

    #[test]
    fn test_stylesheet_op_is_last_and_single() {
        let compiler = MutationCompiler::default();
        let doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut model = ElementModel::default();
        model.push(text_element("canvas-a", 100.0, 10_001));
        model.push(text_element("canvas-b", 400.0, 10_002));

        let ops = compiler.compile(&model, &mut registry, &doc).operations();
        let style_ops: Vec<_> = ops
            .iter()
            .filter(|op| op.target() == "#canvas-breakpoint-styles")
            .collect();
        assert_eq!(style_ops.len(), 1);
        assert_eq!(ops.last().map(MutationOp::target), Some("#canvas-breakpoint-styles"));
    }

    #[test]
    fn test_stylesheet_carries_all_breakpoints() {
        let compiler = MutationCompiler::default();
        let doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut element = text_element("canvas-a", 100.0, 10_001);
        if let crate::element::Placement::Absolute { breakpoints, .. } = &mut element.placement {
            *breakpoints = BreakpointModel::default()
                .derive_responsive(breakpoints.desktop, 1440.0)
                .value;
        }
        let mut model = ElementModel::default();
        model.push(element.with_style("color", "red"));

        let css = compiler.compile(&model, &mut registry, &doc).stylesheet;
        assert!(css.contains("[data-canvas-id=\"canvas-a\"] { color: red; height: 50px; left: 100px;"));
        assert!(css.contains("z-index: 10001;"));
        assert!(css.contains("@media (max-width: 1023px)"));
        assert!(css.contains("@media (max-width: 767px) { [data-canvas-id=\"canvas-a\"] { height: 13.02px; left: 26.04px; top: 26.04px; width: 52.08px; } }"));
    }

    #[test]
    fn test_out_of_range_z_index_is_clamped_in_css() {
        let compiler = MutationCompiler::default();
        let doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut model = ElementModel::default();
        model.push(text_element("canvas-a", 100.0, 70_000));

        let batch = compiler.compile(&model, &mut registry, &doc);
        assert!(batch.stylesheet.contains("z-index: 19999;"));
        assert_eq!(batch.warnings[0].code, WarningCode::ZIndexClamped);
    }

    #[test]
    fn test_materialized_element_only_emits_differences() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut model = ElementModel::default();
        model.push(text_element("canvas-a", 100.0, 10_001));

        for op in compiler.compile(&model, &mut registry, &doc).operations() {
            doc.apply(&op).expect("apply");
        }
        let again = compiler.compile(&model, &mut registry, &doc);
        assert!(again.element_ops.is_empty());

        if let Some(e) = model.get_mut(&ElementId::from("canvas-a")) {
            e.kind = ElementKind::Text {
                content: "changed".to_string(),
            };
        }
        let edited = compiler.compile(&model, &mut registry, &doc);
        assert_eq!(
            edited.element_ops,
            vec![MutationOp::UpdateText {
                target: "[data-canvas-id=\"canvas-a\"]".to_string(),
                value: "changed".to_string(),
            }]
        );
    }

    #[test]
    fn test_flow_edit_targets_original_node_in_place() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let p = doc
            .append_element(content, "p", &[("data-flow-id", "flow-abc")], "Hello")
            .expect("append");
        let mut registry = AddressingRegistry::default();
        registry.register_flow(&doc, p);

        let mut model = ElementModel::default();
        model.push(CanvasElement::flow(
            "flow-abc",
            ElementKind::Text {
                content: "Goodbye".to_string(),
            },
        ));
        let batch = compiler.compile(&model, &mut registry, &doc);
        assert_eq!(
            batch.element_ops,
            vec![MutationOp::UpdateText {
                target: "[data-flow-id=\"flow-abc\"]".to_string(),
                value: "Goodbye".to_string(),
            }]
        );
    }

    #[test]
    fn test_removed_element_is_deleted_and_retired() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let mut registry = AddressingRegistry::default();
        let mut model = ElementModel::default();
        model.push(text_element("canvas-a", 100.0, 10_001));
        for op in compiler.compile(&model, &mut registry, &doc).operations() {
            doc.apply(&op).expect("apply");
        }

        model.remove(&ElementId::from("canvas-a"));
        let batch = compiler.compile(&model, &mut registry, &doc);
        assert_eq!(
            batch.element_ops,
            vec![MutationOp::Delete {
                target: "[data-canvas-id=\"canvas-a\"]".to_string()
            }]
        );
        assert_eq!(batch.retired, vec![ElementId::from("canvas-a")]);
    }

    #[test]
    fn test_unlock_captures_box_and_style() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let h1 = doc.append_element(content, "h1", &[], "Title").expect("append");
        doc.set_box(h1, Rect::new(100.0, 100.0, 200.0, 50.0));
        doc.set_computed_style(h1, "color", "rgb(0, 0, 0)");
        doc.set_computed_style(h1, "display", "block");

        let id = ElementId::from("flow-abc");
        let unlocked = compiler
            .unlock_flow_element(&id, h1, 1440.0, &doc)
            .expect("unlock");
        let element = unlocked.value;
        assert_eq!(element.original_id, Some(id));
        assert_eq!(element.styles.get("color").map(String::as_str), Some("rgb(0, 0, 0)"));
        assert!(!element.styles.contains_key("display"));
        let mobile = element.transform_at(Breakpoint::Mobile).expect("absolute");
        assert!((mobile.width - 52.08).abs() < 1e-9);
        match element.kind {
            ElementKind::Custom { tag, text, .. } => {
                assert_eq!(tag, "h1");
                assert_eq!(text, "Title");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_unlocked_element_replaces_unregistered_original() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        doc.append_element(content, "p", &[("data-flow-id", "flow-abc")], "Hello")
            .expect("append");
        let mut registry = AddressingRegistry::default();

        let mut element = text_element("canvas-u", 10.0, 10_001);
        element.original_id = Some(ElementId::from("flow-abc"));
        let mut model = ElementModel::default();
        model.push(element);

        let batch = compiler.compile(&model, &mut registry, &doc);
        let kinds: Vec<_> = batch
            .element_ops
            .iter()
            .map(|op| (op.kind(), op.target().to_string()))
            .collect();
        let tagged = "[data-flow-id=\"flow-abc\"]".to_string();
        assert_eq!(
            kinds,
            vec![("insert", tagged.clone()), ("delete", tagged)]
        );
        assert_eq!(batch.replaced, vec![ElementId::from("flow-abc")]);
    }

    #[test]
    fn test_unlock_detached_node_fails() {
        let compiler = MutationCompiler::default();
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let p = doc.append_element(content, "p", &[], "x").expect("append");
        doc.external_remove(p);
        assert!(compiler
            .unlock_flow_element(&ElementId::from("flow-x"), p, 1440.0, &doc)
            .is_err());
    }
}
