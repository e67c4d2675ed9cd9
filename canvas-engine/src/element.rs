//! Canvas elements - the positioned units of the element model.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transform::{Breakpoint, BreakpointSet, Transform};

/// Prefix of generated canvas-origin ids.
pub const CANVAS_ID_PREFIX: &str = "canvas-";

/// Prefix of content-hash flow-origin ids.
pub const FLOW_ID_PREFIX: &str = "flow-";

/// Stable identifier for an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Generate a new canvas-origin id.
    #[must_use]
    pub fn new_canvas() -> Self {
        Self(format!("{CANVAS_ID_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Wrap an existing id.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ElementId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The type of content an element contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ElementKind {
    /// Text block.
    Text {
        /// Text content.
        content: String,
    },
    /// Static image.
    Image {
        /// Image source URI.
        src: String,
        /// Alternative text.
        #[serde(default)]
        alt: String,
    },
    /// Clickable button.
    Button {
        /// Button label.
        label: String,
        /// Optional link target.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
    },
    /// Embedded video.
    Video {
        /// Video source URI.
        src: String,
        /// Start playing automatically.
        #[serde(default)]
        autoplay: bool,
    },
    /// A section container.
    Section {
        /// Optional heading text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading: Option<String>,
    },
    /// Arbitrary markup with a tag, attributes and text.
    Custom {
        /// Tag name.
        tag: String,
        /// Attributes.
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        /// Text content.
        #[serde(default)]
        text: String,
    },
}

impl ElementKind {
    /// The kind name used in markup and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Button { .. } => "button",
            Self::Video { .. } => "video",
            Self::Section { .. } => "section",
            Self::Custom { .. } => "custom",
        }
    }

    /// The text carried by this kind, if it carries any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            Self::Button { label, .. } => Some(label),
            Self::Section { heading } => heading.as_deref(),
            Self::Custom { text, .. } => Some(text),
            Self::Image { .. } | Self::Video { .. } => None,
        }
    }
}

/// How an element is positioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "placement", rename_all = "snake_case")]
pub enum Placement {
    /// Positioned by normal document layout; no z-index, no breakpoints.
    Flow,
    /// Explicitly positioned per breakpoint.
    Absolute {
        /// Per-breakpoint transforms.
        breakpoints: BreakpointSet,
        /// Stacking order within the absolute canvas range.
        z_index: i32,
    },
}

impl Placement {
    /// Whether the placement is absolute.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        matches!(self, Self::Absolute { .. })
    }
}

/// The positioned unit of the element model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasElement {
    /// Unique identifier.
    pub id: ElementId,
    /// Source flow id when this element was unlocked from a flow element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<ElementId>,
    /// Kind and content payload.
    pub kind: ElementKind,
    /// Style overrides (property -> value).
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    /// Flow or absolute.
    #[serde(flatten)]
    pub placement: Placement,
    /// Creation time (ms since epoch).
    #[serde(default)]
    pub created_at: u64,
    /// Last update time (ms since epoch).
    #[serde(default)]
    pub updated_at: u64,
}

impl CanvasElement {
    /// Create a new absolute element with a fresh canvas id.
    #[must_use]
    pub fn absolute(kind: ElementKind, breakpoints: BreakpointSet, z_index: i32) -> Self {
        Self::with_placement(
            ElementId::new_canvas(),
            kind,
            Placement::Absolute {
                breakpoints,
                z_index,
            },
        )
    }

    /// Describe an existing flow element by its id.
    #[must_use]
    pub fn flow(id: impl Into<ElementId>, kind: ElementKind) -> Self {
        Self::with_placement(id.into(), kind, Placement::Flow)
    }

    fn with_placement(id: ElementId, kind: ElementKind, placement: Placement) -> Self {
        let now = now_ms();
        Self {
            id,
            original_id: None,
            kind,
            styles: BTreeMap::new(),
            placement,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the element id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a style override.
    #[must_use]
    pub fn with_style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.styles.insert(property.into(), value.into());
        self
    }

    /// Whether the element is absolutely positioned.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.placement.is_absolute()
    }

    /// Whether the element was unlocked from a flow element.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.original_id.is_some()
    }

    /// Requested z-index (absolute only).
    #[must_use]
    pub fn z_index(&self) -> Option<i32> {
        match &self.placement {
            Placement::Absolute { z_index, .. } => Some(*z_index),
            Placement::Flow => None,
        }
    }

    /// Breakpoint transforms (absolute only).
    #[must_use]
    pub fn breakpoints(&self) -> Option<&BreakpointSet> {
        match &self.placement {
            Placement::Absolute { breakpoints, .. } => Some(breakpoints),
            Placement::Flow => None,
        }
    }

    /// Effective transform at a breakpoint (absolute only).
    #[must_use]
    pub fn transform_at(&self, breakpoint: Breakpoint) -> Option<Transform> {
        self.breakpoints().map(|set| set.resolved(breakpoint))
    }

    /// Replace the z-index of an absolute element. No-op on flow elements.
    pub fn set_z_index(&mut self, value: i32) {
        if let Placement::Absolute { z_index, .. } = &mut self.placement {
            *z_index = value;
            self.touch();
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at);
    }
}

/// The editing session's element model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementModel {
    /// Elements in document order.
    pub elements: Vec<CanvasElement>,
    /// Viewport width the desktop transforms were authored against.
    #[serde(default = "ElementModel::default_viewport_width")]
    pub desktop_viewport_width: f64,
}

impl Default for ElementModel {
    fn default() -> Self {
        Self::new(Self::default_viewport_width())
    }
}

impl ElementModel {
    const fn default_viewport_width() -> f64 {
        1440.0
    }

    /// Create an empty model.
    #[must_use]
    pub fn new(desktop_viewport_width: f64) -> Self {
        Self {
            elements: Vec::new(),
            desktop_viewport_width,
        }
    }

    /// Add an element and return its id.
    pub fn push(&mut self, element: CanvasElement) -> ElementId {
        let id = element.id.clone();
        self.elements.push(element);
        id
    }

    /// Remove an element by id.
    pub fn remove(&mut self, id: &ElementId) -> Option<CanvasElement> {
        let index = self.elements.iter().position(|e| &e.id == id)?;
        Some(self.elements.remove(index))
    }

    /// Get an element by id.
    #[must_use]
    pub fn get(&self, id: &ElementId) -> Option<&CanvasElement> {
        self.elements.iter().find(|e| &e.id == id)
    }

    /// Get a mutable element by id.
    pub fn get_mut(&mut self, id: &ElementId) -> Option<&mut CanvasElement> {
        self.elements.iter_mut().find(|e| &e.id == id)
    }

    /// Whether any element has this id or was unlocked from it.
    #[must_use]
    pub fn mentions(&self, id: &str) -> bool {
        self.elements.iter().any(|e| {
            e.id.as_str() == id || e.original_id.as_ref().is_some_and(|o| o.as_str() == id)
        })
    }

    /// Absolute elements in document order.
    pub fn absolute_elements(&self) -> impl Iterator<Item = &CanvasElement> {
        self.elements.iter().filter(|e| e.is_absolute())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the model is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Serialize the model to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> crate::EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize a model from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> crate::EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Current time in milliseconds since epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> ElementKind {
        ElementKind::Text {
            content: content.to_string(),
        }
    }

    #[test]
    fn test_canvas_ids_are_unique_and_prefixed() {
        let a = ElementId::new_canvas();
        let b = ElementId::new_canvas();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(CANVAS_ID_PREFIX));
    }

    #[test]
    fn test_flow_element_has_no_z_index_or_breakpoints() {
        let element = CanvasElement::flow("flow-abc", text("Hello"));
        assert!(!element.is_absolute());
        assert_eq!(element.z_index(), None);
        assert!(element.breakpoints().is_none());
    }

    #[test]
    fn test_absolute_element_carries_both() {
        let set = BreakpointSet::desktop_only(Transform::rect(1.0, 2.0, 3.0, 4.0));
        let mut element = CanvasElement::absolute(text("Hi"), set, 10_001);
        assert_eq!(element.z_index(), Some(10_001));
        element.set_z_index(10_002);
        assert_eq!(element.z_index(), Some(10_002));
        assert!(element.transform_at(Breakpoint::Mobile).is_some());
    }

    #[test]
    fn test_model_json_round_trip_keeps_placement_tag() {
        let mut model = ElementModel::default();
        model.push(CanvasElement::flow("flow-abc", text("Hello")));
        model.push(CanvasElement::absolute(
            ElementKind::Image {
                src: "/a.png".to_string(),
                alt: String::new(),
            },
            BreakpointSet::desktop_only(Transform::default()),
            10_000,
        ));

        let json = model.to_json().expect("serialize");
        assert!(json.contains("\"placement\": \"flow\""));
        assert!(json.contains("\"placement\": \"absolute\""));
        let restored = ElementModel::from_json(&json).expect("deserialize");
        assert_eq!(restored, model);
    }

    #[test]
    fn test_flow_json_rejects_missing_breakpoints_for_absolute() {
        let json = r#"{
            "elements": [{
                "id": "x",
                "kind": { "type": "text", "data": { "content": "a" } },
                "placement": "absolute",
                "z_index": 10000
            }]
        }"#;
        assert!(ElementModel::from_json(json).is_err());
    }

    #[test]
    fn test_mentions_original_id() {
        let mut model = ElementModel::default();
        let mut element = CanvasElement::absolute(
            text("Hi"),
            BreakpointSet::desktop_only(Transform::default()),
            10_000,
        );
        element.original_id = Some(ElementId::from("flow-abc"));
        model.push(element);
        assert!(model.mentions("flow-abc"));
        assert!(!model.mentions("flow-xyz"));
    }
}
