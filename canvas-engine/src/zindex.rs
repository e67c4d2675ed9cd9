//! Z-index policy.
//!
//! Stacking layers, ascending:
//!
//! ```text
//!   flow (auto) < absolute [A_MIN, A_MAX] < selection < overlay < modal < tooltip
//! ```
//!
//! Only the absolute range is assignable to elements. Everything here is pure:
//! the policy returns new values and the caller writes them into the model.

use serde::{Deserialize, Serialize};

use crate::config::ZIndexConfig;
use crate::element::CanvasElement;
use crate::warning::{Adjusted, ValidationWarning, WarningCode};

/// A CSS stacking value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZIndex {
    /// Flow elements stack by document order.
    Auto,
    /// Explicit stacking order.
    Value(i32),
}

impl ZIndex {
    /// Numeric value, if any.
    #[must_use]
    pub const fn value(self) -> Option<i32> {
        match self {
            Self::Auto => None,
            Self::Value(v) => Some(v),
        }
    }
}

impl std::fmt::Display for ZIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Stacking layer a numeric z-index falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Below the absolute range; ordinary page content.
    Content,
    /// Absolute canvas elements.
    Absolute,
    /// Selection and transform handles.
    Selection,
    /// Menus and overlays.
    Overlay,
    /// Modal dialogs.
    Modal,
    /// Tooltips.
    Tooltip,
}

/// Assigns and reorders z-indices within the absolute range.
#[derive(Debug, Clone, Default)]
pub struct ZIndexPolicy {
    config: ZIndexConfig,
}

impl ZIndexPolicy {
    /// Create a policy over the given layer table.
    #[must_use]
    pub fn new(config: ZIndexConfig) -> Self {
        Self { config }
    }

    /// Layer table.
    #[must_use]
    pub const fn config(&self) -> &ZIndexConfig {
        &self.config
    }

    /// Effective z-index for an element.
    ///
    /// Flow elements are always `auto`. Absolute values outside the range are
    /// clamped with a `Z_INDEX_CLAMPED` warning.
    #[must_use]
    pub fn assign(&self, element: &CanvasElement) -> Adjusted<ZIndex> {
        match element.z_index() {
            None => Adjusted::clean(ZIndex::Auto),
            Some(requested) => {
                let clamped = self.clamp(requested);
                Adjusted {
                    value: ZIndex::Value(clamped.value),
                    warnings: clamped
                        .warnings
                        .into_iter()
                        .map(|w| w.with_subject(element.id.to_string()))
                        .collect(),
                }
            }
        }
    }

    /// Clamp a raw value into the absolute range.
    #[must_use]
    pub fn clamp(&self, requested: i32) -> Adjusted<i32> {
        let (min, max) = (self.config.absolute_min, self.config.absolute_max);
        let value = requested.clamp(min, max);
        if value == requested {
            return Adjusted::clean(value);
        }
        Adjusted::corrected(
            value,
            ValidationWarning::warning(
                WarningCode::ZIndexClamped,
                format!("z-index {requested} is outside [{min}, {max}]; clamped to {value}"),
            ),
        )
    }

    /// One above the highest absolute z-index in use.
    ///
    /// Starts at `A_MIN` when nothing is absolute, and wraps back to `A_MIN`
    /// with a `Z_INDEX_EXHAUSTED` warning when the range is used up.
    #[must_use]
    pub fn next_available<'a, I>(&self, elements: I) -> Adjusted<i32>
    where
        I: IntoIterator<Item = &'a CanvasElement>,
    {
        let (min, max) = (self.config.absolute_min, self.config.absolute_max);
        match elements.into_iter().filter_map(CanvasElement::z_index).max() {
            None => Adjusted::clean(min),
            Some(top) if top >= max => Adjusted::corrected(
                min,
                ValidationWarning::warning(
                    WarningCode::ZIndexExhausted,
                    format!("absolute z-index range exhausted at {top}; wrapped to {min}"),
                )
                .with_suggestion("compact z-indices with send_to_back on lower elements"),
            ),
            Some(top) => Adjusted::clean((top + 1).max(min)),
        }
    }

    /// Raise an element above every other element.
    ///
    /// Already-topmost elements keep their value. When the range is used up
    /// the element shares the maximum with the current top instead of
    /// wrapping to the bottom, and a `Z_INDEX_EXHAUSTED` warning is returned.
    #[must_use]
    pub fn bring_to_front(&self, element: &CanvasElement, all: &[CanvasElement]) -> Adjusted<ZIndex> {
        let Some(current) = element.z_index() else {
            return Self::not_orderable(element, "bring_to_front");
        };
        let max = self.config.absolute_max;
        let top_other = all
            .iter()
            .filter(|e| e.id != element.id)
            .filter_map(CanvasElement::z_index)
            .max();
        match top_other {
            None => Adjusted::clean(ZIndex::Value(self.clamp(current).value)),
            Some(top) if current > top => Adjusted::clean(ZIndex::Value(self.clamp(current).value)),
            Some(top) if top >= max => Adjusted::corrected(
                ZIndex::Value(max),
                ValidationWarning::warning(
                    WarningCode::ZIndexExhausted,
                    format!("absolute z-index range exhausted at {top}; {} kept at {max}", element.id),
                )
                .with_subject(element.id.to_string())
                .with_suggestion("compact z-indices with send_to_back on lower elements"),
            ),
            Some(top) => Adjusted::clean(ZIndex::Value((top + 1).max(self.config.absolute_min))),
        }
    }

    /// Drop an element to the bottom of the absolute range.
    #[must_use]
    pub fn send_to_back(&self, element: &CanvasElement) -> Adjusted<ZIndex> {
        if element.z_index().is_none() {
            return Self::not_orderable(element, "send_to_back");
        }
        Adjusted::clean(ZIndex::Value(self.config.absolute_min))
    }

    /// Raise an element by one.
    #[must_use]
    pub fn step_forward(&self, element: &CanvasElement) -> Adjusted<ZIndex> {
        self.step(element, 1, "step_forward")
    }

    /// Lower an element by one.
    #[must_use]
    pub fn step_backward(&self, element: &CanvasElement) -> Adjusted<ZIndex> {
        self.step(element, -1, "step_backward")
    }

    fn step(&self, element: &CanvasElement, delta: i32, action: &str) -> Adjusted<ZIndex> {
        let Some(current) = element.z_index() else {
            return Self::not_orderable(element, action);
        };
        let stepped = self.clamp(current.saturating_add(delta));
        Adjusted {
            value: ZIndex::Value(stepped.value),
            warnings: stepped.warnings,
        }
    }

    fn not_orderable(element: &CanvasElement, action: &str) -> Adjusted<ZIndex> {
        tracing::debug!("Ignoring {action} on flow element {}", element.id);
        Adjusted::corrected(
            ZIndex::Auto,
            ValidationWarning::warning(
                WarningCode::FlowElementNotOrderable,
                format!("{action} has no effect on flow element {}", element.id),
            )
            .with_subject(element.id.to_string())
            .with_suggestion("unlock the element first"),
        )
    }

    /// Classify a numeric z-index.
    #[must_use]
    pub fn layer_of(&self, value: i32) -> Layer {
        let c = &self.config;
        if value < c.absolute_min {
            Layer::Content
        } else if value <= c.absolute_max || value < c.selection {
            Layer::Absolute
        } else if value < c.overlay {
            Layer::Selection
        } else if value < c.modal {
            Layer::Overlay
        } else if value < c.tooltip {
            Layer::Modal
        } else {
            Layer::Tooltip
        }
    }
}
