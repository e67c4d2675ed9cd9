//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document only needs to name
//! the values it overrides:
//!
//! ```
//! use canvas_engine::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "observer": { "throttle_ms": 250 } }"#).unwrap();
//! assert_eq!(config.observer.throttle_ms, 250);
//! assert_eq!(config.breakpoints.desktop_width, 1440.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Top-level configuration for an editing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Breakpoint viewport table and derivation guards.
    pub breakpoints: BreakpointConfig,
    /// Reserved z-index layers.
    pub z_index: ZIndexConfig,
    /// Spatial index tuning.
    pub spatial: SpatialConfig,
    /// Pre-commit validator limits.
    pub validator: ValidatorConfig,
    /// Time budgets (informational only).
    pub budgets: BudgetConfig,
    /// Document sync observer.
    pub observer: ObserverConfig,
    /// Well-known document anchors and attributes.
    pub document: DocumentConfig,
}

/// Typical viewport widths per breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    /// Desktop viewport width in pixels.
    pub desktop_width: f64,
    /// Tablet viewport width in pixels.
    pub tablet_width: f64,
    /// Mobile viewport width in pixels.
    pub mobile_width: f64,
    /// Horizontal margin subtracted from the mobile width to get its usable width.
    pub mobile_margin: f64,
    /// Decimal places kept on derived values.
    pub precision: u32,
    /// `max-width` of the tablet media query.
    pub tablet_media_max: u32,
    /// `max-width` of the mobile media query.
    pub mobile_media_max: u32,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            desktop_width: 1440.0,
            tablet_width: 768.0,
            mobile_width: 375.0,
            mobile_margin: 32.0,
            precision: 2,
            tablet_media_max: 1023,
            mobile_media_max: 767,
        }
    }
}

impl BreakpointConfig {
    /// Usable mobile width (viewport minus margin).
    #[must_use]
    pub fn mobile_usable_width(&self) -> f64 {
        (self.mobile_width - self.mobile_margin).max(0.0)
    }
}

/// Reserved z-index values, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZIndexConfig {
    /// Lowest z-index an absolute canvas element may take.
    pub absolute_min: i32,
    /// Highest z-index an absolute canvas element may take.
    pub absolute_max: i32,
    /// Selection and transform handles.
    pub selection: i32,
    /// Overlays and menus.
    pub overlay: i32,
    /// Modals.
    pub modal: i32,
    /// Tooltips.
    pub tooltip: i32,
}

impl Default for ZIndexConfig {
    fn default() -> Self {
        Self {
            absolute_min: 10_000,
            absolute_max: 19_999,
            selection: 20_000,
            overlay: 30_000,
            modal: 40_000,
            tooltip: 50_000,
        }
    }
}

/// Spatial index tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Items held by a quad node before it splits.
    pub node_capacity: usize,
    /// Maximum subdivision depth.
    pub max_depth: usize,
    /// Grid step used to sample region queries.
    pub region_sample_step: f64,
    /// Rebuild time above which a warning is logged.
    pub rebuild_budget_ms: u64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            node_capacity: 8,
            max_depth: 8,
            region_sample_step: 10.0,
            rebuild_budget_ms: 8,
        }
    }
}

/// Pre-commit validator limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Absolute-element count above which pairwise overlap detection is skipped.
    pub overlap_threshold: usize,
    /// Root-level selectors no operation may target.
    pub blocked_selectors: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 200,
            blocked_selectors: ["html", "body", "head", ":root", "document", "*"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Time budgets; overruns are logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Fixed part of the compile budget.
    pub compile_base_ms: u64,
    /// Per-element part of the compile budget.
    pub compile_per_element_ms: u64,
    /// Registry full rescan budget.
    pub rescan_ms: u64,
    /// Deadline for persisting the model through a store.
    pub persist_timeout_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            compile_base_ms: 20,
            compile_per_element_ms: 1,
            rescan_ms: 50,
            persist_timeout_ms: 5_000,
        }
    }
}

impl BudgetConfig {
    /// Compile budget for a model of `elements` elements.
    #[must_use]
    pub fn compile_budget_ms(&self, elements: usize) -> u64 {
        let n = u64::try_from(elements).unwrap_or(u64::MAX);
        self.compile_base_ms
            .saturating_add(self.compile_per_element_ms.saturating_mul(n))
    }
}

/// Document sync observer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Throttle interval for batched reconciliation.
    pub throttle_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self { throttle_ms: 100 }
    }
}

/// Well-known anchors in the live document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Container that holds every absolute canvas element.
    pub canvas_root: String,
    /// Stylesheet node holding the breakpoint rules.
    pub stylesheet: String,
    /// Attribute tagging canvas-origin nodes.
    pub canvas_attribute: String,
    /// Attribute tagging flow-origin nodes.
    pub flow_attribute: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            canvas_root: "#canvas-root".to_string(),
            stylesheet: "#canvas-breakpoint-styles".to_string(),
            canvas_attribute: "data-canvas-id".to_string(),
            flow_attribute: "data-flow-id".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) configuration from JSON and check it.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are inconsistent.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> EngineResult<()> {
        let bp = &self.breakpoints;
        for (name, width) in [
            ("desktop_width", bp.desktop_width),
            ("tablet_width", bp.tablet_width),
            ("mobile_width", bp.mobile_width),
        ] {
            if !(width.is_finite() && width > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "breakpoints.{name} must be positive, got {width}"
                )));
            }
        }

        let z = &self.z_index;
        if z.absolute_min > z.absolute_max {
            return Err(EngineError::InvalidConfig(format!(
                "z_index absolute range is empty: [{}, {}]",
                z.absolute_min, z.absolute_max
            )));
        }
        let layers = [
            z.absolute_max,
            z.selection,
            z.overlay,
            z.modal,
            z.tooltip,
        ];
        if layers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::InvalidConfig(
                "z_index layers must be strictly ascending".to_string(),
            ));
        }

        if !(self.spatial.region_sample_step.is_finite() && self.spatial.region_sample_step > 0.0)
        {
            return Err(EngineError::InvalidConfig(
                "spatial.region_sample_step must be positive".to_string(),
            ));
        }
        if self.spatial.node_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "spatial.node_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
