//! Per-breakpoint transforms and responsive derivation.
//!
//! Desktop is authoritative. Tablet and mobile are either user overrides or
//! generated from desktop by uniform scaling:
//!
//! ```text
//!   desktop 1440px          tablet 768px        mobile 375px
//! ┌──────────────────┐    ┌───────────┐       ┌──────┐
//! │  ┌────┐          │ ─► │ ┌──┐      │  ─►   │ ┌┐   │   scale = target / 1440
//! │  └────┘          │    │ └──┘      │       │ └┘   │   rotation unchanged
//! └──────────────────┘    └───────────┘       └──────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::config::BreakpointConfig;
use crate::warning::{Adjusted, ValidationWarning, WarningCode};

/// Rectangle plus rotation in document pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// X position (pixels from left).
    pub x: f64,
    /// Y position (pixels from top).
    pub y: f64,
    /// Width in pixels, never negative.
    pub width: f64,
    /// Height in pixels, never negative.
    pub height: f64,
    /// Rotation in degrees, in `[0, 360)`.
    #[serde(rename = "rotation_degrees", default)]
    pub rotation: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            rotation: 0.0,
        }
    }
}

impl Transform {
    /// Create a transform, clamping negative sizes to zero and normalizing rotation.
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64, rotation: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation,
        }
        .normalized()
    }

    /// Axis-aligned transform without rotation.
    #[must_use]
    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, width, height, 0.0)
    }

    /// Re-establish the invariants: `width, height >= 0`, rotation in `[0, 360)`.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            width: self.width.max(0.0),
            height: self.height.max(0.0),
            rotation: normalize_degrees(self.rotation),
            ..self
        }
    }

    /// Round every numeric field to `precision` decimals.
    #[must_use]
    pub fn rounded(self, precision: u32) -> Self {
        Self {
            x: round_to(self.x, precision),
            y: round_to(self.y, precision),
            width: round_to(self.width, precision),
            height: round_to(self.height, precision),
            rotation: self.rotation,
        }
    }

    /// Whether the transform satisfies its invariants.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.width >= 0.0 && self.height >= 0.0 && (0.0..360.0).contains(&self.rotation)
    }

    /// Axis-aligned bounding box of the (possibly rotated) rectangle.
    #[must_use]
    pub fn bounding_box(&self) -> Rect {
        if self.rotation == 0.0 {
            return Rect::new(self.x, self.y, self.width, self.height);
        }
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let w = (self.width * cos).abs() + (self.height * sin).abs();
        let h = (self.width * sin).abs() + (self.height * cos).abs();
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0;
        Rect::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// Apply an interactive edit.
    #[must_use]
    pub fn apply_edit(self, edit: TransformEdit) -> Self {
        match edit {
            TransformEdit::Move { dx, dy } => Self {
                x: self.x + dx,
                y: self.y + dy,
                ..self
            },
            TransformEdit::Resize { dw, dh } => Self {
                width: self.width + dw,
                height: self.height + dh,
                ..self
            }
            .normalized(),
            TransformEdit::Rotate { degrees } => Self {
                rotation: self.rotation + degrees,
                ..self
            }
            .normalized(),
            TransformEdit::Set(transform) => transform.normalized(),
        }
    }
}

/// A direct manipulation delta coming from drag, resize or rotate handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum TransformEdit {
    /// Drag by a delta.
    Move {
        /// Horizontal delta.
        dx: f64,
        /// Vertical delta.
        dy: f64,
    },
    /// Resize by a delta.
    Resize {
        /// Width delta.
        dw: f64,
        /// Height delta.
        dh: f64,
    },
    /// Rotate by a delta in degrees.
    Rotate {
        /// Rotation delta.
        degrees: f64,
    },
    /// Replace the whole transform.
    Set(Transform),
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Whether the point lies inside or on the edge.
    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    #[must_use]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether the rectangles share a region of positive area.
    #[must_use]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }
}

/// A named viewport-width tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    /// Authoritative layout.
    Desktop,
    /// Medium viewport.
    Tablet,
    /// Small viewport.
    Mobile,
}

impl Breakpoint {
    /// All breakpoints, widest first.
    pub const ALL: [Breakpoint; 3] = [Breakpoint::Desktop, Breakpoint::Tablet, Breakpoint::Mobile];

    /// Typical viewport width for this breakpoint.
    #[must_use]
    pub fn viewport_width(self, config: &BreakpointConfig) -> f64 {
        match self {
            Self::Desktop => config.desktop_width,
            Self::Tablet => config.tablet_width,
            Self::Mobile => config.mobile_width,
        }
    }
}

impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Desktop => "desktop",
            Self::Tablet => "tablet",
            Self::Mobile => "mobile",
        };
        f.write_str(name)
    }
}

/// Where a breakpoint transform came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformSource {
    /// Set by the user; never regenerated.
    User,
    /// Derived from desktop.
    #[default]
    Generated,
}

/// A transform tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakpointTransform {
    /// The transform.
    #[serde(flatten)]
    pub transform: Transform,
    /// User override or generated.
    #[serde(default)]
    pub source: TransformSource,
}

impl BreakpointTransform {
    /// A user override.
    #[must_use]
    pub fn user(transform: Transform) -> Self {
        Self {
            transform,
            source: TransformSource::User,
        }
    }

    /// A generated value.
    #[must_use]
    pub fn generated(transform: Transform) -> Self {
        Self {
            transform,
            source: TransformSource::Generated,
        }
    }
}

/// Transforms keyed by breakpoint. Desktop is required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakpointSet {
    /// Authoritative desktop transform.
    pub desktop: Transform,
    /// Tablet transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablet: Option<BreakpointTransform>,
    /// Mobile transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<BreakpointTransform>,
}

impl BreakpointSet {
    /// A set with only the desktop transform.
    #[must_use]
    pub fn desktop_only(desktop: Transform) -> Self {
        Self {
            desktop: desktop.normalized(),
            tablet: None,
            mobile: None,
        }
    }

    /// The transform stored for `breakpoint`, if any.
    #[must_use]
    pub fn get(&self, breakpoint: Breakpoint) -> Option<Transform> {
        match breakpoint {
            Breakpoint::Desktop => Some(self.desktop),
            Breakpoint::Tablet => self.tablet.map(|t| t.transform),
            Breakpoint::Mobile => self.mobile.map(|t| t.transform),
        }
    }

    /// The effective transform at `breakpoint`, falling back to the next wider one.
    #[must_use]
    pub fn resolved(&self, breakpoint: Breakpoint) -> Transform {
        match breakpoint {
            Breakpoint::Desktop => self.desktop,
            Breakpoint::Tablet => self.get(Breakpoint::Tablet).unwrap_or(self.desktop),
            Breakpoint::Mobile => self
                .get(Breakpoint::Mobile)
                .unwrap_or_else(|| self.resolved(Breakpoint::Tablet)),
        }
    }

    /// Store a user override.
    pub fn set_user(&mut self, breakpoint: Breakpoint, transform: Transform) {
        let transform = transform.normalized();
        match breakpoint {
            Breakpoint::Desktop => self.desktop = transform,
            Breakpoint::Tablet => self.tablet = Some(BreakpointTransform::user(transform)),
            Breakpoint::Mobile => self.mobile = Some(BreakpointTransform::user(transform)),
        }
    }

    /// Whether `breakpoint` carries a user override.
    #[must_use]
    pub fn is_user_override(&self, breakpoint: Breakpoint) -> bool {
        let slot = match breakpoint {
            Breakpoint::Desktop => return true,
            Breakpoint::Tablet => self.tablet,
            Breakpoint::Mobile => self.mobile,
        };
        slot.is_some_and(|t| t.source == TransformSource::User)
    }
}

/// Breakpoint derivation over a fixed viewport table.
#[derive(Debug, Clone, Default)]
pub struct BreakpointModel {
    config: BreakpointConfig,
}

impl BreakpointModel {
    /// Create a model over the given viewport table.
    #[must_use]
    pub fn new(config: BreakpointConfig) -> Self {
        Self { config }
    }

    /// The viewport table.
    #[must_use]
    pub const fn config(&self) -> &BreakpointConfig {
        &self.config
    }

    /// Re-target a transform between breakpoints by the ratio of their typical widths.
    #[must_use]
    pub fn scale_between_breakpoints(
        &self,
        transform: Transform,
        from: Breakpoint,
        to: Breakpoint,
    ) -> Transform {
        let from_width = from.viewport_width(&self.config);
        let to_width = to.viewport_width(&self.config);
        self.scale(transform, to_width / from_width)
    }

    /// Derive tablet and mobile from desktop.
    ///
    /// The derived mobile width is clamped to the usable mobile width; clamping
    /// is reported as a [`WarningCode::MobileOverflow`] warning.
    #[must_use]
    pub fn derive_responsive(
        &self,
        desktop: Transform,
        desktop_viewport_width: f64,
    ) -> Adjusted<BreakpointSet> {
        let desktop = desktop.normalized();
        let base = if desktop_viewport_width > 0.0 {
            desktop_viewport_width
        } else {
            self.config.desktop_width
        };

        let tablet = self.scale(desktop, self.config.tablet_width / base);
        let mut mobile = self.scale(desktop, self.config.mobile_width / base);

        let mut warnings = Vec::new();
        let usable = round_to(self.config.mobile_usable_width(), self.config.precision);
        if mobile.width > usable {
            tracing::debug!(
                "Clamping derived mobile width {} to usable width {usable}",
                mobile.width
            );
            warnings.push(
                ValidationWarning::warning(
                    WarningCode::MobileOverflow,
                    format!(
                        "Derived mobile width {} exceeds usable width {usable}; clamped",
                        mobile.width
                    ),
                )
                .with_suggestion("Set an explicit mobile transform for this element"),
            );
            mobile.width = usable;
        }

        Adjusted {
            value: BreakpointSet {
                desktop,
                tablet: Some(BreakpointTransform::generated(tablet)),
                mobile: Some(BreakpointTransform::generated(mobile)),
            },
            warnings,
        }
    }

    /// Re-derive generated breakpoints after a desktop edit, keeping user overrides.
    #[must_use]
    pub fn regenerate(
        &self,
        set: &BreakpointSet,
        desktop_viewport_width: f64,
    ) -> Adjusted<BreakpointSet> {
        let derived = self.derive_responsive(set.desktop, desktop_viewport_width);
        let mut value = derived.value;
        let mut warnings = derived.warnings;
        if set.is_user_override(Breakpoint::Tablet) {
            value.tablet = set.tablet;
        }
        if set.is_user_override(Breakpoint::Mobile) {
            value.mobile = set.mobile;
            warnings.retain(|w| w.code != WarningCode::MobileOverflow);
        }
        Adjusted { value, warnings }
    }

    fn scale(&self, transform: Transform, factor: f64) -> Transform {
        Transform {
            x: transform.x * factor,
            y: transform.y * factor,
            width: transform.width * factor,
            height: transform.height * factor,
            rotation: transform.rotation,
        }
        .rounded(self.config.precision)
    }
}

/// Clamp x/y so the element's box stays within `[0, viewport]`.
///
/// An element wider (or taller) than the viewport is pinned to the origin on
/// that axis.
#[must_use]
pub fn constrain_to_viewport(
    transform: Transform,
    viewport_width: f64,
    viewport_height: f64,
) -> Transform {
    let max_x = (viewport_width - transform.width).max(0.0);
    let max_y = (viewport_height - transform.height).max(0.0);
    Transform {
        x: transform.x.clamp(0.0, max_x),
        y: transform.y.clamp(0.0, max_y),
        ..transform
    }
}

/// Round to a fixed number of decimals.
#[must_use]
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}

fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let normalized = degrees.rem_euclid(360.0);
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model() -> BreakpointModel {
        BreakpointModel::new(BreakpointConfig::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_derive_mobile_from_1440_desktop() {
        let desktop = Transform::rect(100.0, 100.0, 200.0, 50.0);
        let derived = model().derive_responsive(desktop, 1440.0);
        assert!(derived.warnings.is_empty());

        let mobile = derived.value.get(Breakpoint::Mobile).expect("mobile derived");
        assert!(approx(mobile.x, 26.04));
        assert!(approx(mobile.y, 26.04));
        assert!(approx(mobile.width, 52.08));
        assert!(approx(mobile.height, 13.02));

        let tablet = derived.value.get(Breakpoint::Tablet).expect("tablet derived");
        assert!(approx(tablet.x, 53.33));
        assert!(approx(tablet.width, 106.67));
    }

    #[test]
    fn test_derive_preserves_rotation() {
        let desktop = Transform::new(0.0, 0.0, 100.0, 100.0, 45.0);
        let derived = model().derive_responsive(desktop, 1440.0);
        assert!(approx(derived.value.resolved(Breakpoint::Mobile).rotation, 45.0));
        assert!(approx(derived.value.resolved(Breakpoint::Tablet).rotation, 45.0));
    }

    #[test]
    fn test_mobile_overflow_is_clamped_with_warning() {
        let desktop = Transform::rect(0.0, 0.0, 1440.0, 480.0);
        let derived = model().derive_responsive(desktop, 1440.0);

        assert_eq!(derived.warnings.len(), 1);
        assert_eq!(derived.warnings[0].code, WarningCode::MobileOverflow);
        assert!(!derived.warnings[0].is_error());
        let mobile = derived.value.resolved(Breakpoint::Mobile);
        assert!(approx(mobile.width, 343.0));
        assert!(approx(mobile.height, 125.0));
    }

    #[test]
    fn test_regenerate_keeps_user_overrides() {
        let mut set = model()
            .derive_responsive(Transform::rect(0.0, 0.0, 1440.0, 100.0), 1440.0)
            .value;
        let custom = Transform::rect(5.0, 5.0, 300.0, 40.0);
        set.set_user(Breakpoint::Mobile, custom);
        set.desktop = Transform::rect(200.0, 0.0, 400.0, 100.0);

        let regenerated = model().regenerate(&set, 1440.0);
        assert!(regenerated.warnings.is_empty());
        assert_eq!(regenerated.value.resolved(Breakpoint::Mobile), custom);
        assert!(approx(regenerated.value.resolved(Breakpoint::Tablet).x, 106.67));
    }

    #[test]
    fn test_resolved_falls_back_to_wider() {
        let desktop = Transform::rect(1.0, 2.0, 3.0, 4.0);
        let set = BreakpointSet::desktop_only(desktop);
        assert_eq!(set.resolved(Breakpoint::Mobile), desktop);
    }

    #[test]
    fn test_constrain_to_viewport() {
        let t = Transform::rect(-20.0, 700.0, 100.0, 50.0);
        let c = constrain_to_viewport(t, 800.0, 600.0);
        assert!(approx(c.x, 0.0));
        assert!(approx(c.y, 550.0));

        let wide = Transform::rect(50.0, 10.0, 900.0, 50.0);
        let c = constrain_to_viewport(wide, 800.0, 600.0);
        assert!(approx(c.x, 0.0));
        assert!(approx(c.y, 10.0));
    }

    #[test]
    fn test_normalization() {
        let t = Transform::new(0.0, 0.0, -5.0, 10.0, -90.0);
        assert!(approx(t.width, 0.0));
        assert!(approx(t.rotation, 270.0));
        assert!(approx(Transform::new(0.0, 0.0, 1.0, 1.0, 720.0).rotation, 0.0));
    }

    #[test]
    fn test_apply_edit() {
        let t = Transform::rect(10.0, 10.0, 100.0, 50.0);
        let moved = t.apply_edit(TransformEdit::Move { dx: 5.0, dy: -5.0 });
        assert!(approx(moved.x, 15.0) && approx(moved.y, 5.0));
        let shrunk = t.apply_edit(TransformEdit::Resize { dw: -200.0, dh: 0.0 });
        assert!(approx(shrunk.width, 0.0));
        let rotated = t.apply_edit(TransformEdit::Rotate { degrees: 370.0 });
        assert!(approx(rotated.rotation, 10.0));
    }

    #[test]
    fn test_bounding_box_of_rotated_square() {
        let t = Transform::new(0.0, 0.0, 100.0, 100.0, 90.0);
        let bb = t.bounding_box();
        assert!((bb.width - 100.0).abs() < 1e-6);
        assert!((bb.x - 0.0).abs() < 1e-6);

        let t = Transform::new(0.0, 0.0, 100.0, 100.0, 45.0);
        let bb = t.bounding_box();
        assert!((bb.width - 141.421_356).abs() < 1e-3);
    }

    proptest! {
        #[test]
        fn prop_breakpoint_round_trip_within_tolerance(
            x in -2000.0f64..2000.0,
            y in -2000.0f64..2000.0,
            width in 0.0f64..3000.0,
            height in 0.0f64..3000.0,
            rotation in 0.0f64..360.0,
        ) {
            let model = model();
            let original = Transform::new(x, y, width, height, rotation).rounded(2);
            for (a, b) in [
                (Breakpoint::Desktop, Breakpoint::Mobile),
                (Breakpoint::Desktop, Breakpoint::Tablet),
                (Breakpoint::Tablet, Breakpoint::Mobile),
            ] {
                let there = model.scale_between_breakpoints(original, a, b);
                let back = model.scale_between_breakpoints(there, b, a);
                let ratio = a.viewport_width(model.config()) / b.viewport_width(model.config());
                // half a unit of rounding on each leg, amplified by the return scale
                let tolerance = 0.005 * ratio + 0.005 + 1e-9;
                prop_assert!((back.x - original.x).abs() <= tolerance);
                prop_assert!((back.y - original.y).abs() <= tolerance);
                prop_assert!((back.width - original.width).abs() <= tolerance);
                prop_assert!((back.height - original.height).abs() <= tolerance);
                prop_assert!((back.rotation - original.rotation).abs() < 1e-12);
            }
        }

        #[test]
        fn prop_new_is_normalized(
            width in -100.0f64..100.0,
            height in -100.0f64..100.0,
            rotation in -1000.0f64..1000.0,
        ) {
            prop_assert!(Transform::new(0.0, 0.0, width, height, rotation).is_normalized());
        }
    }
}
