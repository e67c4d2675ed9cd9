//! Spatial index over absolute elements at the desktop breakpoint.
//!
//! ```text
//!   ┌─────────┬─────────┐
//!   │  NW     │  NE     │   items live in the deepest quad that fully
//!   │   ▢     │     ▢   │   contains them; boxes straddling a split line
//!   ├────▢────┼─────────┤   stay with the parent
//!   │  SW     │  SE     │
//!   │         │   ▢     │
//!   └─────────┴─────────┘
//! ```
//!
//! The index is only ever rebuilt wholesale from the element model; there is
//! no single-element update.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::config::SpatialConfig;
use crate::element::{CanvasElement, ElementId, ElementModel};
use crate::transform::{Breakpoint, Rect};

#[derive(Debug, Clone)]
struct QuadNode {
    bounds: Rect,
    depth: usize,
    items: Vec<usize>,
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: Rect, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, index: usize, boxes: &[(ElementId, Rect)], config: &SpatialConfig) {
        if let Some(children) = self.children.as_mut() {
            if let Some(child) = children
                .iter_mut()
                .find(|c| c.bounds.contains_rect(&boxes[index].1))
            {
                child.insert(index, boxes, config);
                return;
            }
            self.items.push(index);
            return;
        }

        self.items.push(index);
        if self.items.len() > config.node_capacity && self.depth < config.max_depth {
            self.split(boxes, config);
        }
    }

    fn split(&mut self, boxes: &[(ElementId, Rect)], config: &SpatialConfig) {
        let Rect {
            x,
            y,
            width,
            height,
        } = self.bounds;
        let (hw, hh) = (width / 2.0, height / 2.0);
        let depth = self.depth + 1;
        self.children = Some(Box::new([
            QuadNode::new(Rect::new(x, y, hw, hh), depth),
            QuadNode::new(Rect::new(x + hw, y, hw, hh), depth),
            QuadNode::new(Rect::new(x, y + hh, hw, hh), depth),
            QuadNode::new(Rect::new(x + hw, y + hh, hw, hh), depth),
        ]));
        for index in std::mem::take(&mut self.items) {
            self.insert(index, boxes, config);
        }
    }

    fn query_point(&self, x: f64, y: f64, boxes: &[(ElementId, Rect)], out: &mut Vec<usize>) {
        if !self.bounds.contains_point(x, y) {
            return;
        }
        out.extend(
            self.items
                .iter()
                .copied()
                .filter(|&i| boxes[i].1.contains_point(x, y)),
        );
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_point(x, y, boxes, out);
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map_or(0, |c| c.iter().map(QuadNode::node_count).sum())
    }
}

/// Quad-partitioned index of desktop bounding boxes.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    config: SpatialConfig,
    boxes: Vec<(ElementId, Rect)>,
    root: Option<QuadNode>,
    last_rebuild: Duration,
}

impl SpatialIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Discard the structure and reinsert every absolute element.
    ///
    /// Flow elements are skipped. Exceeding the rebuild budget is logged.
    pub fn rebuild<'a, I>(&mut self, elements: I)
    where
        I: IntoIterator<Item = &'a CanvasElement>,
    {
        let started = Instant::now();

        self.boxes = elements
            .into_iter()
            .filter_map(|e| {
                e.transform_at(Breakpoint::Desktop)
                    .map(|t| (e.id.clone(), t.bounding_box()))
            })
            .collect();
        self.root = self
            .boxes
            .iter()
            .map(|(_, r)| *r)
            .reduce(|a, b| a.union(&b))
            .map(|bounds| {
                let mut root = QuadNode::new(bounds, 0);
                for index in 0..self.boxes.len() {
                    root.insert(index, &self.boxes, &self.config);
                }
                root
            });

        self.last_rebuild = started.elapsed();
        let budget = Duration::from_millis(self.config.rebuild_budget_ms);
        if self.last_rebuild > budget {
            tracing::warn!(
                elapsed_us = u64::try_from(self.last_rebuild.as_micros()).unwrap_or(u64::MAX),
                budget_ms = self.config.rebuild_budget_ms,
                items = self.boxes.len(),
                "Spatial index rebuild exceeded budget"
            );
        }
        tracing::debug!(
            "Spatial index rebuilt: {} items in {} nodes",
            self.boxes.len(),
            self.node_count()
        );
    }

    /// Ids of every element whose desktop box contains the point, edges
    /// included. Order is unspecified.
    #[must_use]
    pub fn query_point(&self, x: f64, y: f64) -> Vec<ElementId> {
        let mut hits = Vec::new();
        if let Some(root) = &self.root {
            root.query_point(x, y, &self.boxes, &mut hits);
        }
        hits.into_iter().map(|i| self.boxes[i].0.clone()).collect()
    }

    /// Ids of elements touching `region`, approximated by sampling the region
    /// on a grid. The region's edges are always sampled, so anything covering
    /// a corner or edge is found; elements narrower than the sample step that
    /// sit strictly inside may be missed.
    ///
    /// The region is first clipped to the indexed bounds, and each axis takes
    /// at most [`MAX_AXIS_SAMPLES`] samples (the step widens to fit).
    #[must_use]
    pub fn query_region(&self, region: Rect) -> Vec<ElementId> {
        let Some(bounds) = self.root.as_ref().map(|r| r.bounds) else {
            return Vec::new();
        };
        let left = region.x.max(bounds.x);
        let top = region.y.max(bounds.y);
        let right = region.right().min(bounds.right());
        let bottom = region.bottom().min(bounds.bottom());
        if !(left <= right && top <= bottom) {
            return Vec::new();
        }

        let step = self.config.region_sample_step.max(f64::EPSILON);
        let xs = sample_axis(left, right, step);
        let ys = sample_axis(top, bottom, step);

        let mut found = BTreeSet::new();
        for &y in &ys {
            for &x in &xs {
                found.extend(self.query_point(x, y));
            }
        }
        found.into_iter().collect()
    }

    /// Hits at a point, topmost first (z-index descending, then id).
    #[must_use]
    pub fn topmost_at(&self, x: f64, y: f64, model: &ElementModel) -> Vec<ElementId> {
        let mut hits: Vec<(i32, ElementId)> = self
            .query_point(x, y)
            .into_iter()
            .map(|id| {
                let z = model.get(&id).and_then(CanvasElement::z_index).unwrap_or(i32::MIN);
                (z, id)
            })
            .collect();
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Desktop box of an indexed element.
    #[must_use]
    pub fn bounds_of(&self, id: &ElementId) -> Option<Rect> {
        self.boxes.iter().find(|(i, _)| i == id).map(|(_, r)| *r)
    }

    /// Indexed elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Quad nodes in the current structure.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, QuadNode::node_count)
    }

    /// Duration of the most recent rebuild.
    #[must_use]
    pub fn last_rebuild(&self) -> Duration {
        self.last_rebuild
    }
}

/// Upper bound on samples per axis in a region query.
pub const MAX_AXIS_SAMPLES: usize = 4096;

#[allow(clippy::cast_precision_loss)]
fn sample_axis(start: f64, end: f64, step: f64) -> Vec<f64> {
    let step = step.max((end - start) / MAX_AXIS_SAMPLES as f64);
    let mut samples = Vec::new();
    let mut at = start;
    while at < end && samples.len() < MAX_AXIS_SAMPLES {
        samples.push(at);
        at += step;
    }
    samples.push(end);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::transform::{BreakpointSet, Transform};
    use proptest::prelude::*;

    fn boxed(id: &str, x: f64, y: f64, w: f64, h: f64, z: i32) -> CanvasElement {
        CanvasElement::absolute(
            ElementKind::Text {
                content: id.to_string(),
            },
            BreakpointSet::desktop_only(Transform::rect(x, y, w, h)),
            z,
        )
        .with_id(id)
    }

    fn sorted(mut ids: Vec<ElementId>) -> Vec<ElementId> {
        ids.sort();
        ids
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::default();
        assert!(index.query_point(0.0, 0.0).is_empty());
        assert_eq!(index.node_count(), 0);
    }

    #[test]
    fn test_point_query_skips_flow_elements() {
        let mut index = SpatialIndex::default();
        let flow = CanvasElement::flow(
            "flow-a",
            ElementKind::Text {
                content: String::new(),
            },
        );
        let a = boxed("a", 0.0, 0.0, 100.0, 100.0, 10_001);
        index.rebuild([&flow, &a]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_point(50.0, 50.0), vec![ElementId::from("a")]);
        assert!(index.query_point(150.0, 50.0).is_empty());
    }

    #[test]
    fn test_rebuild_discards_previous_state() {
        let mut index = SpatialIndex::default();
        index.rebuild([&boxed("a", 0.0, 0.0, 10.0, 10.0, 10_000)]);
        index.rebuild([&boxed("b", 100.0, 100.0, 10.0, 10.0, 10_000)]);
        assert!(index.query_point(5.0, 5.0).is_empty());
        assert_eq!(index.query_point(105.0, 105.0), vec![ElementId::from("b")]);
    }

    #[test]
    fn test_splits_beyond_capacity() {
        let mut index = SpatialIndex::new(SpatialConfig {
            node_capacity: 2,
            ..SpatialConfig::default()
        });
        let elements: Vec<_> = (0..16)
            .map(|i| {
                let (col, row) = (f64::from(i % 4), f64::from(i / 4));
                boxed(&format!("e{i}"), col * 100.0, row * 100.0, 50.0, 50.0, 10_000 + i)
            })
            .collect();
        index.rebuild(&elements);
        assert!(index.node_count() > 1);
        assert_eq!(index.query_point(325.0, 325.0), vec![ElementId::from("e15")]);
        assert!(index.query_point(75.0, 75.0).is_empty());
    }

    #[test]
    fn test_region_query_samples_edges() {
        let mut index = SpatialIndex::default();
        let elements = [
            boxed("left", 0.0, 0.0, 20.0, 20.0, 10_000),
            boxed("right", 95.0, 0.0, 20.0, 20.0, 10_000),
            boxed("far", 500.0, 500.0, 20.0, 20.0, 10_000),
        ];
        index.rebuild(&elements);
        let found = index.query_region(Rect::new(10.0, 5.0, 87.0, 5.0));
        assert_eq!(found, vec![ElementId::from("left"), ElementId::from("right")]);
    }

    #[test]
    fn test_unbounded_region_is_clipped_to_index() {
        let mut index = SpatialIndex::default();
        let elements = [
            boxed("a", 0.0, 0.0, 20.0, 20.0, 10_000),
            boxed("b", 400.0, 400.0, 20.0, 20.0, 10_000),
        ];
        index.rebuild(&elements);

        let everything = Rect::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY);
        assert_eq!(
            index.query_region(everything),
            vec![ElementId::from("a"), ElementId::from("b")]
        );
        let huge = Rect::new(-1e12, -1e12, 2e12, 2e12);
        assert_eq!(index.query_region(huge).len(), 2);
        assert!(index.query_region(Rect::new(1e9, 1e9, 10.0, 10.0)).is_empty());
        assert!(SpatialIndex::default().query_region(huge).is_empty());
    }

    #[test]
    fn test_sample_count_is_capped() {
        let samples = sample_axis(0.0, 1e15, 10.0);
        assert!(samples.len() <= MAX_AXIS_SAMPLES + 1);
        assert_eq!(samples.last().copied(), Some(1e15));
    }

    #[test]
    fn test_topmost_at_orders_by_z_index() {
        let mut model = ElementModel::default();
        model.push(boxed("low", 0.0, 0.0, 100.0, 100.0, 10_001));
        model.push(boxed("high", 50.0, 50.0, 100.0, 100.0, 10_009));
        let mut index = SpatialIndex::default();
        index.rebuild(&model.elements);
        assert_eq!(
            index.topmost_at(75.0, 75.0, &model),
            vec![ElementId::from("high"), ElementId::from("low")]
        );
    }

    #[test]
    fn test_rotated_element_uses_bounding_box() {
        let mut element = boxed("r", 100.0, 100.0, 100.0, 20.0, 10_000);
        if let crate::element::Placement::Absolute { breakpoints, .. } = &mut element.placement {
            breakpoints.desktop = Transform::new(100.0, 100.0, 100.0, 20.0, 90.0);
        }
        let mut index = SpatialIndex::default();
        index.rebuild([&element]);
        assert_eq!(index.query_point(150.0, 70.0), vec![ElementId::from("r")]);
    }

    proptest! {
        #[test]
        fn prop_point_query_matches_brute_force(
            boxes in prop::collection::vec((0u16..900, 0u16..900, 1u16..120, 1u16..120), 0..60),
            px in 0u16..1000,
            py in 0u16..1000,
        ) {
            let elements: Vec<_> = boxes
                .iter()
                .enumerate()
                .map(|(i, &(x, y, w, h))| {
                    boxed(&format!("e{i}"), f64::from(x), f64::from(y), f64::from(w), f64::from(h), 10_000)
                })
                .collect();
            let mut index = SpatialIndex::new(SpatialConfig {
                node_capacity: 3,
                ..SpatialConfig::default()
            });
            index.rebuild(&elements);

            let (x, y) = (f64::from(px), f64::from(py));
            let expected: Vec<ElementId> = elements
                .iter()
                .filter(|e| {
                    e.transform_at(Breakpoint::Desktop)
                        .is_some_and(|t| t.bounding_box().contains_point(x, y))
                })
                .map(|e| e.id.clone())
                .collect();
            prop_assert_eq!(sorted(index.query_point(x, y)), sorted(expected));
        }
    }
}
