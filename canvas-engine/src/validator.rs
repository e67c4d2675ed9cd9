//! Pre-commit validation of operation batches.
//!
//! Operations are checked in their loose wire form ([`RawOp`]), since that is
//! what AI collaborators produce and every field may be missing. Findings are
//! either errors, which reject the whole batch, or advisory warnings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{DocumentConfig, ValidatorConfig};
use crate::element::{CanvasElement, ElementModel};
use crate::ops::{InsertPosition, RawOp};
use crate::registry::AddressingRegistry;
use crate::selector::Selector;
use crate::transform::Breakpoint;
use crate::warning::{ValidationWarning, WarningCode};

const KNOWN_KINDS: &[&str] = &["insert", "delete", "update_text", "update_attribute", "move"];

/// Outcome of validating a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// `true` iff no finding has error severity.
    pub valid: bool,
    /// Every finding, errors and warnings.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn from_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self {
            valid: !warnings.iter().any(ValidationWarning::is_error),
            warnings,
        }
    }

    /// Blocking findings.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationWarning> {
        self.warnings.iter().filter(|w| w.is_error())
    }

    /// Advisory findings.
    pub fn advisories(&self) -> impl Iterator<Item = &ValidationWarning> {
        self.warnings.iter().filter(|w| !w.is_error())
    }

    /// Number of findings with `code`.
    #[must_use]
    pub fn count(&self, code: WarningCode) -> usize {
        self.warnings.iter().filter(|w| w.code == code).count()
    }
}

/// Checks operation batches before they reach the document.
#[derive(Debug, Clone, Default)]
pub struct PreCommitValidator {
    config: ValidatorConfig,
    anchors: Vec<String>,
}

impl PreCommitValidator {
    /// Create a validator. Document anchors are always known targets.
    #[must_use]
    pub fn new(config: ValidatorConfig, document: &DocumentConfig) -> Self {
        Self {
            config,
            anchors: vec![document.canvas_root.clone(), document.stylesheet.clone()],
        }
    }

    /// Validate a batch of operations against the element model.
    #[must_use]
    pub fn validate(
        &self,
        ops: &[RawOp],
        model: &ElementModel,
        registry: &AddressingRegistry,
    ) -> ValidationReport {
        let mut warnings = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            self.check_operation(index, op, model, registry, &mut warnings);
        }
        check_duplicate_z_indices(model, &mut warnings);
        self.check_overlaps(model, &mut warnings);

        let report = ValidationReport::from_warnings(warnings);
        if report.valid {
            tracing::debug!(
                "Validated {} operations: {} advisories",
                ops.len(),
                report.warnings.len()
            );
        } else {
            tracing::info!(
                errors = report.errors().count(),
                operations = ops.len(),
                "Batch rejected by pre-commit validation"
            );
        }
        report
    }

    fn check_operation(
        &self,
        index: usize,
        op: &RawOp,
        model: &ElementModel,
        registry: &AddressingRegistry,
        out: &mut Vec<ValidationWarning>,
    ) {
        let subject = format!("operations[{index}]");
        let kind = op.normalized_kind();
        let error = |code, message: String| ValidationWarning::error(code, message).with_subject(subject.clone());

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            out.push(
                error(
                    WarningCode::UnknownOperation,
                    format!("unknown operation kind {:?}", op.kind),
                )
                .with_suggestion(format!("use one of {}", KNOWN_KINDS.join(", "))),
            );
            return;
        }

        match op.target.as_deref().map(str::trim) {
            None | Some("") => out.push(error(
                WarningCode::MissingTarget,
                format!("{kind} has no target"),
            )),
            Some(target) => {
                if let Some(finding) = self.check_selector(target, &kind) {
                    out.push(finding.with_subject(subject.clone()));
                } else if !self.is_known_target(target, model, registry) {
                    out.push(
                        ValidationWarning::warning(
                            WarningCode::OrphanedTarget,
                            format!("{kind} target {target:?} is not a known element"),
                        )
                        .with_subject(subject.clone()),
                    );
                }
            }
        }

        let bad_position = op
            .position
            .as_deref()
            .is_some_and(|p| InsertPosition::parse(p).is_none());
        match kind.as_str() {
            "insert" => {
                if op.content.as_ref().map_or(true, |c| c.is_empty()) {
                    out.push(error(WarningCode::MissingContent, "insert has no content".into()));
                }
                if bad_position {
                    out.push(error(
                        WarningCode::InvalidPosition,
                        format!("invalid insert position {:?}", op.position.as_deref().unwrap_or_default()),
                    ));
                }
            }
            "move" => {
                match op.destination.as_deref().map(str::trim) {
                    None | Some("") => out.push(error(
                        WarningCode::MissingDestination,
                        "move has no destination".into(),
                    )),
                    Some(destination) => {
                        if let Some(finding) = self.check_selector(destination, &kind) {
                            out.push(finding.with_subject(subject.clone()));
                        }
                    }
                }
                if bad_position {
                    out.push(error(
                        WarningCode::InvalidPosition,
                        format!("invalid move position {:?}", op.position.as_deref().unwrap_or_default()),
                    ));
                }
            }
            "update_text" => {
                if op.value.is_none() {
                    out.push(error(WarningCode::MissingValue, "update_text has no value".into()));
                }
            }
            "update_attribute" => {
                if op.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                    out.push(error(
                        WarningCode::MissingAttributeName,
                        "update_attribute has no attribute name".into(),
                    ));
                }
                if op.value.is_none() {
                    out.push(error(
                        WarningCode::MissingValue,
                        "update_attribute has no value".into(),
                    ));
                }
            }
            _ => {}
        }
    }

    /// Blocked or malformed selector, if either.
    fn check_selector(&self, selector: &str, kind: &str) -> Option<ValidationWarning> {
        let blocked = selector.split(',').map(str::trim).find(|part| {
            self.config
                .blocked_selectors
                .iter()
                .any(|b| b.eq_ignore_ascii_case(part))
        });
        if let Some(part) = blocked {
            return Some(
                ValidationWarning::error(
                    WarningCode::BlockedTarget,
                    format!("{kind} may not target the document root selector {part:?}"),
                )
                .with_suggestion("target an element inside the page content"),
            );
        }
        if let Some(c) = selector.chars().find(|c| matches!(c, '{' | '}' | ';')) {
            return Some(ValidationWarning::error(
                WarningCode::MalformedTarget,
                format!("target {selector:?} contains declaration character {c:?}"),
            ));
        }
        Selector::parse(selector).err().map(|e| {
            ValidationWarning::error(
                WarningCode::MalformedTarget,
                format!("target {selector:?} does not parse: {e}"),
            )
        })
    }

    fn is_known_target(
        &self,
        target: &str,
        model: &ElementModel,
        registry: &AddressingRegistry,
    ) -> bool {
        if self.anchors.iter().any(|a| a == target) || registry.knows_target(target) {
            return true;
        }
        let Ok(selector) = Selector::parse(target) else {
            return false;
        };
        let found = selector.exact_identifiers().any(|value| {
            model.elements.iter().any(|e| {
                e.id.as_str() == value
                    || e.original_id.as_ref().is_some_and(|o| o.as_str() == value)
            })
        });
        found
    }

    fn check_overlaps(&self, model: &ElementModel, out: &mut Vec<ValidationWarning>) {
        let boxes: Vec<_> = model
            .absolute_elements()
            .filter_map(|e| {
                e.transform_at(Breakpoint::Desktop)
                    .map(|t| (e, t.bounding_box()))
            })
            .collect();
        if boxes.len() > self.config.overlap_threshold {
            out.push(
                ValidationWarning::warning(
                    WarningCode::OverlapCheckSkipped,
                    format!(
                        "overlap detection skipped for {} absolute elements (limit {})",
                        boxes.len(),
                        self.config.overlap_threshold
                    ),
                )
                .with_suggestion("use the spatial index region query to inspect overlaps"),
            );
            return;
        }
        for (i, (a, box_a)) in boxes.iter().enumerate() {
            for (b, box_b) in &boxes[i + 1..] {
                if box_a.overlaps(box_b) {
                    out.push(
                        ValidationWarning::warning(
                            WarningCode::ElementOverlap,
                            format!("{} overlaps {} at desktop", a.id, b.id),
                        )
                        .with_subjects([a.id.to_string(), b.id.to_string()]),
                    );
                }
            }
        }
    }
}

fn check_duplicate_z_indices(model: &ElementModel, out: &mut Vec<ValidationWarning>) {
    let mut by_value: BTreeMap<i32, Vec<&CanvasElement>> = BTreeMap::new();
    for element in model.absolute_elements() {
        if let Some(z) = element.z_index() {
            by_value.entry(z).or_default().push(element);
        }
    }
    for (z, elements) in by_value.into_iter().filter(|(_, e)| e.len() > 1) {
        let ids: Vec<String> = elements.iter().map(|e| e.id.to_string()).collect();
        out.push(
            ValidationWarning::warning(
                WarningCode::DuplicateZIndex,
                format!("z-index {z} is shared by {}", ids.join(", ")),
            )
            .with_subjects(ids)
            .with_suggestion("use bring_to_front or step_forward to separate them"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::ops::MarkupNode;
    use crate::transform::{BreakpointSet, Transform};

    fn raw(kind: &str, target: Option<&str>) -> RawOp {
        RawOp {
            kind: kind.to_string(),
            target: target.map(str::to_string),
            ..RawOp::default()
        }
    }

    fn absolute(id: &str, x: f64, z: i32) -> CanvasElement {
        CanvasElement::absolute(
            ElementKind::Text {
                content: id.to_string(),
            },
            BreakpointSet::desktop_only(Transform::rect(x, 0.0, 100.0, 100.0)),
            z,
        )
        .with_id(id)
    }

    fn validator() -> PreCommitValidator {
        PreCommitValidator::new(ValidatorConfig::default(), &DocumentConfig::default())
    }

    fn codes(report: &ValidationReport) -> Vec<WarningCode> {
        report.warnings.iter().map(|w| w.code).collect()
    }

    #[test]
    fn test_clean_batch_is_valid() {
        let mut registry = AddressingRegistry::default();
        registry.register_canvas(&"canvas-a".into());
        let op = RawOp {
            value: Some("hi".into()),
            ..raw("updateText", Some("[data-canvas-id=\"canvas-a\"]"))
        };
        let report = validator().validate(&[op], &ElementModel::default(), &registry);
        assert!(report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_kind_and_missing_target() {
        let report = validator().validate(
            &[raw("explode", Some("#x")), raw("delete", None), raw("delete", Some("  "))],
            &ElementModel::default(),
            &AddressingRegistry::default(),
        );
        assert!(!report.valid);
        assert_eq!(
            codes(&report),
            vec![
                WarningCode::UnknownOperation,
                WarningCode::MissingTarget,
                WarningCode::MissingTarget
            ]
        );
        assert_eq!(report.warnings[1].subject_id.as_deref(), Some("operations[1]"));
    }

    #[test]
    fn test_op_without_kind_is_reported_not_rejected() {
        let ops: Vec<RawOp> =
            serde_json::from_str(r##"[{ "target": "#x" }, { "op": "delete", "target": "#y" }]"##)
                .expect("parse");
        assert_eq!(ops[0].kind, "");
        let report = validator().validate(&ops, &ElementModel::default(), &AddressingRegistry::default());
        assert!(!report.valid);
        assert_eq!(report.warnings[0].code, WarningCode::UnknownOperation);
        assert_eq!(report.warnings[0].subject_id.as_deref(), Some("operations[0]"));
    }

    #[test]
    fn test_blocked_root_targets() {
        for target in ["html", "BODY", ":root", "document", "*", "main, body"] {
            let report = validator().validate(
                &[raw("delete", Some(target))],
                &ElementModel::default(),
                &AddressingRegistry::default(),
            );
            assert!(!report.valid, "{target} should be blocked");
            assert_eq!(report.count(WarningCode::BlockedTarget), 1);
        }
    }

    #[test]
    fn test_malformed_targets() {
        for target in ["div[data-x=\"1\"", "div >", "p { color: red }", "a:not(b"] {
            let report = validator().validate(
                &[raw("delete", Some(target))],
                &ElementModel::default(),
                &AddressingRegistry::default(),
            );
            assert_eq!(report.count(WarningCode::MalformedTarget), 1, "{target}");
        }
    }

    #[test]
    fn test_operation_specific_fields() {
        let ops = [
            raw("insert", Some("#canvas-root")),
            RawOp {
                content: Some(MarkupNode::new("p")),
                position: Some("sideways".into()),
                ..raw("insert", Some("#canvas-root"))
            },
            raw("move", Some("#canvas-root")),
            raw("update_text", Some("#canvas-root")),
            raw("update_attribute", Some("#canvas-root")),
        ];
        let report = validator().validate(&ops, &ElementModel::default(), &AddressingRegistry::default());
        assert_eq!(
            codes(&report),
            vec![
                WarningCode::MissingContent,
                WarningCode::InvalidPosition,
                WarningCode::MissingDestination,
                WarningCode::MissingValue,
                WarningCode::MissingAttributeName,
                WarningCode::MissingValue,
            ]
        );
    }

    #[test]
    fn test_orphaned_target_is_advisory() {
        let op = RawOp {
            value: Some("x".into()),
            ..raw("update_text", Some("#nowhere"))
        };
        let report = validator().validate(&[op], &ElementModel::default(), &AddressingRegistry::default());
        assert!(report.valid);
        assert_eq!(codes(&report), vec![WarningCode::OrphanedTarget]);
    }

    #[test]
    fn test_model_ids_match_targets_exactly() {
        let mut model = ElementModel::default();
        model.push(absolute("canvas-1", 0.0, 10_001));
        let known = RawOp {
            value: Some("x".into()),
            ..raw("update_text", Some("[data-canvas-id=\"canvas-1\"] > h2"))
        };
        let report = validator().validate(
            &[known, raw("delete", Some("[data-canvas-id=\"canvas-12345\"]"))],
            &model,
            &AddressingRegistry::default(),
        );
        assert_eq!(report.count(WarningCode::OrphanedTarget), 1);
        assert_eq!(
            report.warnings[0].subject_id.as_deref(),
            Some("operations[1]")
        );
    }

    #[test]
    fn test_duplicate_z_index_names_every_id() {
        let mut model = ElementModel::default();
        model.push(absolute("a", 0.0, 10_050));
        model.push(absolute("b", 500.0, 10_050));
        model.push(absolute("c", 1000.0, 10_051));
        let report = validator().validate(&[], &model, &AddressingRegistry::default());
        assert!(report.valid);
        assert_eq!(report.count(WarningCode::DuplicateZIndex), 1);
        let dup = &report.warnings[0];
        assert_eq!(dup.subject_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_overlap_and_skip() {
        let mut model = ElementModel::default();
        model.push(absolute("a", 0.0, 10_001));
        model.push(absolute("b", 50.0, 10_002));
        model.push(absolute("c", 100.0, 10_003));
        let report = validator().validate(&[], &model, &AddressingRegistry::default());
        assert_eq!(report.count(WarningCode::ElementOverlap), 2);

        let strict = PreCommitValidator::new(
            ValidatorConfig {
                overlap_threshold: 2,
                ..ValidatorConfig::default()
            },
            &DocumentConfig::default(),
        );
        let skipped = strict.validate(&[], &model, &AddressingRegistry::default());
        assert_eq!(skipped.count(WarningCode::ElementOverlap), 0);
        assert_eq!(skipped.count(WarningCode::OverlapCheckSkipped), 1);
        assert!(skipped.valid);
    }
}
