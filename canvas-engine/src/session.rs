//! Editing session: the owner of every derived cache.
//!
//! One session per open document. The element model stays with the caller
//! (UI or AI collaborator); the session holds the registry, spatial index,
//! compiler, validator and observer, and is the only thing that mutates them.
//!
//! ```text
//!   commit(model, doc)
//!     compile ──► validate ──► apply in order ──► unregister retired ids
//!                    │                              ──► rebuild spatial index
//!                    └─ errors: nothing applied     ──► forced observer flush
//! ```

use serde::{Deserialize, Serialize};

use crate::compiler::{CompiledBatch, MutationCompiler};
use crate::config::EngineConfig;
use crate::document::{LiveDocument, NodeHandle, ObservedMutation};
use crate::element::{ElementId, ElementModel, Placement};
use crate::error::{EngineError, EngineResult};
use crate::observer::{Clock, ReconcileReport, SyncObserver, SystemClock};
use crate::ops::{MutationOp, RawOp};
use crate::registry::{AddressingRegistry, SyncReport};
use crate::spatial::SpatialIndex;
use crate::transform::{constrain_to_viewport, Breakpoint, TransformEdit};
use crate::validator::{PreCommitValidator, ValidationReport};
use crate::warning::{Adjusted, ValidationWarning};
use crate::zindex::{ZIndex, ZIndexPolicy};

/// Z-order change requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reorder {
    /// Above everything.
    BringToFront,
    /// Below everything.
    SendToBack,
    /// One step up.
    StepForward,
    /// One step down.
    StepBackward,
}

/// What a successful commit did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Operations applied, in order.
    pub applied: Vec<MutationOp>,
    /// Compile corrections and validation advisories.
    pub warnings: Vec<ValidationWarning>,
    /// Observer flush that followed the apply.
    pub reconcile: ReconcileReport,
}

/// Owned state for editing one document.
#[derive(Debug)]
pub struct EditingSession<C: Clock = SystemClock> {
    config: EngineConfig,
    registry: AddressingRegistry,
    spatial: SpatialIndex,
    compiler: MutationCompiler,
    validator: PreCommitValidator,
    observer: SyncObserver<C>,
}

impl EditingSession<SystemClock> {
    /// Create a session on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the configuration is inconsistent.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_clock(config, SystemClock::default())
    }
}

impl<C: Clock> EditingSession<C> {
    /// Create a session whose observer runs on `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the configuration is inconsistent.
    pub fn with_clock(config: EngineConfig, clock: C) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: AddressingRegistry::new(
                config.document.clone(),
                std::time::Duration::from_millis(config.budgets.rescan_ms),
            ),
            spatial: SpatialIndex::new(config.spatial.clone()),
            compiler: MutationCompiler::new(&config),
            validator: PreCommitValidator::new(config.validator.clone(), &config.document),
            observer: SyncObserver::new(clock, &config.observer),
            config,
        })
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Addressing registry.
    #[must_use]
    pub fn registry(&self) -> &AddressingRegistry {
        &self.registry
    }

    /// Spatial index.
    #[must_use]
    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    /// Z-index policy.
    #[must_use]
    pub fn policy(&self) -> &ZIndexPolicy {
        self.compiler.policy()
    }

    /// Compiler.
    #[must_use]
    pub fn compiler(&self) -> &MutationCompiler {
        &self.compiler
    }

    /// Compile without applying.
    pub fn compile(&mut self, model: &ElementModel, doc: &dyn LiveDocument) -> CompiledBatch {
        self.compiler.compile(model, &mut self.registry, doc)
    }

    /// Validate a batch without applying it.
    #[must_use]
    pub fn validate(&self, ops: &[RawOp], model: &ElementModel) -> ValidationReport {
        self.validator.validate(ops, model, &self.registry)
    }

    /// Compile, validate and apply the model to the document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ValidationFailed`] without touching the document
    /// if validation finds an error, or [`EngineError::Document`] if the
    /// document rejects an operation; the batch is then not applied at all.
    pub fn commit(
        &mut self,
        model: &ElementModel,
        doc: &mut dyn LiveDocument,
    ) -> EngineResult<CommitReport> {
        let batch = self.compiler.compile(model, &mut self.registry, &*doc);
        let report = self
            .validator
            .validate(&batch.raw_operations(), model, &self.registry);
        if !report.valid {
            return Err(EngineError::ValidationFailed {
                warnings: report.warnings,
            });
        }

        let applied = batch.operations();
        doc.apply_batch(&applied)?;
        for id in batch.retired.iter().chain(&batch.replaced) {
            self.registry.unregister(id);
        }
        self.spatial.rebuild(&model.elements);
        let reconcile = self.observer.flush(&mut self.registry, &*doc);

        tracing::info!(
            operations = applied.len(),
            elements = model.len(),
            "Committed element model"
        );
        let mut warnings = batch.warnings;
        warnings.extend(report.warnings);
        Ok(CommitReport {
            applied,
            warnings,
            reconcile,
        })
    }

    /// Validate and apply operations produced by an AI collaborator.
    ///
    /// Such operations may add or remove tagged nodes, so the registry is
    /// fully rescanned afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ValidationFailed`] if any operation is
    /// structurally invalid, or [`EngineError::Document`] if the document
    /// rejects one, in which case none are applied.
    pub fn apply_intent(
        &mut self,
        ops: Vec<RawOp>,
        model: &ElementModel,
        doc: &mut dyn LiveDocument,
    ) -> EngineResult<CommitReport> {
        let report = self.validator.validate(&ops, model, &self.registry);
        if !report.valid {
            return Err(EngineError::ValidationFailed {
                warnings: report.warnings,
            });
        }
        let applied = ops
            .into_iter()
            .map(RawOp::into_typed)
            .collect::<EngineResult<Vec<_>>>()?;
        doc.apply_batch(&applied)?;
        self.observer.flush(&mut self.registry, &*doc);
        let sync = self.registry.sync(&*doc);
        Ok(CommitReport {
            applied,
            warnings: report.warnings,
            reconcile: ReconcileReport {
                resolved: sync.resolved,
                missing: sync.missing,
                full_rescan: true,
            },
        })
    }

    /// Register an existing flow node and return its stable id.
    pub fn adopt_flow(&mut self, doc: &dyn LiveDocument, node: NodeHandle) -> Option<ElementId> {
        self.registry.register_flow(doc, node)
    }

    /// Unlock a flow element into an absolute one.
    ///
    /// The new element takes the flow element's place in the model (or is
    /// appended if the model did not list it) and goes on top of the stack.
    /// Nothing reaches the document until the next [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ElementNotFound`] if the flow id does not resolve.
    pub fn unlock(
        &mut self,
        model: &mut ElementModel,
        flow_id: &ElementId,
        doc: &dyn LiveDocument,
    ) -> EngineResult<Adjusted<ElementId>> {
        let node = self
            .registry
            .resolve(doc, flow_id)
            .ok_or_else(|| EngineError::ElementNotFound(flow_id.to_string()))?;
        let unlocked =
            self.compiler
                .unlock_flow_element(flow_id, node, model.desktop_viewport_width, doc)?;
        let mut element = unlocked.value;
        let mut warnings = unlocked.warnings;

        let z = self.policy().next_available(model.absolute_elements());
        element.set_z_index(z.value);
        warnings.extend(z.warnings);

        let id = element.id.clone();
        match model.elements.iter().position(|e| &e.id == flow_id) {
            Some(index) => model.elements[index] = element,
            None => {
                model.push(element);
            }
        }
        tracing::debug!("Unlocked {flow_id} into {id}");
        Ok(Adjusted { value: id, warnings })
    }

    /// Apply a drag, resize or rotate delta to one breakpoint.
    ///
    /// The result is kept inside the breakpoint's viewport. Desktop edits
    /// regenerate the derived breakpoints; user overrides survive.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ElementNotFound`] for unknown ids and
    /// [`EngineError::InvalidOperation`] for flow elements.
    pub fn edit_transform(
        &self,
        model: &mut ElementModel,
        id: &ElementId,
        breakpoint: Breakpoint,
        edit: TransformEdit,
        viewport_height: f64,
    ) -> EngineResult<Vec<ValidationWarning>> {
        let viewport_width = model.desktop_viewport_width;
        let breakpoints_model = self.compiler.breakpoints();
        let element = model
            .get_mut(id)
            .ok_or_else(|| EngineError::ElementNotFound(id.to_string()))?;
        let Placement::Absolute { breakpoints, .. } = &mut element.placement else {
            return Err(EngineError::InvalidOperation(format!(
                "{id} is a flow element; unlock it before editing its transform"
            )));
        };

        let width = match breakpoint {
            Breakpoint::Desktop => viewport_width,
            other => other.viewport_width(breakpoints_model.config()),
        };
        let edited = breakpoints.resolved(breakpoint).apply_edit(edit);
        let constrained = constrain_to_viewport(edited, width, viewport_height);
        breakpoints.set_user(breakpoint, constrained);

        let mut warnings = Vec::new();
        if breakpoint == Breakpoint::Desktop {
            let regenerated = breakpoints_model.regenerate(breakpoints, viewport_width);
            *breakpoints = regenerated.value;
            warnings = regenerated.warnings;
        }
        element.touch();
        Ok(warnings)
    }

    /// Change an element's stacking order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ElementNotFound`] for unknown ids.
    pub fn reorder(
        &self,
        model: &mut ElementModel,
        id: &ElementId,
        action: Reorder,
    ) -> EngineResult<Vec<ValidationWarning>> {
        let policy = self.policy();
        let element = model
            .get(id)
            .ok_or_else(|| EngineError::ElementNotFound(id.to_string()))?;
        let result = match action {
            Reorder::BringToFront => policy.bring_to_front(element, &model.elements),
            Reorder::SendToBack => policy.send_to_back(element),
            Reorder::StepForward => policy.step_forward(element),
            Reorder::StepBackward => policy.step_backward(element),
        };
        if let (ZIndex::Value(z), Some(element)) = (result.value, model.get_mut(id)) {
            element.set_z_index(z);
        }
        Ok(result.warnings)
    }

    /// Topmost element at a desktop point, from the last committed layout.
    #[must_use]
    pub fn hit_test(&self, x: f64, y: f64, model: &ElementModel) -> Option<ElementId> {
        self.spatial.topmost_at(x, y, model).into_iter().next()
    }

    /// Feed document mutations to the observer. Returns how many were queued.
    pub fn observe<'a, I>(&mut self, mutations: I) -> usize
    where
        I: IntoIterator<Item = &'a ObservedMutation>,
    {
        self.observer.observe_all(mutations)
    }

    /// Reconcile queued mutations if the throttle interval has elapsed.
    pub fn poll(&mut self, doc: &dyn LiveDocument) -> Option<ReconcileReport> {
        self.observer.poll(&mut self.registry, doc)
    }

    /// Reconcile queued mutations now.
    pub fn flush(&mut self, doc: &dyn LiveDocument) -> ReconcileReport {
        self.observer.flush(&mut self.registry, doc)
    }

    /// Full registry rescan after a reload, import or undo/redo, plus a
    /// spatial rebuild from the model.
    pub fn resync(&mut self, model: &ElementModel, doc: &dyn LiveDocument) -> SyncReport {
        self.observer.flush(&mut self.registry, doc);
        let report = self.registry.sync(doc);
        self.spatial.rebuild(&model.elements);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CanvasElement, ElementKind};
    use crate::memory::MemoryDocument;
    use crate::observer::ManualClock;
    use crate::transform::{BreakpointSet, Rect, Transform};
    use crate::error::DocumentError;
    use crate::warning::WarningCode;

    fn session() -> EditingSession<ManualClock> {
        EditingSession::with_clock(EngineConfig::default(), ManualClock::new()).expect("session")
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

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.breakpoints.mobile_width = 0.0;
        assert!(matches!(
            EditingSession::new(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_commit_materializes_and_indexes() {
        let mut session = session();
        let mut doc = MemoryDocument::new();
        let mut model = ElementModel::default();
        model.push(absolute("canvas-a", 0.0, 10_001));
        model.push(absolute("canvas-b", 50.0, 10_002));

        let report = session.commit(&model, &mut doc).expect("commit");
        assert_eq!(report.applied.len(), 3);
        let node = doc.query("[data-canvas-id=\"canvas-a\"]").expect("inserted");
        assert_eq!(doc.rendered_box(node), Some(Rect::new(0.0, 0.0, 100.0, 100.0)));
        assert_eq!(session.hit_test(75.0, 50.0, &model), Some(ElementId::from("canvas-b")));
        assert_eq!(session.hit_test(500.0, 500.0, &model), None);
    }

    #[test]
    fn test_rejected_intent_leaves_document_untouched() {
        let mut session = session();
        let mut doc = MemoryDocument::new();
        let before = doc.to_html();
        let ops = vec![
            RawOp {
                kind: "update_text".into(),
                target: Some("#content".into()),
                value: Some("fine".into()),
                ..RawOp::default()
            },
            RawOp {
                kind: "delete".into(),
                target: Some("body".into()),
                ..RawOp::default()
            },
        ];
        let err = session
            .apply_intent(ops, &ElementModel::default(), &mut doc)
            .expect_err("blocked");
        match err {
            EngineError::ValidationFailed { warnings } => {
                assert!(warnings.iter().any(|w| w.code == WarningCode::BlockedTarget));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(doc.to_html(), before);
    }

    #[test]
    fn test_failed_apply_rolls_back_earlier_ops() {
        let mut session = session();
        let mut doc = MemoryDocument::new();
        let before = doc.to_html();
        let ops = vec![
            RawOp {
                kind: "update_attribute".into(),
                target: Some("#canvas-root".into()),
                name: Some("class".into()),
                value: Some("x".into()),
                ..RawOp::default()
            },
            RawOp {
                kind: "update_text".into(),
                target: Some("#nowhere".into()),
                value: Some("y".into()),
                ..RawOp::default()
            },
        ];
        let err = session
            .apply_intent(ops, &ElementModel::default(), &mut doc)
            .expect_err("missing target");
        assert!(matches!(
            err,
            EngineError::Document(DocumentError::TargetNotFound(ref t)) if t == "#nowhere"
        ));
        assert_eq!(doc.to_html(), before);
        assert!(doc.take_observed().is_empty());
    }

    #[test]
    fn test_reorder_and_flow_guard() {
        let session = session();
        let mut model = ElementModel::default();
        model.push(absolute("a", 0.0, 10_001));
        model.push(absolute("b", 0.0, 10_005));
        model.push(CanvasElement::flow(
            "flow-x",
            ElementKind::Text {
                content: String::new(),
            },
        ));

        let warnings = session
            .reorder(&mut model, &ElementId::from("a"), Reorder::BringToFront)
            .expect("reorder");
        assert!(warnings.is_empty());
        assert_eq!(model.get(&ElementId::from("a")).and_then(CanvasElement::z_index), Some(10_006));

        let flow = session
            .reorder(&mut model, &ElementId::from("flow-x"), Reorder::StepForward)
            .expect("reorder");
        assert_eq!(flow[0].code, WarningCode::FlowElementNotOrderable);
    }

    #[test]
    fn test_desktop_edit_regenerates_but_keeps_overrides() {
        let session = session();
        let mut model = ElementModel::default();
        model.push(absolute("a", 100.0, 10_001));
        let id = ElementId::from("a");

        session
            .edit_transform(
                &mut model,
                &id,
                Breakpoint::Mobile,
                TransformEdit::Set(Transform::rect(5.0, 5.0, 50.0, 50.0)),
                800.0,
            )
            .expect("mobile edit");
        session
            .edit_transform(
                &mut model,
                &id,
                Breakpoint::Desktop,
                TransformEdit::Move { dx: 44.0, dy: 0.0 },
                900.0,
            )
            .expect("desktop edit");

        let element = model.get(&id).expect("element");
        let tablet = element.transform_at(Breakpoint::Tablet).expect("tablet");
        let mobile = element.transform_at(Breakpoint::Mobile).expect("mobile");
        assert!((tablet.x - 76.8).abs() < 1e-9);
        assert_eq!(mobile, Transform::rect(5.0, 5.0, 50.0, 50.0));
    }

    #[test]
    fn test_edit_is_constrained_to_viewport() {
        let session = session();
        let mut model = ElementModel::default();
        model.push(absolute("a", 100.0, 10_001));
        let id = ElementId::from("a");
        session
            .edit_transform(
                &mut model,
                &id,
                Breakpoint::Desktop,
                TransformEdit::Move { dx: -500.0, dy: 5_000.0 },
                900.0,
            )
            .expect("edit");
        let desktop = model
            .get(&id)
            .and_then(|e| e.transform_at(Breakpoint::Desktop))
            .expect("desktop");
        assert_eq!((desktop.x, desktop.y), (0.0, 800.0));
    }
}
