//! Document sync observer.
//!
//! External mutations (a paste, a third-party script) can invalidate cached
//! registry handles. The observer collects the affected ids and reconciles
//! them in one throttled batch:
//!
//! ```text
//!   observe(m) ──► ThrottledScheduler ──(interval elapsed)──► poll ──► registry
//!                   pending ids / full                         flush ─┘ (forced)
//! ```
//!
//! Time comes from a [`Clock`], so tests drive the throttle with a
//! [`ManualClock`] instead of sleeping.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ObserverConfig;
use crate::document::{LiveDocument, MutationOrigin, ObservedMutation};
use crate::element::ElementId;
use crate::registry::AddressingRegistry;

/// Monotonic time source.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// A clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Work collected by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    /// Ids to re-resolve.
    pub ids: BTreeSet<String>,
    /// Whether a full rescan was requested.
    pub full_rescan: bool,
}

/// Timer + pending set + flush.
///
/// The first request after an idle period arms a deadline one interval out;
/// later requests join the same batch without moving it.
#[derive(Debug, Clone)]
pub struct ThrottledScheduler<C: Clock> {
    clock: C,
    interval: Duration,
    pending: PendingBatch,
    deadline: Option<Duration>,
}

impl<C: Clock> ThrottledScheduler<C> {
    /// Create a scheduler.
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            pending: PendingBatch::default(),
            deadline: None,
        }
    }

    /// Queue ids for re-resolution.
    pub fn schedule<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.ids.extend(ids.into_iter().map(Into::into));
        self.arm();
    }

    /// Queue a full rescan.
    pub fn request_full_rescan(&mut self) {
        self.pending.full_rescan = true;
        self.arm();
    }

    fn arm(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(self.clock.now() + self.interval);
        }
    }

    /// Whether work is pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.full_rescan || !self.pending.ids.is_empty()
    }

    /// Whether the throttle interval has elapsed for the pending batch.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.deadline.is_some_and(|d| self.clock.now() >= d)
    }

    /// Take the pending batch if it is due.
    pub fn take_due(&mut self) -> Option<PendingBatch> {
        if self.is_due() {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take the pending batch regardless of the deadline.
    pub fn take(&mut self) -> PendingBatch {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Ids that resolved.
    pub resolved: usize,
    /// Ids that did not resolve.
    pub missing: Vec<ElementId>,
    /// Whether this pass was a full rescan.
    pub full_rescan: bool,
}

/// Filters document mutations and reconciles the registry in throttled batches.
#[derive(Debug, Clone)]
pub struct SyncObserver<C: Clock = SystemClock> {
    scheduler: ThrottledScheduler<C>,
}

impl Default for SyncObserver<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock::default(), &ObserverConfig::default())
    }
}

impl<C: Clock> SyncObserver<C> {
    /// Create an observer on `clock`.
    pub fn new(clock: C, config: &ObserverConfig) -> Self {
        Self {
            scheduler: ThrottledScheduler::new(clock, Duration::from_millis(config.throttle_ms)),
        }
    }

    /// Record a mutation. Returns whether it was queued.
    ///
    /// The engine's own mutations and anything inside the canvas subtree are
    /// ignored. A mutation that cannot be attributed to tagged nodes queues a
    /// full rescan.
    pub fn observe(&mut self, mutation: &ObservedMutation) -> bool {
        if mutation.origin == MutationOrigin::Compiler || mutation.in_canvas_subtree {
            return false;
        }
        if mutation.affected_ids.is_empty() {
            tracing::debug!("Unattributed external mutation; scheduling full rescan");
            self.scheduler.request_full_rescan();
        } else {
            self.scheduler.schedule(mutation.affected_ids.iter().cloned());
        }
        true
    }

    /// Record several mutations. Returns how many were queued.
    pub fn observe_all<'a, I>(&mut self, mutations: I) -> usize
    where
        I: IntoIterator<Item = &'a ObservedMutation>,
    {
        mutations.into_iter().filter(|m| self.observe(m)).count()
    }

    /// Reconcile if the throttle interval has elapsed.
    pub fn poll(
        &mut self,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
    ) -> Option<ReconcileReport> {
        let batch = self.scheduler.take_due()?;
        Some(Self::reconcile(batch, registry, doc))
    }

    /// Reconcile now, ignoring the throttle. Used after undo/redo and
    /// document replacement.
    pub fn flush(
        &mut self,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
    ) -> ReconcileReport {
        let batch = self.scheduler.take();
        Self::reconcile(batch, registry, doc)
    }

    /// Whether work is waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.scheduler.has_pending()
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &ThrottledScheduler<C> {
        &self.scheduler
    }

    fn reconcile(
        batch: PendingBatch,
        registry: &mut AddressingRegistry,
        doc: &dyn LiveDocument,
    ) -> ReconcileReport {
        if batch.full_rescan {
            let sync = registry.sync(doc);
            return ReconcileReport {
                resolved: sync.resolved,
                missing: sync.missing,
                full_rescan: true,
            };
        }
        let mut report = ReconcileReport::default();
        for id in batch.ids.into_iter().map(ElementId::from) {
            if registry.resolve(doc, &id).is_some() {
                report.resolved += 1;
            } else {
                report.missing.push(id);
            }
        }
        if !report.missing.is_empty() {
            tracing::debug!("Reconcile left {} ids unresolved", report.missing.len());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeHandle;
    use crate::memory::MemoryDocument;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn observer(clock: &ManualClock) -> SyncObserver<ManualClock> {
        SyncObserver::new(clock.clone(), &ObserverConfig { throttle_ms: 100 })
    }

    fn tagged_doc() -> (MemoryDocument, NodeHandle) {
        let mut doc = MemoryDocument::new();
        let content = doc.content();
        let p = doc
            .append_element(content, "p", &[("data-flow-id", "flow-1")], "one")
            .expect("append");
        (doc, p)
    }

    #[test]
    fn test_scheduler_throttles_until_interval() {
        let clock = ManualClock::new();
        let mut scheduler = ThrottledScheduler::new(clock.clone(), INTERVAL);
        scheduler.schedule(["a"]);
        clock.advance(Duration::from_millis(60));
        scheduler.schedule(["b"]);
        assert!(scheduler.take_due().is_none());

        clock.advance(Duration::from_millis(40));
        let batch = scheduler.take_due().expect("due");
        assert_eq!(batch.ids.len(), 2);
        assert!(!scheduler.has_pending());
        assert!(!scheduler.is_due());
    }

    #[test]
    fn test_compiler_and_canvas_mutations_are_ignored() {
        let clock = ManualClock::new();
        let mut observer = observer(&clock);
        let own = ObservedMutation {
            origin: MutationOrigin::Compiler,
            affected_ids: vec!["x".into()],
            in_canvas_subtree: false,
        };
        let canvas = ObservedMutation {
            in_canvas_subtree: true,
            ..ObservedMutation::external(["canvas-1"])
        };
        assert_eq!(observer.observe_all([&own, &canvas]), 0);
        assert!(!observer.has_pending());
    }

    #[test]
    fn test_external_edit_reconciles_after_interval() {
        let (mut doc, p) = tagged_doc();
        let mut registry = AddressingRegistry::default();
        registry.register_flow(&doc, p);
        let clock = ManualClock::new();
        let mut observer = observer(&clock);

        doc.external_set_text(p, "changed");
        let queued = observer.observe_all(&doc.take_observed());
        assert_eq!(queued, 1);
        assert!(observer.poll(&mut registry, &doc).is_none());

        clock.advance(INTERVAL);
        let report = observer.poll(&mut registry, &doc).expect("due");
        assert_eq!(report.resolved, 1);
        assert!(!report.full_rescan);
    }

    #[test]
    fn test_flush_ignores_throttle() {
        let (mut doc, p) = tagged_doc();
        let mut registry = AddressingRegistry::default();
        registry.register_flow(&doc, p);
        let mut observer = observer(&ManualClock::new());

        doc.external_remove(p);
        observer.observe_all(&doc.take_observed());
        let report = observer.flush(&mut registry, &doc);
        assert_eq!(report.missing, vec![ElementId::from("flow-1")]);
        assert!(!observer.has_pending());
    }

    #[test]
    fn test_document_replacement_triggers_full_rescan() {
        let (mut doc, p) = tagged_doc();
        let mut registry = AddressingRegistry::default();
        registry.register_flow(&doc, p);
        let mut observer = observer(&ManualClock::new());

        let (fresh, _) = tagged_doc();
        doc.replace_with(fresh);
        observer.observe_all(&doc.take_observed());
        let report = observer.flush(&mut registry, &doc);
        assert!(report.full_rescan);
        assert_eq!(report.resolved, 1);
        assert!(report.missing.is_empty());
    }
}
