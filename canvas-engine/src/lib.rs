//! # Canvas Engine
//!
//! Mutation engine for a visual editor that overlays freely positioned
//! elements on a live document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               EditingSession                │
//! ├─────────────────────────────────────────────┤
//! │  Element Model   │  Mutation Compiler       │
//! │  - Breakpoints   │  - Ordered ops           │
//! │  - Z-index       │  - Responsive stylesheet │
//! ├─────────────────────────────────────────────┤
//! │  Registry        │  Pre-Commit Validator    │
//! │  - Stable ids    │  - Blocked targets       │
//! │  - Live handles  │  - Overlap advisories    │
//! ├─────────────────────────────────────────────┤
//! │  Spatial Index   │  Sync Observer           │
//! │  - Hit testing   │  - Throttled reconcile   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The element model is the source of truth; the registry, spatial index and
//! document are derived from it by [`EditingSession::commit`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compiler;
pub mod config;
pub mod document;
pub mod element;
pub mod error;
pub mod memory;
pub mod observer;
pub mod ops;
pub mod registry;
pub mod selector;
pub mod session;
pub mod spatial;
pub mod store;
pub mod transform;
pub mod validator;
pub mod warning;
pub mod zindex;

pub use compiler::{CompiledBatch, MutationCompiler};
pub use config::{
    BreakpointConfig, BudgetConfig, DocumentConfig, EngineConfig, ObserverConfig, SpatialConfig,
    ValidatorConfig, ZIndexConfig,
};
pub use document::{LiveDocument, MutationOrigin, NodeHandle, ObservedMutation};
pub use element::{CanvasElement, ElementId, ElementKind, ElementModel, Placement};
pub use error::{DocumentError, EngineError, EngineResult};
pub use memory::MemoryDocument;
pub use observer::{Clock, ManualClock, ReconcileReport, SyncObserver, SystemClock};
pub use ops::{InsertPosition, MarkupNode, MutationOp, RawOp};
pub use registry::{AddressingRegistry, Origin, RegistryEntry, SyncReport};
pub use session::{CommitReport, EditingSession, Reorder};
pub use spatial::SpatialIndex;
pub use store::{
    load_with_timeout, persist_with_timeout, FileModelStore, InMemoryModelStore, ModelStore,
    Revision, StoreError,
};
pub use transform::{Breakpoint, BreakpointModel, BreakpointSet, Rect, Transform, TransformEdit};
pub use validator::{PreCommitValidator, ValidationReport};
pub use warning::{Adjusted, Severity, ValidationWarning, WarningCode};
pub use zindex::{Layer, ZIndex, ZIndexPolicy};

/// Canvas engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
