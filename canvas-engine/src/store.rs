//! Element-model storage behind an async seam.
//!
//! The engine itself never suspends; persistence is the one I/O-bound step.
//! Every save goes through [`persist_with_timeout`] so a slow or stuck store
//! surfaces as [`StoreError::Timeout`] instead of hanging the editor. A failed
//! save never touches the caller's in-memory model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::element::ElementModel;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store did not answer within the deadline.
    #[error("Store timed out after {0:?}")]
    Timeout(Duration),
    /// No model is stored under this document id.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backing service reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Latest change published by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Document that changed.
    pub document_id: String,
    /// Monotonic revision counter across the store.
    pub revision: u64,
}

/// Where element models live between editing sessions.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Read the model for a document.
    async fn load(&self, document_id: &str) -> Result<ElementModel, StoreError>;

    /// Write the model for a document; returns the new revision.
    async fn save(&self, document_id: &str, model: &ElementModel) -> Result<u64, StoreError>;

    /// Change notifications.
    fn subscribe(&self) -> watch::Receiver<Revision>;
}

/// Save `model` with a deadline.
///
/// # Errors
///
/// Returns [`StoreError::Timeout`] if the store does not finish in time, or
/// whatever the store itself reports.
pub async fn persist_with_timeout(
    store: &dyn ModelStore,
    document_id: &str,
    model: &ElementModel,
    deadline: Duration,
) -> Result<u64, StoreError> {
    match tokio::time::timeout(deadline, store.save(document_id, model)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Persisting {document_id} timed out after {deadline:?}");
            Err(StoreError::Timeout(deadline))
        }
    }
}

/// Load a model with a deadline.
///
/// # Errors
///
/// Returns [`StoreError::Timeout`] if the store does not finish in time, or
/// whatever the store itself reports.
pub async fn load_with_timeout(
    store: &dyn ModelStore,
    document_id: &str,
    deadline: Duration,
) -> Result<ElementModel, StoreError> {
    tokio::time::timeout(deadline, store.load(document_id))
        .await
        .map_err(|_| StoreError::Timeout(deadline))?
}

struct Notifier {
    counter: AtomicU64,
    sender: watch::Sender<Revision>,
}

impl Notifier {
    fn new() -> Self {
        let (sender, _) = watch::channel(Revision::default());
        Self {
            counter: AtomicU64::new(0),
            sender,
        }
    }

    fn bump(&self, document_id: &str) -> u64 {
        let revision = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender.send_replace(Revision {
            document_id: document_id.to_string(),
            revision,
        });
        revision
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("counter", &self.counter.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Process-local store.
#[derive(Debug, Clone)]
pub struct InMemoryModelStore {
    models: Arc<RwLock<HashMap<String, ElementModel>>>,
    notifier: Arc<Notifier>,
}

impl Default for InMemoryModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryModelStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
            notifier: Arc::new(Notifier::new()),
        }
    }

    /// Stored document ids.
    pub async fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.models.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn load(&self, document_id: &str) -> Result<ElementModel, StoreError> {
        self.models
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))
    }

    async fn save(&self, document_id: &str, model: &ElementModel) -> Result<u64, StoreError> {
        self.models
            .write()
            .await
            .insert(document_id.to_string(), model.clone());
        Ok(self.notifier.bump(document_id))
    }

    fn subscribe(&self) -> watch::Receiver<Revision> {
        self.notifier.sender.subscribe()
    }
}

/// JSON files under a data directory, one per document.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    data_dir: PathBuf,
    notifier: Arc<Notifier>,
}

impl FileModelStore {
    /// Open a store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(Self {
            data_dir,
            notifier: Arc::new(Notifier::new()),
        })
    }

    fn path_for(&self, document_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.json", sanitize_filename(document_id)))
    }

    /// Document ids with a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be read.
    pub async fn document_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn load(&self, document_id: &str) -> Result<ElementModel, StoreError> {
        let path = self.path_for(document_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::DocumentNotFound(document_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, document_id: &str, model: &ElementModel) -> Result<u64, StoreError> {
        let json = serde_json::to_string_pretty(model)?;
        let path = self.path_for(document_id);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        tracing::debug!("Persisted {document_id} to {}", path.display());
        Ok(self.notifier.bump(document_id))
    }

    fn subscribe(&self) -> watch::Receiver<Revision> {
        self.notifier.sender.subscribe()
    }
}

/// Sanitize a document id for use as a filename.
///
/// Replaces any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_filename(document_id: &str) -> String {
    document_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CanvasElement, ElementKind};
    use crate::transform::{BreakpointSet, Transform};

    fn model() -> ElementModel {
        let mut model = ElementModel::default();
        model.push(
            CanvasElement::absolute(
                ElementKind::Text {
                    content: "Persisted".to_string(),
                },
                BreakpointSet::desktop_only(Transform::rect(1.0, 2.0, 3.0, 4.0)),
                10_001,
            )
            .with_id("canvas-p"),
        );
        model
    }

    struct StuckStore;

    struct FailingStore;

    #[async_trait]
    impl ModelStore for FailingStore {
        async fn load(&self, _: &str) -> Result<ElementModel, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        async fn save(&self, _: &str, _: &ElementModel) -> Result<u64, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn subscribe(&self) -> watch::Receiver<Revision> {
            watch::channel(Revision::default()).1
        }
    }

    #[async_trait]
    impl ModelStore for StuckStore {
        async fn load(&self, _: &str) -> Result<ElementModel, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ElementModel::default())
        }

        async fn save(&self, _: &str, _: &ElementModel) -> Result<u64, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        }

        fn subscribe(&self) -> watch::Receiver<Revision> {
            watch::channel(Revision::default()).1
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("site/home page"), "site_home_page");
        assert_eq!(sanitize_filename("doc-1_a"), "doc-1_a");
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_and_revisions() {
        let store = InMemoryModelStore::new();
        let mut changes = store.subscribe();
        let saved = model();

        assert!(matches!(
            store.load("home").await,
            Err(StoreError::DocumentNotFound(_))
        ));
        let revision = store.save("home", &saved).await.expect("save");
        assert_eq!(revision, 1);
        assert_eq!(store.load("home").await.expect("load"), saved);

        changes.changed().await.expect("notified");
        assert_eq!(changes.borrow().document_id, "home");
        assert_eq!(store.document_ids().await, vec!["home".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileModelStore::open(dir.path()).await.expect("open");
        let saved = model();
        store.save("site/home", &saved).await.expect("save");

        let reopened = FileModelStore::open(dir.path()).await.expect("reopen");
        assert_eq!(reopened.load("site/home").await.expect("load"), saved);
        assert_eq!(
            reopened.document_ids().await.expect("ids"),
            vec!["site_home".to_string()]
        );
        assert!(matches!(
            reopened.load("missing").await,
            Err(StoreError::DocumentNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_times_out_without_touching_model() {
        let original = model();
        let working = original.clone();
        let result =
            persist_with_timeout(&StuckStore, "home", &working, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == Duration::from_millis(50)));
        assert_eq!(working, original);

        let loaded = load_with_timeout(&StuckStore, "home", Duration::from_millis(50)).await;
        assert!(matches!(loaded, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_persist_within_deadline() {
        let store = InMemoryModelStore::new();
        let revision = persist_with_timeout(&store, "home", &model(), Duration::from_secs(1))
            .await
            .expect("persist");
        assert_eq!(revision, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_passes_through() {
        let result =
            persist_with_timeout(&FailingStore, "home", &model(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StoreError::Backend(ref m)) if m == "offline"));
    }
}
