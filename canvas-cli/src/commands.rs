//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use canvas_engine::{
    load_with_timeout, persist_with_timeout, AddressingRegistry, EditingSession, ElementModel,
    EngineConfig, EngineError, FileModelStore, MemoryDocument, MutationOp, PreCommitValidator,
    RawOp, StoreError, ValidationReport, ValidationWarning,
};
use serde::Serialize;

/// Errors that can occur while running a subcommand.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// An input file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// An input file is not valid JSON for its type.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The engine rejected the input.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The model store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of `compile`.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOutput {
    /// Operations applied, in order.
    pub operations: Vec<MutationOp>,
    /// Corrections and advisories.
    pub warnings: Vec<ValidationWarning>,
    /// Resulting document markup, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Result of `save`.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutput {
    /// Document id.
    pub document: String,
    /// Store revision after the write.
    pub revision: u64,
    /// Number of elements written.
    pub elements: usize,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let json = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Compile the model at `path` into a fresh document.
///
/// # Errors
///
/// Returns an error if the model cannot be read or the batch fails validation.
pub fn compile(config: &EngineConfig, path: &Path, html: bool) -> Result<CompileOutput, CliError> {
    let model: ElementModel = read_json(path)?;
    let mut doc = MemoryDocument::with_config(config.document.clone());
    let mut session = EditingSession::new(config.clone())?;
    let report = session.commit(&model, &mut doc)?;
    tracing::debug!(
        operations = report.applied.len(),
        warnings = report.warnings.len(),
        "Compiled {}",
        path.display()
    );
    Ok(CompileOutput {
        operations: report.applied,
        warnings: report.warnings,
        html: html.then(|| doc.to_html()),
    })
}

/// Validate the operation batch at `ops_path`.
///
/// Without a model, z-index and overlap checks see an empty canvas.
///
/// # Errors
///
/// Returns an error if either file cannot be read.
pub fn validate(
    config: &EngineConfig,
    ops_path: &Path,
    model_path: Option<&Path>,
) -> Result<ValidationReport, CliError> {
    let ops: Vec<RawOp> = read_json(ops_path)?;
    let model = match model_path {
        Some(path) => read_json(path)?,
        None => ElementModel::default(),
    };
    let registry = AddressingRegistry::new(
        config.document.clone(),
        Duration::from_millis(config.budgets.rescan_ms),
    );
    let validator = PreCommitValidator::new(config.validator.clone(), &config.document);
    Ok(validator.validate(&ops, &model, &registry))
}

/// Persist the model at `path` under `document`.
///
/// # Errors
///
/// Returns an error if the model cannot be read or the store fails or times out.
pub async fn save(
    config: &EngineConfig,
    data_dir: &Path,
    document: &str,
    path: &Path,
) -> Result<SaveOutput, CliError> {
    let model: ElementModel = read_json(path)?;
    let store = FileModelStore::open(data_dir).await?;
    let deadline = Duration::from_millis(config.budgets.persist_timeout_ms);
    let revision = persist_with_timeout(&store, document, &model, deadline).await?;
    Ok(SaveOutput {
        document: document.to_string(),
        revision,
        elements: model.len(),
    })
}

/// Load the model persisted under `document`.
///
/// # Errors
///
/// Returns an error if the document is missing or the store fails or times out.
pub async fn load(
    config: &EngineConfig,
    data_dir: &Path,
    document: &str,
) -> Result<ElementModel, CliError> {
    let store = FileModelStore::open(data_dir).await?;
    let deadline = Duration::from_millis(config.budgets.persist_timeout_ms);
    Ok(load_with_timeout(&store, document, deadline).await?)
}
