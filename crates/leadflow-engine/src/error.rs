use leadflow_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    /// Covers both "does not exist" and "belongs to someone else".
    #[error("{0}")]
    NotFound(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("import contains no rows")]
    EmptyImport,
    #[error("no field agents available")]
    NoAgents,
    #[error("no data to export")]
    NoData,
    #[error("administrator privileges required")]
    Forbidden,
    #[error(
        "distribution of batch {batch_id} stopped after {inserted} of {expected} leads: {source}"
    )]
    PartialDistribution {
        batch_id: String,
        inserted: usize,
        expected: usize,
        #[source]
        source: StorageError,
    },
    #[error("sheet serialization failed: {0}")]
    Sheet(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code for transport bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidStatus(_) => "invalid_status",
            EngineError::EmptyImport => "empty_import",
            EngineError::NoAgents => "no_agents",
            EngineError::NoData => "no_data",
            EngineError::Forbidden => "forbidden",
            EngineError::PartialDistribution { .. } => "partial_distribution",
            EngineError::Sheet(_) => "sheet_error",
            EngineError::Storage(_) => "storage_error",
        }
    }
}
