use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cluster connection error: {0}")]
    Connection(String),

    #[error("Failed to register dataset '{dataset}': {reason}")]
    Registration { dataset: String, reason: String },

    #[error("Stage '{stage}' failed: {source}")]
    Execution {
        stage: String,
        #[source]
        source: DataFusionError,
    },

    #[error("Post-processing error: {0}")]
    PostProcess(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn registration(dataset: &str, reason: impl Into<String>) -> Self {
        Error::Registration {
            dataset: dataset.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
