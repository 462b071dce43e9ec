use std::path::PathBuf;

use fpgrid_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PlanIoError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plan file {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("plan validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl PlanIoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
