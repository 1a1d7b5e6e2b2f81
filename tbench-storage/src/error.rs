use crate::run::RunId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Run {0} not found")]
    NotFound(RunId),
    #[error("Invalid run id: '{0}'")]
    InvalidRunId(String),
    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("Sink '{sink}' failed: {source}")]
    Sink {
        sink: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Run {id} was not persisted (primary: {primary}; emergency: {emergency})")]
    Persistence {
        id: RunId,
        primary: Box<Error>,
        emergency: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
