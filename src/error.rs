use thiserror::Error;

use crate::object::Diag;

/// Host-level failures surfaced at the embedding boundary.
///
/// Language-level failures travel as error Objects through the evaluation
/// pipeline and never become `Err` inside the core; this enum is for
/// callers (the CLI, an embedding document) that want a typed result out of
/// a finished evaluation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Diagnostic(Diag),
    #[error("evaluation stopped by observer")]
    Stopped,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}

impl From<Diag> for Error {
    fn from(diag: Diag) -> Self {
        Error::Diagnostic(diag)
    }
}
