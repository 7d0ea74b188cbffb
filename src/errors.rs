//! Error kinds shared by the codec, the transforms and the pipelines.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Record count or arity mismatch, truncated file, misaligned columns.
    #[error("format error: {0}")]
    Format(String),

    /// A value outside the domain of a transform (e.g. non-positive parallax).
    #[error("domain error: {0}")]
    Domain(String),

    /// No record survived a selection. Callers decide whether this is fatal.
    #[error("empty selection: {0}")]
    SelectionEmpty(String),

    #[error("cfitsio error code {code}: {message}")]
    Fits { code: i32, message: String },

    #[error("invalid request: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }

    pub fn domain<S: Into<String>>(msg: S) -> Self {
        Error::Domain(msg.into())
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Error::Domain(_))
    }
}
