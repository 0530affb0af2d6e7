//! Errors raised while preparing a run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that prevent a load test from starting.
///
/// Failures of individual requests are never reported through this type. They are recorded as
/// [`Outcome`](crate::http::Outcome)s and feed the threshold monitor instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The record catalog could not be read.
    #[error("failed to read catalog `{path}`")]
    Catalog {
        /// The configured catalog path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: std::io::Error,
    },

    /// The record catalog is not a valid document listing.
    #[error("malformed catalog: {0}")]
    CatalogParse(#[from] serde_json::Error),

    /// The record catalog parsed, but lists no records.
    #[error("catalog contains no records")]
    EmptyCatalog,

    /// The workload mix cannot select any operation.
    #[error("invalid workload mix: {0}")]
    InvalidMix(String),

    /// A threshold expression could not be parsed or does not apply to its metric.
    #[error("invalid threshold `{expression}`: {reason}")]
    InvalidThreshold {
        /// The expression as written in the configuration.
        expression: String,
        /// Why the expression was rejected.
        reason: String,
    },

    /// The mix writes documents, but no payloads were generated.
    #[error("payload pool is empty")]
    EmptyPool,

    /// The mix searches by keyword, but the vocabulary is empty.
    #[error("keyword set is empty")]
    EmptyKeywords,

    /// The ramp profile has no stages.
    #[error("stage profile contains no stages")]
    NoStages,

    /// Loading fixtures and generating payloads took longer than allowed.
    #[error("setup did not finish within {0:?}")]
    SetupTimeout(Duration),

    /// The setup task was cancelled before it produced a dataset.
    #[error("setup was cancelled")]
    SetupCancelled,

    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
