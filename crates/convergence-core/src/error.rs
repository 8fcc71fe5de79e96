//! Error taxonomy for the coordinator (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the OT engine, concurrency controllers, and coordinator.
///
/// [`CoreError::is_model_fatal`] implements the classification from
/// `spec.md` §7: model-fatal errors force-close every participant, transient
/// errors are scoped to the offending participant or request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("participant {0} is not open against this model")]
    ModelNotOpened(String),

    #[error("participant {0} already has this model open")]
    ModelAlreadyOpen(String),

    #[error("context version {context} is ahead of model version {model}")]
    InvalidContextVersion { context: u64, model: u64 },

    #[error("model not found")]
    ModelNotFound,

    #[error("model was deleted")]
    ModelDeleted,

    #[error("client data response was malformed or rejected: {0}")]
    MalformedDataResponse(String),

    #[error("data request timed out")]
    DataRequestTimeout,

    #[error("operation transform failed: {0}")]
    Transform(String),

    #[error("failed applying operation to tree: {0}")]
    Apply(String),

    #[error("persistence error: {0}")]
    Storage(String),

    #[error("inconsistent version after concurrency control (internal bug): {0}")]
    InconsistentVersion(String),
}

impl CoreError {
    /// True for errors that must force-close every participant of the model
    /// (`spec.md` §7 "Model-fatal errors"). False for errors scoped to a
    /// single participant or a single lifecycle request.
    pub fn is_model_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Transform(_)
                | CoreError::Apply(_)
                | CoreError::Storage(_)
                | CoreError::InconsistentVersion(_)
        )
    }
}
