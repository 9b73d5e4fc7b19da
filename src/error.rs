//! Error taxonomy for the acquisition core (spec §6/§7).

use thiserror::Error;

/// Errors returned to a caller of a public control operation.
///
/// Hot-path invariant violations (e.g. a projector/basis whose size does
/// not match the record length) are not represented here: those `panic!`
/// in place, because continuing would silently produce corrupt records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("source is already running")]
    AlreadyRunning,

    #[error("source has not been configured (call sample()/prepareRun() first)")]
    NotConfigured,

    #[error("channel index {0} is out of range")]
    BadChannelIndex(usize),

    #[error("record shape invalid: {0}")]
    BadRecordShape(String),

    #[error("projector/basis shape mismatch: {0}")]
    ProjectorBasisShapeMismatch(String),

    #[error("a write is already in progress for this sink")]
    WriteAlreadyInProgress,

    #[error("source timed out waiting for data")]
    SourceTimeout,

    #[error("operation unsupported on this source")]
    UnsupportedOnThisSource,
}

pub type CoreResult<T> = Result<T, CoreError>;
