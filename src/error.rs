//! Error taxonomy for strip graph operations.
//!
//! Every fallible operation returns [`Result`]. Operations that fail leave the
//! graph exactly as it was before the call (duplication copies into scratch
//! state and splices only on success).

use thiserror::Error;

use crate::entities::collab::DecodeError;
use crate::entities::strip::StripId;

#[derive(Debug, Error)]
pub enum StripError {
    /// Allocator ceiling reached. Fatal to the current operation only.
    #[error(
        "allocation failed: {requested} strips requested, limit is {limit} \
         (operation aborted, nothing changed)"
    )]
    AllocationFailure { requested: usize, limit: usize },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("strip {0} does not exist in this editing context")]
    UnknownStrip(StripId),

    #[error("strip {0} is not a container")]
    NotAContainer(StripId),

    /// Pop on an empty navigation stack. Callers are expected to check
    /// `is_empty()` first.
    #[error("navigation stack underflow")]
    StackUnderflow,

    #[error("effect '{effect}' takes {expected} operand(s), got {got}")]
    OperandCount {
        effect: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown effect type '{0}'")]
    UnknownEffect(String),

    #[error("unsupported timeline document version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StripError>;
