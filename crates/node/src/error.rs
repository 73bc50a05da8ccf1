//! Node-level errors.

use lightclient_odr::{ControlError, OdrError, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("distributor error: {0}")]
    Control(#[from] ControlError),

    #[error("retrieval error: {0}")]
    Odr(#[from] OdrError),
}
