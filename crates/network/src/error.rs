//! Network errors

use grid_broker::ActorId;
use thiserror::Error;

/// Misuse of the network by its driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network is not running")]
    NotRunning,

    #[error("Unknown node: {0}")]
    UnknownNode(ActorId),
}
