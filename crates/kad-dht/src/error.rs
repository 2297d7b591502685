//! Errors the node façade surfaces to callers: "propagation
//! policy" — per-RPC errors surface once, wire-level failures never do.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("request timed out")]
    Timeout,

    #[error("bootstrap peer did not respond")]
    BootstrapFailed,

    #[error("value not found")]
    NotFound,

    #[error("node has not called listen() yet")]
    NotRunning,

    #[error(transparent)]
    Transport(#[from] kad_core::Error),
}

pub type Result<T> = std::result::Result<T, DhtError>;
