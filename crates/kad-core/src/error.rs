//! Error types that are allowed to cross the transport/codec boundary.
//!
//! Per-frame failures that must be absorbed rather than propagated (a
//! decode error on receive, an unknown nonce, a self-reflected frame) are
//! *not* represented here — they are logged and dropped at the point they
//! occur (the multiplexer), never surfaced as a `Result::Err`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transport is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;
