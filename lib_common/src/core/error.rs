//! Error taxonomy for the relay engine.
//!
//! Transport failures and relay faults are recoverable: the control loop logs
//! them, tears the session down and starts over. Invalid user input never shows
//! up here, it is answered with a chat reply by the command interpreter.

use thiserror::Error;

/// Failures reported by a chat or stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The remote rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// An established connection went away.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The remote API answered with an application level error.
    #[error("{method} failed: {error}")]
    Api {
        /// The API method or endpoint that failed.
        method: String,
        /// The error reported by the remote.
        error: String,
    },

    /// A payload could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Failures of the stream session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A stream was requested with nothing to filter on.
    #[error("refusing to open a stream with an empty keyword filter")]
    EmptyFilter,

    /// The streaming transport could not be opened.
    #[error("failed to open stream: {0}")]
    Open(#[from] TransportError),
}

/// Faults reported by the stream worker to the control loop, tagged with the
/// session generation that raised them.
#[derive(Debug, Error)]
pub enum RelayFault {
    /// Posting a matched item to chat failed.
    #[error("relay post failed in generation {generation}: {error}")]
    Post {
        /// Generation of the worker that tried to post.
        generation: u64,
        /// Why the post failed.
        error: TransportError,
    },

    /// The upstream stream ended or errored while a session was live.
    #[error("stream worker of generation {generation} stopped: {error}")]
    Stream {
        /// Generation of the worker whose stream failed.
        generation: u64,
        /// Why the stream failed.
        error: TransportError,
    },
}

impl RelayFault {
    /// The session generation the fault belongs to.
    pub fn generation(&self) -> u64 {
        match self {
            RelayFault::Post { generation, .. } | RelayFault::Stream { generation, .. } => *generation,
        }
    }
}

/// Top level error of the relay engine.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A chat transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A stream session could not be (re)started.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The stream worker reported a fault.
    #[error(transparent)]
    Fault(#[from] RelayFault),
}

/// Result alias used across the engine.
pub type RelayResult<T> = Result<T, RelayError>;
