//! # Transport Ingestors
//!
//! Concrete implementations of the engine's collaborators:
//!
//! - **`twitter_stream`**: the Twitter v2 filtered stream. Opening a stream
//!   replaces the account's stream rules with one rule per keyword and then
//!   reads newline-delimited tweets.
//! - **`slack_rtm`**: Slack chat. Events come from the RTM WebSocket, posts and
//!   channel listings go through the Web API.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Slack RTM chat transport and Web API sink.
pub mod slack_rtm;
/// Twitter v2 filtered stream transport.
pub mod twitter_stream;

pub use slack_rtm::{SlackClient, SlackRtm};
pub use twitter_stream::TwitterStream;

use crate::core::error::TransportError;
use crate::retrieve::HttpError;

impl From<HttpError> for TransportError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Url(e) => TransportError::Connect(e.to_string()),
            HttpError::Request(e) if e.is_decode() => TransportError::Decode(e.to_string()),
            HttpError::Request(e) => TransportError::Connect(e.to_string()),
            HttpError::Json(e) => TransportError::Decode(e.to_string()),
        }
    }
}
