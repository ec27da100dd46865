//! # Core Relay Engine
//!
//! Everything with shared state and concurrency lives here. The rest of the
//! repository (transports, logging, configuration) plugs into it.
//!
//! ## Core Components:
//!
//! - **`subscriptions`**: the tracked keywords and their match counters.
//!
//! - **`session`**: one keyword-filtered upstream connection and its worker
//!   task. Filter changes retire the running generation before opening the
//!   next, so at most one worker calls the match callback.
//!
//! - **`commands`**: parses chat mentions and decides, without side effects,
//!   what each verb does to the subscriptions and the session.
//!
//! - **`relay`**: the single lock around subscriptions and session. It applies
//!   interpreted commands.
//!
//! - **`bridge`**: the listener the stream worker calls for each accepted item.
//!   It counts matches and posts the text to chat.
//!
//! - **`control`**: the supervising loop that polls chat, feeds commands to the
//!   relay and restarts everything after a failure.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Listener that counts matches and relays items to chat.
pub mod bridge;
/// Chat command parsing and interpretation.
pub mod commands;
/// The supervising control loop.
pub mod control;
/// Error types shared by the engine and its transports.
pub mod error;
/// The lock-protected subscription set and stream session.
pub mod relay;
/// Restartable upstream stream connection.
pub mod session;
/// Tracked keywords and match counters.
pub mod subscriptions;

// --- Public API Re-exports ---
pub use bridge::{ChatSink, FaultReceiver};
pub use commands::{interpret, Command, CommandContext, Mutation, Outcome, Reply, StreamAction, Verb};
pub use control::{extract_mentions, ChatFrame, ChatTransport, ControlLoop, ControlSettings, Mention};
pub use error::{RelayError, RelayFault, RelayResult, SessionError, TransportError};
pub use relay::{Relay, RelaySettings};
pub use session::{
    EventStream, SessionState, StreamEvent, StreamItem, StreamListener, StreamSession, StreamTransport,
};
pub use subscriptions::SubscriptionSet;
