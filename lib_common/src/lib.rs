//! # lib_common
//!
//! Shared library for the PBJTIME keyword relay. The `core` engine owns the
//! tracked keywords and the upstream stream lifecycle, `ingestors` provides the
//! concrete Slack and Twitter transports, `retrieve` the HTTP client they sit on,
//! and `loggers` the console/file logging used by the binaries.
//!
//! Modules are gated behind cargo features of the same name so that test
//! harnesses can pull in the engine without any network stack.

#![forbid(unsafe_code)]

/// Subscription tracking, stream sessions, command handling and supervision.
#[cfg(feature = "core")]
pub mod core;

/// Concrete chat and stream transports.
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// Console and rotating file logging.
#[cfg(feature = "loggers")]
pub mod loggers;

/// JSON-over-HTTP client.
#[cfg(feature = "retrieve")]
pub mod retrieve;
