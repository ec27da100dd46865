//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by the chat and stream transports: URL
//! joining, bearer authentication and JSON handling live here so the
//! transports only deal with their own payloads.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, HttpError};
