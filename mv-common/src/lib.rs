//! Shared types for the MedVision analysis service and its clients
//!
//! Holds everything both sides of the wire agree on: job status values,
//! severity tiers, event payloads, the channel envelope, the reconnect
//! backoff policy, and the config/logging bootstrap helpers.

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;

pub use error::{Error, Result};
