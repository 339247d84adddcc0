//! Consumer-side helpers for following a job
//!
//! A client watches a job two ways: the persistent channel, reconnected with
//! backoff after abnormal closes, and a status poll that keeps running
//! regardless so a silently dropped channel never strands it.

pub mod status_poller;

pub use mv_common::backoff::{
    BackoffPolicy as ReconnectPolicy, ConnectionLifecycle, ReconnectDecision,
};
pub use mv_common::protocol::CloseKind;
pub use status_poller::{
    HttpStatusSource, PollError, StatusPoller, StatusSource, DEFAULT_POLL_INTERVAL,
};
