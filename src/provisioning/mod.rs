//! Payment-driven account provisioning.
//!
//! [`Reconciler`] converges the webhook and the polling client onto one
//! account and one temporary credential per paid session. [`SessionPoller`]
//! is the bounded client side of the polling fallback.

mod poller;
mod reconciler;

#[cfg(feature = "client")]
pub use poller::HttpSessionStatus;
pub use poller::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, PollOutcome, SessionPoller, SessionStatusSource,
};
pub use reconciler::{PaidSession, ProvisionOutcome, Provisioned, Reconciler, SessionPollStatus};
