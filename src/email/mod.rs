//! Email sending
//!
//! Backends:
//! - `ConsoleMailer` - logs emails (for development)
//! - `ResendMailer` - sends through the Resend HTTP API (`resend` feature)
//!
//! [`WelcomeTemplate`] renders the post-checkout welcome email.

mod console;
#[cfg(feature = "resend")]
mod resend;
mod welcome;

pub use console::ConsoleMailer;
#[cfg(feature = "resend")]
pub use resend::ResendMailer;
pub use welcome::WelcomeTemplate;

// Re-export Email from traits for convenience
pub use crate::traits::mailer::{Email, Mailer};
