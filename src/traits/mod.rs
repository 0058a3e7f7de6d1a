//! Backend-agnostic traits for outbound collaborators.

pub mod mailer;

pub use mailer::{Email, Mailer};
