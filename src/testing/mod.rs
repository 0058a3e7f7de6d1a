//! Testing utilities for plangate applications
//!
//! - Request scenarios against a router without a running server
//! - In-memory fakes for the payment processor, mailer, session store,
//!   generation provider and object storage
//!
//! # Example
//!
//! ```rust,ignore
//! use plangate::testing::{self, MockPaymentProcessor};
//!
//! #[tokio::test]
//! async fn test_usage_requires_credentials() {
//!     let app = test_app();
//!     testing::get(app, "/api/usage")
//!         .execute()
//!         .await
//!         .assert_unauthorized();
//! }
//! ```

mod fakes;
mod scenario;

pub use fakes::{
    MemoryObjectStorage, MockPaymentProcessor, RecordingMailer, StaticSessions,
    StubGenerationProvider,
};
pub use scenario::{Scenario, ScenarioAssert, delete, get, post};
