pub mod api_keys;
pub mod credentials;
pub mod gate;
pub mod password;
pub mod session;
pub mod token;

pub use api_keys::{ApiKeySummary, ApiKeyVault, IssuedApiKey, KeyVerification};
pub use credentials::{AlphabetGenerator, CredentialGenerator, SequenceCredentialGenerator};
pub use gate::{
    Admin, ApiAccess, Authenticated, Authorized, CallerContext, GatePolicy, ImageGeneration, Policy,
    RequestGate, VideoGeneration, Via,
};
pub use password::{PasswordConfig, PasswordHasher};
pub use session::{NoSessions, SESSION_COOKIE, SessionResolver};
pub use token::Credentials;
