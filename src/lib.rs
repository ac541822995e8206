pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod url;

pub use auth::identity::{AssuranceLevel, IdentityContext};
pub use auth::AuthGateway;
pub use config::AuthConfig;
pub use error::AuthError;
