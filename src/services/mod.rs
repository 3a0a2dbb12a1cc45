// src/services/mod.rs
//
// Authentication services shared by the HTTP handlers

pub mod audit;
pub mod auth;
pub mod identity;
pub mod monitoring;
pub mod password;
pub mod sessions;
pub mod tokens;

// Re-export commonly used types for convenience
pub use audit::{AuditLog, SqliteAuditStore};
pub use auth::{AuthService, NewAccount, OAuthOutcome};
pub use identity::IdentityResolver;
pub use sessions::SessionStore;
pub use tokens::{TokenPair, TokenService};
