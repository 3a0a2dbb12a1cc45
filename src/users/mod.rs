//! # Users Module
//!
//! Account model, the repository that persists accounts, provider links
//! and refresh-token sets, and the admin-only account endpoints.

pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;


pub use models::{ProviderLink, RefreshTokenRecord, Role, User};
pub use repository::{SqliteUserRepository, UserRepository};
pub use routes::users_routes;
