//! # Auth Module
//!
//! HTTP surface of the authentication core:
//! - Local register / login and cookie-based sessions
//! - OAuth login and provider linking (PKCE authorization-code flow)
//! - AuthedUser extractor for protected routes

pub mod cookies;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod routes;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use routes::auth_routes;
