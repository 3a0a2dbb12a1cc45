//! # OAuth Module
//!
//! Authorization-code-with-PKCE plumbing: provider configuration, the
//! pending-flow store and the per-provider adapters.

pub mod config;
pub mod pkce;
pub mod providers;

pub use config::{ProviderConfig, StateParam};
pub use pkce::{FlowAction, PendingFlow, PkceStore};
pub use providers::{CanonicalProfile, ProviderRegistry, ProviderTokens};
