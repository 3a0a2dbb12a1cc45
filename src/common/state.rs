// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::config::AppConfig;
use crate::oauth::{PkceStore, ProviderRegistry};
use crate::services::{
    AuditLog, AuthService, IdentityResolver, SessionStore, SqliteAuditStore, TokenService,
};
use crate::users::{SqliteUserRepository, UserRepository};

/// Database pool, configuration and the wired authentication services
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: SqlitePool,
    pub users: Arc<dyn UserRepository>,
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionStore>,
    pub pkce: Arc<PkceStore>,
    pub audit: AuditLog,
    pub audit_store: Arc<SqliteAuditStore>,
}

impl AppState {
    /// Wire the services over `db`. The returned handle is the audit drain task.
    pub fn new(config: AppConfig, db: SqlitePool, providers: ProviderRegistry) -> (Self, JoinHandle<()>) {
        let users: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db.clone()));
        let audit_store = Arc::new(SqliteAuditStore::new(db.clone()));
        let (audit, audit_task) = AuditLog::spawn(audit_store.clone(), config.audit_queue_capacity);

        let tokens = Arc::new(TokenService::new(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let sessions = Arc::new(SessionStore::new(users.clone(), tokens, audit.clone()));
        let identity = Arc::new(IdentityResolver::new(users.clone(), audit.clone()));
        let pkce = Arc::new(PkceStore::new(
            config.oauth_state_ttl,
            config.oauth_sweep_interval,
        ));

        let auth = Arc::new(AuthService::new(
            users.clone(),
            identity,
            sessions.clone(),
            pkce.clone(),
            providers,
            audit.clone(),
        ));

        let state = Self {
            config,
            db,
            users,
            auth,
            sessions,
            pkce,
            audit,
            audit_store,
        };
        (state, audit_task)
    }
}
