//! Authentication flows
//!
//! Ties the stores together for local credentials, the OAuth
//! authorization-code flow and session management. HTTP concerns (cookies,
//! redirects, status codes) stay in the `auth` handlers.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::audit::{AuditLog, AuthAction, AuthEvent};
use super::identity::IdentityResolver;
use super::password::{hash_password, verify_password};
use super::sessions::SessionStore;
use super::tokens::TokenPair;
use crate::common::{generate_user_id, safe_email_log, AuthError, RequestMeta};
use crate::oauth::{FlowAction, PkceStore, ProviderRegistry, StateParam};
use crate::users::{models::normalize_email, User, UserRepository};

pub const DEFAULT_REDIRECT_PATH: &str = "/dashboard";

const LOCAL_PROVIDER: &str = "local";

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

/// Result of a completed provider callback
#[derive(Debug)]
pub enum OAuthOutcome {
    /// Signed in (or signed up); a new session was issued
    SignedIn {
        session: Session,
        redirect_path: String,
    },
    /// Provider attached to the account that started the flow; no new session
    Linked { user: User, redirect_path: String },
}

impl OAuthOutcome {
    pub fn redirect_path(&self) -> &str {
        match self {
            OAuthOutcome::SignedIn { redirect_path, .. } => redirect_path,
            OAuthOutcome::Linked { redirect_path, .. } => redirect_path,
        }
    }
}

pub struct AuthService {
    repo: Arc<dyn UserRepository>,
    identity: Arc<IdentityResolver>,
    sessions: Arc<SessionStore>,
    pkce: Arc<PkceStore>,
    providers: ProviderRegistry,
    audit: AuditLog,
}

impl AuthService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        identity: Arc<IdentityResolver>,
        sessions: Arc<SessionStore>,
        pkce: Arc<PkceStore>,
        providers: ProviderRegistry,
        audit: AuditLog,
    ) -> Self {
        Self {
            repo,
            identity,
            sessions,
            pkce,
            providers,
            audit,
        }
    }

    // ========================================================================
    // LOCAL ACCOUNTS
    // ========================================================================

    pub async fn register(&self, account: NewAccount, meta: &RequestMeta) -> Result<User, AuthError> {
        let email = normalize_email(&account.email);
        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyRegistered);
        }

        let mut user = User::new(generate_user_id(), &email);
        user.password_hash = Some(hash_password(&account.password)?);
        user.first_name = account.first_name;
        user.last_name = account.last_name;
        user.signup_source = Some(LOCAL_PROVIDER.to_string());

        self.repo.create(&user).await?;

        self.audit.record(
            AuthEvent::new(AuthAction::Register)
                .user(&user)
                .provider(LOCAL_PROVIDER)
                .meta(meta),
        );
        info!(user_id = %user.id, email = %safe_email_log(&user.email), "User registered");

        self.load(&user.id).await
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        let user = self.repo.find_by_email(&email).await?;

        let verified = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => verify_password(password, hash)?,
            None => false,
        };

        let user = match user {
            Some(user) if verified => user,
            _ => {
                self.audit.record(
                    AuthEvent::new(AuthAction::FailedLogin)
                        .email(&email)
                        .provider(LOCAL_PROVIDER)
                        .failed("Invalid credentials")
                        .meta(meta),
                );
                warn!(email = %safe_email_log(&email), "Failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        self.repo.record_login(&user.id, Utc::now()).await?;
        let user = self.load(&user.id).await?;
        let tokens = self.sessions.start(&user).await?;

        self.audit.record(
            AuthEvent::new(AuthAction::Login)
                .user(&user)
                .provider(LOCAL_PROVIDER)
                .meta(meta),
        );
        info!(user_id = %user.id, email = %safe_email_log(&user.email), "User logged in");

        Ok(Session { user, tokens })
    }

    pub async fn set_password(&self, user_id: &str, password: &str) -> Result<User, AuthError> {
        self.identity.set_password(user_id, password).await
    }

    // ========================================================================
    // OAUTH FLOW
    // ========================================================================

    /// Start a provider flow and return the authorization URL.
    ///
    /// With `link_to` set, the callback attaches the provider to that account
    /// instead of signing in.
    pub async fn begin_oauth(
        &self,
        provider: &str,
        redirect_path: Option<&str>,
        link_to: Option<&User>,
    ) -> Result<String, AuthError> {
        let adapter = self.providers.get(provider)?;

        if let Some(user) = link_to {
            if user.has_provider(provider) {
                return Err(AuthError::AlreadyLinkedSelf(provider.to_string()));
            }
        }

        let flow = self
            .pkce
            .begin(provider, link_to.map(|u| u.id.as_str()))
            .await;

        let state = StateParam {
            state: flow.state,
            redirect_path: Some(sanitize_redirect_path(redirect_path)),
        }
        .encode()?;

        let auth_url = adapter.authorization_url(&state, &flow.code_challenge)?;

        info!(
            provider = %provider,
            correlation_id = %flow.correlation_id,
            link = link_to.is_some(),
            "OAuth flow initiated"
        );

        Ok(auth_url)
    }

    /// Finish a provider callback.
    ///
    /// `raw_state` is the JSON `state` parameter exactly as the provider
    /// returned it. The pending flow is consumed before anything else, so a
    /// replayed callback fails with `InvalidState`.
    pub async fn complete_oauth(
        &self,
        provider: &str,
        code: &str,
        raw_state: &str,
        meta: &RequestMeta,
    ) -> Result<OAuthOutcome, AuthError> {
        let state = StateParam::decode(raw_state)?;

        let flow = self.pkce.consume(&state.state).await.ok_or_else(|| {
            warn!(provider = %provider, "Invalid or expired OAuth state");
            AuthError::InvalidState
        })?;

        let meta = meta.clone().with_correlation_id(flow.correlation_id.clone());
        let redirect_path = sanitize_redirect_path(state.redirect_path.as_deref());

        let result = self
            .finish_flow(provider, code, &flow, redirect_path, &meta)
            .await;

        if let Err(e) = &result {
            let mut event = AuthEvent::new(match flow.action {
                FlowAction::Login => AuthAction::OauthLogin,
                FlowAction::Link { .. } => AuthAction::LinkProvider,
            })
            .provider(provider)
            .failed(e.to_string())
            .meta(&meta);
            if let FlowAction::Link { user_id } = &flow.action {
                event = event.user_id(user_id);
            }
            self.audit.record(event);
            warn!(
                provider = %provider,
                correlation_id = %flow.correlation_id,
                error = %e,
                "OAuth callback failed"
            );
        }

        result
    }

    async fn finish_flow(
        &self,
        provider: &str,
        code: &str,
        flow: &crate::oauth::PendingFlow,
        redirect_path: String,
        meta: &RequestMeta,
    ) -> Result<OAuthOutcome, AuthError> {
        if flow.provider != provider {
            return Err(AuthError::ProviderMismatch);
        }

        let adapter = self.providers.get(provider)?;
        let provider_tokens = adapter.exchange_code(code, &flow.code_verifier, None).await?;
        let profile = adapter
            .fetch_canonical_profile(&provider_tokens.access_token)
            .await?;

        match &flow.action {
            FlowAction::Login => {
                let user = self
                    .identity
                    .resolve_or_create(provider, &profile, &provider_tokens, meta)
                    .await?;
                let tokens = self.sessions.start(&user).await?;
                Ok(OAuthOutcome::SignedIn {
                    session: Session { user, tokens },
                    redirect_path,
                })
            }
            FlowAction::Link { user_id } => {
                let user = self
                    .identity
                    .link(user_id, provider, &profile, &provider_tokens, meta)
                    .await?;
                Ok(OAuthOutcome::Linked {
                    user,
                    redirect_path,
                })
            }
        }
    }

    pub async fn unlink(
        &self,
        user_id: &str,
        provider: &str,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        self.identity.unlink(user_id, provider, meta).await
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub async fn refresh(
        &self,
        refresh_token: &str,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        self.sessions.rotate(refresh_token, meta).await
    }

    /// End the session behind `refresh_token` (if presented)
    pub async fn logout(
        &self,
        user_id: &str,
        refresh_token: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<(), AuthError> {
        if let Some(token) = refresh_token {
            self.sessions.revoke(user_id, token).await?;
        }

        self.audit
            .record(AuthEvent::new(AuthAction::Logout).user_id(user_id).meta(meta));
        info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    /// End every session the user holds
    pub async fn logout_all(&self, user_id: &str, meta: &RequestMeta) -> Result<u64, AuthError> {
        let removed = self.sessions.revoke_all(user_id).await?;
        self.audit
            .record(AuthEvent::new(AuthAction::TokenRevoke).user_id(user_id).meta(meta));
        Ok(removed)
    }

    async fn load(&self, user_id: &str) -> Result<User, AuthError> {
        self.repo
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

/// Only same-origin absolute paths survive the provider round-trip
pub fn sanitize_redirect_path(path: Option<&str>) -> String {
    match path {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p.to_string(),
        _ => DEFAULT_REDIRECT_PATH.to_string(),
    }
}
