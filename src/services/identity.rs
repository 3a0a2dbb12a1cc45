//! Identity resolution and provider linking
//!
//! Maps an inbound provider identity onto a local account: by provider id
//! first, then by email, otherwise a new account. The storage layer's unique
//! indexes are the final arbiter for "one owner per provider identity"; the
//! lookups here exist to return the precise error before attempting a write.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::audit::{AuditLog, AuthAction, AuthEvent};
use super::password::hash_password;
use crate::common::{generate_user_id, safe_email_log, AuthError, RequestMeta};
use crate::oauth::{CanonicalProfile, ProviderTokens};
use crate::users::{ProviderLink, User, UserRepository};

pub struct IdentityResolver {
    repo: Arc<dyn UserRepository>,
    audit: AuditLog,
}

impl IdentityResolver {
    pub fn new(repo: Arc<dyn UserRepository>, audit: AuditLog) -> Self {
        Self { repo, audit }
    }

    /// Find the account for a provider identity, linking by email or
    /// creating a new account when there is none.
    pub async fn resolve_or_create(
        &self,
        provider: &str,
        profile: &CanonicalProfile,
        tokens: &ProviderTokens,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        match self.try_resolve(provider, profile, tokens, meta).await {
            // A concurrent callback for the same identity won the insert;
            // the retry takes the existing-account path.
            Err(AuthError::AlreadyLinkedOther) | Err(AuthError::EmailAlreadyRegistered) => {
                info!(provider = %provider, "Identity created concurrently, resolving again");
                self.try_resolve(provider, profile, tokens, meta).await
            }
            result => result,
        }
    }

    async fn try_resolve(
        &self,
        provider: &str,
        profile: &CanonicalProfile,
        tokens: &ProviderTokens,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        let link = provider_link(provider, profile, tokens);

        // 1. Known provider identity
        if let Some(user) = self
            .repo
            .find_by_provider(provider, &profile.provider_id)
            .await?
        {
            ensure_active(&user, provider)?;
            self.repo.update_provider_link(&user.id, &link).await?;
            return self.finish_login(&user.id, provider, meta).await;
        }

        // 2. Existing account with the same email
        if let Some(email) = &profile.email {
            if let Some(user) = self.repo.find_by_email(email).await? {
                ensure_active(&user, provider)?;
                self.repo.add_provider_link(&user.id, &link).await?;
                self.audit.record(
                    AuthEvent::new(AuthAction::LinkProvider)
                        .user(&user)
                        .provider(provider)
                        .meta(meta),
                );
                info!(
                    user_id = %user.id,
                    provider = %provider,
                    email = %safe_email_log(&user.email),
                    "Linked provider to existing account by email"
                );
                return self.finish_login(&user.id, provider, meta).await;
            }
        }

        // 3. New account
        let mut user = User::new(
            generate_user_id(),
            &profile
                .email
                .clone()
                .unwrap_or_else(|| placeholder_email(provider, &profile.provider_id)),
        );
        user.first_name = profile.first_name.clone();
        user.last_name = profile.last_name.clone();
        user.display_name = profile.display_name.clone();
        user.profile_picture = profile.profile_picture.clone();
        user.is_email_verified = profile.email_verified;
        user.signup_source = Some(provider.to_string());
        user.providers.push(link);

        self.repo.create(&user).await?;

        self.audit.record(
            AuthEvent::new(AuthAction::OauthRegister)
                .user(&user)
                .provider(provider)
                .meta(meta),
        );
        info!(
            user_id = %user.id,
            provider = %provider,
            email = %safe_email_log(&user.email),
            "Created account from provider identity"
        );

        self.load(&user.id).await
    }

    async fn finish_login(
        &self,
        user_id: &str,
        provider: &str,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        self.repo.record_login(user_id, Utc::now()).await?;
        let user = self.load(user_id).await?;

        self.audit.record(
            AuthEvent::new(AuthAction::OauthLogin)
                .user(&user)
                .provider(provider)
                .meta(meta),
        );
        info!(user_id = %user.id, provider = %provider, "Provider login");

        Ok(user)
    }

    /// Attach a provider identity to an already-authenticated account
    pub async fn link(
        &self,
        user_id: &str,
        provider: &str,
        profile: &CanonicalProfile,
        tokens: &ProviderTokens,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        let user = self.load(user_id).await?;

        if user.has_provider(provider) {
            return Err(AuthError::AlreadyLinkedSelf(provider.to_string()));
        }

        if let Some(owner) = self
            .repo
            .find_by_provider(provider, &profile.provider_id)
            .await?
        {
            if owner.id != user.id {
                warn!(
                    user_id = %user.id,
                    provider = %provider,
                    "Provider identity already owned by another account"
                );
                return Err(AuthError::AlreadyLinkedOther);
            }
        }

        self.repo
            .add_provider_link(&user.id, &provider_link(provider, profile, tokens))
            .await?;

        self.audit.record(
            AuthEvent::new(AuthAction::LinkProvider)
                .user(&user)
                .provider(provider)
                .meta(meta),
        );
        info!(user_id = %user.id, provider = %provider, "Provider linked");

        self.load(user_id).await
    }

    /// Remove a provider link, refusing to strip the last login method
    pub async fn unlink(
        &self,
        user_id: &str,
        provider: &str,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        let user = self.load(user_id).await?;

        if !user.has_provider(provider) {
            return Err(AuthError::ProviderNotLinked(provider.to_string()));
        }
        if user.login_method_count() <= 1 {
            return Err(AuthError::LastAuthMethod);
        }

        if !self.repo.remove_provider_link(user_id, provider).await? {
            // state changed between the check and the guarded delete
            let current = self.load(user_id).await?;
            return Err(if current.has_provider(provider) {
                AuthError::LastAuthMethod
            } else {
                AuthError::ProviderNotLinked(provider.to_string())
            });
        }

        self.audit.record(
            AuthEvent::new(AuthAction::UnlinkProvider)
                .user(&user)
                .provider(provider)
                .meta(meta),
        );
        info!(user_id = %user.id, provider = %provider, "Provider unlinked");

        self.load(user_id).await
    }

    /// Give the account a local password (adds or replaces it)
    pub async fn set_password(&self, user_id: &str, password: &str) -> Result<User, AuthError> {
        let hash = hash_password(password)?;
        self.repo.set_password_hash(user_id, &hash).await?;
        info!(user_id = %user_id, "Password set");
        self.load(user_id).await
    }

    async fn load(&self, user_id: &str) -> Result<User, AuthError> {
        self.repo
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

#[cfg(test)]
impl IdentityResolver {
    pub fn repo(&self) -> &Arc<dyn UserRepository> {
        &self.repo
    }
}

/// Deactivated accounts are refused before any link or login state changes
fn ensure_active(user: &User, provider: &str) -> Result<(), AuthError> {
    if user.is_active {
        Ok(())
    } else {
        warn!(user_id = %user.id, provider = %provider, "Provider login for inactive account");
        Err(AuthError::UserInactive)
    }
}

/// Stand-in address for providers that return no email
pub fn placeholder_email(provider: &str, provider_id: &str) -> String {
    format!("{}_{}@oauth.local", provider, provider_id)
}

fn provider_link(provider: &str, profile: &CanonicalProfile, tokens: &ProviderTokens) -> ProviderLink {
    ProviderLink {
        provider_id: profile.provider_id.clone(),
        provider_type: provider.to_string(),
        email: profile.email.clone(),
        display_name: profile.display_name.clone(),
        profile_picture: profile.profile_picture.clone(),
        access_token: Some(tokens.access_token.clone()),
        refresh_token: tokens.refresh_token.clone(),
        linked_at: Utc::now(),
    }
}
