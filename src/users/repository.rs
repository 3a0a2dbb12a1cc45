//! User persistence
//!
//! [`UserRepository`] is the storage boundary the identity and session
//! services depend on. [`SqliteUserRepository`] backs it with the tables from
//! `common::migrations`. The rules that must hold under concurrency
//! (one owner per provider identity, at least one login method, single-use
//! refresh tokens) are enforced inside single statements or transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::models::{
    from_unix, normalize_email, ProviderLink, RefreshTokenRecord, Role, User, UserFilter,
};
use crate::common::AuthError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_provider(
        &self,
        provider_type: &str,
        provider_id: &str,
    ) -> Result<Option<User>, AuthError>;

    /// Newest accounts first
    async fn list(&self, filter: &UserFilter, limit: i64, skip: i64)
        -> Result<Vec<User>, AuthError>;

    async fn count(&self, filter: &UserFilter) -> Result<i64, AuthError>;

    /// Returns `false` when no such user exists
    async fn set_role(&self, user_id: &str, role: Role) -> Result<bool, AuthError>;

    /// Insert the user together with any provider links it already carries
    async fn create(&self, user: &User) -> Result<(), AuthError>;

    /// Stamp `last_login` and bump the login counter
    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), AuthError>;

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<(), AuthError>;

    /// Refresh provider-scoped tokens and profile fields on an existing link
    async fn update_provider_link(&self, user_id: &str, link: &ProviderLink)
        -> Result<(), AuthError>;

    /// Fails with `AlreadyLinkedSelf` / `AlreadyLinkedOther` on a uniqueness conflict
    async fn add_provider_link(&self, user_id: &str, link: &ProviderLink) -> Result<(), AuthError>;

    /// Remove the link only if the user keeps another login method.
    /// Returns `false` when nothing was removed.
    async fn remove_provider_link(
        &self,
        user_id: &str,
        provider_type: &str,
    ) -> Result<bool, AuthError>;

    /// Store a new refresh token, pruning the user's expired ones
    async fn add_refresh_token(
        &self,
        user_id: &str,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError>;

    /// Atomically replace `old_token` with `replacement`.
    /// Returns `false` when `old_token` was not in the stored set.
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        old_token: &str,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, AuthError>;

    async fn remove_refresh_token(&self, user_id: &str, token: &str) -> Result<bool, AuthError>;

    async fn remove_all_refresh_tokens(&self, user_id: &str) -> Result<u64, AuthError>;

    async fn list_refresh_tokens(&self, user_id: &str)
        -> Result<Vec<RefreshTokenRecord>, AuthError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    display_name: Option<String>,
    profile_picture: Option<String>,
    role: String,
    is_email_verified: bool,
    is_active: bool,
    last_login: Option<i64>,
    login_count: i64,
    signup_source: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct ProviderLinkRow {
    provider_id: String,
    provider_type: String,
    email: Option<String>,
    display_name: Option<String>,
    profile_picture: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    linked_at: i64,
}

impl From<ProviderLinkRow> for ProviderLink {
    fn from(row: ProviderLinkRow) -> Self {
        Self {
            provider_id: row.provider_id,
            provider_type: row.provider_type,
            email: row.email,
            display_name: row.display_name,
            profile_picture: row.profile_picture,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            linked_at: from_unix(row.linked_at),
        }
    }
}

impl UserRow {
    fn into_user(self, providers: Vec<ProviderLink>) -> User {
        User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            display_name: self.display_name,
            profile_picture: self.profile_picture,
            // CHECK constraint keeps this in range
            role: self.role.parse().unwrap_or(Role::User),
            is_email_verified: self.is_email_verified,
            is_active: self.is_active,
            last_login: self.last_login.map(from_unix),
            login_count: self.login_count,
            signup_source: self.signup_source,
            providers,
            created_at: from_unix(self.created_at),
            updated_at: from_unix(self.updated_at),
        }
    }
}

const USER_FILTER: &str = "(?1 IS NULL OR email LIKE ?1 OR display_name LIKE ?1) \
    AND (?2 IS NULL OR role = ?2)";

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, display_name, \
    profile_picture, role, is_email_verified, is_active, last_login, login_count, \
    signup_source, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteUserRepository {
    db: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn load(&self, row: Option<UserRow>) -> Result<Option<User>, AuthError> {
        let Some(row) = row else {
            return Ok(None);
        };

        let links = sqlx::query_as::<_, ProviderLinkRow>(
            "SELECT provider_id, provider_type, email, display_name, profile_picture, \
             access_token, refresh_token, linked_at \
             FROM provider_links WHERE user_id = ? ORDER BY id",
        )
        .bind(&row.id)
        .fetch_all(&self.db)
        .await?;

        Ok(Some(
            row.into_user(links.into_iter().map(ProviderLink::from).collect()),
        ))
    }
}

/// Translate SQLite unique-index failures into domain errors
fn map_unique_violation(err: sqlx::Error, provider_type: &str) -> AuthError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = db.message();
            if message.contains("users.email") {
                return AuthError::EmailAlreadyRegistered;
            }
            if message.contains("provider_links.user_id") {
                return AuthError::AlreadyLinkedSelf(provider_type.to_string());
            }
            if message.contains("provider_links") {
                return AuthError::AlreadyLinkedOther;
            }
        }
    }
    AuthError::Storage(err)
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        self.load(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;

        self.load(row).await
    }

    async fn find_by_provider(
        &self,
        provider_type: &str,
        provider_id: &str,
    ) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = \
             (SELECT user_id FROM provider_links WHERE provider_type = ? AND provider_id = ?)",
            USER_COLUMNS
        ))
        .bind(provider_type)
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?;

        self.load(row).await
    }

    async fn list(
        &self,
        filter: &UserFilter,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<User>, AuthError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4",
            USER_COLUMNS, USER_FILTER
        ))
        .bind(filter.search_pattern())
        .bind(filter.role.map(|r| r.as_str()))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.db)
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(user) = self.load(Some(row)).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn count(&self, filter: &UserFilter) -> Result<i64, AuthError> {
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM users WHERE {}",
            USER_FILTER
        ))
        .bind(filter.search_pattern())
        .bind(filter.role.map(|r| r.as_str()))
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<bool, AuthError> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, display_name, \
             profile_picture, role, is_email_verified, is_active, last_login, login_count, \
             signup_source, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.display_name)
        .bind(&user.profile_picture)
        .bind(user.role.as_str())
        .bind(user.is_email_verified)
        .bind(user.is_active)
        .bind(user.last_login.map(|t| t.timestamp()))
        .bind(user.login_count)
        .bind(&user.signup_source)
        .bind(user.created_at.timestamp())
        .bind(user.updated_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ""))?;

        for link in &user.providers {
            insert_link(&mut tx, &user.id, link).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE users SET last_login = ?, login_count = login_count + 1, updated_at = ? \
             WHERE id = ?",
        )
        .bind(at.timestamp())
        .bind(at.timestamp())
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn update_provider_link(
        &self,
        user_id: &str,
        link: &ProviderLink,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE provider_links SET email = COALESCE(?, email), display_name = ?, \
             profile_picture = ?, access_token = ?, refresh_token = COALESCE(?, refresh_token), \
             linked_at = ? \
             WHERE user_id = ? AND provider_type = ? AND provider_id = ?",
        )
        .bind(&link.email)
        .bind(&link.display_name)
        .bind(&link.profile_picture)
        .bind(&link.access_token)
        .bind(&link.refresh_token)
        .bind(link.linked_at.timestamp())
        .bind(user_id)
        .bind(&link.provider_type)
        .bind(&link.provider_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn add_provider_link(&self, user_id: &str, link: &ProviderLink) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;
        insert_link(&mut tx, user_id, link).await?;
        sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_provider_link(
        &self,
        user_id: &str,
        provider_type: &str,
    ) -> Result<bool, AuthError> {
        // The guard is evaluated by the DELETE itself so concurrent unlinks
        // cannot both pass a stale check.
        let result = sqlx::query(
            "DELETE FROM provider_links WHERE user_id = ?1 AND provider_type = ?2 AND ( \
               (SELECT password_hash FROM users WHERE id = ?1) IS NOT NULL \
               OR (SELECT COUNT(*) FROM provider_links WHERE user_id = ?1) > 1 \
             )",
        )
        .bind(user_id)
        .bind(provider_type)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_refresh_token(
        &self,
        user_id: &str,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;
        prune_expired(&mut tx, user_id).await?;
        insert_refresh_token(&mut tx, user_id, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        old_token: &str,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM refresh_tokens WHERE user_id = ? AND token = ? AND expires_at > ?",
        )
        .bind(user_id)
        .bind(old_token)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        prune_expired(&mut tx, user_id).await?;
        insert_refresh_token(&mut tx, user_id, replacement).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn remove_refresh_token(&self, user_id: &str, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ? AND token = ?")
            .bind(user_id)
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all_refresh_tokens(&self, user_id: &str) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_refresh_tokens(
        &self,
        user_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT token, issued_at, expires_at FROM refresh_tokens \
             WHERE user_id = ? ORDER BY issued_at, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(token, issued_at, expires_at)| RefreshTokenRecord {
                token,
                issued_at: from_unix(issued_at),
                expires_at: from_unix(expires_at),
            })
            .collect())
    }
}

async fn insert_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    link: &ProviderLink,
) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO provider_links (user_id, provider_type, provider_id, email, display_name, \
         profile_picture, access_token, refresh_token, linked_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(&link.provider_type)
    .bind(&link.provider_id)
    .bind(&link.email)
    .bind(&link.display_name)
    .bind(&link.profile_picture)
    .bind(&link.access_token)
    .bind(&link.refresh_token)
    .bind(link.linked_at.timestamp())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_unique_violation(e, &link.provider_type))?;
    Ok(())
}

async fn prune_expired(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
) -> Result<(), AuthError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ? AND expires_at <= ?")
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_refresh_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    record: &RefreshTokenRecord,
) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO refresh_tokens (token, user_id, issued_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&record.token)
    .bind(user_id)
    .bind(record.issued_at.timestamp())
    .bind(record.expires_at.timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::test_pool;
    use chrono::Duration;

    fn link(provider_type: &str, provider_id: &str) -> ProviderLink {
        ProviderLink {
            provider_id: provider_id.to_string(),
            provider_type: provider_type.to_string(),
            email: Some("a@b.com".to_string()),
            display_name: Some("A".to_string()),
            profile_picture: None,
            access_token: Some("provider-access".to_string()),
            refresh_token: None,
            linked_at: Utc::now(),
        }
    }

    fn oauth_user(id: &str, email: &str, provider_type: &str, provider_id: &str) -> User {
        let mut user = User::new(id.to_string(), email);
        user.providers.push(link(provider_type, provider_id));
        user
    }

    fn refresh(token: &str, ttl: Duration) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            token: token.to_string(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    async fn repo() -> SqliteUserRepository {
        SqliteUserRepository::new(test_pool().await)
    }

    #[tokio::test]
    async fn test_create_and_find_by_each_key() {
        let repo = repo().await;
        repo.create(&oauth_user("U_1", "A@B.com", "google", "42"))
            .await
            .unwrap();

        let by_id = repo.find_by_id("U_1").await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@b.com");
        assert_eq!(by_id.providers.len(), 1);
        assert_eq!(
            by_id.providers[0].access_token.as_deref(),
            Some("provider-access")
        );

        assert!(repo.find_by_email("a@B.COM").await.unwrap().is_some());
        let by_provider = repo.find_by_provider("google", "42").await.unwrap().unwrap();
        assert_eq!(by_provider.id, "U_1");
        assert!(repo.find_by_provider("facebook", "42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = repo().await;
        repo.create(&User::new("U_1".to_string(), "a@b.com"))
            .await
            .unwrap();
        let err = repo
            .create(&User::new("U_2".to_string(), "A@b.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailAlreadyRegistered));
    }

    #[tokio::test]
    async fn test_provider_identity_has_single_owner() {
        let repo = repo().await;
        repo.create(&oauth_user("U_1", "a@b.com", "google", "42"))
            .await
            .unwrap();
        repo.create(&User::new("U_2".to_string(), "c@d.com"))
            .await
            .unwrap();

        let err = repo
            .add_provider_link("U_2", &link("google", "42"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AlreadyLinkedOther));

        let err = repo
            .add_provider_link("U_1", &link("google", "99"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AlreadyLinkedSelf(p) if p == "google"));

        // nothing half-written
        let u2 = repo.find_by_id("U_2").await.unwrap().unwrap();
        assert!(u2.providers.is_empty());
    }

    #[tokio::test]
    async fn test_guarded_unlink_keeps_last_method() {
        let repo = repo().await;
        repo.create(&oauth_user("U_1", "a@b.com", "google", "42"))
            .await
            .unwrap();

        assert!(!repo.remove_provider_link("U_1", "google").await.unwrap());
        assert_eq!(
            repo.find_by_id("U_1").await.unwrap().unwrap().providers.len(),
            1
        );

        repo.set_password_hash("U_1", "hash").await.unwrap();
        assert!(repo.remove_provider_link("U_1", "google").await.unwrap());
        assert!(repo
            .find_by_id("U_1")
            .await
            .unwrap()
            .unwrap()
            .providers
            .is_empty());
    }

    #[tokio::test]
    async fn test_unlink_allowed_with_second_provider() {
        let repo = repo().await;
        repo.create(&oauth_user("U_1", "a@b.com", "google", "42"))
            .await
            .unwrap();
        repo.add_provider_link("U_1", &link("facebook", "7"))
            .await
            .unwrap();

        assert!(repo.remove_provider_link("U_1", "google").await.unwrap());
        // now the only method left
        assert!(!repo.remove_provider_link("U_1", "facebook").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_is_single_use_and_prunes() {
        let repo = repo().await;
        repo.create(&User::new("U_1".to_string(), "a@b.com"))
            .await
            .unwrap();

        repo.add_refresh_token("U_1", &refresh("stale", Duration::seconds(-5)))
            .await
            .unwrap();
        repo.add_refresh_token("U_1", &refresh("R1", Duration::days(7)))
            .await
            .unwrap();
        // adding R1 pruned the stale row
        assert_eq!(repo.list_refresh_tokens("U_1").await.unwrap().len(), 1);

        assert!(repo
            .rotate_refresh_token("U_1", "R1", &refresh("R2", Duration::days(7)))
            .await
            .unwrap());
        assert!(!repo
            .rotate_refresh_token("U_1", "R1", &refresh("R3", Duration::days(7)))
            .await
            .unwrap());

        let tokens: Vec<_> = repo
            .list_refresh_tokens("U_1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token)
            .collect();
        assert_eq!(tokens, vec!["R2".to_string()]);
    }

    #[tokio::test]
    async fn test_record_login_bumps_counter() {
        let repo = repo().await;
        repo.create(&User::new("U_1".to_string(), "a@b.com"))
            .await
            .unwrap();
        repo.record_login("U_1", Utc::now()).await.unwrap();
        repo.record_login("U_1", Utc::now()).await.unwrap();

        let user = repo.find_by_id("U_1").await.unwrap().unwrap();
        assert_eq!(user.login_count, 2);
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn test_revocation() {
        let repo = repo().await;
        repo.create(&User::new("U_1".to_string(), "a@b.com"))
            .await
            .unwrap();
        for token in ["R1", "R2", "R3"] {
            repo.add_refresh_token("U_1", &refresh(token, Duration::days(7)))
                .await
                .unwrap();
        }

        assert!(repo.remove_refresh_token("U_1", "R2").await.unwrap());
        assert!(!repo.remove_refresh_token("U_1", "R2").await.unwrap());
        assert_eq!(repo.remove_all_refresh_tokens("U_1").await.unwrap(), 2);
        assert!(repo.list_refresh_tokens("U_1").await.unwrap().is_empty());
    }
}
