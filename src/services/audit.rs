//! Authentication audit trail
//!
//! Request handlers hand events to [`AuditLog::record`], which only enqueues;
//! a background task drains the queue into an [`AuthEventSink`]. A full queue
//! or a failing sink is logged and swallowed, never returned to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::common::{generate_correlation_id, AuthError, RequestMeta};
use crate::users::{models::from_unix, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    Login,
    Logout,
    Register,
    OauthLogin,
    OauthRegister,
    LinkProvider,
    UnlinkProvider,
    FailedLogin,
    TokenRefresh,
    TokenRevoke,
}

impl AuthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthAction::Login => "login",
            AuthAction::Logout => "logout",
            AuthAction::Register => "register",
            AuthAction::OauthLogin => "oauth_login",
            AuthAction::OauthRegister => "oauth_register",
            AuthAction::LinkProvider => "link_provider",
            AuthAction::UnlinkProvider => "unlink_provider",
            AuthAction::FailedLogin => "failed_login",
            AuthAction::TokenRefresh => "token_refresh",
            AuthAction::TokenRevoke => "token_revoke",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "login" => AuthAction::Login,
            "logout" => AuthAction::Logout,
            "register" => AuthAction::Register,
            "oauth_login" => AuthAction::OauthLogin,
            "oauth_register" => AuthAction::OauthRegister,
            "link_provider" => AuthAction::LinkProvider,
            "unlink_provider" => AuthAction::UnlinkProvider,
            "failed_login" => AuthAction::FailedLogin,
            "token_refresh" => AuthAction::TokenRefresh,
            "token_revoke" => AuthAction::TokenRevoke,
            other => return Err(format!("unknown auth action: {}", other)),
        })
    }
}

/// Immutable audit record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub action: AuthAction,
    pub provider: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuthEvent {
    /// A successful event with a fresh correlation id
    pub fn new(action: AuthAction) -> Self {
        Self {
            user_id: None,
            email: None,
            action,
            provider: None,
            success: true,
            error_message: None,
            correlation_id: generate_correlation_id(),
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(mut self, user: &User) -> Self {
        self.user_id = Some(user.id.clone());
        self.email = Some(user.email.clone());
        self
    }

    pub fn user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    /// Copy client metadata; a correlation id on the request wins over the generated one
    pub fn meta(mut self, meta: &RequestMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        if let Some(correlation_id) = &meta.correlation_id {
            self.correlation_id = correlation_id.clone();
        }
        self
    }
}

/// Durable destination for audit events
#[async_trait]
pub trait AuthEventSink: Send + Sync {
    async fn append(&self, event: &AuthEvent) -> Result<(), AuthError>;
}

enum AuditCommand {
    Record(AuthEvent),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking handle to the audit queue
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditCommand>,
}

impl AuditLog {
    /// Start the drain task. The task ends once every handle is dropped.
    pub fn spawn(sink: Arc<dyn AuthEventSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(sink, rx));
        info!(capacity = capacity, "Audit log drain started");
        (Self { tx }, handle)
    }

    /// Enqueue an event without waiting
    pub fn record(&self, event: AuthEvent) {
        match self.tx.try_send(AuditCommand::Record(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(AuditCommand::Record(event))) => {
                warn!(
                    action = %event.action,
                    correlation_id = %event.correlation_id,
                    "Audit queue full, dropping event"
                );
            }
            Err(_) => warn!("Audit drain stopped, dropping event"),
        }
    }

    /// Wait until every event enqueued before this call has reached the sink
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn drain(sink: Arc<dyn AuthEventSink>, mut rx: mpsc::Receiver<AuditCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Record(event) => {
                if let Err(e) = sink.append(&event).await {
                    error!(
                        error = %e,
                        action = %event.action,
                        correlation_id = %event.correlation_id,
                        "Failed to write auth event"
                    );
                }
            }
            AuditCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    info!("Audit log drain stopped");
}

#[derive(Debug, FromRow)]
struct AuthEventRow {
    user_id: Option<String>,
    email: Option<String>,
    action: String,
    provider: Option<String>,
    success: bool,
    error_message: Option<String>,
    correlation_id: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    timestamp: i64,
}

impl AuthEventRow {
    fn into_event(self) -> Option<AuthEvent> {
        Some(AuthEvent {
            user_id: self.user_id,
            email: self.email,
            action: self.action.parse().ok()?,
            provider: self.provider,
            success: self.success,
            error_message: self.error_message,
            correlation_id: self.correlation_id.unwrap_or_default(),
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            timestamp: from_unix(self.timestamp),
        })
    }
}

const EVENT_COLUMNS: &str = "user_id, email, action, provider, success, error_message, \
    correlation_id, ip_address, user_agent, timestamp";

/// `auth_events` table; retention is handled by a trigger in the schema
#[derive(Clone)]
pub struct SqliteAuditStore {
    db: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// A user's history, newest first
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<AuthEvent>, AuthError> {
        let rows = sqlx::query_as::<_, AuthEventRow>(&format!(
            "SELECT {} FROM auth_events WHERE user_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            EVENT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().filter_map(AuthEventRow::into_event).collect())
    }

    pub async fn count_for_user(&self, user_id: &str) -> Result<i64, AuthError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM auth_events WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Every event of one flow, oldest first
    pub async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuthEvent>, AuthError> {
        let rows = sqlx::query_as::<_, AuthEventRow>(&format!(
            "SELECT {} FROM auth_events WHERE correlation_id = ? ORDER BY timestamp, id",
            EVENT_COLUMNS
        ))
        .bind(correlation_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().filter_map(AuthEventRow::into_event).collect())
    }
}

#[async_trait]
impl AuthEventSink for SqliteAuditStore {
    async fn append(&self, event: &AuthEvent) -> Result<(), AuthError> {
        sqlx::query(&format!(
            "INSERT INTO auth_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            EVENT_COLUMNS
        ))
        .bind(&event.user_id)
        .bind(&event.email)
        .bind(event.action.as_str())
        .bind(&event.provider)
        .bind(event.success)
        .bind(&event.error_message)
        .bind(&event.correlation_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.timestamp.timestamp())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    pub events: std::sync::Mutex<Vec<AuthEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn actions(&self) -> Vec<AuthAction> {
        self.events.lock().unwrap().iter().map(|e| e.action).collect()
    }

    pub fn snapshot(&self) -> Vec<AuthEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl AuthEventSink for MemorySink {
    async fn append(&self, event: &AuthEvent) -> Result<(), AuthError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
