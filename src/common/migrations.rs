// src/common/migrations.rs
//! Database schema management

use sqlx::SqlitePool;
use std::env;
use tracing::{info, warn};

/// Audit events older than this are deleted on the next insert
pub const AUDIT_RETENTION_SECS: i64 = 90 * 24 * 60 * 60;

/// Create every table, index and trigger the service needs.
///
/// Tables are only dropped when `RESET_DB=true`; otherwise creation is
/// idempotent and existing data is kept across restarts.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let should_reset_db = env::var("RESET_DB").unwrap_or_else(|_| "false".to_string()) == "true";

    if should_reset_db {
        warn!("RESET_DB=true - Dropping all tables and recreating schema...");
        drop_all_tables(pool).await?;
        info!("Dropped old tables");
    }

    create_user_tables(pool).await?;
    create_session_tables(pool).await?;
    create_audit_tables(pool).await?;
    create_indexes(pool).await?;

    info!("Database migration completed successfully");

    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Reverse dependency order
    let tables = ["auth_events", "refresh_tokens", "provider_links", "users"];

    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn create_user_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT,
            first_name TEXT,
            last_name TEXT,
            display_name TEXT,
            profile_picture TEXT,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin', 'moderator')),
            is_email_verified INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login INTEGER,
            login_count INTEGER NOT NULL DEFAULT 0,
            signup_source TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Global identity uniqueness lives here, not in application checks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            provider_type TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            email TEXT,
            display_name TEXT,
            profile_picture TEXT,
            access_token TEXT,
            refresh_token TEXT,
            linked_at INTEGER NOT NULL,
            UNIQUE(provider_type, provider_id),
            UNIQUE(user_id, provider_type),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_session_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_audit_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // No foreign key: events outlive the accounts they describe
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auth_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT,
            email TEXT,
            action TEXT NOT NULL,
            provider TEXT,
            success INTEGER NOT NULL,
            error_message TEXT,
            correlation_id TEXT,
            ip_address TEXT,
            user_agent TEXT,
            timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TRIGGER IF NOT EXISTS auth_events_retention
        AFTER INSERT ON auth_events
        BEGIN
            DELETE FROM auth_events WHERE timestamp < NEW.timestamp - {};
        END
        "#,
        AUDIT_RETENTION_SECS
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_provider_links_user ON provider_links(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id, expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_auth_events_user ON auth_events(user_id, timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_auth_events_email ON auth_events(email, timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_auth_events_action ON auth_events(action, timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_auth_events_correlation ON auth_events(correlation_id)",
        "CREATE INDEX IF NOT EXISTS idx_auth_events_timestamp ON auth_events(timestamp)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Single-connection in-memory database with the full schema, for tests
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");
    pool
}

/// File-backed WAL database shared by `connections` connections, for tests
/// that need transactions to contend for real
#[cfg(test)]
pub async fn shared_file_pool(connections: u32) -> SqlitePool {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};

    let path = env::temp_dir().join(format!("auth_api_{}.db", uuid::Uuid::new_v4()));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(connections)
        .min_connections(connections)
        .connect_with(options)
        .await
        .expect("file database");
    run_migrations(&pool).await.expect("migrations");
    pool
}
