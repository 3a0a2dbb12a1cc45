// Error tracking with Sentry
use tracing::info;

/// Initialize the Sentry client when a DSN is configured.
///
/// The guard flushes pending events on drop, so keep it alive for the
/// lifetime of the process.
pub fn init_sentry(dsn: Option<&str>) -> Option<sentry::ClientInitGuard> {
    let Some(dsn) = dsn.filter(|d| !d.is_empty()) else {
        info!("Sentry DSN not configured");
        return None;
    };

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(
                std::env::var("APP_ENV")
                    .or_else(|_| std::env::var("ENVIRONMENT"))
                    .unwrap_or_else(|_| "development".to_string())
                    .into(),
            ),
            traces_sample_rate: 0.0,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        info!("Sentry initialized successfully");
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dsn_disables_sentry() {
        assert!(init_sentry(None).is_none());
        assert!(init_sentry(Some("")).is_none());
    }
}
