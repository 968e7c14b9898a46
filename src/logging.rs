//! # Structured Logging Module
//!
//! Environment-aware structured logging for the scheduler process. Console
//! output is human-readable in development and JSON in production or when
//! `ICEPROD_LOG_FORMAT=json` is set.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format(&environment, std::env::var("ICEPROD_LOG_FORMAT").ok().as_deref());

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .boxed()
        };

        // Tests and embedding processes may already own the global subscriber
        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("ICEPROD_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format(environment: &str, format: Option<&str>) -> bool {
    match format {
        Some(f) => f.eq_ignore_ascii_case("json"),
        None => environment == "production",
    }
}

/// Log structured data for dataset-level materialization outcomes
pub fn log_dataset_operation(
    operation: &str,
    dataset_id: &str,
    status: &str,
    jobs_buffered: u64,
    tasks_created: u64,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        dataset_id = %dataset_id,
        status = %status,
        jobs_buffered = jobs_buffered,
        tasks_created = tasks_created,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 DATASET_OPERATION"
    );
}

/// Log structured data for materialization request handling
pub fn log_request_operation(
    operation: &str,
    request_id: &str,
    dataset_id: Option<&str>,
    status: &str,
    delivery_count: Option<u32>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        request_id = %request_id,
        dataset_id = dataset_id,
        status = %status,
        delivery_count = delivery_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📨 REQUEST_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_json_format_selection() {
        assert!(use_json_format("production", None));
        assert!(!use_json_format("development", None));
        assert!(use_json_format("development", Some("JSON")));
        assert!(!use_json_format("production", Some("pretty")));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_dataset_operation("buffer", "d1", "complete", 2, 6, None);
    }
}
