//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::error::Error;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// The global subscriber can be installed once per process, so the whole
// lifecycle lives in one test.
#[test]
fn test_global_logging_lifecycle() {
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("logging_integration=debug")
        .with_logger_sink(sink.clone());

    init_logging(config).expect("first initialization succeeds");

    tracing::info!(
        backend = "googledrive",
        access_token = "ya29.secret",
        email = "someone@example.com",
        "Token refreshed"
    );
    tracing::trace!("filtered out by level");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.message, "Token refreshed");
        assert_eq!(entry.fields.get("backend").map(String::as_str), Some("googledrive"));
        assert_eq!(
            entry.fields.get("access_token").map(String::as_str),
            Some("[REDACTED]")
        );
        assert!(!entry.fields["email"].contains("example.com"));
    }

    let second = init_logging(LoggingConfig::default());
    assert!(matches!(second, Err(Error::Config(_))));
}

#[test]
fn test_invalid_filter_is_config_error() {
    let config = LoggingConfig::default().with_filter("core_auth=notalevel[");
    assert!(matches!(init_logging(config), Err(Error::Config(_))));
}

#[test]
fn test_redaction_of_credential_fields() {
    for field in [
        "access_token",
        "refresh_token",
        "client_secret",
        "code_verifier",
        "authorization_code",
        "container_sas_url",
    ] {
        assert_eq!(redact_if_sensitive(field, "value"), "[REDACTED]", "{field}");
    }

    assert_eq!(redact_if_sensitive("backend", "koofr"), "koofr");
    assert_eq!(redact_if_sensitive("remote_base_dir", "Notes/Work"), "Notes/Work");
}
