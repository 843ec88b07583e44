/*!
Observability infrastructure for the upload service.

- Structured logging setup (human-readable or JSON)
- Prometheus text rendering of the upload counters (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

#[cfg(feature = "metrics")]
use crate::uploader::CounterSnapshot;
use crate::{BackupError, Result};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence; without it, `default_directive` (for example
/// `autobackup=info`) applies.
pub fn init_observability(format: LogFormat, default_directive: &str) -> Result<()> {
    let directive = default_directive.parse().map_err(|e| {
        BackupError::validation(format!("Invalid log directive '{default_directive}': {e}"))
    })?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let result = match format {
        LogFormat::Json => set_global_default(
            TracingRegistry::default().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false),
            ),
        ),
        LogFormat::Pretty => set_global_default(
            TracingRegistry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false)),
        ),
    };

    result.map_err(|e| {
        BackupError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("autobackup observability initialized");
    Ok(())
}

/// Render upload counters in the Prometheus text exposition format
///
/// A private registry is built per call, so nothing is registered globally and several
/// uploaders can be rendered side by side.
#[cfg(feature = "metrics")]
pub fn render_prometheus(snapshot: &CounterSnapshot) -> Result<String> {
    let registry = Registry::new();

    let counters = [
        (
            "autobackup_uploads_ok_total",
            "Successful snapshot uploads",
            snapshot.num_uploads_ok,
        ),
        (
            "autobackup_uploads_fail_total",
            "Failed snapshot uploads",
            snapshot.num_uploads_fail,
        ),
        (
            "autobackup_uploads_skipped_total",
            "Uploads skipped because the snapshot was unchanged",
            snapshot.num_uploads_skipped,
        ),
        (
            "autobackup_upload_bytes_total",
            "Bytes uploaded across all successful uploads",
            snapshot.total_upload_bytes,
        ),
    ];

    for (name, help, value) in counters {
        let counter = IntCounter::new(name, help)
            .map_err(|e| BackupError::validation(format!("Failed to create {name} metric: {e}")))?;
        counter.inc_by(value);
        registry
            .register(Box::new(counter))
            .map_err(|e| BackupError::validation(format!("Failed to register {name}: {e}")))?;
    }

    let last_bytes = IntGauge::new(
        "autobackup_last_upload_bytes",
        "Bytes uploaded by the most recent successful upload",
    )
    .map_err(|e| BackupError::validation(format!("Failed to create last_upload_bytes metric: {e}")))?;
    last_bytes.set(i64::try_from(snapshot.last_upload_bytes).unwrap_or(i64::MAX));
    registry
        .register(Box::new(last_bytes))
        .map_err(|e| BackupError::validation(format!("Failed to register last_upload_bytes: {e}")))?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| BackupError::validation(format!("Failed to encode metrics: {e}")))?;

    String::from_utf8(buffer)
        .map_err(|e| BackupError::validation(format!("Failed to convert metrics to string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive_is_rejected() {
        let result = init_observability(LogFormat::Json, "autobackup=loud");
        assert!(matches!(result, Err(BackupError::Validation(_))));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_render_prometheus() {
        let snapshot = CounterSnapshot {
            num_uploads_ok: 2,
            num_uploads_fail: 1,
            num_uploads_skipped: 3,
            total_upload_bytes: 300,
            last_upload_bytes: 120,
        };

        let text = render_prometheus(&snapshot).unwrap();
        assert!(text.contains("autobackup_uploads_ok_total 2"));
        assert!(text.contains("autobackup_uploads_fail_total 1"));
        assert!(text.contains("autobackup_uploads_skipped_total 3"));
        assert!(text.contains("autobackup_upload_bytes_total 300"));
        assert!(text.contains("autobackup_last_upload_bytes 120"));

        // Rendering twice must not collide on registration.
        assert!(render_prometheus(&snapshot).is_ok());
    }
}
