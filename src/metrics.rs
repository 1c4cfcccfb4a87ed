//! Prometheus counters for aborted and relayed messages.

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Checks accepted by `POST /abort` (counter).
pub const MESSAGES_NOTIFIED_TOTAL: &str = "stream_messages_notified_total";
/// Messages handed to the broadcaster (counter, labels: action, component).
pub const MESSAGES_BROADCASTED_TOTAL: &str = "stream_messages_broadcasted_total";

const COMPONENT: &str = "stream";

/// Installs the global recorder. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    log::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

pub fn record_notified(count: usize) {
    counter!(MESSAGES_NOTIFIED_TOTAL).increment(count as u64);
}

pub fn record_broadcasted(action: &str) {
    counter!(
        MESSAGES_BROADCASTED_TOTAL,
        "action" => action.to_string(),
        "component" => COMPONENT
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_notified_and_broadcasted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_notified(3);
            record_broadcasted("abort");
            record_broadcasted("abort");
            record_broadcasted("scan_finished");
        });

        let output = handle.render();
        assert!(output.contains("stream_messages_notified_total 3"), "{output}");
        assert_eq!(broadcasted(&output, "abort"), Some("2"));
        assert_eq!(broadcasted(&output, "scan_finished"), Some("1"));
    }

    fn broadcasted<'a>(output: &'a str, action: &str) -> Option<&'a str> {
        let label = format!(r#"action="{}""#, action);
        output
            .lines()
            .filter(|line| line.starts_with(MESSAGES_BROADCASTED_TOTAL))
            .find(|line| line.contains(&label) && line.contains(r#"component="stream""#))
            .and_then(|line| line.rsplit(' ').next())
    }

    #[test]
    fn metric_names_are_snake_case() {
        for name in [MESSAGES_NOTIFIED_TOTAL, MESSAGES_BROADCASTED_TOTAL] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
