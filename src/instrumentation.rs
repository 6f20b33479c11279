//! Per-request instrumentation.
//!
//! Every proxied transport call is wrapped to record latency and outcome.

use std::future::Future;
use std::time::Instant;

/// Run a transport call and record its duration and outcome.
pub async fn instrument_request<T, E, F>(
    plugin_id: &str,
    endpoint: &'static str,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = call.await;
    let status = if result.is_ok() { "ok" } else { "error" };

    metrics::histogram!(
        "corvus_plugin_request_duration_seconds",
        started.elapsed().as_secs_f64(),
        "plugin_id" => plugin_id.to_string(),
        "endpoint" => endpoint
    );
    metrics::counter!(
        "corvus_plugin_request_total",
        1,
        "plugin_id" => plugin_id.to_string(),
        "endpoint" => endpoint,
        "status" => status
    );

    result
}
