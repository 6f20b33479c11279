//! Request proxying.
//!
//! Routes typed requests to the plugin they address, enforcing the request
//! validator and wrapping every transport call in instrumentation. Resource
//! calls stream their response through an in-memory frame stream that a
//! flusher drains into the caller's response writer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::PluginError;
use crate::instrumentation::instrument_request;
use crate::manager::PluginManager;
use crate::plugin::PluginRecord;
use crate::stream::{ResourceStream, StreamError};
use crate::transport::{
    CallResourceRequest, CheckHealthRequest, CheckHealthResponse, CollectMetricsResponse,
    PluginContext, QueryDataRequest, QueryDataResponse, TransportError,
};

/// Headers never forwarded to a plugin backend.
const HOST_SENSITIVE_HEADERS: [&str; 5] = [
    "X-Forwarded-For",
    "X-Forwarded-Host",
    "X-Forwarded-Proto",
    "Origin",
    "Referer",
];

/// Sink for a streamed resource response.
///
/// Implemented by the host's HTTP layer; tests use recording writers. The
/// default `flush` is a no-op for writers that do not support flushing.
pub trait ResourceResponseWriter: Send {
    fn write_status(&mut self, status: u16);
    fn add_header(&mut self, name: &str, value: &str);
    fn write_body(&mut self, chunk: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) {}
}

impl PluginManager {
    /// Forward a data query to the addressed plugin.
    ///
    /// An unknown plugin id yields an empty response, not an error: the
    /// host's query path tolerates queries against plugins that are not
    /// (or no longer) present.
    pub async fn query_data(
        &self,
        token: CancellationToken,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, PluginError> {
        let Some(plugin) = self.registry.plugin(&request.context.plugin_id) else {
            return Ok(QueryDataResponse::default());
        };
        let transport = plugin
            .transport()
            .cloned()
            .ok_or(TransportError::MethodNotImplemented)?;

        let result = instrument_request(plugin.id(), "queryData", async {
            transport.query_data(token, request).await
        })
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(
                err @ (TransportError::MethodNotImplemented | TransportError::PluginUnavailable),
            ) => Err(err.into()),
            Err(err) => Err(PluginError::QueryFailed {
                id: plugin.id().to_string(),
                source: err,
            }),
        }
    }

    /// Run a health check against the addressed plugin.
    ///
    /// A request validator rejection is reported as an access-denied
    /// response, not an error.
    pub async fn check_health(
        &self,
        token: CancellationToken,
        request: CheckHealthRequest,
    ) -> Result<CheckHealthResponse, PluginError> {
        if let Err(denied) = self
            .request_validator
            .validate(datasource_url(&request.context), None)
        {
            warn!(
                "Denied health check for plugin {}: {}",
                request.context.plugin_id, denied
            );
            return Ok(CheckHealthResponse::access_denied());
        }

        let plugin = self
            .registry
            .plugin(&request.context.plugin_id)
            .ok_or_else(|| PluginError::NotRegistered(request.context.plugin_id.clone()))?;
        let transport = plugin
            .transport()
            .cloned()
            .ok_or(TransportError::MethodNotImplemented)?;

        let result = instrument_request(plugin.id(), "checkHealth", async {
            transport.check_health(token, request).await
        })
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(
                err @ (TransportError::MethodNotImplemented | TransportError::PluginUnavailable),
            ) => Err(err.into()),
            Err(err) => Err(PluginError::HealthCheckFailed {
                id: plugin.id().to_string(),
                source: err,
            }),
        }
    }

    /// Collect Prometheus metrics from the addressed plugin.
    pub async fn collect_metrics(
        &self,
        token: CancellationToken,
        plugin_id: &str,
    ) -> Result<CollectMetricsResponse, PluginError> {
        let plugin = self
            .registry
            .plugin(plugin_id)
            .ok_or_else(|| PluginError::NotRegistered(plugin_id.to_string()))?;
        let transport = plugin
            .transport()
            .cloned()
            .ok_or(TransportError::MethodNotImplemented)?;

        let result = instrument_request(plugin.id(), "collectMetrics", async {
            transport.collect_metrics(token).await
        })
        .await;

        result.map_err(Into::into)
    }

    /// Forward an HTTP-like resource request and stream the response into
    /// `writer`.
    ///
    /// The inbound request is expected to carry its body fully buffered.
    /// A request validator rejection writes a 403 response and returns Ok.
    pub async fn call_resource(
        &self,
        token: CancellationToken,
        request: CallResourceRequest,
        writer: &mut dyn ResourceResponseWriter,
    ) -> Result<(), PluginError> {
        if let Err(denied) = self
            .request_validator
            .validate(datasource_url(&request.context), Some(&request))
        {
            warn!(
                "Denied resource call for plugin {}: {}",
                request.context.plugin_id, denied
            );
            writer.add_header("Content-Type", "application/json");
            writer.write_status(403);
            let _ = writer.write_body(br#"{"message": "Access denied"}"#);
            return Ok(());
        }

        let plugin = self
            .registry
            .plugin(&request.context.plugin_id)
            .ok_or_else(|| PluginError::NotRegistered(request.context.plugin_id.clone()))?;
        let transport = plugin
            .transport()
            .cloned()
            .ok_or(TransportError::MethodNotImplemented)?;

        let keep_cookies = keep_cookies_allowlist(&request.context);
        let prepared = prepare_resource_request(request, &keep_cookies);

        instrument_request(plugin.id(), "callResource", async {
            // The child token scopes the stream to this call; client
            // disconnects cancel it without touching the parent
            let child = token.child_token();
            let stream = Arc::new(ResourceStream::new(child.clone()));

            let call = async {
                let result = transport
                    .call_resource(child.clone(), prepared, stream.clone())
                    .await;
                if let Err(err) = stream.close() {
                    plugin
                        .logger()
                        .in_scope(|| warn!("Failed to close resource stream: {}", err));
                }
                result
            };
            let flush = flush_stream(&plugin, stream.clone(), writer);

            let (call_result, flush_result) = tokio::join!(call, flush);
            call_result.map_err(|err| PluginError::ResourceCallFailed {
                id: plugin.id().to_string(),
                source: err,
            })?;
            flush_result
        })
        .await
    }
}

fn datasource_url(context: &PluginContext) -> &str {
    context
        .datasource
        .as_ref()
        .map(|ds| ds.url.as_str())
        .unwrap_or("")
}

/// Cookie names the data source instance wants forwarded, from its settings
/// blob.
fn keep_cookies_allowlist(context: &PluginContext) -> Vec<String> {
    context
        .datasource
        .as_ref()
        .and_then(|ds| ds.json_data.get("keepCookies"))
        .and_then(|value| value.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Prepare the inbound request for forwarding: drop host-sensitive headers,
/// filter cookies against the allowlist, and rewrite the URL to the
/// plugin-relative path with the query string preserved.
fn prepare_resource_request(
    mut request: CallResourceRequest,
    keep_cookies: &[String],
) -> CallResourceRequest {
    request.headers.retain(|name, _| {
        !HOST_SENSITIVE_HEADERS
            .iter()
            .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
    });

    filter_cookie_header(&mut request.headers, keep_cookies);

    let rewritten = match request.url.split_once('?') {
        Some((_, query)) if !query.is_empty() => format!("{}?{}", request.path, query),
        _ => request.path.clone(),
    };
    request.url = rewritten;

    request
}

/// Keep only allowlisted cookies in the Cookie header; drop the header
/// entirely when nothing survives.
fn filter_cookie_header(headers: &mut HashMap<String, Vec<String>>, keep_cookies: &[String]) {
    let Some(name) = headers
        .keys()
        .find(|name| name.eq_ignore_ascii_case("cookie"))
        .cloned()
    else {
        return;
    };

    let Some(values) = headers.remove(&name) else {
        return;
    };
    let kept: Vec<String> = values
        .iter()
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|pair| {
            pair.split_once('=')
                .map(|(cookie_name, _)| keep_cookies.iter().any(|keep| keep == cookie_name))
                .unwrap_or(false)
        })
        .map(String::from)
        .collect();

    if !kept.is_empty() {
        headers.insert(name, vec![kept.join("; ")]);
    }
}

/// Drain the resource stream into the response writer.
///
/// The first frame commits status and headers; the status is written at
/// most once per call. A stream failure after the first frame can no longer
/// change the committed status, so it is logged and the stream closed.
async fn flush_stream(
    record: &PluginRecord,
    stream: Arc<ResourceStream>,
    writer: &mut dyn ResourceResponseWriter,
) -> Result<(), PluginError> {
    let mut processed = 0usize;

    loop {
        match stream.recv().await {
            Ok(frame) => {
                if processed == 0 {
                    let has_content_type = frame
                        .headers
                        .keys()
                        .any(|name| name.eq_ignore_ascii_case("content-type"));
                    if !has_content_type {
                        writer.add_header("Content-Type", "application/json");
                    }
                    for (name, values) in &frame.headers {
                        // Cookies from a backend plugin never reach clients
                        if name.eq_ignore_ascii_case("set-cookie") {
                            continue;
                        }
                        for value in values {
                            writer.add_header(name, value);
                        }
                    }
                    writer.write_status(frame.status);
                }

                if let Err(err) = writer.write_body(&frame.body) {
                    record
                        .logger()
                        .in_scope(|| error!("Failed to write resource response: {}", err));
                }
                writer.flush();
                processed += 1;
            }
            Err(StreamError::Eof) => {
                if processed == 0 {
                    return Err(PluginError::EmptyResourceResponse);
                }
                return Ok(());
            }
            Err(err) => {
                if processed == 0 {
                    return Err(PluginError::ResourceCallFailed {
                        id: record.id().to_string(),
                        source: TransportError::Other(err.to_string()),
                    });
                }
                // The client already saw a 2xx; nothing to do but wind down
                record
                    .logger()
                    .in_scope(|| error!("Failed to receive resource response: {}", err));
                let _ = stream.close();
                return Ok(());
            }
        }
    }
}
