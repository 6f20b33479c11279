//! Backend transport interface and request shapes.
//!
//! The per-plugin transport is an external collaborator: the manager only
//! drives its lifecycle and forwards typed requests to it. Implementations
//! typically wrap an out-of-process RPC client; tests use in-memory fakes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::descriptor::PluginDescriptor;
use crate::plugin::TrustClass;
use crate::stream::ResourceStream;

/// Transport-level errors.
///
/// `MethodNotImplemented` and `PluginUnavailable` are well-known sentinels
/// that the proxy passes through unchanged so callers can pattern-match on
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("method not implemented")]
    MethodNotImplemented,

    #[error("plugin unavailable")]
    PluginUnavailable,

    #[error("transport error: {0}")]
    Other(String),
}

/// Connection details of the data source instance a request addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceSettings {
    /// The data source URL.
    pub url: String,

    /// Opaque per-instance settings blob.
    #[serde(default)]
    pub json_data: serde_json::Value,
}

/// Identifies the plugin (and optionally the data source instance) a
/// request is addressed to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginContext {
    pub plugin_id: String,

    #[serde(default)]
    pub datasource: Option<DataSourceSettings>,
}

/// A single query within a data request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    /// Caller-chosen reference id, echoed in the response map.
    pub ref_id: String,

    /// Query model, interpreted by the plugin.
    #[serde(default)]
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataRequest {
    pub context: PluginContext,
    pub queries: Vec<DataQuery>,
}

/// Response for one query, keyed by its reference id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub frames: serde_json::Value,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckHealthRequest {
    pub context: PluginContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckHealthResponse {
    pub status: HealthStatus,
    pub message: String,

    #[serde(default)]
    pub json_details: serde_json::Value,
}

impl CheckHealthResponse {
    /// The 403-equivalent response returned when the request validator
    /// rejects a health check.
    pub fn access_denied() -> Self {
        Self {
            status: HealthStatus::Error,
            message: "Access denied".to_string(),
            json_details: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectMetricsResponse {
    /// Metrics in Prometheus text exposition format.
    pub prometheus_text: String,
}

/// An HTTP-like request forwarded to a plugin's resource endpoint.
#[derive(Debug, Clone, Default)]
pub struct CallResourceRequest {
    pub context: PluginContext,

    /// Plugin-relative resource path.
    pub path: String,

    pub method: String,

    /// Full request URL as received by the host.
    pub url: String,

    pub headers: HashMap<String, Vec<String>>,

    /// Request body, fully buffered.
    pub body: Vec<u8>,
}

/// One frame of a streamed resource response. Status and headers are only
/// meaningful on the first frame.
#[derive(Debug, Clone, Default)]
pub struct CallResourceResponse {
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// The per-plugin backend transport.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Start the backend process.
    async fn start(&self, token: CancellationToken) -> Result<(), TransportError>;

    /// Stop the backend process, bounded by the given token.
    async fn stop(&self, token: CancellationToken) -> Result<(), TransportError>;

    /// Whether the backend process has exited since the last start.
    fn exited(&self) -> bool;

    async fn query_data(
        &self,
        token: CancellationToken,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, TransportError>;

    /// Forward a resource call, sending response frames on `stream`.
    async fn call_resource(
        &self,
        token: CancellationToken,
        request: CallResourceRequest,
        stream: Arc<ResourceStream>,
    ) -> Result<(), TransportError>;

    async fn check_health(
        &self,
        token: CancellationToken,
        request: CheckHealthRequest,
    ) -> Result<CheckHealthResponse, TransportError>;

    async fn collect_metrics(
        &self,
        token: CancellationToken,
    ) -> Result<CollectMetricsResponse, TransportError>;
}

/// Resolves a transport for an admitted plugin record.
///
/// The default factory spawns out-of-process backends; core plugins use
/// whitelisted factories registered by the host.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &PluginDescriptor,
        class: TrustClass,
        plugin_dir: &Path,
    ) -> Result<Arc<dyn BackendTransport>, TransportError>;
}

/// Rejection produced by the request validator.
#[derive(Debug, Clone, Error)]
#[error("access denied: {reason}")]
pub struct AccessDenied {
    pub reason: String,
}

/// Authorizes requests against a data source URL before they are proxied.
pub trait RequestValidator: Send + Sync {
    fn validate(
        &self,
        ds_url: &str,
        request: Option<&CallResourceRequest>,
    ) -> Result<(), AccessDenied>;
}

/// A validator that admits every request; useful as a default and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllValidator;

impl RequestValidator for AllowAllValidator {
    fn validate(
        &self,
        _ds_url: &str,
        _request: Option<&CallResourceRequest>,
    ) -> Result<(), AccessDenied> {
        Ok(())
    }
}
