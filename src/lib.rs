//! # Corvus Plugin Manager
//!
//! This crate provides the plugin management system for the Corvus host.
//! It discovers plugin descriptors on disk, verifies signature manifests,
//! resolves parent/child containment, supervises backend plugin processes,
//! and proxies typed requests to the right plugin.
//!
//! ## Features
//!
//! - Descriptor discovery and validation (`plugin.json`)
//! - Signature manifest verification and trust classification
//! - Containment-based parent/child linking
//! - Lifecycle supervision with restart-on-exit monitoring
//! - Request proxying (data queries, streaming resource calls, health
//!   checks, metrics collection) with per-request instrumentation
//! - Install/uninstall coordination with an external archive installer

pub mod config;
pub mod descriptor;
pub mod error;
pub mod finder;
pub mod installer;
pub mod instrumentation;
pub mod loader;
pub mod manager;
pub mod observability;
pub mod plugin;
pub mod proxy;
pub mod registry;
pub mod signature;
pub mod stream;
pub mod transport;

pub use config::ManagerConfig;
pub use descriptor::{DescriptorError, PluginDescriptor, PluginType};
pub use error::PluginError;
pub use installer::{PluginInstaller, UpdateInfo};
pub use loader::Loader;
pub use manager::PluginManager;
pub use plugin::{PluginRecord, TrustClass};
pub use proxy::ResourceResponseWriter;
pub use registry::PluginRegistry;
pub use signature::{SignatureError, SignatureInfo, SignatureState, SignatureType};
pub use stream::{ResourceStream, StreamError};
pub use transport::{
    AccessDenied, AllowAllValidator, BackendTransport, CallResourceRequest, CallResourceResponse,
    CheckHealthRequest, CheckHealthResponse, CollectMetricsResponse, DataQuery, DataResponse,
    DataSourceSettings, HealthStatus, PluginContext, QueryDataRequest, QueryDataResponse,
    RequestValidator, TransportError, TransportFactory,
};

// Well-known filenames and identities
pub const DESCRIPTOR_FILENAME: &str = "plugin.json";
pub const MANIFEST_FILENAME: &str = "MANIFEST.json";
pub const MODULE_FILENAME: &str = "module.js";
pub const INTERNAL_SIGNING_IDENTITY: &str = "corvus-core";
