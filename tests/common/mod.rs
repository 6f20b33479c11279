//! Shared fixtures for integration tests: on-disk plugin layouts, signed
//! manifests, and fake collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use corvus_plugin_manager::signature::{ManifestBody, SignatureManifest};
use corvus_plugin_manager::{
    loader::Initializer, AccessDenied, BackendTransport, CallResourceRequest,
    CallResourceResponse, CheckHealthRequest, CheckHealthResponse, CollectMetricsResponse,
    DataResponse, Loader, ManagerConfig, PluginDescriptor, PluginError, PluginInstaller,
    PluginManager, QueryDataRequest, QueryDataResponse, RequestValidator, ResourceResponseWriter,
    ResourceStream, TransportError, TransportFactory, TrustClass, UpdateInfo,
};

/// Deterministic signing key for manifest fixtures.
pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

/// The base64 public key matching [`signing_key`], for `ManagerConfig`.
pub fn trusted_key_base64() -> String {
    BASE64_STANDARD.encode(signing_key().verifying_key().as_bytes())
}

/// Write a plugin descriptor (and frontend loader file) into `dir`.
pub fn write_plugin(dir: &Path, id: &str, plugin_type: &str, backend: bool) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("plugin.json"),
        format!(
            r#"{{"id": "{}", "type": "{}", "info": {{"version": "1.0.0"}}, "backend": {}}}"#,
            id, plugin_type, backend
        ),
    )
    .unwrap();
    std::fs::write(dir.join("module.js"), "export {}").unwrap();
}

/// Sign a manifest covering the given files (relative to `dir`) and write
/// it as the plugin's `MANIFEST.json`.
pub fn write_signed_manifest(dir: &Path, signed_by: &str, files: &[&str]) {
    let mut listed = BTreeMap::new();
    for name in files {
        let bytes = std::fs::read(dir.join(name)).unwrap();
        listed.insert(name.to_string(), format!("{:x}", Sha256::digest(&bytes)));
    }
    let body: ManifestBody = serde_json::from_value(serde_json::json!({
        "alg": "sha256",
        "signed_by": signed_by,
        "org": "acme",
        "signature_type": "community",
        "files": listed,
    }))
    .unwrap();
    let payload = serde_json::to_vec(&body).unwrap();
    let signature = BASE64_STANDARD.encode(signing_key().sign(&payload).to_bytes());
    let manifest = SignatureManifest {
        manifest: body,
        signature,
    };
    std::fs::write(
        dir.join("MANIFEST.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

/// Config with the three roots under `base`.
pub fn config_for(base: &Path) -> ManagerConfig {
    ManagerConfig {
        core_root: base.join("core"),
        bundled_root: base.join("bundled"),
        external_root: base.join("external"),
        signing_keys: vec![trusted_key_base64()],
        ..Default::default()
    }
}

/// In-memory transport double with inspectable call counters.
#[derive(Default)]
pub struct FakeTransport {
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub exited: AtomicBool,
    pub fail_start: AtomicBool,
    pub query_error: Mutex<Option<TransportError>>,
    pub health_error: Mutex<Option<TransportError>>,
    pub frames: Mutex<Vec<CallResourceResponse>>,
    pub resource_error: Mutex<Option<TransportError>>,
    pub keep_streaming: AtomicBool,
    pub last_resource_request: Mutex<Option<CallResourceRequest>>,
}

#[async_trait]
impl BackendTransport for FakeTransport {
    async fn start(&self, _token: CancellationToken) -> Result<(), TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::Other("spawn failed".to_string()));
        }
        self.exited.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _token: CancellationToken) -> Result<(), TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn query_data(
        &self,
        _token: CancellationToken,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, TransportError> {
        if let Some(err) = self.query_error.lock().unwrap().clone() {
            return Err(err);
        }
        let responses = request
            .queries
            .iter()
            .map(|query| (query.ref_id.clone(), DataResponse::default()))
            .collect();
        Ok(QueryDataResponse { responses })
    }

    async fn call_resource(
        &self,
        _token: CancellationToken,
        request: CallResourceRequest,
        stream: Arc<ResourceStream>,
    ) -> Result<(), TransportError> {
        *self.last_resource_request.lock().unwrap() = Some(request);

        let frames = self.frames.lock().unwrap().clone();
        for frame in frames {
            stream
                .send(frame)
                .await
                .map_err(|err| TransportError::Other(err.to_string()))?;
        }

        if self.keep_streaming.load(Ordering::SeqCst) {
            loop {
                let frame = CallResourceResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: b"tick".to_vec(),
                };
                stream
                    .send(frame)
                    .await
                    .map_err(|err| TransportError::Other(err.to_string()))?;
            }
        }

        match self.resource_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn check_health(
        &self,
        _token: CancellationToken,
        _request: CheckHealthRequest,
    ) -> Result<CheckHealthResponse, TransportError> {
        if let Some(err) = self.health_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(serde_json::from_value(serde_json::json!({
            "status": "ok",
            "message": "healthy",
        }))
        .unwrap())
    }

    async fn collect_metrics(
        &self,
        _token: CancellationToken,
    ) -> Result<CollectMetricsResponse, TransportError> {
        Ok(CollectMetricsResponse {
            prometheus_text: "corvus_fake_metric 1\n".to_string(),
        })
    }
}

/// Factory that hands out [`FakeTransport`]s and remembers them so tests
/// can inspect call counters.
#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<Vec<(String, Arc<FakeTransport>)>>,
}

impl FakeFactory {
    pub fn transport(&self, id: &str) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|(plugin_id, _)| plugin_id == id)
            .map(|(_, transport)| transport.clone())
            .expect("no transport created for plugin")
    }
}

impl TransportFactory for FakeFactory {
    fn create(
        &self,
        descriptor: &PluginDescriptor,
        _class: TrustClass,
        _plugin_dir: &Path,
    ) -> Result<Arc<dyn BackendTransport>, TransportError> {
        let transport = Arc::new(FakeTransport::default());
        self.created
            .lock()
            .unwrap()
            .push((descriptor.id.clone(), transport.clone()));
        Ok(transport)
    }
}

/// Installer double that materialises plugin directories on disk.
#[derive(Default)]
pub struct FakeInstaller {
    pub installed: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl PluginInstaller for FakeInstaller {
    async fn install(
        &self,
        _token: CancellationToken,
        id: &str,
        version: &str,
        dest_dir: &Path,
        _archive_url: Option<&str>,
    ) -> Result<(), PluginError> {
        let dir = dest_dir.join(id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("plugin.json"),
            format!(
                r#"{{"id": "{}", "type": "datasource", "info": {{"version": "{}"}}, "backend": true}}"#,
                id, version
            ),
        )?;
        std::fs::write(dir.join("module.js"), "export {}")?;
        self.installed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn uninstall(&self, _token: CancellationToken, dir: &Path) -> Result<(), PluginError> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        self.removed.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }

    async fn get_update_info(
        &self,
        _token: CancellationToken,
        id: &str,
        version: &str,
    ) -> Result<UpdateInfo, PluginError> {
        Ok(UpdateInfo {
            archive_url: format!("https://plugins.corvus.example/{}/{}.zip", id, version),
        })
    }
}

/// Validator that rejects everything.
pub struct DenyAllValidator;

impl RequestValidator for DenyAllValidator {
    fn validate(
        &self,
        _ds_url: &str,
        _request: Option<&CallResourceRequest>,
    ) -> Result<(), AccessDenied> {
        Err(AccessDenied {
            reason: "denied by test".to_string(),
        })
    }
}

/// Validator that admits everything.
pub struct AllowAll;

impl RequestValidator for AllowAll {
    fn validate(
        &self,
        _ds_url: &str,
        _request: Option<&CallResourceRequest>,
    ) -> Result<(), AccessDenied> {
        Ok(())
    }
}

/// Response writer that records everything it is handed.
#[derive(Default)]
pub struct RecordingWriter {
    pub status: Option<u16>,
    pub status_writes: usize,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub flushes: usize,
}

impl RecordingWriter {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl ResourceResponseWriter for RecordingWriter {
    fn write_status(&mut self, status: u16) {
        self.status = Some(status);
        self.status_writes += 1;
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write_body(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// A manager wired to fake collaborators over a temp-dir plugin layout.
pub struct TestHost {
    pub cfg: Arc<ManagerConfig>,
    pub manager: PluginManager,
    pub factory: Arc<FakeFactory>,
    pub installer: Arc<FakeInstaller>,
}

pub fn host_with_validator(
    cfg: ManagerConfig,
    validator: Arc<dyn RequestValidator>,
) -> TestHost {
    let cfg = Arc::new(cfg);
    let factory = Arc::new(FakeFactory::default());
    let installer = Arc::new(FakeInstaller::default());
    let initializer = Initializer::new(
        Some(factory.clone() as Arc<dyn TransportFactory>),
        HashMap::new(),
    );
    let loader = Loader::new(cfg.clone(), initializer);
    let manager = PluginManager::new(cfg.clone(), loader, validator, installer.clone());
    TestHost {
        cfg,
        manager,
        factory,
        installer,
    }
}

pub fn host(cfg: ManagerConfig) -> TestHost {
    host_with_validator(cfg, Arc::new(AllowAll))
}
