//! Client facade.
//!
//! [`NlsClient`] owns the worker runtime, the process-wide configuration,
//! the pre-connected pool and the registry of live requests. Requests
//! created here hold only a weak reference back, so dropping the client
//! releases everything it created.
//!
//! # Example
//! ```rust,no_run
//! use nls_sdk::NlsClient;
//!
//! # fn main() -> Result<(), nls_sdk::NlsError> {
//! let client = NlsClient::new();
//! client.start_work_thread(1)?;
//! let request = client.create_recognizer_request("my-app", false)?;
//! request.set_appkey("appkey")?;
//! request.set_token("token")?;
//! request.start()?;
//! client.release_request(&request)?;
//! # Ok(())
//! # }
//! ```

use parking_lot::{Mutex, RwLock};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::{AddressFamily, ClientConfig, LogConfig, PoolConfig};
use crate::core::directive::SDK_VERSION;
use crate::core::encoder::EncoderFactory;
use crate::core::registry::{NodeManager, OwnerId};
use crate::core::transport::{ChannelConnector, PreconnectedPool, WebSocketConnector};
use crate::errors::{NlsError, NlsResult};
use crate::request::cosyvoice::CosyVoiceSpec;
use crate::request::dash_transcriber::ParaformerSpec;
use crate::request::dialog::{DialogSpec, DialogVersion};
use crate::request::flowing_synthesizer::FlowingSynthesizerSpec;
use crate::request::recognizer::RecognizerSpec;
use crate::request::synthesizer::SynthesizerSpec;
use crate::request::transcriber::TranscriberSpec;
use crate::request::{
    DashCosyVoiceSynthesizerRequest, DashParaformerTranscriberRequest, DialogAssistantRequest,
    FlowingSynthesizerRequest, Request, ServiceSpec, SpeechRecognizerRequest,
    SpeechSynthesizerRequest, SpeechTranscriberRequest,
};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Shared context
// =============================================================================

/// State shared between the client and the nodes it created.
pub struct ClientContext {
    pub(crate) owner: OwnerId,
    config: RwLock<ClientConfig>,
    runtime: Mutex<Option<Runtime>>,
    handle: RwLock<Option<Handle>>,
    pub(crate) connector: Arc<dyn ChannelConnector>,
    pub(crate) pool: Arc<PreconnectedPool>,
    pub(crate) encoders: RwLock<Option<EncoderFactory>>,
    pub(crate) manager: NodeManager,
}

impl ClientContext {
    /// Handle of the worker runtime.
    pub(crate) fn handle(&self) -> NlsResult<Handle> {
        self.handle
            .read()
            .clone()
            .ok_or(NlsError::WorkThreadNotStarted)
    }

    pub(crate) fn config(&self) -> ClientConfig {
        self.config.read().clone()
    }
}

// =============================================================================
// NlsClient
// =============================================================================

pub struct NlsClient {
    context: Arc<ClientContext>,
}

impl Default for NlsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NlsClient {
    pub fn new() -> Self {
        Self::with_connector(ClientConfig::default(), Arc::new(WebSocketConnector))
    }

    /// Build a client from a validated configuration.
    pub fn with_config(mut config: ClientConfig) -> NlsResult<Self> {
        config.validate()?;
        Ok(Self::with_connector(config, Arc::new(WebSocketConnector)))
    }

    /// Build a client that opens channels through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn ChannelConnector>) -> Self {
        // Another component may already have installed a provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let owner = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        debug!(owner, "Creating NLS client");
        Self {
            context: Arc::new(ClientContext {
                owner,
                pool: Arc::new(PreconnectedPool::new(config.pool)),
                config: RwLock::new(config),
                runtime: Mutex::new(None),
                handle: RwLock::new(None),
                connector,
                encoders: RwLock::new(None),
                manager: NodeManager::new(),
            }),
        }
    }

    pub fn version() -> &'static str {
        SDK_VERSION
    }

    /// Characters in `text` as the services count them.
    pub fn calculate_utf8_chars(text: &str) -> usize {
        text.chars().count()
    }

    // ===== Worker threads =====

    /// Start the worker runtime with `threads` workers; 0 uses the
    /// configured count. Calling it again keeps the running pool.
    pub fn start_work_thread(&self, threads: usize) -> NlsResult<()> {
        let mut runtime = self.context.runtime.lock();
        if runtime.is_some() {
            warn!("Work threads already started");
            return Ok(());
        }
        let threads = if threads == 0 {
            self.context.config.read().worker_threads
        } else {
            threads
        };
        let built = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("nls-worker")
            .enable_all()
            .build()
            .map_err(|e| NlsError::lifecycle(format!("cannot start work threads: {e}")))?;
        *self.context.handle.write() = Some(built.handle().clone());
        *runtime = Some(built);
        self.context.config.write().worker_threads = threads;
        info!(threads, "NLS work threads started");
        Ok(())
    }

    // ===== Global settings =====

    /// Blocking budget for `start()`/`stop()`; 0 makes them asynchronous.
    pub fn set_sync_call_timeout(&self, ms: u64) {
        self.context.config.write().sync_call_timeout_ms = ms;
    }

    /// Keep up to `max_count` channels per URL connected ahead of time.
    pub fn set_preconnected_pool(&self, max_count: usize, idle_timeout_ms: u64, request_timeout_ms: u64) {
        let pool = PoolConfig::new(max_count, idle_timeout_ms, request_timeout_ms);
        self.context.config.write().pool = pool;
        self.context.pool.configure(pool);
    }

    /// Accepts `AF_INET`, `AF_INET6` or `AF_UNSPEC`.
    pub fn set_addr_in_family(&self, family: &str) -> NlsResult<()> {
        let family: AddressFamily = family.parse()?;
        let mut config = self.context.config.write();
        if let Some(ip) = config.direct_host.filter(|ip| !family.admits(ip)) {
            return Err(NlsError::config(format!(
                "direct host {ip} does not match address family {family}"
            )));
        }
        config.address_family = family;
        Ok(())
    }

    /// Connect to `ip` instead of resolving the URL host; `None` clears it.
    pub fn set_direct_host(&self, ip: Option<&str>) -> NlsResult<()> {
        let parsed = ip
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|e| NlsError::config(format!("invalid direct host '{raw}': {e}")))
            })
            .transpose()?;
        let mut config = self.context.config.write();
        if let Some(ip) = parsed.filter(|ip| !config.address_family.admits(ip)) {
            return Err(NlsError::config(format!(
                "direct host {ip} does not match address family {}",
                config.address_family
            )));
        }
        config.direct_host = parsed;
        Ok(())
    }

    /// Install a tracing subscriber; see [`crate::logging::init`].
    pub fn set_log_config(&self, log: LogConfig) -> NlsResult<bool> {
        let installed = crate::logging::init(&log)?;
        self.context.config.write().log = log;
        Ok(installed)
    }

    /// Register the factory used for opus/opu audio encoding.
    pub fn set_encoder_factory(&self, factory: EncoderFactory) {
        *self.context.encoders.write() = Some(factory);
    }

    pub fn config(&self) -> ClientConfig {
        self.context.config()
    }

    // ===== Requests =====

    pub fn create_recognizer_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<SpeechRecognizerRequest> {
        self.create(RecognizerSpec::new(sdk_name, long_connection))
    }

    pub fn create_transcriber_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<SpeechTranscriberRequest> {
        self.create(TranscriberSpec::new(sdk_name, long_connection))
    }

    pub fn create_synthesizer_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<SpeechSynthesizerRequest> {
        self.create(SynthesizerSpec::new(sdk_name, long_connection))
    }

    pub fn create_flowing_synthesizer_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<FlowingSynthesizerRequest> {
        self.create(FlowingSynthesizerSpec::new(sdk_name, long_connection))
    }

    pub fn create_dialog_assistant_request(
        &self,
        version: DialogVersion,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<DialogAssistantRequest> {
        self.create(DialogSpec::new(sdk_name, long_connection, version))
    }

    /// Paraformer by default; pick a FunASR model with `set_model`.
    pub fn create_dash_paraformer_transcriber_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<DashParaformerTranscriberRequest> {
        self.create(ParaformerSpec::new(sdk_name, long_connection))
    }

    pub fn create_dash_cosyvoice_synthesizer_request(
        &self,
        sdk_name: &str,
        long_connection: bool,
    ) -> NlsResult<DashCosyVoiceSynthesizerRequest> {
        self.create(CosyVoiceSpec::new(sdk_name, long_connection))
    }

    fn create<S: ServiceSpec>(&self, spec: S) -> NlsResult<Request<S>> {
        let request = Request::register(&self.context, spec);
        debug!(service = S::LABEL, id = %request.id(), "Request created");
        Ok(request)
    }

    /// Cancel `request` if it is still open, detach its callbacks and
    /// free it. Releasing twice, or a request of another client, fails.
    pub fn release_request<S: ServiceSpec>(&self, request: &Request<S>) -> NlsResult<()> {
        if request.owner() != self.context.owner {
            return Err(NlsError::lifecycle("request belongs to another client"));
        }
        self.context.manager.release(self.context.owner, request.id())
    }

    /// Live requests created by this client.
    pub fn active_requests(&self) -> usize {
        self.context.manager.owned_by(self.context.owner).len()
    }
}

impl Drop for NlsClient {
    fn drop(&mut self) {
        let owner = self.context.owner;
        for id in self.context.manager.owned_by(owner) {
            if let Err(e) = self.context.manager.release(owner, id) {
                warn!(%id, error = %e, "Release on client drop failed");
            }
        }
        self.context.handle.write().take();
        if let Some(runtime) = self.context.runtime.lock().take() {
            runtime.shutdown_background();
        }
        debug!(owner, "NLS client dropped");
    }
}
