//! Session runtime: one instance of every component for the process lifetime.

use connectivity_monitor::{ConnectivityMonitor, NetworkSource, ProbeNetworkSource};
use credential_storage::CredentialStore;
use realtime_channel::{
    AccessTokenProvider, ChannelConfig, ChannelResult, Connector, LifecycleEvent, RealtimeChannel,
    WebSocketConnector,
};
use session_auth::{
    AuthBackend, AuthGateway, HttpAuthBackend, HttpDispatcher, RefreshConfig, ReqwestDispatcher,
    SessionManager, SessionState, SessionStateTracker, TokenRefreshCoordinator,
};
use session_config_and_utils::{Config, Paths};
use std::sync::Arc;
use tracing::info;

/// Process-wide session components.
pub struct SessionRuntime {
    pub config: Arc<Config>,
    pub paths: Arc<Paths>,
    pub store: Arc<CredentialStore>,
    pub session: Arc<SessionManager>,
    pub gateway: AuthGateway,
    pub connectivity: ConnectivityMonitor,
    pub channel: RealtimeChannel,
}

impl SessionRuntime {
    /// Wire the production components. Must run inside a tokio runtime.
    pub fn start(config: Config, paths: Paths) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        info!(
            api_base_url = %config.api_base_url,
            realtime_url = %config.realtime_url,
            base_dir = %paths.base_dir().display(),
            "Starting session runtime"
        );

        let backend: Arc<dyn AuthBackend> = Arc::new(HttpAuthBackend::new(&config.api_base_url)?);
        let dispatcher: Arc<dyn HttpDispatcher> = Arc::new(ReqwestDispatcher::new()?);
        let network: Arc<dyn NetworkSource> = Arc::new(ProbeNetworkSource::from_config(&config)?);
        let store = Arc::new(CredentialStore::open(&paths));

        Ok(Self::assemble(
            config,
            paths,
            store,
            backend,
            dispatcher,
            network,
            Arc::new(WebSocketConnector),
        ))
    }

    /// Wire the given components together.
    pub fn assemble(
        config: Config,
        paths: Paths,
        store: Arc<CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        dispatcher: Arc<dyn HttpDispatcher>,
        network: Arc<dyn NetworkSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let tracker = Arc::new(SessionStateTracker::new());
        let refresher = TokenRefreshCoordinator::new(
            store.clone(),
            backend.clone(),
            tracker.clone(),
            RefreshConfig::from(&config.refresh),
        );
        let gateway = AuthGateway::new(store.clone(), refresher, dispatcher);
        let session = Arc::new(SessionManager::new(store.clone(), backend, tracker));

        let restored = session.restore();
        info!(state = ?restored, "Session state restored");

        let connectivity = ConnectivityMonitor::new(network);
        let tokens: Arc<dyn AccessTokenProvider> = Arc::new(gateway.clone());
        let channel = RealtimeChannel::new(ChannelConfig::from_config(&config), connector, tokens);
        channel.reconnect_when_online(connectivity.observe());

        Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            store,
            session,
            gateway,
            connectivity,
            channel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub async fn connect_realtime(&self) -> ChannelResult<()> {
        self.channel.connect(&self.config.realtime_url).await
    }

    /// Process exit hook.
    pub fn shutdown(&self) {
        self.channel.on_lifecycle(LifecycleEvent::Exiting);
        info!("Session runtime stopped");
    }
}
