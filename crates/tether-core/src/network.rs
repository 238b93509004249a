//! Wiring of the whole layer
//!
//! [`Network`] builds every component from one [`Config`] and shares the
//! single token store, cache and queue between them.
//!
//! ```ignore
//! let network = Network::open().await?;
//! network.client.login("parent@school.test", "secret").await?;
//! let meals = network.client.get("/meals").await?;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::auth::TokenStore;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::connectivity::{spawn_probe, ConnectivityMonitor};
use crate::http::{AuthenticatedClient, ClientOptions, ReqwestTransport};
use crate::queue::{MutationSender, OfflineQueue};
use crate::realtime::{bind_to_auth, LogoutPolicy, RealtimeSession, WsConnector};
use crate::storage::FileSecureStore;

pub struct Network {
    pub config: Config,
    pub tokens: Arc<TokenStore>,
    pub cache: Arc<ResponseCache>,
    pub queue: Arc<OfflineQueue>,
    pub client: Arc<AuthenticatedClient>,
    pub realtime: Arc<RealtimeSession>,
}

impl Network {
    /// Open with the configuration from disk and environment
    pub async fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config).await
    }

    /// Open with a specific configuration
    ///
    /// Restores the stored credential, the response cache and the offline
    /// queue from the data directory.
    pub async fn open_with_config(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "Failed to create data directory {}",
                config.data_dir.display()
            )
        })?;

        let secure = FileSecureStore::open(config.credentials_path())
            .context("Failed to open credential store")?;
        let tokens = Arc::new(
            TokenStore::load(Arc::new(secure))
                .await
                .context("Failed to restore credentials")?,
        );
        let cache = Arc::new(
            ResponseCache::with_path(config.cache_path(), config.cache_freshness())
                .context("Failed to open response cache")?,
        );
        let queue = Arc::new(
            OfflineQueue::with_path(config.queue_path()).context("Failed to open offline queue")?,
        );

        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
        let client = Arc::new(AuthenticatedClient::new(
            Arc::new(transport),
            tokens.clone(),
            cache.clone(),
            queue.clone(),
            ClientOptions::from(&config),
        ));

        let realtime = Arc::new(RealtimeSession::new(
            Arc::new(WsConnector::new(config.realtime_url.clone())),
            config.reconnect_policy(),
        ));

        Ok(Self {
            config,
            tokens,
            cache,
            queue,
            client,
            realtime,
        })
    }

    /// Probe the API base URL every `probe_interval_secs` and replay the
    /// queue whenever it becomes reachable again
    pub fn start_monitor(&self) -> ConnectivityMonitor {
        let reports = spawn_probe(self.config.api_base_url.clone(), self.config.probe_interval());
        let sender: Arc<dyn MutationSender> = self.client.clone();
        ConnectivityMonitor::spawn(
            reports,
            self.queue.clone(),
            sender,
            self.config.syncing_display(),
        )
    }

    /// Keep the realtime session in step with sign-in state
    pub async fn bind_realtime(&self, on_logout: LogoutPolicy) -> JoinHandle<()> {
        bind_to_auth(&self.tokens, self.realtime.clone(), on_logout).await
    }
}
