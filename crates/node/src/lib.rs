//! The lightgate node.
//!
//! Construction wires the pipeline leaves-first (dispatcher, cacher,
//! validator, then the ingress server), each actor holding a one-way
//! mailbox to the next. Running the node serves HTTP and periodically
//! refreshes the address book through the injected peer-discovery
//! collaborator. Cancelling the token shuts everything down
//! gracefully: the server drains its connections and the refresh loop
//! exits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lg_node_client::NodeClient;
use lg_pipeline::{cache::ResponseCache, Cacher, Dispatcher, Validator};
use lg_server::{GatewayServer, RateLimits, ServerConfig};
use lg_store::{AddressBook, NodeId};
use tokio_util::sync::CancellationToken;
use url::Url;

const DEFAULT_MAILBOX_CAP: usize = 10;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Discovers the current back-end fleet. The gateway only consumes
/// the interface; how peers are actually found is someone else's
/// concern.
#[async_trait]
pub trait PeerDiscovery: Send + Sync + 'static {
    async fn discover_peers(&self) -> anyhow::Result<Vec<(NodeId, Url)>>;
}

/// Everything a node needs to run. `port` and `bootstrap` are
/// required; the rest default sensibly.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub port: u16,
    pub bootstrap: Vec<(NodeId, Url)>,
    pub max_batch_size: usize,
    pub timeout: Duration,
    pub mailbox_cap: usize,
    pub cache_ttl: Duration,
    pub node_timeout: Duration,
    pub rate_limits: RateLimits,
    pub refresh_interval: Duration,
}

impl NodeConfig {
    pub fn new(port: u16, bootstrap: Vec<(NodeId, Url)>) -> Self {
        let server = ServerConfig::new(port);
        Self {
            port,
            bootstrap,
            max_batch_size: server.max_batch_size,
            timeout: server.timeout,
            mailbox_cap: DEFAULT_MAILBOX_CAP,
            cache_ttl: DEFAULT_CACHE_TTL,
            node_timeout: DEFAULT_NODE_TIMEOUT,
            rate_limits: RateLimits::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.port);
        config.max_batch_size = self.max_batch_size;
        config.timeout = self.timeout;
        config.rate_limits = self.rate_limits.clone();
        config
    }
}

/// A wired, not-yet-running gateway node.
pub struct GatewayNode {
    server: GatewayServer,
    store: Arc<AddressBook>,
    discovery: Arc<dyn PeerDiscovery>,
    refresh_interval: Duration,
}

impl GatewayNode {
    pub fn new(config: NodeConfig, discovery: Arc<dyn PeerDiscovery>) -> Self {
        let store = Arc::new(AddressBook::new(config.bootstrap.clone()));

        let client = NodeClient::new(config.node_timeout);
        let dispatcher = Dispatcher::new(Arc::clone(&store), client).spawn(config.mailbox_cap);
        let cache = Arc::new(ResponseCache::new(config.cache_ttl));
        let cacher = Cacher::new(dispatcher, cache).spawn(config.mailbox_cap);
        let validator = Validator::new(cacher).spawn(config.mailbox_cap);

        let server = GatewayServer::new(config.server_config(), validator);
        Self { server, store, discovery, refresh_interval: config.refresh_interval }
    }

    /// The address book backing the dispatcher, mainly for inspection.
    pub fn store(&self) -> &Arc<AddressBook> {
        &self.store
    }

    /// The ingress server, for embedders that manage their own
    /// listener instead of going through [`run`](Self::run).
    pub fn server(&self) -> &GatewayServer {
        &self.server
    }

    /// Serves until `token` is cancelled. An immediate address refresh
    /// runs before the periodic ticks, so a freshly started node is
    /// not limited to its bootstrap fleet for the first interval.
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let GatewayNode { server, store, discovery, refresh_interval } = self;
        let server = tokio::spawn(server.listen(token.clone()));

        let mut tick = tokio::time::interval(refresh_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => refresh_addresses(&store, discovery.as_ref()).await,
                _ = token.cancelled() => break,
            }
        }

        server.await.expect("the server task does not panic")
    }
}

async fn refresh_addresses(store: &AddressBook, discovery: &dyn PeerDiscovery) {
    tracing::debug!("updating back-end node addresses");
    match discovery.discover_peers().await {
        Ok(peers) => {
            for (id, addr) in peers {
                store.insert(id, addr);
            }
        }
        Err(err) => tracing::warn!(error = %err, "error discovering peers"),
    }
}
