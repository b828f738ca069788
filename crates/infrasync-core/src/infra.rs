//! One messaging infrastructure: its routers, its brokers and the links
//! between them.
//!
//! [`InfraClient`] owns a [`RouterState`] per router and a [`BrokerState`]
//! per broker. A sync pass reconciles the tracked peers against the
//! desired host lists, (re)initializes them, makes every router connect to
//! every broker and reports the resulting connector health.
//!
//! All structural changes and sync passes run under one async mutex;
//! [`InfraClient::status`] reads the last snapshot without taking it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use infrasync_amqp::{CommandClient, Connector, Endpoint};
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::InfraConfig;
use crate::error::CoreError;
use crate::model::{
    BrokerEntity, ConnectorStatus, Host, RouterEntity, RouterEntityKind, connector_name,
};
use crate::scheduler::{Placement, Scheduler};
use crate::state::{
    BROKER_COMMAND_ADDRESS, BROKER_RESPONSE_ADDRESS, BrokerState, ROUTER_COMMAND_ADDRESS,
    ROUTER_RESPONSE_ADDRESS, RouterState,
};

// ── StateFactory ─────────────────────────────────────────────────────

/// Builds peer states for newly desired hosts. The returned state has its
/// channel started.
pub trait StateFactory: Send + Sync + 'static {
    fn router(&self, host: &Host, port: u16) -> Result<RouterState, CoreError>;
    fn broker(&self, host: &Host, port: u16) -> Result<BrokerState, CoreError>;
}

/// Factory dialing peers through an AMQP [`Connector`].
pub struct AmqpStateFactory {
    connector: Arc<dyn Connector>,
    config: InfraConfig,
}

impl AmqpStateFactory {
    pub fn new(connector: Arc<dyn Connector>, config: InfraConfig) -> Self {
        Self { connector, config }
    }

    fn client(
        &self,
        host: &Host,
        port: u16,
        address: &str,
        reply_address: &str,
    ) -> Result<CommandClient, CoreError> {
        let mut endpoint = Endpoint::new(&host.hostname, &host.ip, port, address, reply_address)?
            .with_connect_timeout(self.config.connect_timeout)
            .with_property("product", &self.config.product);
        if let Some(tls) = &self.config.tls {
            endpoint = endpoint.with_tls(tls.clone());
        }
        Ok(CommandClient::new(
            endpoint,
            Arc::clone(&self.connector),
            self.config.command.clone(),
        ))
    }
}

impl StateFactory for AmqpStateFactory {
    fn router(&self, host: &Host, port: u16) -> Result<RouterState, CoreError> {
        let client = self.client(host, port, ROUTER_COMMAND_ADDRESS, ROUTER_RESPONSE_ADDRESS)?;
        Ok(RouterState::new(host.clone(), port, client))
    }

    fn broker(&self, host: &Host, port: u16) -> Result<BrokerState, CoreError> {
        let client = self.client(host, port, BROKER_COMMAND_ADDRESS, BROKER_RESPONSE_ADDRESS)?;
        Ok(BrokerState::new(host.clone(), port, client))
    }
}

impl std::fmt::Debug for AmqpStateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpStateFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ── InfraClient ──────────────────────────────────────────────────────

#[derive(Default)]
struct InfraState {
    routers: BTreeMap<Host, RouterState>,
    brokers: BTreeMap<Host, BrokerState>,
    /// Hostname → tracked host, for routers and brokers alike.
    host_map: HashMap<String, Host>,
    desired_routers: Vec<Host>,
    desired_brokers: Vec<Host>,
    /// Set once a full sync pass has completed.
    initialized: bool,
}

/// Peer set diff, matched by hostname.
struct HostDiff {
    removed: Vec<Host>,
    added: Vec<Host>,
}

impl HostDiff {
    fn compute<'a>(tracked: impl Iterator<Item = &'a Host>, desired: &[Host]) -> Self {
        let mut wanted: BTreeMap<&str, &Host> =
            desired.iter().map(|h| (h.hostname.as_str(), h)).collect();
        let mut removed = Vec::new();

        for host in tracked {
            match wanted.get(host.hostname.as_str()) {
                Some(desired) if desired.ip == host.ip => {
                    wanted.remove(host.hostname.as_str());
                }
                // Gone, or back with a new IP.
                _ => removed.push(host.clone()),
            }
        }

        Self {
            removed,
            added: wanted.into_values().cloned().collect(),
        }
    }

    /// Whether `host` is only being replaced by one with a new IP.
    fn readded(&self, host: &Host) -> bool {
        self.added.iter().any(|h| h.hostname == host.hostname)
    }
}

/// Reconciler for one messaging infrastructure.
pub struct InfraClient {
    name: String,
    namespace: String,
    factory: Arc<dyn StateFactory>,
    config: InfraConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    state: Mutex<InfraState>,
    status: ArcSwap<Vec<ConnectorStatus>>,
}

impl InfraClient {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        factory: Arc<dyn StateFactory>,
        config: InfraConfig,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            factory,
            config,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            state: Mutex::new(InfraState::default()),
            status: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &InfraConfig {
        &self.config
    }

    // ── Desired state ────────────────────────────────────────────

    /// Record the routers the next [`sync`](Self::sync) should manage.
    pub async fn update_routers(&self, hosts: Vec<Host>) {
        self.state.lock().await.desired_routers = hosts;
    }

    /// Record the brokers the next [`sync`](Self::sync) should manage.
    pub async fn update_brokers(&self, hosts: Vec<Host>) {
        self.state.lock().await.desired_brokers = hosts;
    }

    /// Run a sync pass against the recorded desired hosts.
    pub async fn sync(&self) -> Result<Vec<ConnectorStatus>, CoreError> {
        let (routers, brokers) = {
            let state = self.state.lock().await;
            (state.desired_routers.clone(), state.desired_brokers.clone())
        };
        self.sync_all(&routers, &brokers).await
    }

    /// Bring the tracked peers in line with `routers` and `brokers`, then
    /// connect every router to every broker.
    ///
    /// Returns one [`ConnectorStatus`] per router/broker pair, or the first
    /// error. Peers synced before an error stay connected and initialized.
    pub async fn sync_all(
        &self,
        routers: &[Host],
        brokers: &[Host],
    ) -> Result<Vec<ConnectorStatus>, CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let cancel = self.cancel.child_token();

        tracing::info!(
            infra = %self,
            routers = routers.len(),
            brokers = brokers.len(),
            "Syncing infrastructure"
        );
        state.desired_routers = routers.to_vec();
        state.desired_brokers = brokers.to_vec();

        self.apply_router_hosts(state, routers).await?;
        self.apply_broker_hosts(state, &cancel, brokers).await?;

        if state.initialized {
            self.check_resync(state).await;
        }
        self.initialize(state).await?;

        let statuses = self.ensure_connectors(state, &cancel).await?;

        if self.config.readiness.enabled {
            self.ensure_readiness(state, &cancel).await?;
        }

        tracing::info!(
            infra = %self,
            routers = state.routers.len(),
            brokers = state.brokers.len(),
            connectors = statuses.len(),
            "State synchronization complete"
        );
        state.initialized = true;
        self.status.store(Arc::new(statuses.clone()));
        Ok(statuses)
    }

    /// Connector health as of the last completed sync pass.
    pub fn status(&self) -> Arc<Vec<ConnectorStatus>> {
        self.status.load_full()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn routers(&self) -> Vec<Host> {
        self.state.lock().await.routers.keys().cloned().collect()
    }

    pub async fn brokers(&self) -> Vec<Host> {
        self.state.lock().await.brokers.keys().cloned().collect()
    }

    /// Tracked host for `hostname`, router or broker.
    pub async fn host(&self, hostname: &str) -> Option<Host> {
        self.state.lock().await.host_map.get(hostname).cloned()
    }

    /// Cached entities of the router at `hostname`.
    pub async fn router_entities(&self, hostname: &str) -> Option<Vec<RouterEntity>> {
        let state = self.state.lock().await;
        let host = state.host_map.get(hostname)?;
        state.routers.get(host).map(RouterState::entities)
    }

    /// Cached entities of the broker at `hostname`.
    pub async fn broker_entities(&self, hostname: &str) -> Option<Vec<BrokerEntity>> {
        let state = self.state.lock().await;
        let host = state.host_map.get(hostname)?;
        state.brokers.get(host).map(BrokerState::entities)
    }

    // ── Scheduling ───────────────────────────────────────────────

    pub async fn schedule_tenant(
        &self,
        scheduler: &dyn Scheduler,
        placement: &mut Placement,
    ) -> Result<(), CoreError> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(CoreError::NotInitialized);
        }
        let brokers: Vec<&BrokerState> = state.brokers.values().collect();
        scheduler.schedule_tenant(placement, &brokers)
    }

    pub async fn schedule_address(
        &self,
        scheduler: &dyn Scheduler,
        placement: &mut Placement,
    ) -> Result<(), CoreError> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(CoreError::NotInitialized);
        }
        let brokers: Vec<&BrokerState> = state.brokers.values().collect();
        scheduler.schedule_address(placement, &brokers)
    }

    // ── Entity sets ──────────────────────────────────────────────

    /// Ensure `router_entities` on every router and each broker's entry of
    /// `broker_entities` on that broker. Brokers go first so router links
    /// have something to attach to.
    pub async fn sync_entities(
        &self,
        router_entities: &[RouterEntity],
        broker_entities: &HashMap<Host, Vec<BrokerEntity>>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let cancel = self.cancel.child_token();
        let cancel = &cancel;

        join_all_first_error(state.brokers.iter_mut().filter_map(|(host, broker)| {
            let entities = broker_entities.get(host).filter(|e| !e.is_empty())?;
            Some(async move { broker.ensure_entities(cancel, entities).await })
        }))
        .await?;

        if !router_entities.is_empty() {
            join_all_first_error(
                state
                    .routers
                    .values_mut()
                    .map(|router| router.ensure_entities(cancel, router_entities)),
            )
            .await?;
        }
        Ok(())
    }

    /// Delete `router_entities` from every router, then each broker's entry
    /// of `broker_entities` from that broker.
    pub async fn delete_entities(
        &self,
        router_entities: &[RouterEntity],
        broker_entities: &HashMap<Host, Vec<BrokerEntity>>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let cancel = self.cancel.child_token();
        let cancel = &cancel;

        if !router_entities.is_empty() {
            join_all_first_error(
                state
                    .routers
                    .values_mut()
                    .map(|router| router.delete_entities(cancel, router_entities)),
            )
            .await?;
        }

        join_all_first_error(state.brokers.iter_mut().filter_map(|(host, broker)| {
            let entities = broker_entities.get(host).filter(|e| !e.is_empty())?;
            Some(async move { broker.delete_entities(cancel, entities).await })
        }))
        .await?;
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Abort any running pass and stop every peer's channel.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().await;

        let routers = std::mem::take(&mut state.routers);
        let brokers = std::mem::take(&mut state.brokers);
        state.host_map.clear();
        state.initialized = false;

        join_all(routers.into_values().map(RouterState::shutdown)).await;
        join_all(brokers.into_values().map(BrokerState::shutdown)).await;
        tracing::info!(infra = %self, "Infrastructure client shut down");
    }

    // ── Sync internals ───────────────────────────────────────────

    async fn apply_router_hosts(
        &self,
        state: &mut InfraState,
        desired: &[Host],
    ) -> Result<(), CoreError> {
        let diff = HostDiff::compute(state.routers.keys(), desired);

        for host in diff.removed {
            tracing::info!(infra = %self, %host, "Removing router");
            state.host_map.remove(&host.hostname);
            if let Some(router) = state.routers.remove(&host) {
                router.shutdown().await;
            }
        }

        for host in diff.added {
            tracing::info!(infra = %self, %host, "Adding router");
            let router = self.factory.router(&host, self.config.router_port)?;
            state.host_map.insert(host.hostname.clone(), host.clone());
            state.routers.insert(host, router);
        }
        Ok(())
    }

    async fn apply_broker_hosts(
        &self,
        state: &mut InfraState,
        cancel: &CancellationToken,
        desired: &[Host],
    ) -> Result<(), CoreError> {
        let diff = HostDiff::compute(state.brokers.keys(), desired);

        for host in &diff.removed {
            tracing::info!(infra = %self, %host, "Removing broker");

            // A broker coming back under a new IP keeps its connector name.
            if !diff.readded(host) {
                let port = state
                    .brokers
                    .get(host)
                    .map_or(self.config.broker_port, BrokerState::port);
                let connector = [RouterEntity::named(
                    RouterEntityKind::Connector,
                    connector_name(host, port),
                )];
                let connector = &connector;
                join_all_first_error(
                    state
                        .routers
                        .values_mut()
                        .filter(|router| router.is_initialized())
                        .map(|router| router.delete_entities(cancel, connector)),
                )
                .await?;
            }

            state.host_map.remove(&host.hostname);
            if let Some(broker) = state.brokers.remove(host) {
                broker.shutdown().await;
            }
        }

        for host in diff.added {
            tracing::info!(infra = %self, %host, "Adding broker");
            let broker = self.factory.broker(&host, self.config.broker_port)?;
            state.host_map.insert(host.hostname.clone(), host.clone());
            state.brokers.insert(host, broker);
        }
        Ok(())
    }

    /// Reset every peer whose resync deadline has passed.
    async fn check_resync(&self, state: &mut InfraState) {
        let now = self.clock.now();
        for router in state.routers.values_mut() {
            if router.needs_resync(now) {
                tracing::info!(infra = %self, host = %router.host(), "Router resync due");
                router.reset().await;
            }
        }
        for broker in state.brokers.values_mut() {
            if broker.needs_resync(now) {
                tracing::info!(infra = %self, host = %broker.host(), "Broker resync due");
                broker.reset().await;
            }
        }
    }

    async fn initialize(&self, state: &mut InfraState) -> Result<(), CoreError> {
        let now = self.clock.now();

        join_all_first_error(state.routers.values_mut().map(|router| {
            let next_resync = self.next_resync(now);
            router.initialize(next_resync)
        }))
        .await?;

        join_all_first_error(state.brokers.values_mut().map(|broker| {
            let next_resync = self.next_resync(now);
            broker.initialize(next_resync)
        }))
        .await?;
        Ok(())
    }

    /// Ensure one connector per broker on every router and read their
    /// status back.
    async fn ensure_connectors(
        &self,
        state: &mut InfraState,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConnectorStatus>, CoreError> {
        let connectors: Vec<RouterEntity> = state
            .brokers
            .values()
            .map(|broker| {
                self.config
                    .connector
                    .connector_for(broker.host(), broker.port())
                    .into()
            })
            .collect();
        let connectors = &connectors;

        let per_router = join_all_first_error(state.routers.values_mut().map(|router| async move {
            if let Err(e) = router.ensure_entities(cancel, connectors).await {
                tracing::warn!(host = %router.host(), error = %e, "Error ensuring connectors");
                return Err(e);
            }

            let read = match router.read_entities(cancel, connectors).await.into_result() {
                Ok(read) => read,
                Err(e) => {
                    tracing::warn!(host = %router.host(), error = %e, "Error reading connector status");
                    return Err(e);
                }
            };

            let hostname = &router.host().hostname;
            Ok::<_, CoreError>(
                read.iter()
                    .filter_map(RouterEntity::as_connector)
                    .map(|c| ConnectorStatus::from_connector(hostname, c))
                    .collect::<Vec<_>>(),
            )
        }))
        .await?;

        Ok(per_router.into_iter().flatten().collect())
    }

    async fn ensure_readiness(
        &self,
        state: &mut InfraState,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let queue = [BrokerEntity::from(self.config.readiness.broker_queue())];
        let queue = &queue;
        join_all_first_error(
            state
                .brokers
                .values_mut()
                .map(|broker| broker.ensure_entities(cancel, queue)),
        )
        .await?;

        let listener = [RouterEntity::from(self.config.readiness.router_listener())];
        let listener = &listener;
        join_all_first_error(
            state
                .routers
                .values_mut()
                .map(|router| router.ensure_entities(cancel, listener)),
        )
        .await?;
        Ok(())
    }

    /// Resync deadline for a peer initialized at `now`, spread by jitter so
    /// peers do not all re-inventory at once.
    fn next_resync(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let min = self.config.resync_jitter_min;
        let max = self.config.resync_jitter_max.max(min);
        let jitter = rand::thread_rng().gen_range(min..=max);

        chrono::Duration::from_std(self.config.resync_interval + jitter)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl std::fmt::Display for InfraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Debug for InfraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfraClient")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("status", &self.status.load())
            .finish_non_exhaustive()
    }
}

/// Run all futures to completion, then return their outputs or the first
/// error in iteration order.
async fn join_all_first_error<I, F, T>(futures: I) -> Result<Vec<T>, CoreError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, CoreError>>,
{
    join_all(futures).await.into_iter().collect()
}
