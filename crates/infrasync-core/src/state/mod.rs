//! Per-peer entity reconciliation.
//!
//! A [`PeerState`] mirrors the configuration of one router or broker in an
//! [`EntityCache`] and drives the peer toward a requested entity set. The
//! wire dialect of each peer technology lives behind [`Management`]:
//! [`RouterState`] and [`BrokerState`] are the two instantiations.
//!
//! The cache is trusted only as a whole. It is rebuilt by
//! [`initialize`](PeerState::initialize) and dropped again whenever the
//! command channel has reconnected in between, the resync deadline has
//! passed, or an operation failed with a connection-class error.
//!
//! Reconciliation methods take `&mut self`; a peer is never reconciled by
//! two callers at once.

pub mod broker;
pub mod router;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use infrasync_amqp::CommandClient;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::{EntityCache, Host, ManagedEntity};

pub use broker::{BROKER_COMMAND_ADDRESS, BROKER_RESPONSE_ADDRESS, BrokerManagement};
pub use router::{ROUTER_COMMAND_ADDRESS, ROUTER_RESPONSE_ADDRESS, RouterManagement};

/// Deadline for every management call issued by the reconciler.
pub const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(10);

pub type RouterState = PeerState<RouterManagement>;
pub type BrokerState = PeerState<BrokerManagement>;

// ── Management dialect ───────────────────────────────────────────────

/// Result of a successful delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entity is gone from the peer (or was never there).
    Deleted,
    /// The peer cannot delete this entity; it stays in place.
    Retained,
}

/// How one peer technology lists, creates, deletes and reads entities.
#[async_trait]
pub trait Management: Default + Send + Sync + 'static {
    type Entity: ManagedEntity;

    /// Peer label used in logs and errors.
    const PEER: &'static str;

    /// Kinds queried in full on initialization.
    fn inventoried_kinds(&self) -> &'static [<Self::Entity as ManagedEntity>::Kind];

    async fn list(
        &self,
        client: &CommandClient,
        kind: <Self::Entity as ManagedEntity>::Kind,
    ) -> Result<Vec<Self::Entity>, CoreError>;

    async fn create(&self, client: &CommandClient, entity: &Self::Entity) -> Result<(), CoreError>;

    async fn delete(
        &self,
        client: &CommandClient,
        entity: &Self::Entity,
    ) -> Result<DeleteOutcome, CoreError>;

    /// Point read-back of one entity, including status attributes.
    async fn read(
        &self,
        client: &CommandClient,
        entity: &Self::Entity,
    ) -> Result<Self::Entity, CoreError>;
}

// ── PartialRead ──────────────────────────────────────────────────────

/// Entities read back successfully, plus the first failure if any.
#[derive(Debug)]
pub struct PartialRead<E> {
    pub entities: Vec<E>,
    pub error: Option<CoreError>,
}

impl<E> PartialRead<E> {
    fn failed(error: CoreError) -> Self {
        Self {
            entities: Vec::new(),
            error: Some(error),
        }
    }

    /// All entities, or the first error if any read failed.
    pub fn into_result(self) -> Result<Vec<E>, CoreError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.entities),
        }
    }
}

// ── PeerState ────────────────────────────────────────────────────────

/// Cached view of one peer's configuration and the channel to reach it.
pub struct PeerState<M: Management> {
    host: Host,
    port: u16,
    client: CommandClient,
    management: M,
    cache: EntityCache<M::Entity>,
    initialized: bool,
    reconnect_count: u64,
    next_resync: DateTime<Utc>,
}

impl<M: Management> PeerState<M> {
    /// Wrap `client` and start it.
    pub fn new(host: Host, port: u16, client: CommandClient) -> Self {
        client.start();
        let reconnect_count = client.reconnect_count();
        Self {
            host,
            port,
            client,
            management: M::default(),
            cache: EntityCache::new(),
            initialized: false,
            reconnect_count,
            next_resync: DateTime::<Utc>::MAX_UTC,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client(&self) -> &CommandClient {
        &self.client
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn next_resync(&self) -> DateTime<Utc> {
        self.next_resync
    }

    /// Whether the resync deadline recorded at the last initialization
    /// has passed.
    pub fn needs_resync(&self, now: DateTime<Utc>) -> bool {
        self.next_resync < now
    }

    pub fn cache(&self) -> &EntityCache<M::Entity> {
        &self.cache
    }

    /// Snapshot of every cached entity.
    pub fn entities(&self) -> Vec<M::Entity> {
        self.cache.snapshot()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Rebuild the cache from the peer unless it is still valid.
    ///
    /// The cache is invalid when it was never built, after [`reset`], or
    /// when the channel reconnected since the last inventory.
    ///
    /// [`reset`]: Self::reset
    pub async fn initialize(&mut self, next_resync: DateTime<Utc>) -> Result<(), CoreError> {
        let reconnects = self.client.reconnect_count();
        if reconnects != self.reconnect_count {
            if self.initialized {
                tracing::info!(
                    peer = M::PEER,
                    host = %self.host,
                    reconnects,
                    "Channel reconnected, invalidating cached state"
                );
            }
            self.initialized = false;
        }

        if self.initialized {
            return Ok(());
        }

        self.next_resync = next_resync;
        tracing::info!(peer = M::PEER, host = %self.host, "Initializing");

        // A channel that is already up has counted its connection; one that
        // is not will count exactly one when the first query goes out.
        let up = self.client.connected();
        let baseline = self.client.reconnect_count() + u64::from(!up);

        self.cache.clear();
        let mut total = 0;
        for &kind in self.management.inventoried_kinds() {
            let entities = self
                .management
                .list(&self.client, kind)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        peer = M::PEER,
                        host = %self.host,
                        %kind,
                        error = %e,
                        "Error during initialization"
                    );
                })?;
            total += entities.len();
            self.cache.replace_kind(kind, entities);
        }

        let reconnects = self.client.reconnect_count();
        if reconnects > baseline {
            tracing::warn!(
                peer = M::PEER,
                host = %self.host,
                reconnects,
                "Channel reconnected during initialization, discarding inventory"
            );
            self.cache.clear();
            return Err(infrasync_amqp::Error::Link(
                "channel reconnected during initialization".into(),
            )
            .into());
        }
        self.reconnect_count = reconnects;
        tracing::info!(
            peer = M::PEER,
            host = %self.host,
            entities = total,
            "Initialized state"
        );
        self.initialized = true;
        Ok(())
    }

    /// Drop the cached state and restart the channel so the next
    /// [`initialize`](Self::initialize) re-reads everything.
    pub async fn reset(&mut self) {
        if !self.initialized {
            return;
        }
        tracing::info!(peer = M::PEER, host = %self.host, "Resetting connection");
        self.client.stop().await;
        self.initialized = false;
        self.cache.clear();
        self.client.start();
    }

    /// Stop the channel for good.
    pub async fn shutdown(self) {
        tracing::debug!(peer = M::PEER, host = %self.host, "Shutting down");
        self.client.stop().await;
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Create every entity in `entities` that the peer does not have.
    ///
    /// An existing entity with the same kind and name must be
    /// [`same_as`](ManagedEntity::same_as) the requested one, and so must
    /// repeated requests for one kind and name; otherwise nothing is
    /// created and [`CoreError::UpdateNotSupported`] is returned. Creation runs in ascending order phases, concurrently
    /// within a phase. A failure stops later phases; entities created
    /// before it are kept in the cache.
    pub async fn ensure_entities(
        &mut self,
        cancel: &CancellationToken,
        entities: &[M::Entity],
    ) -> Result<(), CoreError> {
        if !self.initialized {
            return Err(CoreError::NotInitialized);
        }

        let mut to_create: Vec<&M::Entity> = Vec::new();
        let mut queued = HashMap::new();
        for entity in entities {
            let kind = entity.kind();
            let name = entity.name();
            let existing = self
                .cache
                .get(kind, &name)
                .or_else(|| queued.get(&(kind, name.clone())).copied());
            match existing {
                Some(existing) if !existing.same_as(entity) => {
                    tracing::warn!(
                        peer = M::PEER,
                        host = %self.host,
                        ?existing,
                        requested = ?entity,
                        "Refusing to update entity"
                    );
                    return Err(CoreError::UpdateNotSupported {
                        peer: M::PEER,
                        kind: kind.to_string(),
                        name,
                    });
                }
                Some(_) => {}
                None => {
                    queued.insert((kind, name), entity);
                    to_create.push(entity);
                }
            }
        }

        if to_create.is_empty() {
            return Ok(());
        }

        let phases: BTreeSet<u8> = to_create.iter().map(|e| e.order()).collect();
        let mut result = Ok(());
        for order in phases {
            let batch: Vec<&M::Entity> = to_create
                .iter()
                .copied()
                .filter(|e| e.order() == order)
                .collect();
            let outcomes = join_all(batch.iter().map(|e| self.create_one(cancel, e))).await;

            for (entity, outcome) in batch.into_iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {
                        self.cache.insert(entity.clone());
                    }
                    Err(e) => {
                        if result.is_ok() {
                            result = Err(e);
                        }
                    }
                }
            }
            if result.is_err() {
                break;
            }
        }

        self.finish("EnsureEntities", result).await
    }

    /// Delete every entity in `entities` that the peer has. Entities not in
    /// the cache are skipped.
    pub async fn delete_entities(
        &mut self,
        cancel: &CancellationToken,
        entities: &[M::Entity],
    ) -> Result<(), CoreError> {
        if !self.initialized {
            return Err(CoreError::NotInitialized);
        }

        let mut seen = HashSet::new();
        let present: Vec<&M::Entity> = entities
            .iter()
            .filter(|e| self.cache.contains(e.kind(), &e.name()))
            .filter(|e| seen.insert((e.kind(), e.name())))
            .collect();

        if present.is_empty() {
            return Ok(());
        }

        let outcomes = join_all(present.iter().map(|e| self.delete_one(cancel, e))).await;

        let mut result = Ok(());
        for (entity, outcome) in present.into_iter().zip(outcomes) {
            match outcome {
                Ok(DeleteOutcome::Deleted) => {
                    self.cache.remove(entity.kind(), &entity.name());
                }
                Ok(DeleteOutcome::Retained) => {
                    tracing::debug!(
                        peer = M::PEER,
                        host = %self.host,
                        kind = %entity.kind(),
                        name = %entity.name(),
                        "Entity cannot be deleted, keeping it"
                    );
                }
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        self.finish("DeleteEntities", result).await
    }

    /// Read each entity back from the peer, concurrently.
    pub async fn read_entities(
        &mut self,
        cancel: &CancellationToken,
        entities: &[M::Entity],
    ) -> PartialRead<M::Entity> {
        if !self.initialized {
            return PartialRead::failed(CoreError::NotInitialized);
        }

        let outcomes = join_all(entities.iter().map(|e| self.read_one(cancel, e))).await;

        let mut read = Vec::with_capacity(outcomes.len());
        let mut error = None;
        for outcome in outcomes {
            match outcome {
                Ok(entity) => read.push(entity),
                Err(e) => {
                    error.get_or_insert(e);
                }
            }
        }

        let error = self
            .finish("ReadEntities", error.map_or(Ok(()), Err))
            .await
            .err();
        PartialRead {
            entities: read,
            error,
        }
    }

    // ── Internals ────────────────────────────────────────────────

    async fn create_one(
        &self,
        cancel: &CancellationToken,
        entity: &M::Entity,
    ) -> Result<(), CoreError> {
        tracing::debug!(
            peer = M::PEER,
            host = %self.host,
            kind = %entity.kind(),
            name = %entity.name(),
            "Creating entity"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.management.create(&self.client, entity) => result,
        }
    }

    async fn delete_one(
        &self,
        cancel: &CancellationToken,
        entity: &M::Entity,
    ) -> Result<DeleteOutcome, CoreError> {
        tracing::debug!(
            peer = M::PEER,
            host = %self.host,
            kind = %entity.kind(),
            name = %entity.name(),
            "Deleting entity"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.management.delete(&self.client, entity) => result,
        }
    }

    async fn read_one(
        &self,
        cancel: &CancellationToken,
        entity: &M::Entity,
    ) -> Result<M::Entity, CoreError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.management.read(&self.client, entity) => result,
        }
    }

    /// Log a failed operation and reset on connection-class errors.
    async fn finish(
        &mut self,
        operation: &str,
        result: Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        if let Err(e) = &result {
            tracing::warn!(
                peer = M::PEER,
                host = %self.host,
                operation,
                error = %e,
                "Reconciliation error"
            );
            if e.is_connection_error() {
                self.reset().await;
            }
        }
        result
    }
}

impl<M: Management> std::fmt::Debug for PeerState<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerState")
            .field("peer", &M::PEER)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("initialized", &self.initialized)
            .field("entities", &self.cache.len())
            .finish_non_exhaustive()
    }
}
