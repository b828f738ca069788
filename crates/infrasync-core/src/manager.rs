// ── Infrastructure registry ──
//
// Concurrent map of infra clients keyed by (namespace, name). Built
// once by process wiring and shared by the controllers that need it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::config::InfraConfig;
use crate::infra::{InfraClient, StateFactory};

/// Registry key: one infrastructure per namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfraKey {
    pub namespace: String,
    pub name: String,
}

impl InfraKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InfraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub struct StateManager {
    clients: DashMap<InfraKey, Arc<InfraClient>>,
    factory: Arc<dyn StateFactory>,
    config: InfraConfig,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    pub fn new(factory: Arc<dyn StateFactory>, config: InfraConfig) -> Self {
        Self {
            clients: DashMap::new(),
            factory,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock handed to every client created from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Client for the infrastructure, created on first use.
    pub fn get_or_create_infra(&self, name: &str, namespace: &str) -> Arc<InfraClient> {
        let key = InfraKey::new(name, namespace);
        let entry = self.clients.entry(key).or_insert_with(|| {
            tracing::info!(%namespace, %name, "Creating infrastructure client");
            Arc::new(
                InfraClient::new(name, namespace, Arc::clone(&self.factory), self.config.clone())
                    .with_clock(Arc::clone(&self.clock)),
            )
        });
        Arc::clone(entry.value())
    }

    pub fn get_infra(&self, name: &str, namespace: &str) -> Option<Arc<InfraClient>> {
        self.clients
            .get(&InfraKey::new(name, namespace))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Forget the infrastructure and shut its client down. Returns `false`
    /// if it was not registered.
    pub async fn delete_infra(&self, name: &str, namespace: &str) -> bool {
        let Some((key, client)) = self.clients.remove(&InfraKey::new(name, namespace)) else {
            return false;
        };
        tracing::info!(infra = %key, "Deleting infrastructure client");
        client.shutdown().await;
        true
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Keys of every registered infrastructure, sorted.
    pub fn keys(&self) -> Vec<InfraKey> {
        let mut keys: Vec<InfraKey> = self.clients.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("infras", &self.keys())
            .finish_non_exhaustive()
    }
}
