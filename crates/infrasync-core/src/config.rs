// ── Runtime infrastructure configuration ──
//
// These types describe how to reach and configure the routers and
// brokers of one messaging infrastructure. They never touch disk.
// Process wiring (or `infrasync-config`) builds an `InfraConfig` and
// hands it to the `StateManager`.

use std::time::Duration;

use infrasync_amqp::{CommandConfig, TlsIdentity};

use crate::model::{BrokerQueue, Host, RouterConnector, RouterListener, RoutingType, connector_name};

/// Connection property announced to every peer.
pub const DEFAULT_PRODUCT: &str = "controller-manager";

pub const DEFAULT_ROUTER_PORT: u16 = 55671;
pub const DEFAULT_BROKER_PORT: u16 = 5671;

/// Settings for one infrastructure's peers.
#[derive(Debug, Clone)]
pub struct InfraConfig {
    /// Router management port.
    pub router_port: u16,
    /// Broker management port. Also the port router connectors dial.
    pub broker_port: u16,
    /// Command channel tuning shared by every peer.
    pub command: CommandConfig,
    pub connect_timeout: Duration,
    /// Client certificate for the management links. `None` connects
    /// without TLS client authentication.
    pub tls: Option<TlsIdentity>,
    pub product: String,
    /// Base interval between full re-inventories of a peer.
    pub resync_interval: Duration,
    /// Random extra delay added to `resync_interval`, drawn from
    /// `resync_jitter_min..=resync_jitter_max`.
    pub resync_jitter_min: Duration,
    pub resync_jitter_max: Duration,
    pub connector: ConnectorTemplate,
    pub readiness: ReadinessConfig,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            router_port: DEFAULT_ROUTER_PORT,
            broker_port: DEFAULT_BROKER_PORT,
            command: CommandConfig::default(),
            connect_timeout: Duration::from_secs(10),
            tls: None,
            product: DEFAULT_PRODUCT.to_owned(),
            resync_interval: Duration::from_secs(1800),
            resync_jitter_min: Duration::from_secs(10),
            resync_jitter_max: Duration::from_secs(30),
            connector: ConnectorTemplate::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

// ── Router → broker connectors ───────────────────────────────────────

/// Attributes shared by every router → broker connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorTemplate {
    pub role: String,
    pub ssl_profile: Option<String>,
    pub sasl_mechanisms: Option<String>,
    pub idle_timeout_seconds: i64,
    pub verify_hostname: bool,
}

impl Default for ConnectorTemplate {
    fn default() -> Self {
        Self {
            role: "route-container".into(),
            ssl_profile: Some("infra_tls".into()),
            sasl_mechanisms: Some("EXTERNAL".into()),
            idle_timeout_seconds: 16,
            verify_hostname: true,
        }
    }
}

impl ConnectorTemplate {
    /// Connector a router uses to reach `broker` on `port`.
    pub fn connector_for(&self, broker: &Host, port: u16) -> RouterConnector {
        RouterConnector {
            name: connector_name(broker, port),
            host: broker.hostname.clone(),
            port: port.to_string(),
            role: Some(self.role.clone()),
            ssl_profile: self.ssl_profile.clone(),
            sasl_mechanisms: self.sasl_mechanisms.clone(),
            idle_timeout_seconds: Some(self.idle_timeout_seconds),
            verify_hostname: Some(self.verify_hostname),
            ..RouterConnector::default()
        }
    }
}

// ── Readiness probes ─────────────────────────────────────────────────

/// Entities created on every peer so health probes have something to
/// attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub enabled: bool,
    /// Queue (and address) name on brokers, listener name on routers.
    pub name: String,
    pub listener_host: String,
    pub listener_port: u16,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "readiness".into(),
            listener_host: "127.0.0.1".into(),
            listener_port: 7779,
        }
    }
}

impl ReadinessConfig {
    pub fn broker_queue(&self) -> BrokerQueue {
        BrokerQueue {
            name: self.name.clone(),
            address: Some(self.name.clone()),
            routing_type: Some(RoutingType::Anycast),
            durable: Some(false),
            max_consumers: Some(1),
            purge_on_no_consumers: Some(false),
            auto_create_address: Some(true),
        }
    }

    pub fn router_listener(&self) -> RouterListener {
        RouterListener {
            name: self.name.clone(),
            host: self.listener_host.clone(),
            port: self.listener_port.to_string(),
            role: Some("normal".into()),
            authenticate_peer: Some(false),
            idle_timeout_seconds: Some(16),
            http: Some(true),
            metrics: Some(true),
            healthz: Some(true),
            websockets: Some(false),
            ..RouterListener::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn connector_template_targets_broker_hostname() {
        let broker = Host::new("broker-0.broker", "10.0.0.7");
        let connector = ConnectorTemplate::default().connector_for(&broker, DEFAULT_BROKER_PORT);

        assert_eq!(connector.name, "connector-broker-0.broker-5671");
        assert_eq!(connector.host, "broker-0.broker");
        assert_eq!(connector.port, "5671");
        assert_eq!(connector.sasl_mechanisms.as_deref(), Some("EXTERNAL"));
        assert_eq!(connector.verify_hostname, Some(true));
    }

    #[test]
    fn readiness_entities() {
        let readiness = ReadinessConfig::default();

        let queue = readiness.broker_queue();
        assert_eq!(queue.address.as_deref(), Some("readiness"));
        assert_eq!(queue.max_consumers, Some(1));

        let listener = readiness.router_listener();
        assert_eq!(listener.port, "7779");
        assert_eq!(listener.healthz, Some(true));
        assert_eq!(listener.websockets, Some(false));
    }
}
