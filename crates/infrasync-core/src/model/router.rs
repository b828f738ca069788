// ── Router entities ──
//
// Configuration objects of the Qpid Dispatch router management model.
// Attribute names follow the router's camelCase schema so an entity can
// be sent as a CREATE body and decoded from QUERY/READ results as-is.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CoreError;
use crate::model::entity::ManagedEntity;
use crate::model::host::Host;

// ── Kind ─────────────────────────────────────────────────────────────

/// Router entity kind; the string form is the management type name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    IntoStaticStr,
)]
pub enum RouterEntityKind {
    #[strum(serialize = "org.apache.qpid.dispatch.connector")]
    Connector,
    #[strum(serialize = "org.apache.qpid.dispatch.listener")]
    Listener,
    #[strum(serialize = "org.apache.qpid.dispatch.router.config.address")]
    Address,
    #[strum(serialize = "org.apache.qpid.dispatch.router.config.autoLink")]
    AutoLink,
    #[strum(serialize = "org.apache.qpid.dispatch.router.config.linkRoute")]
    LinkRoute,
    #[strum(serialize = "org.apache.qpid.dispatch.sslProfile")]
    SslProfile,
    #[strum(serialize = "org.apache.qpid.dispatch.authServicePlugin")]
    AuthServicePlugin,
}

impl RouterEntityKind {
    /// Kinds read back in full when a router is (re)initialized.
    pub const INVENTORIED: [Self; 6] = [
        Self::Connector,
        Self::Listener,
        Self::Address,
        Self::AutoLink,
        Self::LinkRoute,
        Self::SslProfile,
    ];
}

// ── Entity structs ───────────────────────────────────────────────────

/// Outbound connection from a router, e.g. to a broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConnector {
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_vhost: Option<String>,

    // Reported by the router only.
    #[serde(default, skip_serializing)]
    pub connection_status: Option<String>,
    #[serde(default, skip_serializing)]
    pub connection_msg: Option<String>,
}

impl RouterConnector {
    /// `linkCapacity` is adjusted by the router and is not compared, nor
    /// is the connection status.
    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.host == other.host
            && self.port == other.port
            && self.role == other.role
            && self.ssl_profile == other.ssl_profile
            && self.sasl_mechanisms == other.sasl_mechanisms
            && self.sasl_username == other.sasl_username
            && self.sasl_password == other.sasl_password
            && self.idle_timeout_seconds == other.idle_timeout_seconds
            && self.verify_hostname == other.verify_hostname
            && self.policy_vhost == other.policy_vhost
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status.as_deref() == Some("SUCCESS")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterListener {
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticate_peer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthz: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websockets: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_tenant: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_vhost: Option<String>,
}

/// Address distribution and waypoint configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterAddress {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_phase: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_phase: Option<i64>,
}

/// Link the router attaches to a waypoint on a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterAutoLink {
    pub name: String,
    pub address: String,
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,

    #[serde(default, skip_serializing)]
    pub oper_status: Option<String>,
}

impl RouterAutoLink {
    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.address == other.address
            && self.direction == other.direction
            && self.container_id == other.container_id
            && self.connection == other.connection
            && self.phase == other.phase
            && self.external_address == other.external_address
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterLinkRoute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_external_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del_external_prefix: Option<String>,

    #[serde(default, skip_serializing)]
    pub oper_status: Option<String>,
}

impl RouterLinkRoute {
    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.direction == other.direction
            && self.prefix == other.prefix
            && self.pattern == other.pattern
            && self.container_id == other.container_id
            && self.connection == other.connection
            && self.add_external_prefix == other.add_external_prefix
            && self.del_external_prefix == other.del_external_prefix
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSslProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphers: Option<String>,
}

/// External authentication service. Identified by `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterAuthServicePlugin {
    pub host: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
}

impl RouterAuthServicePlugin {
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reference to an entity by kind and name only, for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntity {
    pub kind: RouterEntityKind,
    pub name: String,
}

// ── RouterEntity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RouterEntity {
    Connector(RouterConnector),
    Listener(RouterListener),
    Address(RouterAddress),
    AutoLink(RouterAutoLink),
    LinkRoute(RouterLinkRoute),
    SslProfile(RouterSslProfile),
    AuthServicePlugin(RouterAuthServicePlugin),
    Named(NamedEntity),
}

impl RouterEntity {
    pub fn named(kind: RouterEntityKind, name: impl Into<String>) -> Self {
        Self::Named(NamedEntity {
            kind,
            name: name.into(),
        })
    }

    /// Attribute map for a CREATE request.
    ///
    /// The router rejects floating-point encodings of its integer
    /// attributes, so every float is truncated to an integer.
    pub fn encode(&self) -> Result<Map<String, Value>, CoreError> {
        let value = match self {
            Self::Connector(e) => serde_json::to_value(e)?,
            Self::Listener(e) => serde_json::to_value(e)?,
            Self::Address(e) => serde_json::to_value(e)?,
            Self::AutoLink(e) => serde_json::to_value(e)?,
            Self::LinkRoute(e) => serde_json::to_value(e)?,
            Self::SslProfile(e) => serde_json::to_value(e)?,
            Self::AuthServicePlugin(e) => serde_json::to_value(e)?,
            Self::Named(named) => {
                return Err(CoreError::InvalidEntity {
                    message: format!("{} {} is a reference and cannot be created", named.kind, named.name),
                });
            }
        };

        match value {
            Value::Object(map) => Ok(normalize_numbers(map)),
            other => Err(CoreError::InvalidEntity {
                message: format!("expected attribute map, got {other}"),
            }),
        }
    }

    /// Build an entity of `kind` from a router attribute map. Attributes
    /// not modelled here are ignored.
    pub fn decode(kind: RouterEntityKind, attributes: Map<String, Value>) -> Result<Self, CoreError> {
        let value = Value::Object(attributes);
        Ok(match kind {
            RouterEntityKind::Connector => Self::Connector(from_value(value)?),
            RouterEntityKind::Listener => Self::Listener(from_value(value)?),
            RouterEntityKind::Address => Self::Address(from_value(value)?),
            RouterEntityKind::AutoLink => Self::AutoLink(from_value(value)?),
            RouterEntityKind::LinkRoute => Self::LinkRoute(from_value(value)?),
            RouterEntityKind::SslProfile => Self::SslProfile(from_value(value)?),
            RouterEntityKind::AuthServicePlugin => Self::AuthServicePlugin(from_value(value)?),
        })
    }

    pub fn as_connector(&self) -> Option<&RouterConnector> {
        match self {
            Self::Connector(c) => Some(c),
            _ => None,
        }
    }
}

impl ManagedEntity for RouterEntity {
    type Kind = RouterEntityKind;

    fn kind(&self) -> RouterEntityKind {
        match self {
            Self::Connector(_) => RouterEntityKind::Connector,
            Self::Listener(_) => RouterEntityKind::Listener,
            Self::Address(_) => RouterEntityKind::Address,
            Self::AutoLink(_) => RouterEntityKind::AutoLink,
            Self::LinkRoute(_) => RouterEntityKind::LinkRoute,
            Self::SslProfile(_) => RouterEntityKind::SslProfile,
            Self::AuthServicePlugin(_) => RouterEntityKind::AuthServicePlugin,
            Self::Named(n) => n.kind,
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Connector(e) => e.name.clone(),
            Self::Listener(e) => e.name.clone(),
            Self::Address(e) => e.name.clone(),
            Self::AutoLink(e) => e.name.clone(),
            Self::LinkRoute(e) => e.name.clone(),
            Self::SslProfile(e) => e.name.clone(),
            Self::AuthServicePlugin(e) => e.name(),
            Self::Named(n) => n.name.clone(),
        }
    }

    fn order(&self) -> u8 {
        match self {
            Self::Address(_) | Self::SslProfile(_) | Self::AuthServicePlugin(_) | Self::Named(_) => 0,
            Self::Connector(_) | Self::Listener(_) | Self::AutoLink(_) | Self::LinkRoute(_) => 1,
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Connector(a), Self::Connector(b)) => a.same_as(b),
            (Self::Listener(a), Self::Listener(b)) => a == b,
            (Self::Address(a), Self::Address(b)) => a == b,
            (Self::AutoLink(a), Self::AutoLink(b)) => a.same_as(b),
            (Self::LinkRoute(a), Self::LinkRoute(b)) => a.same_as(b),
            (Self::SslProfile(a), Self::SslProfile(b)) => a == b,
            (Self::AuthServicePlugin(a), Self::AuthServicePlugin(b)) => a == b,
            (Self::Named(a), Self::Named(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_from_router_entity {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(impl From<$ty> for RouterEntity {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        })+
    };
}

impl_from_router_entity! {
    Connector => RouterConnector,
    Listener => RouterListener,
    Address => RouterAddress,
    AutoLink => RouterAutoLink,
    LinkRoute => RouterLinkRoute,
    SslProfile => RouterSslProfile,
    AuthServicePlugin => RouterAuthServicePlugin,
    Named => NamedEntity,
}

// ── Naming ───────────────────────────────────────────────────────────

/// Name of the connector a router uses to reach the broker at `host`.
pub fn connector_name(host: &Host, port: u16) -> String {
    format!("connector-{}-{}", host.hostname, port)
}

pub fn auto_link_name(tenant: &str, address: &str, host: &str, direction: &str) -> String {
    format!("autoLink-{tenant}-{address}-{host}-{direction}")
}

pub fn link_route_name(tenant: &str, address: &str, host: &str, direction: &str) -> String {
    format!("linkRoute-{tenant}-{address}-{host}-{direction}")
}

pub fn global_link_route_name(tenant: &str, host: &str, direction: &str) -> String {
    format!("linkRoute-{tenant}-{host}-{direction}")
}

pub fn address_name(tenant: &str, address: &str) -> String {
    format!("address-{tenant}-{address}")
}

/// Address as seen by brokers: scoped under the tenant.
pub fn qualified_address(tenant: &str, address: &str) -> String {
    format!("{tenant}/{address}")
}

pub fn listener_name(port_name: &str) -> String {
    format!("listener-{port_name}")
}

pub fn ssl_profile_name(port_name: &str) -> String {
    format!("sslProfile-{port_name}")
}

// ── Helpers ──────────────────────────────────────────────────────────

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CoreError> {
    Ok(serde_json::from_value(value)?)
}

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn normalize_numbers(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(k, v)| match v {
            Value::Number(n) if n.is_f64() => {
                let truncated = n.as_f64().map_or(0, |f| f as i64);
                (k, Value::from(truncated))
            }
            other => (k, other),
        })
        .collect()
}
