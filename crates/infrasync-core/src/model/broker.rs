// ── Broker entities ──
//
// Objects managed on an ActiveMQ Artemis broker. The broker only reports
// names for its queues, addresses and diverts, so entities decoded from a
// broker carry nothing but their name and compare by kind and name alone.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::model::entity::ManagedEntity;

// ── Kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum BrokerEntityKind {
    Queue,
    Address,
    Divert,
    AddressSetting,
}

impl BrokerEntityKind {
    /// Kinds read back in full when a broker is (re)initialized. Address
    /// settings cannot be listed and are only known once created.
    pub const INVENTORIED: [Self; 3] = [Self::Queue, Self::Address, Self::Divert];
}

// ── Enumerations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingType {
    #[default]
    Anycast,
    Multicast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressFullPolicy {
    Drop,
    #[default]
    Fail,
    Page,
    Block,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlowConsumerPolicy {
    #[default]
    Kill,
    Notify,
}

// ── Entity structs ───────────────────────────────────────────────────

/// Queue configuration, serialized in Artemis' queue-configuration JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerQueue {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_type: Option<RoutingType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consumers: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_on_no_consumers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create_address: Option<bool>,
}

impl BrokerQueue {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerAddress {
    pub name: String,
    pub routing_type: RoutingType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerDivert {
    pub name: String,
    pub routing_name: String,
    pub address: String,
    pub forwarding_address: String,
    pub exclusive: bool,
    pub filter_string: Option<String>,
}

/// Address settings applied to addresses matching `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerAddressSetting {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_address: Option<String>,
    pub expiry_delay: i64,
    #[serde(rename = "maxDeliveryAttempts")]
    pub delivery_attempts: i32,
    pub max_size_bytes: i64,
    pub page_size_bytes: i64,
    #[serde(rename = "pageCacheMaxSize")]
    pub page_max_cache_size: i32,
    pub redelivery_delay: i64,
    pub redelivery_multiplier: f64,
    pub max_redelivery_delay: i64,
    pub redistribution_delay: i64,
    pub address_full_message_policy: AddressFullPolicy,
    pub slow_consumer_threshold: i64,
    pub slow_consumer_check_period: i64,
    pub slow_consumer_policy: SlowConsumerPolicy,
}

impl BrokerAddressSetting {
    /// Default settings for a tenant queue address.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dead_letter_address: None,
            expiry_address: None,
            expiry_delay: -1,
            delivery_attempts: 10,
            max_size_bytes: -1,
            page_size_bytes: 10_485_760,
            page_max_cache_size: 5,
            redelivery_delay: 0,
            redelivery_multiplier: 1.0,
            max_redelivery_delay: 10_000,
            redistribution_delay: -1,
            address_full_message_policy: AddressFullPolicy::Fail,
            slow_consumer_threshold: -1,
            slow_consumer_check_period: -1,
            slow_consumer_policy: SlowConsumerPolicy::Kill,
        }
    }
}

// ── BrokerEntity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEntity {
    Queue(BrokerQueue),
    Address(BrokerAddress),
    Divert(BrokerDivert),
    AddressSetting(BrokerAddressSetting),
}

impl BrokerEntity {
    /// Entity of `kind` known only by name, as listed by the broker.
    pub fn from_name(kind: BrokerEntityKind, name: impl Into<String>) -> Self {
        let name = name.into();
        match kind {
            BrokerEntityKind::Queue => Self::Queue(BrokerQueue::named(name)),
            BrokerEntityKind::Address => Self::Address(BrokerAddress {
                name,
                ..BrokerAddress::default()
            }),
            BrokerEntityKind::Divert => Self::Divert(BrokerDivert {
                name,
                ..BrokerDivert::default()
            }),
            BrokerEntityKind::AddressSetting => {
                Self::AddressSetting(BrokerAddressSetting::with_defaults(name))
            }
        }
    }
}

impl ManagedEntity for BrokerEntity {
    type Kind = BrokerEntityKind;

    fn kind(&self) -> BrokerEntityKind {
        match self {
            Self::Queue(_) => BrokerEntityKind::Queue,
            Self::Address(_) => BrokerEntityKind::Address,
            Self::Divert(_) => BrokerEntityKind::Divert,
            Self::AddressSetting(_) => BrokerEntityKind::AddressSetting,
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Queue(e) => e.name.clone(),
            Self::Address(e) => e.name.clone(),
            Self::Divert(e) => e.name.clone(),
            Self::AddressSetting(e) => e.name.clone(),
        }
    }

    fn order(&self) -> u8 {
        match self {
            Self::Address(_) | Self::AddressSetting(_) => 0,
            Self::Queue(_) | Self::Divert(_) => 1,
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.name() == other.name()
    }
}

impl From<BrokerQueue> for BrokerEntity {
    fn from(e: BrokerQueue) -> Self {
        Self::Queue(e)
    }
}

impl From<BrokerAddress> for BrokerEntity {
    fn from(e: BrokerAddress) -> Self {
        Self::Address(e)
    }
}

impl From<BrokerDivert> for BrokerEntity {
    fn from(e: BrokerDivert) -> Self {
        Self::Divert(e)
    }
}

impl From<BrokerAddressSetting> for BrokerEntity {
    fn from(e: BrokerAddressSetting) -> Self {
        Self::AddressSetting(e)
    }
}
