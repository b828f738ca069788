// ── Domain model ──
//
// Hosts, the entities configured on routers and brokers, and the status
// derived from reading them back.

pub mod broker;
pub mod entity;
pub mod host;
pub mod router;
pub mod status;

// ── Re-exports ──────────────────────────────────────────────────────

pub use broker::{
    AddressFullPolicy, BrokerAddress, BrokerAddressSetting, BrokerDivert, BrokerEntity,
    BrokerEntityKind, BrokerQueue, RoutingType, SlowConsumerPolicy,
};
pub use entity::{EntityCache, ManagedEntity};
pub use host::Host;
pub use router::{
    NamedEntity, RouterAddress, RouterAuthServicePlugin, RouterAutoLink, RouterConnector,
    RouterEntity, RouterEntityKind, RouterLinkRoute, RouterListener, RouterSslProfile,
    address_name, auto_link_name, connector_name, global_link_route_name, link_route_name,
    listener_name, qualified_address, ssl_profile_name,
};
pub use status::ConnectorStatus;
