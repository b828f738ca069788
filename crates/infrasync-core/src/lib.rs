// infrasync-core: Entity reconciliation for AMQP router and broker fleets.

pub mod clock;
pub mod config;
pub mod error;
pub mod infra;
pub mod manager;
pub mod model;
pub mod scheduler;
pub mod state;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConnectorTemplate, InfraConfig, ReadinessConfig};
pub use error::CoreError;
pub use infra::{AmqpStateFactory, InfraClient, StateFactory};
pub use manager::{InfraKey, StateManager};
pub use scheduler::{DummyScheduler, Placement, Scheduler};
pub use state::{
    BrokerManagement, BrokerState, DeleteOutcome, Management, PartialRead, PeerState,
    RouterManagement, RouterState,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BrokerAddress, BrokerAddressSetting, BrokerDivert, BrokerEntity, BrokerEntityKind,
    BrokerQueue, ConnectorStatus, EntityCache, Host, ManagedEntity, NamedEntity, RouterAddress,
    RouterAuthServicePlugin, RouterAutoLink, RouterConnector, RouterEntity, RouterEntityKind,
    RouterLinkRoute, RouterListener, RouterSslProfile, RoutingType,
};
