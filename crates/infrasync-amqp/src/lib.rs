// infrasync-amqp: Request/response command channel over AMQP management links.

pub mod command;
pub mod error;
pub mod message;
pub mod transport;

#[cfg(feature = "mock")]
pub mod mock;

pub use command::{CommandClient, CommandConfig, ReconnectConfig};
pub use error::Error;
pub use message::{Message, Properties};
pub use transport::{Connector, Endpoint, Link, TlsIdentity};
