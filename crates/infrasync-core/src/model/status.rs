use serde::{Deserialize, Serialize};

use crate::model::router::RouterConnector;

/// Health of one router → broker connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatus {
    /// Hostname of the router owning the connector.
    pub router: String,
    /// Hostname the connector points at.
    pub broker: String,
    pub connected: bool,
    pub message: String,
}

impl ConnectorStatus {
    /// Status of a connector as read back from `router`.
    pub fn from_connector(router: &str, connector: &RouterConnector) -> Self {
        Self {
            router: router.to_owned(),
            broker: connector.host.clone(),
            connected: connector.is_connected(),
            message: connector.connection_msg.clone().unwrap_or_default(),
        }
    }
}
