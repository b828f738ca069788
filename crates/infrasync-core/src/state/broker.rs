// ── Broker management dialect ──
//
// ActiveMQ Artemis management over AMQP: every call invokes one
// operation on the `broker` resource. Parameters travel as a JSON array
// encoded into a string body; results come back the same way.

use async_trait::async_trait;
use infrasync_amqp::{CommandClient, Message};
use serde_json::{Value, json};

use super::{DeleteOutcome, MANAGEMENT_TIMEOUT, Management};
use crate::error::CoreError;
use crate::model::{BrokerEntity, BrokerEntityKind, ManagedEntity};

pub const BROKER_COMMAND_ADDRESS: &str = "activemq.management";
pub const BROKER_RESPONSE_ADDRESS: &str = "activemq.management_broker_command_response";

const RESOURCE_NAME: &str = "_AMQ_ResourceName";
const OPERATION_NAME: &str = "_AMQ_OperationName";
const OPERATION_SUCCEEDED: &str = "_AMQ_OperationSucceeded";

#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerManagement;

#[async_trait]
impl Management for BrokerManagement {
    type Entity = BrokerEntity;

    const PEER: &'static str = "broker";

    fn inventoried_kinds(&self) -> &'static [BrokerEntityKind] {
        &BrokerEntityKind::INVENTORIED
    }

    async fn list(
        &self,
        client: &CommandClient,
        kind: BrokerEntityKind,
    ) -> Result<Vec<BrokerEntity>, CoreError> {
        let operation = match kind {
            BrokerEntityKind::Queue => "getQueueNames",
            BrokerEntityKind::Address => "getAddressNames",
            BrokerEntityKind::Divert => "getDivertNames",
            BrokerEntityKind::AddressSetting => {
                return Err(CoreError::InvalidEntity {
                    message: "address settings cannot be listed".into(),
                });
            }
        };

        let response = invoke(client, operation, Vec::new()).await?;
        let names = parse_names(&response)?;
        tracing::debug!(%kind, count = names.len(), "Listed broker entities");
        Ok(names
            .into_iter()
            .map(|name| BrokerEntity::from_name(kind, name))
            .collect())
    }

    async fn create(&self, client: &CommandClient, entity: &BrokerEntity) -> Result<(), CoreError> {
        let (operation, params) = match entity {
            BrokerEntity::Queue(queue) => {
                ("createQueue", vec![Value::String(serde_json::to_string(queue)?)])
            }
            BrokerEntity::Address(address) => (
                "createAddress",
                vec![json!(address.name), json!(address.routing_type.to_string())],
            ),
            BrokerEntity::Divert(divert) => (
                "createDivert",
                vec![
                    json!(divert.name),
                    json!(divert.routing_name),
                    json!(divert.address),
                    json!(divert.forwarding_address),
                    json!(divert.exclusive),
                    json!(divert.filter_string),
                    Value::Null,
                ],
            ),
            BrokerEntity::AddressSetting(settings) => (
                "addAddressSettings",
                vec![json!(settings.name), Value::String(serde_json::to_string(settings)?)],
            ),
        };

        invoke(client, operation, params).await.map(drop)
    }

    async fn delete(
        &self,
        client: &CommandClient,
        entity: &BrokerEntity,
    ) -> Result<DeleteOutcome, CoreError> {
        let name = json!(entity.name());
        let (operation, params) = match entity {
            BrokerEntity::Queue(_) => ("destroyQueue", vec![name, json!(true), json!(true)]),
            BrokerEntity::Address(_) => ("deleteAddress", vec![name, json!(true)]),
            BrokerEntity::Divert(_) => ("destroyDivert", vec![name]),
            BrokerEntity::AddressSetting(_) => ("removeAddressSettings", vec![name]),
        };

        invoke(client, operation, params).await?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Brokers only expose names, so a read confirms presence.
    async fn read(
        &self,
        client: &CommandClient,
        entity: &BrokerEntity,
    ) -> Result<BrokerEntity, CoreError> {
        let name = entity.name();
        let present = self
            .list(client, entity.kind())
            .await?
            .into_iter()
            .any(|e| e.name() == name);

        if present {
            Ok(entity.clone())
        } else {
            Err(CoreError::NotFound {
                kind: entity.kind().to_string(),
                name,
            })
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Build a request invoking `operation` on the broker resource.
pub(crate) fn management_message(operation: &str, params: Vec<Value>) -> Message {
    let body = if params.is_empty() {
        "[]".to_owned()
    } else {
        Value::Array(params).to_string()
    };
    Message::new()
        .with_property(RESOURCE_NAME, "broker")
        .with_property(OPERATION_NAME, operation)
        .with_body(body)
}

async fn invoke(
    client: &CommandClient,
    operation: &str,
    params: Vec<Value>,
) -> Result<Message, CoreError> {
    let request = management_message(operation, params);
    let response = client
        .request_with_timeout(request, MANAGEMENT_TIMEOUT)
        .await?;

    if succeeded(&response) {
        Ok(response)
    } else {
        Err(CoreError::OperationFailed {
            message: format!("{operation}: {}", body_text(&response)),
        })
    }
}

fn succeeded(response: &Message) -> bool {
    response.property_bool(OPERATION_SUCCEEDED).unwrap_or(false)
}

fn body_text(response: &Message) -> String {
    match &response.body {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Flatten a `[["a","b"]]` name-list result.
fn parse_names(response: &Message) -> Result<Vec<String>, CoreError> {
    let Some(Value::String(encoded)) = &response.body else {
        return Err(CoreError::UnexpectedResponse {
            message: format!("expected string result, got {:?}", response.body),
        });
    };
    let nested: Vec<Vec<String>> = serde_json::from_str(encoded)?;
    Ok(nested.into_iter().flatten().collect())
}
