// ── Router management dialect ──
//
// Qpid Dispatch AMQP management: the operation and target go in
// application properties, CREATE/READ/QUERY payloads in the body, and
// every response carries an HTTP-style `statusCode`.

use async_trait::async_trait;
use infrasync_amqp::{CommandClient, Message};
use serde_json::{Map, Value, json};

use super::{DeleteOutcome, MANAGEMENT_TIMEOUT, Management};
use crate::error::CoreError;
use crate::model::{ManagedEntity, RouterEntity, RouterEntityKind};

pub const ROUTER_COMMAND_ADDRESS: &str = "$management";
pub const ROUTER_RESPONSE_ADDRESS: &str = "router_command_response";

/// Marker in the router's refusal to delete listeners serving HTTP.
const UNDELETABLE_LISTENER: &str = "HTTP listeners cannot be deleted";

#[derive(Debug, Default, Clone, Copy)]
pub struct RouterManagement;

#[async_trait]
impl Management for RouterManagement {
    type Entity = RouterEntity;

    const PEER: &'static str = "router";

    fn inventoried_kinds(&self) -> &'static [RouterEntityKind] {
        &RouterEntityKind::INVENTORIED
    }

    async fn list(
        &self,
        client: &CommandClient,
        kind: RouterEntityKind,
    ) -> Result<Vec<RouterEntity>, CoreError> {
        let request = Message::new()
            .with_property("operation", "QUERY")
            .with_property("entityType", kind.as_ref())
            .with_body(json!({ "attributeNames": [] }));

        let response = call(client, request).await?;
        check_status(&response)?;

        let Some(Value::Object(mut body)) = response.body else {
            return Err(CoreError::UnexpectedResponse {
                message: format!("QUERY {kind} returned no attribute map"),
            });
        };
        let names = match body.remove("attributeNames") {
            Some(Value::Array(names)) => names,
            _ => Vec::new(),
        };
        let rows = match body.remove("results") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        };

        rows_to_maps(&names, rows)?
            .into_iter()
            .map(|attrs| RouterEntity::decode(kind, attrs))
            .collect()
    }

    async fn create(&self, client: &CommandClient, entity: &RouterEntity) -> Result<(), CoreError> {
        let request = targeted("CREATE", entity).with_body(Value::Object(entity.encode()?));
        let response = call(client, request).await?;
        check_status(&response)
    }

    async fn delete(
        &self,
        client: &CommandClient,
        entity: &RouterEntity,
    ) -> Result<DeleteOutcome, CoreError> {
        let response = call(client, targeted("DELETE", entity)).await?;
        match check_status(&response) {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::Deleted),
            Err(e) if e.to_string().contains(UNDELETABLE_LISTENER) => Ok(DeleteOutcome::Retained),
            Err(e) => Err(e),
        }
    }

    async fn read(
        &self,
        client: &CommandClient,
        entity: &RouterEntity,
    ) -> Result<RouterEntity, CoreError> {
        let response = call(client, targeted("READ", entity)).await?;
        check_status(&response)?;

        match response.body {
            Some(Value::Object(attrs)) => RouterEntity::decode(entity.kind(), attrs),
            other => Err(CoreError::UnexpectedResponse {
                message: format!("READ {} {} returned {other:?}", entity.kind(), entity.name()),
            }),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Request addressed at one entity by type and name.
fn targeted(operation: &str, entity: &RouterEntity) -> Message {
    Message::new()
        .with_property("operation", operation)
        .with_property("type", entity.kind().as_ref())
        .with_property("name", entity.name())
}

async fn call(client: &CommandClient, request: Message) -> Result<Message, CoreError> {
    Ok(client.request_with_timeout(request, MANAGEMENT_TIMEOUT).await?)
}

fn check_status(response: &Message) -> Result<(), CoreError> {
    let code = response
        .status_code()
        .ok_or_else(|| CoreError::UnexpectedResponse {
            message: format!("missing statusCode in {:?}", response.application_properties),
        })?;

    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(CoreError::Status {
            code,
            description: response.status_description().unwrap_or_default().to_owned(),
        })
    }
}

/// Zip QUERY result rows with the attribute names. Null cells are left
/// out so absent attributes decode as unset.
fn rows_to_maps(names: &[Value], rows: Vec<Value>) -> Result<Vec<Map<String, Value>>, CoreError> {
    let names = names
        .iter()
        .map(|n| {
            n.as_str().ok_or_else(|| CoreError::UnexpectedResponse {
                message: format!("attribute name {n} is not a string"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| match row {
            Value::Array(cells) => Ok(names
                .iter()
                .zip(cells)
                .filter(|(_, cell)| !cell.is_null())
                .map(|(name, cell)| ((*name).to_owned(), cell))
                .collect()),
            other => Err(CoreError::UnexpectedResponse {
                message: format!("result row {other} is not an array"),
            }),
        })
        .collect()
}
