//! Management message model.
//!
//! Only the parts of an AMQP message the management protocols touch are
//! modelled: the addressing/correlation properties, the application
//! properties map, and a JSON-able body value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Properties ───────────────────────────────────────────────────────

/// Standard AMQP message properties used for request/response correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

// ── Message ──────────────────────────────────────────────────────────

/// One request or response travelling over a command channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub properties: Properties,

    #[serde(default)]
    pub application_properties: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Build a response correlated to `request`.
    pub fn reply_to(request: &Message) -> Self {
        let mut reply = Self::default();
        reply.properties.correlation_id = request
            .properties
            .correlation_id
            .clone()
            .or_else(|| request.properties.message_id.clone());
        reply
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.application_properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(Value::as_str)
    }

    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.property(key).and_then(Value::as_bool)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    /// HTTP-style `statusCode` carried by router management responses.
    ///
    /// Accepts both integer and numeric-string encodings.
    pub fn status_code(&self) -> Option<u16> {
        match self.property("statusCode")? {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn status_description(&self) -> Option<&str> {
        self.property_str("statusDescription")
    }
}
