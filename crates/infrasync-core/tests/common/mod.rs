// Shared fixtures: a stateful fake fleet of routers and brokers behind
// the in-memory transport.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value, json};

use infrasync_amqp::mock::{Direction, JournalEntry, MockConnector, Reply};
use infrasync_amqp::{CommandConfig, Endpoint, Message, ReconnectConfig};
use infrasync_core::state::{BROKER_COMMAND_ADDRESS, ROUTER_COMMAND_ADDRESS};
use infrasync_core::{
    AmqpStateFactory, BrokerState, Host, InfraClient, InfraConfig, RouterState, StateFactory,
};

// ── Fake fleet ──────────────────────────────────────────────────────

#[derive(Default)]
struct FleetState {
    /// hostname → (type, name) → attributes
    routers: HashMap<String, BTreeMap<(String, String), Map<String, Value>>>,
    /// hostname → kind → names
    brokers: HashMap<String, HashMap<&'static str, BTreeSet<String>>>,
    /// Entity names whose CREATE fails.
    fail_create: HashSet<String>,
    /// Entity names whose request detaches the link.
    disconnect_on: HashSet<String>,
    /// Entity names whose request is never answered.
    hang_on: HashSet<String>,
    /// Router entities the router refuses to delete.
    undeletable: HashSet<String>,
    /// Router types whose next QUERY is answered and then detaches.
    drop_after_query: HashSet<String>,
}

/// Live configuration of every fake peer. Clones share state.
#[derive(Clone, Default)]
pub struct Fleet {
    state: Arc<Mutex<FleetState>>,
}

impl Fleet {
    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap()
    }

    /// Connector serving every host from this fleet.
    pub fn connector(&self) -> MockConnector {
        let fleet = self.clone();
        MockConnector::new(move |endpoint, request| fleet.handle(endpoint, request))
    }

    pub fn seed_router(&self, hostname: &str, kind: &str, attrs: Value) {
        let Value::Object(attrs) = attrs else {
            panic!("attributes must be an object")
        };
        let name = attrs["name"].as_str().unwrap().to_owned();
        self.lock()
            .routers
            .entry(hostname.to_owned())
            .or_default()
            .insert((kind.to_owned(), name), attrs);
    }

    pub fn remove_router_entity(&self, hostname: &str, kind: &str, name: &str) {
        if let Some(router) = self.lock().routers.get_mut(hostname) {
            router.remove(&(kind.to_owned(), name.to_owned()));
        }
    }

    pub fn router_names(&self, hostname: &str, kind: &str) -> Vec<String> {
        self.lock()
            .routers
            .get(hostname)
            .map(|r| {
                r.keys()
                    .filter(|(k, _)| k == kind)
                    .map(|(_, n)| n.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn seed_broker(&self, hostname: &str, kind: &'static str, name: &str) {
        self.lock()
            .brokers
            .entry(hostname.to_owned())
            .or_default()
            .entry(kind)
            .or_default()
            .insert(name.to_owned());
    }

    pub fn broker_names(&self, hostname: &str, kind: &'static str) -> Vec<String> {
        self.lock()
            .brokers
            .get(hostname)
            .and_then(|b| b.get(kind))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_owned());
    }

    pub fn disconnect_on(&self, name: &str) {
        self.lock().disconnect_on.insert(name.to_owned());
    }

    pub fn hang_on(&self, name: &str) {
        self.lock().hang_on.insert(name.to_owned());
    }

    pub fn undeletable(&self, name: &str) {
        self.lock().undeletable.insert(name.to_owned());
    }

    /// Answer the next QUERY for `kind`, then drop the link.
    pub fn drop_after_query(&self, kind: &str) {
        self.lock().drop_after_query.insert(kind.to_owned());
    }

    fn handle(&self, endpoint: &Endpoint, request: &Message) -> Reply {
        let hostname = endpoint.server_name.as_str();
        if endpoint.address == ROUTER_COMMAND_ADDRESS {
            self.handle_router(hostname, request)
        } else if endpoint.address == BROKER_COMMAND_ADDRESS {
            self.handle_broker(hostname, request)
        } else {
            Reply::Ignore
        }
    }

    // ── Router management ───────────────────────────────────────────

    fn handle_router(&self, hostname: &str, request: &Message) -> Reply {
        let operation = request.property_str("operation").unwrap_or_default();
        let name = request.property_str("name").unwrap_or_default().to_owned();
        let kind = request
            .property_str("type")
            .or_else(|| request.property_str("entityType"))
            .unwrap_or_default()
            .to_owned();

        let mut state = self.lock();
        if state.hang_on.contains(&name) {
            return Reply::Ignore;
        }
        if state.disconnect_on.contains(&name) {
            return Reply::Disconnect;
        }
        let fail = state.fail_create.contains(&name);
        let undeletable = state.undeletable.contains(&name);
        let drop_after = operation == "QUERY" && state.drop_after_query.remove(&kind);
        let router = state.routers.entry(hostname.to_owned()).or_default();
        let key = (kind.clone(), name.clone());

        match operation {
            "QUERY" => {
                let rows: Vec<&Map<String, Value>> = router
                    .iter()
                    .filter(|((k, _), _)| *k == kind)
                    .map(|(_, attrs)| attrs)
                    .collect();
                let names: BTreeSet<&String> = rows.iter().flat_map(|a| a.keys()).collect();
                let results: Vec<Value> = rows
                    .iter()
                    .map(|attrs| {
                        Value::Array(
                            names
                                .iter()
                                .map(|n| attrs.get(*n).cloned().unwrap_or(Value::Null))
                                .collect(),
                        )
                    })
                    .collect();
                let reply = router_reply(
                    200,
                    "OK",
                    Some(json!({ "attributeNames": names, "results": results })),
                );
                match reply {
                    Reply::Respond(message) if drop_after => Reply::RespondThenDisconnect(message),
                    other => other,
                }
            }
            "CREATE" => {
                if fail {
                    return router_reply(500, "Internal error creating entity", None);
                }
                let Some(Value::Object(mut attrs)) = request.body.clone() else {
                    return router_reply(400, "Missing attributes", None);
                };
                if kind.ends_with(".connector") {
                    attrs.insert("connectionStatus".into(), json!("SUCCESS"));
                    attrs.insert("connectionMsg".into(), json!("Connection Opened: dir=out"));
                }
                router.insert(key, attrs);
                router_reply(201, "Created", None)
            }
            "READ" => match router.get(&key) {
                Some(attrs) => router_reply(200, "OK", Some(Value::Object(attrs.clone()))),
                None => router_reply(404, "Not Found", None),
            },
            "DELETE" => {
                if undeletable {
                    return router_reply(400, "BadRequestStatus: HTTP listeners cannot be deleted", None);
                }
                match router.remove(&key) {
                    Some(_) => router_reply(204, "No Content", None),
                    None => router_reply(404, "Not Found", None),
                }
            }
            _ => router_reply(501, "Not Implemented", None),
        }
    }

    // ── Broker management ───────────────────────────────────────────

    fn handle_broker(&self, hostname: &str, request: &Message) -> Reply {
        let operation = request.property_str("_AMQ_OperationName").unwrap_or_default();
        let params: Vec<Value> = request
            .body
            .as_ref()
            .and_then(Value::as_str)
            .map(|s| serde_json::from_str(s).unwrap())
            .unwrap_or_default();
        let first = params.first().and_then(Value::as_str).unwrap_or_default();

        let (kind, name) = match operation {
            "getQueueNames" => ("queue", None),
            "getAddressNames" => ("address", None),
            "getDivertNames" => ("divert", None),
            "createQueue" => {
                let config: Value = serde_json::from_str(first).unwrap();
                ("queue", Some(config["name"].as_str().unwrap().to_owned()))
            }
            "destroyQueue" => ("queue", Some(first.to_owned())),
            "createAddress" | "deleteAddress" => ("address", Some(first.to_owned())),
            "createDivert" | "destroyDivert" => ("divert", Some(first.to_owned())),
            "addAddressSettings" | "removeAddressSettings" => {
                ("address-setting", Some(first.to_owned()))
            }
            _ => return broker_reply(false, "unknown operation"),
        };

        let mut state = self.lock();
        let Some(name) = name else {
            let names: Vec<String> = state
                .brokers
                .get(hostname)
                .and_then(|b| b.get(kind))
                .map(|n| n.iter().cloned().collect())
                .unwrap_or_default();
            return broker_reply(true, &json!([names]).to_string());
        };

        if state.hang_on.contains(&name) {
            return Reply::Ignore;
        }
        if state.disconnect_on.contains(&name) {
            return Reply::Disconnect;
        }
        if operation.starts_with("create") && state.fail_create.contains(&name) {
            return broker_reply(false, &format!("AMQ229019: Queue {name} already exists"));
        }

        let names = state
            .brokers
            .entry(hostname.to_owned())
            .or_default()
            .entry(kind)
            .or_default();
        if operation.starts_with("create") || operation.starts_with("add") {
            names.insert(name);
        } else {
            names.remove(&name);
        }
        broker_reply(true, "")
    }
}

fn router_reply(code: u16, description: &str, body: Option<Value>) -> Reply {
    let mut reply = Message::new()
        .with_property("statusCode", code)
        .with_property("statusDescription", description);
    reply.body = body;
    Reply::Respond(reply)
}

fn broker_reply(succeeded: bool, body: &str) -> Reply {
    Reply::Respond(
        Message::new()
            .with_property("_AMQ_OperationSucceeded", succeeded)
            .with_body(body),
    )
}

// ── Configuration ───────────────────────────────────────────────────

pub fn fast_command_config() -> CommandConfig {
    CommandConfig {
        poll_interval: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            network_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            max_retries: None,
        },
        ..CommandConfig::default()
    }
}

pub fn test_config() -> InfraConfig {
    InfraConfig {
        command: fast_command_config(),
        ..InfraConfig::default()
    }
}

pub fn factory(connector: &MockConnector) -> Arc<dyn StateFactory> {
    Arc::new(AmqpStateFactory::new(Arc::new(connector.clone()), test_config()))
}

pub fn router_state(connector: &MockConnector, hostname: &str) -> RouterState {
    factory(connector)
        .router(&host(hostname), test_config().router_port)
        .unwrap()
}

pub fn broker_state(connector: &MockConnector, hostname: &str) -> BrokerState {
    factory(connector)
        .broker(&host(hostname), test_config().broker_port)
        .unwrap()
}

pub fn infra(connector: &MockConnector) -> InfraClient {
    InfraClient::new("infra", "messaging", factory(connector), test_config())
}

// ── Hosts ───────────────────────────────────────────────────────────

/// Host with a stable fake IP derived from the name.
pub fn host(hostname: &str) -> Host {
    let octet = hostname.bytes().fold(0u8, u8::wrapping_add);
    Host::new(hostname, format!("10.0.0.{octet}"))
}

pub fn hosts(hostnames: &[&str]) -> Vec<Host> {
    hostnames.iter().map(|h| host(h)).collect()
}

// ── Journal inspection ──────────────────────────────────────────────

/// Requests with the given router `operation`, in send order.
pub fn router_requests<'a>(journal: &'a [JournalEntry], operation: &str) -> Vec<&'a Message> {
    journal
        .iter()
        .filter(|e| e.direction == Direction::Request)
        .map(|e| &e.message)
        .filter(|m| m.property_str("operation") == Some(operation))
        .collect()
}

/// Requests with the given broker operation name, in send order.
pub fn broker_requests<'a>(journal: &'a [JournalEntry], operation: &str) -> Vec<&'a Message> {
    journal
        .iter()
        .filter(|e| e.direction == Direction::Request)
        .map(|e| &e.message)
        .filter(|m| m.property_str("_AMQ_OperationName") == Some(operation))
        .collect()
}

/// Journal position of the response correlated to `request`.
pub fn response_position(journal: &[JournalEntry], request: &Message) -> Option<usize> {
    let id = request.correlation_id()?;
    journal
        .iter()
        .position(|e| e.direction == Direction::Response && e.message.correlation_id() == Some(id))
}

/// Journal position of `request` itself.
pub fn request_position(journal: &[JournalEntry], request: &Message) -> Option<usize> {
    let id = request.correlation_id()?;
    journal
        .iter()
        .position(|e| e.direction == Direction::Request && e.message.correlation_id() == Some(id))
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
