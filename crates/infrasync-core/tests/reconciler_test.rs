#![allow(clippy::unwrap_used)]
// Integration tests for router and broker reconciliation against a fake
// fleet over the in-memory transport.

mod common;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{
    Fleet, broker_requests, broker_state, request_position, response_position, router_requests,
    router_state, wait_for,
};
use infrasync_amqp::Message;
use infrasync_core::{
    BrokerAddress, BrokerEntity, BrokerEntityKind, BrokerQueue, CoreError, ManagedEntity,
    RouterAddress, RouterAutoLink, RouterConnector, RouterEntity, RouterEntityKind,
    RouterListener, RoutingType,
};

// ── Helpers ─────────────────────────────────────────────────────────

const CONNECTOR: &str = "org.apache.qpid.dispatch.connector";
const LISTENER: &str = "org.apache.qpid.dispatch.listener";

fn connector_entity(name: &str, port: &str) -> RouterEntity {
    RouterConnector {
        name: name.into(),
        host: "broker-0".into(),
        port: port.into(),
        role: Some("route-container".into()),
        ..RouterConnector::default()
    }
    .into()
}

fn address(name: &str) -> RouterEntity {
    RouterAddress {
        name: name.into(),
        prefix: Some(name.into()),
        waypoint: Some(true),
        ..RouterAddress::default()
    }
    .into()
}

fn auto_link(name: &str, address: &str) -> RouterEntity {
    RouterAutoLink {
        name: name.into(),
        address: address.into(),
        direction: "out".into(),
        connection: Some("connector-broker-0-5671".into()),
        ..RouterAutoLink::default()
    }
    .into()
}

fn queue(name: &str) -> BrokerEntity {
    BrokerQueue {
        name: name.into(),
        address: Some(name.into()),
        routing_type: Some(RoutingType::Anycast),
        durable: Some(true),
        ..BrokerQueue::named(name)
    }
    .into()
}

fn later() -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::hours(1)
}

// ── Router: initialization ──────────────────────────────────────────

#[tokio::test]
async fn test_router_initialize_loads_inventory() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        CONNECTOR,
        json!({ "name": "c1", "host": "broker-0", "port": "5671", "linkCapacity": 250 }),
    );
    fleet.seed_router(
        "router-0",
        LISTENER,
        json!({ "name": "amqps", "host": "0.0.0.0", "port": "5671", "role": "normal" }),
    );
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");

    let cancel = CancellationToken::new();
    assert!(matches!(
        router.ensure_entities(&cancel, &[address("a")]).await,
        Err(CoreError::NotInitialized)
    ));

    router.initialize(later()).await.unwrap();

    assert!(router.is_initialized());
    assert_eq!(router.entities().len(), 2);
    assert!(router.cache().contains(RouterEntityKind::Connector, "c1"));
    assert!(router.cache().contains(RouterEntityKind::Listener, "amqps"));

    let journal = connector.journal();
    let queries = router_requests(&journal, "QUERY");
    assert_eq!(queries.len(), RouterEntityKind::INVENTORIED.len());
    assert_eq!(queries[0].body, Some(json!({ "attributeNames": [] })));

    router.shutdown().await;
}

#[tokio::test]
async fn test_initialize_is_noop_while_cache_is_valid() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");

    router.initialize(later()).await.unwrap();
    connector.clear();
    router.initialize(later()).await.unwrap();

    assert!(connector.requests().is_empty());
    router.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_invalidates_cache() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");

    router.initialize(later()).await.unwrap();
    let before = router.client().reconnect_count();

    connector.drop_links();
    wait_for(|| router.client().reconnect_count() > before).await;
    connector.clear();

    router.initialize(later()).await.unwrap();

    let journal = connector.journal();
    let queries = router_requests(&journal, "QUERY");
    let kinds: Vec<_> = queries
        .iter()
        .map(|q| q.property_str("entityType").unwrap().to_owned())
        .collect();
    let expected: Vec<_> = RouterEntityKind::INVENTORIED
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(kinds, expected);

    router.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_during_inventory_is_not_trusted() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        LISTENER,
        json!({ "name": "amqps", "host": "0.0.0.0", "port": "5671" }),
    );
    fleet.drop_after_query(LISTENER);
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");

    // The link drops between the listener and address queries.
    let err = router.initialize(later()).await.unwrap_err();
    assert!(err.is_connection_error(), "got {err:?}");
    assert!(!router.is_initialized());
    assert!(router.entities().is_empty());

    connector.clear();
    router.initialize(later()).await.unwrap();
    assert!(router.is_initialized());
    assert!(router.cache().contains(RouterEntityKind::Listener, "amqps"));
    assert_eq!(
        router_requests(&connector.journal(), "QUERY").len(),
        RouterEntityKind::INVENTORIED.len()
    );

    router.shutdown().await;
}

// ── Router: ensure ──────────────────────────────────────────────────

#[tokio::test]
async fn test_update_is_rejected_and_nothing_created() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        CONNECTOR,
        json!({ "name": "c1", "host": "broker-0", "port": "5671" }),
    );
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    let cached = router.entities();
    connector.clear();

    let cancel = CancellationToken::new();
    let err = router
        .ensure_entities(&cancel, &[address("a"), connector_entity("c1", "5672")])
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UpdateNotSupported { peer: "router", .. }));
    assert!(err.to_string().contains("c1 was updated"));
    assert!(router_requests(&connector.journal(), "CREATE").is_empty());
    assert_eq!(router.entities(), cached);

    router.shutdown().await;
}

#[tokio::test]
async fn test_dropping_an_attribute_is_an_update() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        CONNECTOR,
        json!({
            "name": "c1",
            "host": "broker-0",
            "port": "5671",
            "role": "route-container",
            "sslProfile": "infra_tls",
            "saslMechanisms": "EXTERNAL",
        }),
    );
    fleet.seed_router(
        "router-0",
        LISTENER,
        json!({
            "name": "console",
            "host": "0.0.0.0",
            "port": "8080",
            "http": true,
            "authenticatePeer": true,
        }),
    );
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    connector.clear();
    let cancel = CancellationToken::new();

    // TLS turned off in the desired connector.
    let err = router
        .ensure_entities(&cancel, &[connector_entity("c1", "5671")])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UpdateNotSupported { peer: "router", .. }));

    let plain_listener: RouterEntity = RouterListener {
        name: "console".into(),
        host: "0.0.0.0".into(),
        port: "8080".into(),
        ..RouterListener::default()
    }
    .into();
    let err = router
        .ensure_entities(&cancel, &[plain_listener])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UpdateNotSupported { peer: "router", .. }));

    assert!(router_requests(&connector.journal(), "CREATE").is_empty());
    router.shutdown().await;
}

#[tokio::test]
async fn test_conflicting_duplicates_are_rejected() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    connector.clear();

    let moved = RouterConnector {
        name: "c1".into(),
        host: "broker-9".into(),
        port: "9999".into(),
        ..RouterConnector::default()
    };

    let err = router
        .ensure_entities(
            &CancellationToken::new(),
            &[connector_entity("c1", "5671"), moved.into()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UpdateNotSupported { peer: "router", .. }));
    assert!(router_requests(&connector.journal(), "CREATE").is_empty());
    assert!(!router.cache().contains(RouterEntityKind::Connector, "c1"));

    router.shutdown().await;
}

#[tokio::test]
async fn test_ensure_twice_creates_once() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    let cancel = CancellationToken::new();

    let desired = vec![
        address("t1/orders"),
        connector_entity("c1", "5671"),
        // Duplicates collapse into one create.
        address("t1/orders"),
    ];
    router.ensure_entities(&cancel, &desired).await.unwrap();
    assert_eq!(router_requests(&connector.journal(), "CREATE").len(), 2);

    connector.clear();
    router.ensure_entities(&cancel, &desired).await.unwrap();
    assert!(router_requests(&connector.journal(), "CREATE").is_empty());

    assert_eq!(fleet.router_names("router-0", CONNECTOR), vec!["c1"]);
    router.shutdown().await;
}

#[tokio::test]
async fn test_creation_is_phased_by_order() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    connector.clear();

    let cancel = CancellationToken::new();
    let desired = vec![
        auto_link("autoLink-t1-a-out", "t1/a"),
        address("t1/a"),
        auto_link("autoLink-t1-b-out", "t1/b"),
        address("t1/b"),
    ];
    router.ensure_entities(&cancel, &desired).await.unwrap();

    let journal = connector.journal();
    let creates = router_requests(&journal, "CREATE");
    assert_eq!(creates.len(), 4);

    let (phase0, phase1): (Vec<&Message>, Vec<&Message>) = creates
        .into_iter()
        .partition(|m| m.property_str("type") == Some("org.apache.qpid.dispatch.router.config.address"));

    let last_phase0_response = phase0
        .iter()
        .map(|m| response_position(&journal, m).unwrap())
        .max()
        .unwrap();
    let first_phase1_request = phase1
        .iter()
        .map(|m| request_position(&journal, m).unwrap())
        .min()
        .unwrap();
    assert!(last_phase0_response < first_phase1_request);

    router.shutdown().await;
}

#[tokio::test]
async fn test_failed_phase_keeps_earlier_successes() {
    let fleet = Fleet::default();
    fleet.fail_create("autoLink-t1-a-out");
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();

    let cancel = CancellationToken::new();
    let err = router
        .ensure_entities(&cancel, &[address("t1/a"), auto_link("autoLink-t1-a-out", "t1/a")])
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Status { code: 500, .. }));
    assert!(router.cache().contains(RouterEntityKind::Address, "t1/a"));
    assert!(!router.cache().contains(RouterEntityKind::AutoLink, "autoLink-t1-a-out"));
    // Status errors are not connection errors; the cache stays valid.
    assert!(router.is_initialized());

    router.shutdown().await;
}

#[tokio::test]
async fn test_create_body_keeps_integer_attributes() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    connector.clear();

    let listener: RouterEntity = RouterListener {
        name: "amqp".into(),
        host: "0.0.0.0".into(),
        port: "5672".into(),
        link_capacity: Some(250),
        ..RouterListener::default()
    }
    .into();
    router
        .ensure_entities(&CancellationToken::new(), &[listener])
        .await
        .unwrap();

    let journal = connector.journal();
    let creates = router_requests(&journal, "CREATE");
    let body = creates[0].body.as_ref().unwrap();
    assert!(body["linkCapacity"].is_i64());
    assert_eq!(body["linkCapacity"], json!(250));

    router.shutdown().await;
}

#[tokio::test]
async fn test_connection_error_resets_state() {
    let fleet = Fleet::default();
    fleet.disconnect_on("t1/doomed");
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();

    let err = router
        .ensure_entities(&CancellationToken::new(), &[address("t1/doomed")])
        .await
        .unwrap_err();

    assert!(err.is_connection_error());
    assert!(!router.is_initialized());
    assert!(router.entities().is_empty());

    // The next initialize goes back to the peer.
    connector.clear();
    router.initialize(later()).await.unwrap();
    assert_eq!(
        router_requests(&connector.journal(), "QUERY").len(),
        RouterEntityKind::INVENTORIED.len()
    );

    router.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_aborts_pending_work() {
    let fleet = Fleet::default();
    fleet.hang_on("t1/stuck");
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = router
        .ensure_entities(&cancel, &[address("t1/stuck")])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(router.is_initialized());

    router.shutdown().await;
}

// ── Router: delete and read ─────────────────────────────────────────

#[tokio::test]
async fn test_delete_absent_entity_is_noop() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    connector.clear();

    router
        .delete_entities(
            &CancellationToken::new(),
            &[RouterEntity::named(RouterEntityKind::Connector, "nope")],
        )
        .await
        .unwrap();

    assert!(router_requests(&connector.journal(), "DELETE").is_empty());
    assert!(router.entities().is_empty());
    router.shutdown().await;
}

#[tokio::test]
async fn test_delete_treats_not_found_as_success() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        CONNECTOR,
        json!({ "name": "c1", "host": "broker-0", "port": "5671" }),
    );
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();

    // Someone else removed it behind our back.
    fleet.remove_router_entity("router-0", CONNECTOR, "c1");

    router
        .delete_entities(
            &CancellationToken::new(),
            &[RouterEntity::named(RouterEntityKind::Connector, "c1")],
        )
        .await
        .unwrap();

    assert!(!router.cache().contains(RouterEntityKind::Connector, "c1"));
    router.shutdown().await;
}

#[tokio::test]
async fn test_http_listener_is_retained() {
    let fleet = Fleet::default();
    fleet.seed_router(
        "router-0",
        LISTENER,
        json!({ "name": "console", "host": "0.0.0.0", "port": "8080", "http": true }),
    );
    fleet.undeletable("console");
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();

    router
        .delete_entities(
            &CancellationToken::new(),
            &[RouterEntity::named(RouterEntityKind::Listener, "console")],
        )
        .await
        .unwrap();

    assert!(router.cache().contains(RouterEntityKind::Listener, "console"));
    assert_eq!(fleet.router_names("router-0", LISTENER), vec!["console"]);
    router.shutdown().await;
}

#[tokio::test]
async fn test_read_returns_partial_results() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut router = router_state(&connector, "router-0");
    router.initialize(later()).await.unwrap();
    let cancel = CancellationToken::new();
    router
        .ensure_entities(&cancel, &[connector_entity("c1", "5671")])
        .await
        .unwrap();

    let read = router
        .read_entities(&cancel, &[connector_entity("c1", "5671"), connector_entity("c2", "5671")])
        .await;

    assert_eq!(read.entities.len(), 1);
    let c1 = read.entities[0].as_connector().unwrap();
    assert!(c1.is_connected());
    assert!(matches!(read.error, Some(CoreError::Status { code: 404, .. })));

    router.shutdown().await;
}

// ── Broker ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_broker_initialize_lists_queue_names() {
    let fleet = Fleet::default();
    fleet.seed_broker("broker-0", "queue", "queue1");
    fleet.seed_broker("broker-0", "queue", "queue2");
    let connector = fleet.connector();
    let mut broker = broker_state(&connector, "broker-0");

    broker.initialize(later()).await.unwrap();

    let queues: Vec<String> = broker
        .entities()
        .iter()
        .filter(|e| e.kind() == BrokerEntityKind::Queue)
        .map(ManagedEntity::name)
        .collect();
    assert_eq!(queues, vec!["queue1", "queue2"]);

    let journal = connector.journal();
    assert_eq!(broker_requests(&journal, "getQueueNames").len(), 1);
    assert_eq!(broker_requests(&journal, "getAddressNames").len(), 1);
    assert_eq!(broker_requests(&journal, "getDivertNames").len(), 1);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_broker_ensure_and_delete() {
    let fleet = Fleet::default();
    let connector = fleet.connector();
    let mut broker = broker_state(&connector, "broker-0");
    broker.initialize(later()).await.unwrap();
    let cancel = CancellationToken::new();

    let entities = vec![
        queue("t1/orders"),
        BrokerAddress {
            name: "t1/orders".into(),
            routing_type: RoutingType::Anycast,
        }
        .into(),
    ];
    broker.ensure_entities(&cancel, &entities).await.unwrap();

    let journal = connector.journal();
    let address_create = broker_requests(&journal, "createAddress")[0];
    let queue_create = broker_requests(&journal, "createQueue")[0];
    assert!(
        response_position(&journal, address_create).unwrap()
            < request_position(&journal, queue_create).unwrap()
    );
    assert_eq!(
        address_create.body,
        Some(json!(r#"["t1/orders","ANYCAST"]"#))
    );
    assert_eq!(fleet.broker_names("broker-0", "queue"), vec!["t1/orders"]);

    let read = broker.read_entities(&cancel, &[queue("t1/orders")]).await;
    assert_eq!(read.into_result().unwrap().len(), 1);

    broker
        .delete_entities(&cancel, &[BrokerEntity::from_name(BrokerEntityKind::Queue, "t1/orders")])
        .await
        .unwrap();
    assert!(fleet.broker_names("broker-0", "queue").is_empty());
    assert!(!broker.cache().contains(BrokerEntityKind::Queue, "t1/orders"));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_broker_failure_is_reported() {
    let fleet = Fleet::default();
    fleet.fail_create("t1/orders");
    let connector = fleet.connector();
    let mut broker = broker_state(&connector, "broker-0");
    broker.initialize(later()).await.unwrap();

    let err = broker
        .ensure_entities(&CancellationToken::new(), &[queue("t1/orders")])
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::OperationFailed { .. }));
    assert!(err.to_string().contains("createQueue"));
    assert!(broker.entities().is_empty());

    broker.shutdown().await;
}
