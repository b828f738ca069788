// ── Transport seam ──
//
// The command channel never speaks AMQP framing itself. A `Connector`
// opens one connection/session to a peer and returns a `Link`: a
// sender on the management address paired with a receiver on the reply
// address. The embedding process supplies the AMQP-backed connector;
// tests use `crate::mock`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::Error;
use crate::message::Message;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── TLS identity ─────────────────────────────────────────────────────

/// Client certificate material for mutually authenticated TLS.
///
/// When present the connector authenticates with SASL EXTERNAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

// ── Endpoint ─────────────────────────────────────────────────────────

/// Everything a connector needs to reach one peer's management node.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `amqps://<ip>:<port>`.
    pub url: Url,
    /// Name verified against the peer certificate (the pod hostname).
    pub server_name: String,
    /// Management address requests are sent to.
    pub address: String,
    /// Address the peer sends responses to.
    pub reply_address: String,
    pub tls: Option<TlsIdentity>,
    pub connect_timeout: Duration,
    /// Connection properties announced on open.
    pub properties: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(
        server_name: impl Into<String>,
        ip: &str,
        port: u16,
        address: impl Into<String>,
        reply_address: impl Into<String>,
    ) -> Result<Self, Error> {
        let url = Url::parse(&format!("amqps://{ip}:{port}"))?;
        Ok(Self {
            url,
            server_name: server_name.into(),
            address: address.into(),
            reply_address: reply_address.into(),
            tls: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            properties: BTreeMap::new(),
        })
    }

    pub fn with_tls(mut self, tls: TlsIdentity) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.url.as_str().trim_end_matches('/'), self.address)
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// One established sender/receiver pair on a live connection.
#[async_trait]
pub trait Link: Send {
    /// Send a request on the management address.
    async fn send(&mut self, message: Message) -> Result<(), Error>;

    /// Receive the next message from the reply address.
    ///
    /// Must be cancel-safe: the channel polls this under a short timeout
    /// and drops the future when it elapses, so a message must never be
    /// consumed by a future that is later dropped.
    async fn recv(&mut self) -> Result<Message, Error>;

    /// Tear down link, session and connection. Errors are not reported.
    async fn close(&mut self);
}

/// Opens links to peers.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, Error>;
}
