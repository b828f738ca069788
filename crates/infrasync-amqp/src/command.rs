//! Multiplexed request/response over one management link.
//!
//! A [`CommandClient`] owns a background task that keeps exactly one
//! [`Link`] open to a single peer. Callers submit [`Message`]s through a
//! bounded queue; the task stamps each with a fresh correlation id, sends
//! it, and routes the matching reply back through a oneshot channel.
//!
//! When the link fails, every in-flight request is answered with the
//! failure, the link is torn down, and the task reconnects with
//! exponential backoff. Requests are never retried by the channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use infrasync_amqp::{CommandClient, CommandConfig, Endpoint, Message};
//!
//! let endpoint = Endpoint::new("router-0", "10.0.0.4", 55671, "$management", "router_command_response")?;
//! let client = CommandClient::new(endpoint, connector, CommandConfig::default());
//! client.start();
//!
//! let reply = client
//!     .request(Message::new().with_property("operation", "QUERY"))
//!     .await?;
//!
//! client.stop().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::message::Message;
use crate::transport::{Connector, Endpoint, Link};

// ── Defaults ─────────────────────────────────────────────────────────

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_QUEUE_CAPACITY: usize = 128;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for link re-establishment.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt after a link-level
    /// failure. Default: 1s.
    pub initial_delay: Duration,

    /// Delay before the first reconnection attempt after a network-level
    /// failure (refused, reset, TLS). Default: 5s.
    pub network_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before the channel gives up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            network_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── CommandConfig ────────────────────────────────────────────────────

/// Tuning for one command channel.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// How long one inbound receive may block before the loop checks the
    /// outbound queue again. Bounds response latency under low load.
    pub poll_interval: Duration,

    /// Outbound queue depth; `request` waits for room when full.
    pub queue_capacity: usize,

    /// Deadline used by [`CommandClient::request`].
    pub request_timeout: Duration,

    pub reconnect: ReconnectConfig,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Internal types ───────────────────────────────────────────────────

type ResponseTx = oneshot::Sender<Result<Message, Error>>;

/// A queued request paired with the channel its reply goes back on.
struct RequestEnvelope {
    message: Message,
    response_tx: ResponseTx,
}

/// State shared between the handle and the background loop.
struct Shared {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: CommandConfig,
    connected: AtomicBool,
    reconnects: AtomicU64,
}

struct Running {
    request_tx: mpsc::Sender<RequestEnvelope>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ClientInner {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

// ── CommandClient ────────────────────────────────────────────────────

/// Handle to one peer's command channel.
///
/// Cheaply cloneable; all clones share the same background task.
#[derive(Clone)]
pub struct CommandClient {
    inner: Arc<ClientInner>,
}

impl CommandClient {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, config: CommandConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                shared: Arc::new(Shared {
                    endpoint,
                    connector,
                    config,
                    connected: AtomicBool::new(false),
                    reconnects: AtomicU64::new(0),
                }),
                running: Mutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the background loop. Must be called from within a tokio
    /// runtime. Calling it on a running channel does nothing.
    pub fn start(&self) {
        let mut running = self.lock_running();
        if running.is_some() {
            return;
        }

        let shared = &self.inner.shared;
        let (request_tx, request_rx) = mpsc::channel(shared.config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(command_loop(
            Arc::clone(shared),
            request_rx,
            cancel.clone(),
        ));

        tracing::debug!(addr = %shared.endpoint, "Command channel started");
        *running = Some(Running {
            request_tx,
            cancel,
            handle,
        });
    }

    /// Close the outbound queue and wait for the loop to exit.
    ///
    /// Queued and in-flight requests are answered with
    /// [`Error::Shutdown`]. The channel may be started again afterwards.
    pub async fn stop(&self) {
        let running = self.lock_running().take();
        let Some(Running {
            request_tx,
            cancel,
            handle,
        }) = running
        else {
            return;
        };

        drop(request_tx);
        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Command loop task failed");
        }
        tracing::info!(addr = %self.inner.shared.endpoint, "Command channel stopped");
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Send a request and wait for its reply using the configured
    /// default deadline.
    pub async fn request(&self, message: Message) -> Result<Message, Error> {
        self.request_with_timeout(message, self.inner.shared.config.request_timeout)
            .await
    }

    /// Send a request and wait at most `timeout` for its reply.
    ///
    /// Time spent queued while the link is being re-established counts
    /// against the deadline.
    pub async fn request_with_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, Error> {
        let request_tx = self.sender()?;
        let (response_tx, response_rx) = oneshot::channel();
        let envelope = RequestEnvelope {
            message,
            response_tx,
        };

        let exchange = async move {
            request_tx
                .send(envelope)
                .await
                .map_err(|_| Error::Shutdown)?;
            response_rx.await.map_err(|_| Error::Shutdown)?
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Timeout {
                timeout_ms: millis(timeout),
            })?
    }

    // ── Health ───────────────────────────────────────────────────

    /// Whether a link to the peer is currently established.
    pub fn connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::Acquire)
    }

    /// Number of successful link establishments so far. A change between
    /// two observations means the peer may have lost state in between.
    pub fn reconnect_count(&self) -> u64 {
        self.inner.shared.reconnects.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn addr(&self) -> &Url {
        &self.inner.shared.endpoint.url
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.shared.endpoint
    }

    // ── Internals ────────────────────────────────────────────────

    fn sender(&self) -> Result<mpsc::Sender<RequestEnvelope>, Error> {
        self.lock_running()
            .as_ref()
            .map(|running| running.request_tx.clone())
            .ok_or_else(|| Error::NotConnected {
                addr: self.inner.shared.endpoint.to_string(),
            })
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("endpoint", &self.inner.shared.endpoint.to_string())
            .field("connected", &self.connected())
            .field("reconnects", &self.reconnect_count())
            .finish_non_exhaustive()
    }
}

// ── Background loop ──────────────────────────────────────────────────

/// How one serving phase ended.
enum ServeExit {
    /// Cancelled, or every handle was dropped.
    Stopped,
    /// The link failed and must be re-established.
    Failed(Error),
}

/// Main loop: connect → serve → on failure, backoff → reconnect.
async fn command_loop(
    shared: Arc<Shared>,
    mut requests: mpsc::Receiver<RequestEnvelope>,
    cancel: CancellationToken,
) {
    let reconnect = &shared.config.reconnect;
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = tokio::time::timeout(
                shared.endpoint.connect_timeout,
                shared.connector.connect(&shared.endpoint),
            ) => result.unwrap_or_else(|_| {
                Err(Error::Network(format!(
                    "connect timed out after {}ms",
                    millis(shared.endpoint.connect_timeout)
                )))
            }),
        };

        let failure = match connected {
            Ok(mut link) => {
                let reconnects = shared.reconnects.fetch_add(1, Ordering::AcqRel) + 1;
                shared.connected.store(true, Ordering::Release);
                tracing::info!(addr = %shared.endpoint, reconnects, "Command channel connected");
                attempt = 0;

                let exit = serve(&shared, link.as_mut(), &mut requests, &cancel).await;

                shared.connected.store(false, Ordering::Release);
                link.close().await;

                match exit {
                    ServeExit::Stopped => break,
                    ServeExit::Failed(e) => e,
                }
            }
            Err(e) => e,
        };

        tracing::warn!(addr = %shared.endpoint, error = %failure, attempt, "Command channel link failed");

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(
                    addr = %shared.endpoint,
                    max_retries = max,
                    "Command channel reconnection limit reached, giving up"
                );
                break;
            }
        }

        let delay = calculate_backoff(attempt, reconnect, failure.is_network());
        tracing::info!(
            addr = %shared.endpoint,
            delay_ms = millis(delay),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    drain(&mut requests);
    tracing::debug!(addr = %shared.endpoint, "Command loop exiting");
}

/// Run one established link until it fails or the channel stops.
///
/// Outbound requests take priority; when none are queued the loop waits
/// for an inbound message for at most `poll_interval` before checking
/// again. Whatever ends the phase, every pending request is answered.
async fn serve(
    shared: &Shared,
    link: &mut dyn Link,
    requests: &mut mpsc::Receiver<RequestEnvelope>,
    cancel: &CancellationToken,
) -> ServeExit {
    let mut pending: HashMap<String, ResponseTx> = HashMap::new();
    let poll_interval = shared.config.poll_interval;

    let exit = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break ServeExit::Stopped,
            envelope = requests.recv() => {
                let Some(envelope) = envelope else { break ServeExit::Stopped };
                if let Err(e) = dispatch(&shared.endpoint, link, &mut pending, envelope).await {
                    break ServeExit::Failed(e);
                }
            }
            received = tokio::time::timeout(poll_interval, link.recv()) => match received {
                Ok(Ok(message)) => deliver(&mut pending, message),
                Ok(Err(e)) => break ServeExit::Failed(e),
                Err(_) => prune(&mut pending),
            },
        }
    };

    let failure = match &exit {
        ServeExit::Stopped => Error::Shutdown,
        ServeExit::Failed(e) => e.clone(),
    };
    if !pending.is_empty() {
        tracing::debug!(
            addr = %shared.endpoint,
            pending = pending.len(),
            error = %failure,
            "Failing in-flight requests"
        );
    }
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(failure.clone()));
    }

    exit
}

/// Stamp correlation properties on a request and send it.
async fn dispatch(
    endpoint: &Endpoint,
    link: &mut dyn Link,
    pending: &mut HashMap<String, ResponseTx>,
    envelope: RequestEnvelope,
) -> Result<(), Error> {
    let RequestEnvelope {
        mut message,
        response_tx,
    } = envelope;

    if response_tx.is_closed() {
        tracing::debug!("Caller gave up before dispatch, dropping request");
        return Ok(());
    }

    let id = Uuid::new_v4().to_string();
    message.properties.message_id = Some(id.clone());
    message.properties.correlation_id = Some(id.clone());
    message.properties.reply_to = Some(endpoint.reply_address.clone());
    message.properties.to = Some(endpoint.address.clone());

    tracing::trace!(correlation_id = %id, "Sending request");
    match link.send(message).await {
        Ok(()) => {
            prune(pending);
            pending.insert(id, response_tx);
            Ok(())
        }
        Err(e) => {
            let _ = response_tx.send(Err(e.clone()));
            Err(e)
        }
    }
}

/// Forget callers that timed out or were cancelled.
fn prune(pending: &mut HashMap<String, ResponseTx>) {
    pending.retain(|_, tx| !tx.is_closed());
}

/// Route an inbound message to the request waiting for it.
fn deliver(pending: &mut HashMap<String, ResponseTx>, message: Message) {
    let Some(id) = message.correlation_id().map(str::to_owned) else {
        tracing::warn!("Response without correlation id, discarding");
        return;
    };

    match pending.remove(&id) {
        Some(tx) => {
            let _ = tx.send(Ok(message));
        }
        None => tracing::warn!(correlation_id = %id, "Unmatched response, discarding"),
    }
}

/// Answer everything still queued once the loop is done.
fn drain(requests: &mut mpsc::Receiver<RequestEnvelope>) {
    requests.close();
    while let Ok(envelope) = requests.try_recv() {
        let _ = envelope.response_tx.send(Err(Error::Shutdown));
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `min(initial * 2^attempt, max)`, scaled by up to 25% either way.
/// `initial` is the network delay for socket-level failures.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig, network: bool) -> Duration {
    let initial = if network {
        config.network_delay
    } else {
        config.initial_delay
    };
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = initial.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic per attempt so tests can pin attempt 0.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────
