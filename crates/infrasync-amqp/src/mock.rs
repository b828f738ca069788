//! In-memory transport for tests.
//!
//! [`MockConnector`] hands out links whose replies come from a handler
//! closure instead of a peer. Every request and every delivered response
//! is appended to one journal so tests can assert on ordering across
//! concurrent requests and across peers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::message::Message;
use crate::transport::{Connector, Endpoint, Link};

// ── Reply ────────────────────────────────────────────────────────────

/// What the fake peer does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer immediately. The correlation id is filled in if unset.
    Respond(Message),
    /// Answer after the given delay.
    Delay(Duration, Message),
    /// Never answer.
    Ignore,
    /// Detach the link instead of answering.
    Disconnect,
    /// Answer, then detach the link.
    RespondThenDisconnect(Message),
}

// ── Journal ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// One observed message. `peer` is the endpoint's server name.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub peer: String,
    pub direction: Direction,
    pub message: Message,
}

// ── MockConnector ────────────────────────────────────────────────────

type Handler = dyn Fn(&Endpoint, &Message) -> Reply + Send + Sync;

enum Inbound {
    Message(Message),
    Detached,
}

#[derive(Default)]
struct MockState {
    connects: usize,
    fail_connects: usize,
    journal: Vec<JournalEntry>,
    links: Vec<mpsc::UnboundedSender<Inbound>>,
}

struct MockInner {
    handler: Box<Handler>,
    state: Mutex<MockState>,
}

impl MockInner {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, peer: &str, direction: Direction, message: &Message) {
        self.lock().journal.push(JournalEntry {
            peer: peer.to_owned(),
            direction,
            message: message.clone(),
        });
    }
}

/// Connector whose peers are a closure. Clones share state.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

impl MockConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Endpoint, &Message) -> Reply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MockInner {
                handler: Box::new(handler),
                state: Mutex::new(MockState::default()),
            }),
        }
    }

    /// A peer that accepts connections but never answers.
    pub fn silent() -> Self {
        Self::new(|_, _| Reply::Ignore)
    }

    /// Number of successful connections so far.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().connects
    }

    /// Make the next `n` connection attempts fail with a network error.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.lock().fail_connects = n;
    }

    /// Detach every live link, as if each peer dropped its connection.
    pub fn drop_links(&self) {
        let links = std::mem::take(&mut self.inner.lock().links);
        for link in links {
            let _ = link.send(Inbound::Detached);
        }
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.lock().journal.clone()
    }

    /// Requests seen so far, in send order.
    pub fn requests(&self) -> Vec<Message> {
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|e| e.direction == Direction::Request)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().journal.clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.inner.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(Error::Network(format!("connection refused: {}", endpoint.url)));
            }
            state.connects += 1;
            state.links.retain(|l| !l.is_closed());
            state.links.push(tx.clone());
        }

        Ok(Box::new(MockLink {
            inner: Arc::clone(&self.inner),
            endpoint: endpoint.clone(),
            tx,
            rx,
        }))
    }
}

// ── MockLink ─────────────────────────────────────────────────────────

struct MockLink {
    inner: Arc<MockInner>,
    endpoint: Endpoint,
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

fn correlate(request: &Message, mut reply: Message) -> Message {
    if reply.properties.correlation_id.is_none() {
        reply.properties.correlation_id = Message::reply_to(request).properties.correlation_id;
    }
    reply
}

#[async_trait]
impl Link for MockLink {
    async fn send(&mut self, message: Message) -> Result<(), Error> {
        self.inner
            .record(&self.endpoint.server_name, Direction::Request, &message);

        match (self.inner.handler)(&self.endpoint, &message) {
            Reply::Respond(reply) => {
                let _ = self.tx.send(Inbound::Message(correlate(&message, reply)));
            }
            Reply::Delay(delay, reply) => {
                let tx = self.tx.clone();
                let reply = correlate(&message, reply);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Inbound::Message(reply));
                });
            }
            Reply::Ignore => {}
            Reply::Disconnect => {
                let _ = self.tx.send(Inbound::Detached);
            }
            Reply::RespondThenDisconnect(reply) => {
                let _ = self.tx.send(Inbound::Message(correlate(&message, reply)));
                let _ = self.tx.send(Inbound::Detached);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message, Error> {
        match self.rx.recv().await {
            Some(Inbound::Message(message)) => {
                self.inner
                    .record(&self.endpoint.server_name, Direction::Response, &message);
                Ok(message)
            }
            Some(Inbound::Detached) | None => Err(Error::Link("link detached by peer".into())),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
