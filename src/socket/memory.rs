//! In-process transport.
//!
//! [`MemoryConnector`] hands each accepted connection to a [`MemoryListener`]
//! as a [`MemoryPeer`], which plays the server side.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ConnectRequest, Connector, Outbound, TransportEvent, TransportHandle};
use crate::error::ConnectionError;

/// What the next connection attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse(String),
    /// Never completes.
    Hang,
}

struct Inner {
    script: VecDeque<ConnectOutcome>,
    attempts: Vec<Instant>,
    requests: Vec<ConnectRequest>,
}

/// Connector whose connections stay inside the process.
///
/// Attempts follow the scripted outcomes in order, then accept.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Mutex::new(Inner {
                script: VecDeque::new(),
                attempts: Vec::new(),
                requests: Vec::new(),
            })),
            peers,
        };
        (connector, MemoryListener { peers: rx })
    }

    /// Queue the outcome of a future attempt.
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// When each attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// The most recent connect request.
    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.lock().requests.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<TransportHandle, ConnectionError>> {
        let outcome = {
            let mut inner = self.lock();
            inner.attempts.push(Instant::now());
            inner.requests.push(request);
            inner.script.pop_front().unwrap_or(ConnectOutcome::Accept)
        };
        let peers = self.peers.clone();
        Box::pin(async move {
            match outcome {
                ConnectOutcome::Accept => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    peers
                        .send(MemoryPeer { received: out_rx, sender: in_tx })
                        .map_err(|_| ConnectionError::Refused("listener dropped".into()))?;
                    Ok(TransportHandle { outgoing: out_tx, incoming: in_rx })
                }
                ConnectOutcome::Refuse(reason) => Err(ConnectionError::Refused(reason)),
                ConnectOutcome::Hang => futures::future::pending().await,
            }
        })
    }
}

/// Receives the server side of accepted connections.
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server side of one in-memory connection.
pub struct MemoryPeer {
    received: mpsc::UnboundedReceiver<Outbound>,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Next thing the client sent. `None` once the client dropped the transport.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.received.recv().await
    }

    /// Next frame the client sent, skipping close requests.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.received.recv().await? {
                Outbound::Frame(frame) => return Some(frame),
                Outbound::Close(_) => {}
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.received.try_recv().ok()
    }

    /// Deliver a frame to the client.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.sender.send(TransportEvent::Frame(frame)).is_ok()
    }

    /// Close the connection with the given code.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.sender
            .send(TransportEvent::Closed { code, reason: reason.to_string() })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            endpoint: "mem://test".into(),
            origin: "https://web.whatsapp.com".into(),
            user_agent: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_accept_links_both_sides() {
        let (connector, mut listener) = MemoryConnector::new();
        let mut handle = connector.connect(request()).await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        handle.outgoing.send(Outbound::Frame(vec![1, 2])).unwrap();
        assert_eq!(peer.recv().await, Some(Outbound::Frame(vec![1, 2])));

        peer.send(vec![3]);
        peer.close(1000, "bye");
        assert_eq!(handle.incoming.recv().await, Some(TransportEvent::Frame(vec![3])));
        assert_eq!(
            handle.incoming.recv().await,
            Some(TransportEvent::Closed { code: 1000, reason: "bye".into() })
        );
        assert_eq!(connector.last_request(), Some(request()));
    }

    #[tokio::test]
    async fn test_scripted_refusal_then_accept() {
        let (connector, _listener) = MemoryConnector::new();
        connector.push_outcome(ConnectOutcome::Refuse("down".into()));
        assert_eq!(
            connector.connect(request()).await.unwrap_err(),
            ConnectionError::Refused("down".into())
        );
        assert!(connector.connect(request()).await.is_ok());
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_resolves() {
        let (connector, _listener) = MemoryConnector::new();
        connector.push_outcome(ConnectOutcome::Hang);
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), connector.connect(request())).await;
        assert!(result.is_err());
    }
}
