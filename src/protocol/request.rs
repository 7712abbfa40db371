//! Request/response handling for IQ queries.
//!
//! Every IQ carries an `id`; the matching `result` or `error` stanza from the
//! server completes the pending request with the same id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::binary::Node;
use crate::error::Error;

/// Request tracker for IQ messages.
pub struct RequestTracker {
    pending: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    counter: AtomicU64,
    prefix: String,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            prefix: format!("{:X}", rand::random::<u16>()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Node>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a new unique request ID.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{}", self.prefix, n)
    }

    /// Register a pending request and get a receiver for the response.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Node> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Complete a pending request with a response.
    pub fn complete(&self, id: &str, response: Node) -> bool {
        match self.lock().remove(id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Fail every pending request; their waiters see the connection as closed.
    pub fn cancel_all(&self) {
        self.lock().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Wait for the response to `id`.
    ///
    /// An `error` IQ becomes [`Error::RequestFailed`]; no answer within
    /// `timeout` becomes [`Error::RequestTimeout`].
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<Node>, timeout: Duration) -> Result<Node, Error> {
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(node)) => node,
            Ok(Err(_)) => {
                return Err(Error::RequestFailed {
                    id: id.to_string(),
                    reason: "connection closed".into(),
                })
            }
            Err(_) => {
                self.cancel(id);
                return Err(Error::RequestTimeout(id.to_string()));
            }
        };
        match get_iq_error(&response) {
            Some(reason) => Err(Error::RequestFailed {
                id: id.to_string(),
                reason,
            }),
            None => Ok(response),
        }
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an IQ get request.
pub fn build_iq_get(id: &str, xmlns: &str, to: Option<&str>) -> Node {
    build_iq(id, "get", xmlns, to)
}

/// Build an IQ set request.
pub fn build_iq_set(id: &str, xmlns: &str, to: Option<&str>) -> Node {
    build_iq(id, "set", xmlns, to)
}

fn build_iq(id: &str, kind: &str, xmlns: &str, to: Option<&str>) -> Node {
    let mut node = Node::new("iq").attr("id", id).attr("type", kind).attr("xmlns", xmlns);
    if let Some(to) = to {
        node.set_attr("to", to);
    }
    node
}

/// Build an IQ result response.
pub fn build_iq_result(id: &str, to: Option<&str>) -> Node {
    let mut node = Node::new("iq").attr("id", id).attr("type", "result");
    if let Some(to) = to {
        node.set_attr("to", to);
    }
    node
}

pub fn is_iq_result(node: &Node) -> bool {
    node.tag == "iq" && node.get_attr("type") == Some("result")
}

pub fn is_iq_error(node: &Node) -> bool {
    node.tag == "iq" && node.get_attr("type") == Some("error")
}

/// Extract the error text from an IQ error node.
pub fn get_iq_error(node: &Node) -> Option<String> {
    if !is_iq_error(node) {
        return None;
    }
    let error = node.get_child_by_tag("error");
    Some(
        error
            .and_then(|e| e.get_attr("text").or(e.get_attr("code")))
            .map(String::from)
            .unwrap_or_else(|| "unknown error".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tracker() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        assert_ne!(id, tracker.next_id());

        let _rx = tracker.register(&id);
        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.complete(&id, build_iq_result(&id, None)));
        assert!(!tracker.complete(&id, build_iq_result(&id, None)));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_build_iq_get() {
        let node = build_iq_get("123", "w:profile:picture", Some("user@server"));
        assert_eq!(node.tag, "iq");
        assert_eq!(node.get_attr("type"), Some("get"));
        assert_eq!(node.get_attr("xmlns"), Some("w:profile:picture"));
        assert_eq!(node.get_attr("to"), Some("user@server"));
    }

    #[test]
    fn test_iq_error_text() {
        let error = Node::new("iq")
            .attr("type", "error")
            .child(Node::new("error").attr("code", "404").attr("text", "item-not-found"));
        assert!(is_iq_error(&error));
        assert!(!is_iq_result(&error));
        assert_eq!(get_iq_error(&error).as_deref(), Some("item-not-found"));
        assert_eq!(get_iq_error(&build_iq_result("1", None)), None);
    }

    #[tokio::test]
    async fn test_wait_returns_result() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id);
        tracker.complete(&id, build_iq_result(&id, None));
        let node = tracker.wait(&id, rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(node.get_attr("id"), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_wait_maps_errors() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id);
        tracker.complete(
            &id,
            Node::new("iq").attr("id", id.as_str()).attr("type", "error").child(Node::new("error").attr("text", "forbidden")),
        );
        assert!(matches!(
            tracker.wait(&id, rx, Duration::from_secs(1)).await,
            Err(Error::RequestFailed { reason, .. }) if reason == "forbidden"
        ));

        let id = tracker.next_id();
        let rx = tracker.register(&id);
        tracker.cancel_all();
        assert!(matches!(
            tracker.wait(&id, rx, Duration::from_secs(1)).await,
            Err(Error::RequestFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id);
        let err = tracker.wait(&id, rx, Duration::from_secs(20)).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(_)));
        assert_eq!(tracker.pending_count(), 0);
    }
}
