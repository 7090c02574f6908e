//! Request correlation
//!
//! Every subscription carries a numeric id; the server tags each answer with
//! it. The [`Correlator`] allocates ids, parks one oneshot channel per
//! in-flight request and routes every inbound frame to the waiting caller.
//!
//! The connection's I/O task is the only caller of [`Correlator::dispatch`];
//! callers only ever wait on their own channel.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tr_types::{apply_delta, InboundFrame, OutboundFrame, Topic, TrError};
use tracing::{debug, trace, warn};

/// How a call is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallMode {
    /// Resolve on the first answer, then unsubscribe
    #[default]
    Snapshot,
    /// Unsubscribe after the first answer and collect every answer or delta
    /// until the terminal `C` frame
    UntilComplete,
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Resolution mode
    pub mode: CallMode,
    /// Deadline; the connection default applies when `None`
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options resolving on the first answer
    pub fn snapshot() -> Self {
        Self::default()
    }

    /// Options collecting parts until the terminal frame
    pub fn until_complete() -> Self {
        Self {
            mode: CallMode::UntilComplete,
            timeout: None,
        }
    }

    /// Set the deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Resolved answer to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    request_id: u64,
    parts: Vec<String>,
}

impl Response {
    /// Request id the answer was correlated with
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Every payload received, deltas already applied
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Latest payload, if any
    pub fn latest(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Parse the latest payload as JSON
    pub fn json(&self) -> Result<Value, TrError> {
        let payload = self.latest().ok_or_else(|| {
            TrError::protocol(format!("request {} completed without payload", self.request_id))
        })?;
        serde_json::from_str(payload).map_err(|e| {
            TrError::protocol(format!("invalid JSON for request {}: {}", self.request_id, e))
        })
    }
}

struct PendingRequest {
    mode: CallMode,
    tx: oneshot::Sender<Result<Response, TrError>>,
    parts: Vec<String>,
    unsubscribed: bool,
}

/// Registry of in-flight requests
pub struct Correlator {
    next_id: AtomicU64,
    pending: DashMap<u64, PendingRequest>,
    outbound: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    default_timeout: Duration,
}

/// Removes an abandoned request and unsubscribes it
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some((id, request)) = self.correlator.pending.remove(&self.request_id) {
            trace!(request_id = id, "Removing abandoned request");
            if !request.unsubscribed {
                self.correlator.unsubscribe(id);
            }
        }
    }
}

impl Correlator {
    /// Create a correlator writing frames to `outbound`
    pub fn new(outbound: mpsc::UnboundedSender<String>, default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            outbound,
            closed: AtomicBool::new(false),
            default_timeout,
        }
    }

    /// Subscribe to `topic` and wait for the correlated answer
    ///
    /// Timing out or dropping the returned future removes only this call's
    /// registry entry; other calls and the connection are unaffected.
    pub async fn call(&self, topic: Topic, options: CallOptions) -> Result<Response, TrError> {
        if self.is_closed() {
            return Err(TrError::connection_lost("connection closed"));
        }

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = OutboundFrame::Subscribe {
            id: request_id,
            topic,
        }
        .encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                mode: options.mode,
                tx,
                parts: Vec::new(),
                unsubscribed: false,
            },
        );
        let _guard = PendingGuard {
            correlator: self,
            request_id,
        };

        // fail_all may have drained the registry between the check and the insert
        if self.is_closed() {
            return Err(TrError::connection_lost("connection closed"));
        }

        trace!(request_id, "Sending request");
        self.outbound
            .send(frame)
            .map_err(|_| TrError::connection_lost("I/O task stopped"))?;

        let deadline = options.timeout.unwrap_or(self.default_timeout);
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TrError::connection_lost("request dropped")),
            Err(_) => {
                debug!(request_id, ?deadline, "Request timed out");
                Err(TrError::Timeout {
                    request_id,
                    timeout: deadline,
                })
            }
        }
    }

    /// Route one inbound frame to its waiting caller
    pub fn dispatch(&self, frame: InboundFrame) {
        let Some(request_id) = frame.request_id() else {
            match frame {
                InboundFrame::Echo => trace!("Echo"),
                InboundFrame::Connected => debug!("Unexpected handshake acknowledgement"),
                InboundFrame::Unknown(text) => debug!("Discarding unrecognized frame: {}", text),
                _ => {}
            }
            return;
        };

        let outcome = {
            let Some(mut request) = self.pending.get_mut(&request_id) else {
                debug!(request_id, "Discarding frame for unknown or resolved request");
                return;
            };

            match frame {
                InboundFrame::Answer { payload, .. } => {
                    request.parts.push(payload);
                    self.after_payload(request_id, &mut request)
                }
                InboundFrame::Delta { delta, .. } => {
                    let previous = request.parts.last().map(String::as_str).unwrap_or("");
                    match apply_delta(previous, &delta) {
                        Ok(payload) => {
                            request.parts.push(payload);
                            self.after_payload(request_id, &mut request)
                        }
                        Err(e) => Some(Err(e)),
                    }
                }
                InboundFrame::Complete { .. } => {
                    request.unsubscribed = true;
                    match request.mode {
                        CallMode::UntilComplete => Some(Ok(())),
                        CallMode::Snapshot if request.parts.is_empty() => Some(Err(
                            TrError::protocol(format!("request {} completed without answer", request_id)),
                        )),
                        CallMode::Snapshot => Some(Ok(())),
                    }
                }
                InboundFrame::Error { payload, .. } => {
                    request.unsubscribed = true;
                    Some(Err(TrError::Remote {
                        request_id,
                        message: payload,
                    }))
                }
                _ => None,
            }
        };

        if let Some(outcome) = outcome {
            self.resolve(request_id, outcome);
        }
    }

    fn after_payload(&self, request_id: u64, request: &mut PendingRequest) -> Option<Result<(), TrError>> {
        match request.mode {
            CallMode::Snapshot => Some(Ok(())),
            CallMode::UntilComplete => {
                if !request.unsubscribed {
                    request.unsubscribed = true;
                    self.unsubscribe(request_id);
                }
                None
            }
        }
    }

    fn resolve(&self, request_id: u64, outcome: Result<(), TrError>) {
        let Some((_, request)) = self.pending.remove(&request_id) else {
            return;
        };
        if !request.unsubscribed {
            self.unsubscribe(request_id);
        }
        let result = outcome.map(|()| Response {
            request_id,
            parts: request.parts,
        });
        if request.tx.send(result).is_err() {
            trace!(request_id, "Caller gone before resolution");
        }
    }

    fn unsubscribe(&self, request_id: u64) {
        if self.is_closed() {
            return;
        }
        if let Ok(frame) = (OutboundFrame::Unsubscribe { id: request_id }).encode() {
            let _ = self.outbound.send(frame);
        }
    }

    /// Fail every pending call with a connection-lost error
    ///
    /// New calls fail immediately afterwards. Returns the number of calls
    /// failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, request)) = self.pending.remove(&id) {
                let _ = request.tx.send(Err(TrError::connection_lost(reason)));
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("Connection lost with {} pending requests: {}", failed, reason);
        }
        failed
    }

    /// Number of in-flight requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if the correlator stopped accepting calls
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Default per-call deadline
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
