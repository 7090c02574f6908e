//! Common test utilities and fixtures for integration tests
//!
//! A scripted connector standing in for the WebSocket server, plus timeline
//! pages and detail answers shaped like the live API's.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tr_sdk::prelude::*;
use tr_ws::{MockReply, MockTransport};

/// Script answering one subscription: (connection number, request id, topic)
pub type Script = dyn Fn(usize, u64, Value) -> MockReply + Send + Sync;

/// Connector whose every connection is served by the same script
pub struct MockConnector {
    connects: AtomicUsize,
    script: Arc<Script>,
}

impl MockConnector {
    pub fn new(script: impl Fn(usize, u64, Value) -> MockReply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            script: Arc::new(script),
        })
    }

    /// Number of connections opened so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, TrError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        let (transport, server) = MockTransport::pair(config.endpoint.url());
        let script = self.script.clone();
        server.serve(move |id, topic| script(n, id, topic));
        Connection::open(transport, config).await
    }
}

/// Builder wired to `connector` with short deadlines and no pacing
pub fn builder(connector: Arc<MockConnector>) -> TimelineClientBuilder {
    let mut builder = TimelineClient::builder()
        .with_endpoint(Endpoint::Custom("wss://mock.test".into()))
        .with_call_timeout(Duration::from_millis(300))
        .with_page_retry(
            RetryPolicy::new()
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        )
        .with_detail_rate(1_000, 1_000.0)
        .with_connector(connector);
    builder.config.enrich.retry_delay = Duration::from_millis(1);
    builder
}

/// Session good for five minutes
pub fn session() -> Arc<Session> {
    Arc::new(Session::new("session-token", "refresh-token", Duration::from_secs(300)))
}

/// Timeline item number `n`
pub fn transaction(n: usize) -> Value {
    json!({
        "id": transaction_id(n),
        "timestamp": "2024-03-01T09:15:02.123+0000",
        "title": format!("Apple Inc. #{}", n),
        "eventType": "TRADE_INVOICE",
        "amount": {"currency": "EUR", "value": -125.5, "fractionDigits": 2},
        "subAmount": {"currency": "EUR", "value": 1.0, "fractionDigits": 2},
        "status": "EXECUTED"
    })
}

pub fn transaction_id(n: usize) -> String {
    format!("tx-{:04}", n)
}

/// Inverse of [`transaction_id`]
pub fn transaction_number(id: &str) -> usize {
    id.trim_start_matches("tx-").parse().unwrap()
}

/// `timelineTransactions` answer body
pub fn page_body(items: Vec<Value>, after: Option<&str>) -> Value {
    json!({
        "items": items,
        "cursors": {"before": "b", "after": after}
    })
}

/// Pages of the given sizes, numbered consecutively; page `i` points to
/// page `i + 1` with cursor `c{i + 1}`
pub fn timeline(sizes: &[usize]) -> Vec<Value> {
    let mut next = 0;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let items = (next..next + size).map(transaction).collect();
            next += size;
            let cursor = (i + 1 < sizes.len()).then(|| format!("c{}", i + 1));
            page_body(items, cursor.as_deref())
        })
        .collect()
}

/// Page index requested by a `timelineTransactions` topic
pub fn requested_page(topic: &Value) -> usize {
    match topic.get("after").and_then(Value::as_str) {
        None => 0,
        Some(cursor) => cursor.trim_start_matches('c').parse().unwrap(),
    }
}

/// `timelineDetailV2` answer body for item `n`
pub fn detail_body(n: usize) -> Value {
    json!({
        "id": transaction_id(n),
        "sections": [
            {"title": "Vous avez investi 125,50 €", "type": "header", "data": []},
            {
                "title": "Transaction",
                "type": "table",
                "data": [
                    {"title": "Titres", "detail": {"text": format!("{}", n + 1)}},
                    {"title": "Cours du titre", "detail": {"text": "125,50 €"}},
                    {"title": "Frais", "detail": {"text": "1,00 €"}},
                    {"title": "Total", "detail": {"text": "126,50 €"}}
                ]
            }
        ]
    })
}

/// `availableCash` answer body
pub fn cash_body() -> Value {
    json!([{"accountNumber": "DE00123", "currencyId": "EUR", "amount": 1234.56}])
}

/// `A` frame carrying `body`
pub fn answer(id: u64, body: &Value) -> MockReply {
    MockReply::Frames(vec![format!("{} A {}", id, body)])
}

/// `E` frame reporting a missing resource
pub fn not_found(id: u64) -> MockReply {
    MockReply::Frames(vec![format!(
        r#"{} E {{"errors":[{{"errorCode":"NOT_FOUND","errorMessage":"Not found"}}]}}"#,
        id
    )])
}

/// Answer every topic from `pages`, details and cash included
pub fn serve_timeline(pages: &[Value], id: u64, topic: &Value) -> MockReply {
    match topic["type"].as_str() {
        Some("timelineTransactions") => answer(id, &pages[requested_page(topic)]),
        Some("timelineDetailV2") => {
            let n = transaction_number(topic["id"].as_str().unwrap());
            answer(id, &detail_body(n))
        }
        Some("availableCash") => answer(id, &cash_body()),
        other => panic!("unexpected topic {:?}", other),
    }
}
