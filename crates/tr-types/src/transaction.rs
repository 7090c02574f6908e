//! Timeline transaction types

use crate::error::TrError;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

// ============================================================================
// Raw transactions
// ============================================================================

/// Monetary amount as reported by the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// ISO currency code
    pub currency: String,
    /// Signed value
    pub value: Decimal,
    /// Number of fraction digits used for display
    #[serde(rename = "fractionDigits", default)]
    pub fraction_digits: Option<u32>,
}

/// One timeline entry, exactly as received
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    id: String,
    timestamp: DateTime<FixedOffset>,
    amount: Option<Amount>,
    event_type: Option<String>,
    title: String,
    raw_payload: Value,
}

impl RawTransaction {
    /// Build from a timeline item object
    pub fn from_value(raw_payload: Value) -> Result<Self, TrError> {
        let object = raw_payload
            .as_object()
            .ok_or_else(|| TrError::protocol("timeline item is not an object"))?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TrError::protocol("timeline item without id"))?
            .to_string();

        let raw_timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| TrError::protocol(format!("timeline item {} without timestamp", id)))?;
        let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
            TrError::protocol(format!("timeline item {} has bad timestamp {}", id, raw_timestamp))
        })?;

        // The raw payload is exported as is; only the typed view drops it
        let amount = match object.get("amount") {
            None | Some(Value::Null) => None,
            Some(value) => match Amount::deserialize(value) {
                Ok(amount) => Some(amount),
                Err(e) => {
                    warn!("Timeline item {} has unreadable amount: {}", id, e);
                    None
                }
            },
        };

        let event_type = object
            .get("eventType")
            .and_then(Value::as_str)
            .map(str::to_string);
        let title = object
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            id,
            timestamp,
            amount,
            event_type,
            title,
            raw_payload,
        })
    }

    /// Server-assigned identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event time
    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    /// Amount, if the entry carries one
    pub fn amount(&self) -> Option<&Amount> {
        self.amount.as_ref()
    }

    /// Event type tag (e.g. `TRADE_INVOICE`)
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Display title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Original JSON object
    pub fn raw_payload(&self) -> &Value {
        &self.raw_payload
    }
}

/// Parse timeline timestamps (`2024-03-01T09:15:02.123+0000` or RFC 3339)
fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
}

// ============================================================================
// Pages
// ============================================================================

/// One page of the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Items in server order
    pub items: Vec<RawTransaction>,
    /// Continuation token; absent iff this is the final page
    pub next_cursor: Option<String>,
}

impl Page {
    /// Build from a `timelineTransactions` answer
    ///
    /// A missing or empty `items` list, or a missing/empty `after` cursor,
    /// marks the final page.
    pub fn from_response(response: &Value) -> Result<Self, TrError> {
        let object = response
            .as_object()
            .ok_or_else(|| TrError::protocol("timeline page is not an object"))?;

        let items = match object.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(RawTransaction::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(TrError::protocol("timeline page items is not an array")),
        };

        let next_cursor = if items.is_empty() {
            None
        } else {
            object
                .get("cursors")
                .and_then(|cursors| cursors.get("after"))
                .and_then(Value::as_str)
                .filter(|cursor| !cursor.is_empty())
                .map(str::to_string)
        };

        Ok(Self { items, next_cursor })
    }

    /// Check if this is the last page
    pub fn is_final(&self) -> bool {
        self.next_cursor.is_none()
    }
}

// ============================================================================
// Details
// ============================================================================

const SHARES_LABELS: &[&str] = &["titres", "actions", "shares", "quantité", "anzahl"];
const SHARE_PRICE_LABELS: &[&str] = &[
    "cours du titre",
    "prix du titre",
    "prix par titre",
    "share price",
    "aktienkurs",
];
const TAX_LABELS: &[&str] = &["impôts", "impôt", "taxes", "tax", "steuern"];
const FEE_LABELS: &[&str] = &["frais", "fee", "fees", "gebühr"];
const FREE_WORDS: &[&str] = &["gratuit", "free", "kostenlos"];

/// Detail fields of a transaction's "Transaction" section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDetail {
    /// Number of shares
    pub shares: Option<Decimal>,
    /// Price per share
    pub share_price: Option<Decimal>,
    /// Taxes paid
    pub tax: Option<Decimal>,
    /// Fees paid
    pub fees: Option<Decimal>,
    /// Every label/text pair of the section, in server order
    pub fields: Vec<(String, String)>,
}

impl TransactionDetail {
    /// Build from a `timelineDetailV2` answer
    pub fn from_response(response: &Value) -> Result<Self, String> {
        let sections = response
            .get("sections")
            .and_then(Value::as_array)
            .ok_or_else(|| "detail without sections".to_string())?;

        let mut detail = Self::default();
        let section = sections
            .iter()
            .find(|section| section.get("title").and_then(Value::as_str) == Some("Transaction"));

        let Some(section) = section else {
            return Ok(detail);
        };

        for item in section.get("data").and_then(Value::as_array).into_iter().flatten() {
            let label = item.get("title").and_then(Value::as_str);
            let text = item
                .get("detail")
                .and_then(|detail| detail.get("text"))
                .and_then(Value::as_str);
            if let (Some(label), Some(text)) = (label, text) {
                if !label.is_empty() && !text.is_empty() {
                    detail.record(label, text);
                }
            }
        }

        Ok(detail)
    }

    fn record(&mut self, label: &str, text: &str) {
        let key = label.trim().to_lowercase();
        let slot = if SHARES_LABELS.contains(&key.as_str()) {
            Some(&mut self.shares)
        } else if SHARE_PRICE_LABELS.contains(&key.as_str()) {
            Some(&mut self.share_price)
        } else if TAX_LABELS.contains(&key.as_str()) {
            Some(&mut self.tax)
        } else if FEE_LABELS.contains(&key.as_str()) {
            Some(&mut self.fees)
        } else {
            None
        };
        if let Some(slot) = slot {
            *slot = parse_localized_decimal(text);
        }
        self.fields.push((label.to_string(), text.to_string()));
    }

    /// Check if no field was found
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parse a display number such as `1 234,56 €`, `€1,234.56` or `Gratuit`
pub fn parse_localized_decimal(text: &str) -> Option<Decimal> {
    let lowered = text.trim().to_lowercase();
    if FREE_WORDS.contains(&lowered.as_str()) {
        return Some(Decimal::ZERO);
    }

    let mut cleaned: String = lowered
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-' | '+'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => {
            cleaned = cleaned.replace('.', "").replace(',', ".");
        }
        (Some(_), Some(_)) => {
            cleaned = cleaned.replace(',', "");
        }
        (Some(_), None) => {
            cleaned = cleaned.replace(',', ".");
        }
        _ => {}
    }

    Decimal::from_str(&cleaned).ok()
}

/// Why a detail lookup produced no data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailFailure {
    /// Lookup did not answer in time
    Timeout,
    /// Server does not know the transaction
    NotFound,
    /// Server answered with an error
    Remote(String),
    /// Answer could not be interpreted
    Malformed(String),
    /// Connection dropped and retries were exhausted
    ConnectionLost(String),
}

impl fmt::Display for DetailFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::NotFound => write!(f, "not found"),
            Self::Remote(message) => write!(f, "server error: {}", message),
            Self::Malformed(reason) => write!(f, "malformed detail: {}", reason),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
        }
    }
}

impl From<&TrError> for DetailFailure {
    fn from(error: &TrError) -> Self {
        match error {
            TrError::Timeout { .. } => Self::Timeout,
            e if e.is_not_found() => Self::NotFound,
            TrError::Remote { message, .. } => Self::Remote(message.clone()),
            TrError::Protocol(reason) => Self::Malformed(reason.clone()),
            e if e.requires_reconnect() => Self::ConnectionLost(e.to_string()),
            e => Self::Remote(e.to_string()),
        }
    }
}

/// Non-fatal, per-item enrichment failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailFetchWarning {
    /// Transaction whose detail is missing
    pub transaction_id: String,
    /// What went wrong
    pub reason: DetailFailure,
}

impl fmt::Display for DetailFetchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "detail for {} unavailable: {}", self.transaction_id, self.reason)
    }
}

// ============================================================================
// Enriched transactions
// ============================================================================

/// Transaction plus optional detail
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTransaction {
    /// Timeline entry
    pub raw: RawTransaction,
    /// Detail, absent if enrichment was skipped or failed
    pub detail: Option<TransactionDetail>,
    /// Set when enrichment was attempted and failed
    pub warning: Option<DetailFetchWarning>,
}

impl EnrichedTransaction {
    /// Wrap a transaction without detail
    pub fn bare(raw: RawTransaction) -> Self {
        Self {
            raw,
            detail: None,
            warning: None,
        }
    }

    /// Wrap a transaction with its detail
    pub fn with_detail(raw: RawTransaction, detail: TransactionDetail) -> Self {
        Self {
            raw,
            detail: Some(detail),
            warning: None,
        }
    }

    /// Wrap a transaction whose detail lookup failed
    pub fn with_warning(raw: RawTransaction, reason: DetailFailure) -> Self {
        let warning = DetailFetchWarning {
            transaction_id: raw.id().to_string(),
            reason,
        };
        Self {
            raw,
            detail: None,
            warning: Some(warning),
        }
    }

    /// Transaction id
    pub fn id(&self) -> &str {
        self.raw.id()
    }

    /// Export shape: the raw object with detail label/text pairs merged in
    pub fn to_export_value(&self) -> Value {
        let mut object = match self.raw.raw_payload() {
            Value::Object(object) => object.clone(),
            other => {
                let mut object = Map::new();
                object.insert("value".to_string(), other.clone());
                object
            }
        };
        if let Some(detail) = &self.detail {
            for (label, text) in &detail.fields {
                object.insert(label.clone(), Value::String(text.clone()));
            }
        }
        Value::Object(object)
    }
}

impl Serialize for EnrichedTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_export_value().serialize(serializer)
    }
}

// ============================================================================
// Transaction set
// ============================================================================

/// Final, ordered, duplicate-free transaction list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionSet {
    items: Vec<EnrichedTransaction>,
}

impl TransactionSet {
    /// Assemble a set, rejecting duplicate ids
    pub fn new(items: Vec<EnrichedTransaction>) -> Result<Self, TrError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id()) {
                return Err(TrError::DuplicateTransaction {
                    id: item.id().to_string(),
                });
            }
        }
        Ok(Self { items })
    }

    /// Number of transactions
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if no transaction was found
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in server order
    pub fn iter(&self) -> impl Iterator<Item = &EnrichedTransaction> {
        self.items.iter()
    }

    /// Get the transactions as a slice
    pub fn as_slice(&self) -> &[EnrichedTransaction] {
        &self.items
    }

    /// Number of transactions carrying detail
    pub fn enriched_count(&self) -> usize {
        self.items.iter().filter(|t| t.detail.is_some()).count()
    }

    /// Enrichment warnings, in transaction order
    pub fn warnings(&self) -> impl Iterator<Item = &DetailFetchWarning> {
        self.items.iter().filter_map(|t| t.warning.as_ref())
    }

    /// Consume into the underlying vector
    pub fn into_vec(self) -> Vec<EnrichedTransaction> {
        self.items
    }
}

impl Serialize for TransactionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a TransactionSet {
    type Item = &'a EnrichedTransaction;
    type IntoIter = std::slice::Iter<'a, EnrichedTransaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn item(id: &str) -> Value {
        json!({
            "id": id,
            "timestamp": "2024-03-01T09:15:02.123+0000",
            "title": "Apple",
            "eventType": "TRADE_INVOICE",
            "amount": {"currency": "EUR", "value": -150.25, "fractionDigits": 2}
        })
    }

    #[test]
    fn test_raw_transaction_parse() {
        let tx = RawTransaction::from_value(item("t1")).unwrap();
        assert_eq!(tx.id(), "t1");
        assert_eq!(tx.title(), "Apple");
        assert_eq!(tx.event_type(), Some("TRADE_INVOICE"));
        assert_eq!(tx.amount().unwrap().value, dec!(-150.25));
        assert_eq!(tx.timestamp().format("%d/%m/%Y").to_string(), "01/03/2024");
    }

    #[test]
    fn test_raw_transaction_rfc3339() {
        let tx = RawTransaction::from_value(json!({
            "id": "x", "timestamp": "2023-12-31T23:00:00Z"
        }))
        .unwrap();
        assert!(tx.amount().is_none());
        assert_eq!(tx.title(), "");
    }

    #[test]
    fn test_raw_transaction_rejects_missing_fields() {
        assert!(RawTransaction::from_value(json!({"timestamp": "2024-01-01T00:00:00Z"})).is_err());
        assert!(RawTransaction::from_value(json!({"id": "a"})).is_err());
        assert!(RawTransaction::from_value(json!({"id": "a", "timestamp": "yesterday"})).is_err());
        assert!(RawTransaction::from_value(json!("a")).is_err());
    }

    #[test]
    fn test_page_cursor_rules() {
        let page = Page::from_response(&json!({
            "items": [item("a"), item("b")],
            "cursors": {"before": "x", "after": "c1"}
        }))
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));

        let last = Page::from_response(&json!({"items": [item("c")], "cursors": {}})).unwrap();
        assert!(last.is_final());

        let blank = Page::from_response(&json!({"items": [item("c")], "cursors": {"after": ""}}))
            .unwrap();
        assert!(blank.is_final());

        let empty = Page::from_response(&json!({"items": [], "cursors": {"after": "c9"}})).unwrap();
        assert!(empty.is_final());
        assert!(empty.items.is_empty());

        assert!(Page::from_response(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_page_keeps_item_with_unreadable_amount() {
        let odd = json!({
            "id": "b",
            "timestamp": "2024-03-01T09:15:02.123+0000",
            "amount": {"value": 0, "fractionDigits": 2}
        });
        let page = Page::from_response(&json!({
            "items": [item("a"), odd.clone()],
            "cursors": {"after": "c1"}
        }))
        .unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].amount().is_some());
        assert!(page.items[1].amount().is_none());
        assert_eq!(page.items[1].raw_payload(), &odd);
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn test_detail_parse() {
        let response = json!({
            "sections": [
                {"title": "Aperçu", "data": []},
                {"title": "Transaction", "data": [
                    {"title": "Titres", "detail": {"text": "2,5"}},
                    {"title": "Cours du titre", "detail": {"text": "180,12 €"}},
                    {"title": "Frais", "detail": {"text": "1,00 €"}},
                    {"title": "Impôts", "detail": {"text": "Gratuit"}},
                    {"title": "Total", "detail": {"text": "451,30 €"}},
                    {"title": "Vide", "detail": {}}
                ]}
            ]
        });
        let detail = TransactionDetail::from_response(&response).unwrap();
        assert_eq!(detail.shares, Some(dec!(2.5)));
        assert_eq!(detail.share_price, Some(dec!(180.12)));
        assert_eq!(detail.fees, Some(dec!(1.00)));
        assert_eq!(detail.tax, Some(Decimal::ZERO));
        assert_eq!(detail.fields.len(), 5);
        assert_eq!(detail.fields[4], ("Total".to_string(), "451,30 €".to_string()));
    }

    #[test]
    fn test_detail_malformed() {
        assert!(TransactionDetail::from_response(&json!({"oops": true})).is_err());
        let empty = TransactionDetail::from_response(&json!({"sections": []})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_localized_decimal() {
        assert_eq!(parse_localized_decimal("1 234,56 €"), Some(dec!(1234.56)));
        assert_eq!(parse_localized_decimal("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_localized_decimal("€1,234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_localized_decimal("-3.5"), Some(dec!(-3.5)));
        assert_eq!(parse_localized_decimal("Free"), Some(Decimal::ZERO));
        assert_eq!(parse_localized_decimal("n/a"), None);
    }

    #[test]
    fn test_export_value_merges_detail() {
        let raw = RawTransaction::from_value(item("t1")).unwrap();
        let detail = TransactionDetail {
            fields: vec![("Frais".into(), "1,00 €".into())],
            ..Default::default()
        };
        let enriched = EnrichedTransaction::with_detail(raw, detail);
        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["Frais"], "1,00 €");
        assert_eq!(value["id"], "t1");
    }

    #[test]
    fn test_transaction_set_rejects_duplicates() {
        let a = EnrichedTransaction::bare(RawTransaction::from_value(item("a")).unwrap());
        let b = EnrichedTransaction::bare(RawTransaction::from_value(item("b")).unwrap());

        let set = TransactionSet::new(vec![a.clone(), b]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.enriched_count(), 0);

        let err = TransactionSet::new(vec![a.clone(), a]).unwrap_err();
        assert!(matches!(err, TrError::DuplicateTransaction { id } if id == "a"));
    }

    #[test]
    fn test_warning_tracking() {
        let raw = RawTransaction::from_value(item("a")).unwrap();
        let tx = EnrichedTransaction::with_warning(raw, DetailFailure::Timeout);
        let set = TransactionSet::new(vec![tx]).unwrap();
        let warnings: Vec<_> = set.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].transaction_id, "a");
        assert!(warnings[0].to_string().contains("timed out"));
    }

    #[test]
    fn test_detail_failure_from_error() {
        let err = TrError::Timeout {
            request_id: 1,
            timeout: std::time::Duration::from_secs(1),
        };
        assert_eq!(DetailFailure::from(&err), DetailFailure::Timeout);

        let err = TrError::Remote {
            request_id: 1,
            message: "NOT_FOUND".into(),
        };
        assert_eq!(DetailFailure::from(&err), DetailFailure::NotFound);

        let err = TrError::connection_lost("reset");
        assert!(matches!(DetailFailure::from(&err), DetailFailure::ConnectionLost(_)));
    }
}
