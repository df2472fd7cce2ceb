//! Turns loosely typed domain events into ledger payloads.
//!
//! Everything a caller can get wrong is rejected here with
//! [`LedgerError::Validation`] before the chain is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::block::{EventPayload, EventType};
use crate::catalog::ProductCatalog;
use crate::chain::Chain;
use crate::error::{LedgerError, OptionExt as _, Result, ResultExt as _};
use crate::util;

pub const MAX_TEXT_CHARS: usize = 256;
pub const MAX_NOTES_CHARS: usize = 2048;

/// An event as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub product_id: Option<u64>,
    pub event_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// RFC 3339; the recording time is used when absent.
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
}

impl DomainEvent {
    pub fn new(product_id: u64, event_type: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id),
            event_type: event_type.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub block_index: u64,
    pub block_hash: String,
}

/// Outcome of a CSV batch.  `recorded` rows were committed before `error`
/// (if any) stopped the batch.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub recorded: Vec<RecordReceipt>,
    pub failed_row: Option<usize>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<LedgerError>,
}

fn serialize_error<S: serde::Serializer>(
    e: &Option<LedgerError>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match e {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    product_id: String,
    event_type: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    occurred_at: Option<String>,
}

impl CsvRow {
    fn into_event(self) -> Result<DomainEvent> {
        let product_id = self
            .product_id
            .trim()
            .parse::<u64>()
            .ctx_validation(&format!("product_id '{}'", self.product_id.trim()))?;
        // Empty CSV cells mean "absent".
        let opt = |s: Option<String>| s.filter(|v| !v.is_empty());
        Ok(DomainEvent {
            product_id: Some(product_id),
            event_type: self.event_type,
            location: opt(self.location),
            actor: opt(self.actor),
            notes: opt(self.notes),
            occurred_at: opt(self.occurred_at),
            attributes: None,
        })
    }
}

pub struct EventRecorder<'a, C: ProductCatalog + ?Sized> {
    chain: &'a Chain,
    catalog: &'a C,
}

impl<C: ProductCatalog + ?Sized> std::fmt::Debug for EventRecorder<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl<'a, C: ProductCatalog + ?Sized> EventRecorder<'a, C> {
    pub fn new(chain: &'a Chain, catalog: &'a C) -> Self {
        Self { chain, catalog }
    }

    /// Check `event` and build the payload that would be recorded.
    pub fn build_payload(&self, event: DomainEvent) -> Result<EventPayload> {
        let product_id = event
            .product_id
            .required_validation("product_id is required")?;
        if product_id == 0 {
            return Err(LedgerError::Validation("product_id must be positive".into()));
        }
        if !self.catalog.contains(product_id) {
            return Err(LedgerError::Validation(format!(
                "product {product_id} not found"
            )));
        }

        let event_type: EventType = event.event_type.parse()?;

        let text = |field: &str, v: Option<String>, max: usize| -> Result<Option<String>> {
            match v {
                Some(s) => {
                    util::validate_text(field, &s, max)?;
                    Ok(Some(s))
                }
                None => Ok(None),
            }
        };
        let location = text("location", event.location, MAX_TEXT_CHARS)?;
        let actor = text("actor", event.actor, MAX_TEXT_CHARS)?;
        let notes = text("notes", event.notes, MAX_NOTES_CHARS)?;

        let occurred_at = match event.occurred_at {
            Some(ts) => util::normalize_rfc3339(&ts)?,
            None => util::now_utc_rfc3339(),
        };

        let attributes = match event.attributes {
            None => None,
            Some(serde_json::Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(LedgerError::Validation(format!(
                    "attributes must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(EventPayload {
            product_id,
            event_type,
            occurred_at,
            location,
            actor,
            notes,
            attributes,
        })
    }

    /// Validate and record one event.
    pub fn record(&self, event: DomainEvent) -> Result<RecordReceipt> {
        let payload = self.build_payload(event)?;
        let block = self.chain.record(payload)?;
        Ok(RecordReceipt {
            block_index: block.index,
            block_hash: block.hash.clone(),
        })
    }

    /// Record every row of a CSV file in order, stopping at the first row
    /// that fails.  Malformed files (missing headers, too many rows) are
    /// rejected before anything is recorded.
    pub fn record_csv(&self, csv_path: &Path) -> Result<BatchReport> {
        let mut rdr = csv::Reader::from_path(csv_path)
            .ctx_validation(&format!("open csv {}", csv_path.display()))?;
        let headers = rdr.headers().ctx_validation("read csv headers")?.clone();
        for required in ["product_id", "event_type"] {
            if !headers.iter().any(|h| h == required) {
                return Err(LedgerError::Validation(format!(
                    "csv missing required header '{required}'"
                )));
            }
        }

        let mut rows = Vec::new();
        for rec in rdr.deserialize::<CsvRow>() {
            if rows.len() == util::MAX_CSV_ROWS {
                return Err(LedgerError::Validation(format!(
                    "csv exceeds maximum row limit of {}",
                    util::MAX_CSV_ROWS
                )));
            }
            rows.push(rec);
        }

        let mut report = BatchReport {
            recorded: Vec::with_capacity(rows.len()),
            failed_row: None,
            error: None,
        };
        for (i, rec) in rows.into_iter().enumerate() {
            let row_no = i + 1;
            let outcome = rec
                .ctx_validation("parse csv row")
                .and_then(CsvRow::into_event)
                .and_then(|ev| self.record(ev));
            match outcome {
                Ok(receipt) => report.recorded.push(receipt),
                Err(e) => {
                    warn!(row = row_no, error = %e, "csv batch stopped");
                    report.failed_row = Some(row_no);
                    report.error = Some(e);
                    break;
                }
            }
        }
        info!(
            path = %csv_path.display(),
            recorded = report.recorded.len(),
            "csv batch processed"
        );
        Ok(report)
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::LedgerConfig;

    fn setup() -> (Chain, InMemoryCatalog) {
        let chain = Chain::new(&LedgerConfig::with_difficulty(1)).unwrap();
        (chain, InMemoryCatalog::new([42, 7]))
    }

    fn assert_rejected(rec: &EventRecorder<'_, InMemoryCatalog>, ev: DomainEvent) {
        let before = rec.chain.len();
        let err = rec.record(ev).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
        assert_eq!(rec.chain.len(), before);
    }

    #[test]
    fn valid_event_is_recorded() {
        let (chain, catalog) = setup();
        let rec = EventRecorder::new(&chain, &catalog);
        let mut ev = DomainEvent::new(42, "in-transit");
        ev.location = Some("Rotterdam".into());
        ev.occurred_at = Some("2024-03-01T09:30:00+01:00".into());
        let receipt = rec.record(ev).unwrap();
        assert_eq!(receipt.block_index, 1);

        let block = chain.block(1).unwrap();
        assert_eq!(receipt.block_hash, block.hash);
        let payload = block.data.as_event().unwrap();
        assert_eq!(payload.event_type, EventType::InTransit);
        assert_eq!(payload.occurred_at, "2024-03-01T08:30:00Z");
        assert_eq!(payload.location.as_deref(), Some("Rotterdam"));
        assert!(payload.actor.is_none());
    }

    #[test]
    fn missing_or_unknown_product_rejected() {
        let (chain, catalog) = setup();
        let rec = EventRecorder::new(&chain, &catalog);
        assert_rejected(
            &rec,
            DomainEvent {
                event_type: "CREATED".into(),
                ..DomainEvent::default()
            },
        );
        assert_rejected(&rec, DomainEvent::new(0, "CREATED"));
        assert_rejected(&rec, DomainEvent::new(999, "CREATED"));
    }

    #[test]
    fn bad_fields_rejected() {
        let (chain, catalog) = setup();
        let rec = EventRecorder::new(&chain, &catalog);
        assert_rejected(&rec, DomainEvent::new(42, "TELEPORTED"));

        let mut ev = DomainEvent::new(42, "SHIPPED");
        ev.location = Some("x".repeat(MAX_TEXT_CHARS + 1));
        assert_rejected(&rec, ev);

        let mut ev = DomainEvent::new(42, "SHIPPED");
        ev.occurred_at = Some("last tuesday".into());
        assert_rejected(&rec, ev);

        let mut ev = DomainEvent::new(42, "SHIPPED");
        ev.attributes = Some(serde_json::json!([1, 2]));
        assert_rejected(&rec, ev);
    }

    #[test]
    fn notes_get_longer_limit() {
        let (chain, catalog) = setup();
        let rec = EventRecorder::new(&chain, &catalog);
        let mut ev = DomainEvent::new(7, "INSPECTED");
        ev.notes = Some("n".repeat(1000));
        assert!(rec.build_payload(ev).is_ok());
    }

    #[test]
    fn domain_event_deserializes_from_json() {
        let ev: DomainEvent =
            serde_json::from_str(r#"{"product_id": 42, "event_type": "SHIPPED"}"#).unwrap();
        assert_eq!(ev, DomainEvent::new(42, "SHIPPED"));
    }

    #[test]
    fn csv_batch_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(
            &path,
            "product_id,event_type,location,actor,notes\n\
             42,CREATED,Plant 1,,\n\
             7,SHIPPED,,carrier,\n\
             999,SHIPPED,,,\n\
             42,DELIVERED,,,\n",
        )
        .unwrap();

        let (chain, catalog) = setup();
        let report = EventRecorder::new(&chain, &catalog).record_csv(&path).unwrap();
        assert_eq!(report.recorded.len(), 2);
        assert_eq!(report.failed_row, Some(3));
        assert!(matches!(report.error, Some(LedgerError::Validation(_))));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn csv_without_required_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "product,event_type\n42,CREATED\n").unwrap();
        let (chain, catalog) = setup();
        let err = EventRecorder::new(&chain, &catalog)
            .record_csv(&path)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(chain.len(), 1);
    }
}
