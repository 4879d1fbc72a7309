use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One source-system transaction exactly as captured at extraction time.
/// Amounts and timestamps are still strings in whatever shape the bank
/// delivered them; the cleansing stage is the only consumer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawRecord {
    /// Source-assigned row id, used as the stable identifier when logging
    /// rejections and as the keyset cursor position.
    pub record_id: i64,
    pub account_id: String,
    pub transaction_date: String,
    pub amount: String,
    pub description: Option<String>,
    pub location_code: Option<String>,
}

/// Cleansed, typed projection of a [`RawRecord`]. The bank-local account id
/// is carried through for identity resolution in the enrichment stage.
///
/// Invariant: `valid` is only true when both amount and timestamp parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedRecord {
    pub account_id: String,
    pub transaction_time: NaiveDateTime,
    pub amount: Decimal,
    pub description: String,
    pub transaction_type: TransactionType,
    pub location_code: Option<String>,
    pub valid: bool,
}

/// Final row persisted to the analytical fact store. The surrogate key is
/// assigned by the store on insert.
///
/// Invariant: never persisted with `valid == false`, and `customer_id` is
/// non-empty whenever `valid` is true.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub bank_id: String,
    pub customer_id: String,
    pub transaction_time: NaiveDateTime,
    pub amount: Decimal,
    pub description: String,
    pub location_code: Option<String>,
    pub transaction_type: TransactionType,
    pub category: Category,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Withdrawal,
    Payment,
    Transfer,
    PosPurchase,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Payment => "PAYMENT",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::PosPurchase => "POS_PURCHASE",
        }
    }
}

/// Fixed keyword-to-category mapping; deliberately not a rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Utilities,
    Groceries,
    Transport,
    Shopping,
    Dining,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Utilities => "Utilities",
            Category::Groceries => "Groceries",
            Category::Transport => "Transport",
            Category::Shopping => "Shopping",
            Category::Dining => "Dining",
            Category::Other => "Other",
        }
    }
}

/// Ingestion lifecycle event published by the upstream ingestion service.
/// The field spelling (camelCase, `dataLocationURI`) is owned by that
/// producer; unknown event types must still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestionEvent {
    pub event_id: Option<String>,
    pub timestamp: Option<String>,
    pub event_type: String,
    pub bank_id: Option<String>,
    pub batch_id: Option<String>,
    #[serde(rename = "dataLocationURI")]
    pub data_location_uri: Option<String>,
    pub record_count: Option<i64>,
    pub error_message: Option<String>,
}

pub const INGESTION_COMPLETE: &str = "INGESTION_COMPLETE";
pub const INGESTION_FAILED: &str = "INGESTION_FAILED";

/// Outbound terminal-state event for downstream consumers (analytics).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelingEvent {
    pub event_type: String,
    pub run_id: Uuid,
    pub bank_id: String,
    pub records_read: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub exit_detail: Option<String>,
}

pub const MODELING_COMPLETE: &str = "MODELING_COMPLETE";
pub const MODELING_FAILED: &str = "MODELING_FAILED";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingestion_event_round_trips_producer_spelling() {
        let json = r#"{
            "eventId": "e-1",
            "timestamp": "2023-10-27T15:30:00Z",
            "eventType": "INGESTION_COMPLETE",
            "bankId": "BANK_A",
            "batchId": "batch-42",
            "dataLocationURI": "s3://landing/bank_a/batch-42",
            "recordCount": 1000,
            "errorMessage": null
        }"#;

        let event: IngestionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, INGESTION_COMPLETE);
        assert_eq!(event.bank_id.as_deref(), Some("BANK_A"));
        assert_eq!(event.batch_id.as_deref(), Some("batch-42"));
        assert_eq!(
            event.data_location_uri.as_deref(),
            Some("s3://landing/bank_a/batch-42")
        );

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["dataLocationURI"], "s3://landing/bank_a/batch-42");
        assert_eq!(back["bankId"], "BANK_A");
    }

    #[test]
    fn ingestion_event_tolerates_sparse_payloads() {
        let event: IngestionEvent =
            serde_json::from_str(r#"{"eventType": "SOMETHING_ELSE"}"#).unwrap();
        assert_eq!(event.event_type, "SOMETHING_ELSE");
        assert!(event.bank_id.is_none());
        assert!(event.record_count.is_none());
    }

    #[test]
    fn transaction_type_labels() {
        assert_eq!(TransactionType::Withdrawal.as_str(), "WITHDRAWAL");
        assert_eq!(TransactionType::PosPurchase.as_str(), "POS_PURCHASE");
    }
}
