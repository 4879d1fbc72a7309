use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::error::RejectReason;
use crate::types::{HarmonizedRecord, RawRecord, TransactionType};

/// Incoming dates are assumed consistent across banks.
const INPUT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const UNKNOWN_DESCRIPTION: &str = "UNKNOWN";

/// Parse and validate one raw record into a harmonized record.
///
/// A malformed amount or timestamp rejects the record outright; the caller
/// drops it from the chunk and counts it. A suspicious location code is only
/// flagged as a data-quality warning.
pub fn cleanse(record: &RawRecord) -> Result<HarmonizedRecord, RejectReason> {
    let amount: Decimal = match record.amount.parse() {
        Ok(amount) => amount,
        Err(_) => {
            error!(
                record_id = record.record_id,
                amount = %record.amount,
                "invalid amount format, rejecting record"
            );
            return Err(RejectReason::InvalidAmount(record.amount.clone()));
        }
    };

    let transaction_time = match NaiveDateTime::parse_from_str(
        &record.transaction_date,
        INPUT_DATE_FORMAT,
    ) {
        Ok(time) => time,
        Err(_) => {
            error!(
                record_id = record.record_id,
                date = %record.transaction_date,
                "invalid date format, rejecting record"
            );
            return Err(RejectReason::InvalidTimestamp(record.transaction_date.clone()));
        }
    };

    if record.location_code.as_ref().map_or(true, |c| c.len() != 5) {
        // Data quality flag only, the record stays in the chunk
        warn!(
            record_id = record.record_id,
            location_code = ?record.location_code,
            "potentially invalid location code"
        );
    }

    Ok(HarmonizedRecord {
        account_id: record.account_id.clone(),
        transaction_time,
        amount,
        description: normalize_description(record.description.as_deref()),
        transaction_type: infer_transaction_type(record.description.as_deref()),
        location_code: record.location_code.clone(),
        valid: true,
    })
}

/// Trim, collapse internal whitespace runs to a single space, uppercase.
/// Idempotent; a missing description maps to the literal UNKNOWN token.
pub fn normalize_description(description: Option<&str>) -> String {
    match description {
        None => UNKNOWN_DESCRIPTION.to_owned(),
        Some(raw) => raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase(),
    }
}

/// Case-insensitive substring match on the original description, first rule
/// wins. The rule order matters: "atm payment" is a withdrawal.
fn infer_transaction_type(description: Option<&str>) -> TransactionType {
    let lower = description.unwrap_or_default().to_lowercase();
    if lower.contains("atm") {
        TransactionType::Withdrawal
    } else if lower.contains("payment") {
        TransactionType::Payment
    } else if lower.contains("online transfer") {
        TransactionType::Transfer
    } else {
        TransactionType::PosPurchase
    }
}
