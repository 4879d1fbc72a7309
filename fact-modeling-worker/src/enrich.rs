use thiserror::Error;
use tracing::warn;

use crate::error::RejectReason;
use crate::identity::IdentityResolver;
use crate::types::{Category, FactRecord, HarmonizedRecord};

/// A record-local rejection and a store failure are different animals: the
/// first is counted and skipped, the second is fatal to the run.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error("identity store lookup failed: {0}")]
    Store(#[source] anyhow::Error),
}

/// Resolve the record's identity through the per-run cache and assemble the
/// fact row. The harmonized record is consumed; on rejection it yields no
/// output at all.
pub async fn enrich(
    resolver: &mut IdentityResolver,
    bank_id: &str,
    record: HarmonizedRecord,
) -> Result<FactRecord, EnrichError> {
    if record.account_id.is_empty() {
        // No lookup attempted for an empty account id
        return Err(RejectReason::MissingAccountId.into());
    }

    let customer_id = match resolver
        .resolve(&record.account_id)
        .await
        .map_err(EnrichError::Store)?
    {
        Some(customer_id) => customer_id,
        None => {
            warn!(
                account_id = %record.account_id,
                "no unified customer id for account, rejecting record"
            );
            return Err(RejectReason::UnresolvedIdentity(record.account_id).into());
        }
    };

    Ok(FactRecord {
        bank_id: bank_id.to_owned(),
        customer_id,
        transaction_time: record.transaction_time,
        amount: record.amount,
        category: categorize(&record.description),
        description: record.description,
        location_code: record.location_code,
        transaction_type: record.transaction_type,
        valid: true,
    })
}

/// Fixed keyword-to-category mapping, first match wins. Matching is done on
/// the normalized (uppercased) description, so compare case-insensitively.
fn categorize(description: &str) -> Category {
    let lower = description.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if contains_any(&["utility", "hydro", "bell", "rogers"]) {
        Category::Utilities
    } else if contains_any(&["groceries", "supermarket", "costco"]) {
        Category::Groceries
    } else if contains_any(&["gas", "petrol", "shell"]) {
        Category::Transport
    } else if contains_any(&["online", "amazon", "purchase"]) {
        Category::Shopping
    } else if contains_any(&["dinner", "restaurant"]) {
        Category::Dining
    } else {
        Category::Other
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDateTime;
    use rust_decimal::Decimal;

    use super::*;
    use crate::identity::test_support::MemoryIdentityStore;
    use crate::types::TransactionType;

    fn harmonized(account_id: &str) -> HarmonizedRecord {
        HarmonizedRecord {
            account_id: account_id.to_string(),
            transaction_time: NaiveDateTime::parse_from_str(
                "2023-10-27 15:30:00",
                "%Y-%m-%d %H:%M:%S",
            )
            .unwrap(),
            amount: Decimal::new(15075, 2),
            description: "ATM WITHDRAWAL TORONTO".to_string(),
            transaction_type: TransactionType::Withdrawal,
            location_code: Some("L0001".to_string()),
            valid: true,
        }
    }

    #[tokio::test]
    async fn enriches_with_the_mapped_customer_id() {
        let store = Arc::new(MemoryIdentityStore::with_mappings(&[("ACC123", "U_42")]));
        let mut resolver = IdentityResolver::new(store);

        let fact = enrich(&mut resolver, "BANK_A", harmonized("ACC123"))
            .await
            .unwrap();
        assert_eq!(fact.customer_id, "U_42");
        assert_eq!(fact.bank_id, "BANK_A");
        assert_eq!(fact.amount, Decimal::new(15075, 2));
        assert_eq!(fact.category, Category::Other);
        assert!(fact.valid);
    }

    #[tokio::test]
    async fn rejects_empty_account_id_without_lookup() {
        let store = Arc::new(MemoryIdentityStore::default());
        let mut resolver = IdentityResolver::new(store.clone());

        let result = enrich(&mut resolver, "BANK_A", harmonized("")).await;
        assert!(matches!(
            result,
            Err(EnrichError::Rejected(RejectReason::MissingAccountId))
        ));
        assert_eq!(store.lookup_count(), 0);
    }

    #[tokio::test]
    async fn rejects_unresolved_identity() {
        let store = Arc::new(MemoryIdentityStore::default());
        let mut resolver = IdentityResolver::new(store);

        let result = enrich(&mut resolver, "BANK_A", harmonized("ACC404")).await;
        assert!(matches!(
            result,
            Err(EnrichError::Rejected(RejectReason::UnresolvedIdentity(id))) if id == "ACC404"
        ));
    }

    #[tokio::test]
    async fn shared_account_id_is_looked_up_once_per_run() {
        let store = Arc::new(MemoryIdentityStore::with_mappings(&[("ACC123", "U_42")]));
        let mut resolver = IdentityResolver::new(store.clone());

        for _ in 0..3 {
            enrich(&mut resolver, "BANK_A", harmonized("ACC123"))
                .await
                .unwrap();
        }
        assert_eq!(store.lookup_count(), 1);
    }

    #[test]
    fn category_keywords() {
        assert_eq!(categorize("HYDRO ONE BILLING"), Category::Utilities);
        assert_eq!(categorize("COSTCO WHOLESALE"), Category::Groceries);
        assert_eq!(categorize("SHELL STATION 33"), Category::Transport);
        assert_eq!(categorize("AMAZON MARKETPLACE"), Category::Shopping);
        assert_eq!(categorize("DINNER DOWNTOWN"), Category::Dining);
        assert_eq!(categorize("ATM WITHDRAWAL TORONTO"), Category::Other);
    }
}
