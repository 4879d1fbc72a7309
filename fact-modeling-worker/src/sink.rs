use anyhow::Error;
use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use crate::types::FactRecord;

/// Write side of the pipeline. A chunk commits atomically: either every fact
/// in it becomes visible or none does.
#[async_trait]
pub trait FactSink: Send + Sync {
    async fn write_chunk(&self, facts: &[FactRecord]) -> Result<(), Error>;
}

/// Inserts a chunk into the fact table inside a single transaction. The
/// surrogate key is the table's BIGSERIAL; invalid rows never reach this
/// point, so `valid` is written as-is.
pub struct PgFactSink {
    pool: PgPool,
}

impl PgFactSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactSink for PgFactSink {
    async fn write_chunk(&self, facts: &[FactRecord]) -> Result<(), Error> {
        if facts.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(
            "INSERT INTO fact_transactions \
             (bank_id, customer_id, transaction_time, amount_standard, \
              description_standard, location_code, transaction_type, category, is_valid) ",
        );
        builder.push_values(facts, |mut row, fact| {
            row.push_bind(&fact.bank_id)
                .push_bind(&fact.customer_id)
                .push_bind(fact.transaction_time)
                .push_bind(fact.amount)
                .push_bind(&fact.description)
                .push_bind(&fact.location_code)
                .push_bind(fact.transaction_type.as_str())
                .push_bind(fact.category.as_str())
                .push_bind(fact.valid);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory sink recording committed chunks; can be told to fail on a
    /// given chunk index to exercise chunk atomicity.
    #[derive(Default)]
    pub struct MemoryFactSink {
        committed: Mutex<Vec<Vec<FactRecord>>>,
        writes: AtomicUsize,
        fail_on_chunk: Option<usize>,
    }

    impl MemoryFactSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing_on_chunk(index: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_on_chunk: Some(index),
                ..Self::default()
            })
        }

        pub fn committed_chunks(&self) -> Vec<Vec<FactRecord>> {
            self.committed.lock().unwrap().clone()
        }

        pub fn committed_rows(&self) -> usize {
            self.committed.lock().unwrap().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl FactSink for MemoryFactSink {
        async fn write_chunk(&self, facts: &[FactRecord]) -> Result<(), Error> {
            let index = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_chunk == Some(index) {
                return Err(anyhow::anyhow!("simulated commit failure"));
            }
            self.committed.lock().unwrap().push(facts.to_vec());
            Ok(())
        }
    }
}
