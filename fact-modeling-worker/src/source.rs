use anyhow::Error;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::types::RawRecord;

/// Read side of the pipeline: an ordered, possibly large sequence of raw
/// records for one bank, consumed as a forward-only cursor so memory stays
/// bounded by the chunk size.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn open(&self, bank_id: &str) -> Result<Box<dyn RecordCursor>, Error>;
}

/// Forward-only, non-restartable cursor. `next_chunk` returns at most
/// `limit` records; an empty vec means the source is exhausted.
#[async_trait]
pub trait RecordCursor: Send {
    async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawRecord>, Error>;
}

/// Keyset-paginated cursor over the raw transactions table. Rows are read in
/// `id` order, so chunks are committed downstream in source-read order.
pub struct PgRecordSource {
    pool: PgPool,
}

impl PgRecordSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn open(&self, bank_id: &str) -> Result<Box<dyn RecordCursor>, Error> {
        Ok(Box::new(PgRecordCursor {
            pool: self.pool.clone(),
            bank_id: bank_id.to_owned(),
            last_id: 0,
        }))
    }
}

struct PgRecordCursor {
    pool: PgPool,
    bank_id: String,
    last_id: i64,
}

#[async_trait]
impl RecordCursor for PgRecordCursor {
    async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawRecord>, Error> {
        let rows: Vec<RawRecord> = sqlx::query_as(
            r#"
            SELECT
                id AS record_id,
                bank_specific_account_id AS account_id,
                transaction_date,
                amount,
                description,
                location_code
            FROM raw_transactions
            WHERE bank_id = $1 AND id > $2
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(&self.bank_id)
        .bind(self.last_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        if let Some(last) = rows.last() {
            self.last_id = last.record_id;
        }

        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory source yielding a fixed record list, for engine tests.
    pub struct MemoryRecordSource {
        records: Vec<RawRecord>,
    }

    impl MemoryRecordSource {
        pub fn new(records: Vec<RawRecord>) -> Self {
            Self { records }
        }
    }

    #[async_trait]
    impl RecordSource for MemoryRecordSource {
        async fn open(&self, _bank_id: &str) -> Result<Box<dyn RecordCursor>, Error> {
            Ok(Box::new(MemoryRecordCursor {
                remaining: self.records.clone().into(),
            }))
        }
    }

    struct MemoryRecordCursor {
        remaining: VecDeque<RawRecord>,
    }

    #[async_trait]
    impl RecordCursor for MemoryRecordCursor {
        async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawRecord>, Error> {
            let take = limit.min(self.remaining.len());
            Ok(self.remaining.drain(..take).collect())
        }
    }

    /// Source whose cursor fails on first read, for run-failure tests.
    pub struct FailingRecordSource;

    #[async_trait]
    impl RecordSource for FailingRecordSource {
        async fn open(&self, _bank_id: &str) -> Result<Box<dyn RecordCursor>, Error> {
            Ok(Box::new(FailingCursor))
        }
    }

    struct FailingCursor;

    #[async_trait]
    impl RecordCursor for FailingCursor {
        async fn next_chunk(&mut self, _limit: usize) -> Result<Vec<RawRecord>, Error> {
            Err(anyhow::anyhow!("source connection lost"))
        }
    }

    pub fn raw_record(record_id: i64, account_id: &str, amount: &str) -> RawRecord {
        RawRecord {
            record_id,
            account_id: account_id.to_string(),
            transaction_date: "2023-10-27 15:30:00".to_string(),
            amount: amount.to_string(),
            description: Some("ATM Withdrawal Toronto".to_string()),
            location_code: Some("L0001".to_string()),
        }
    }
}
