use crate::error::Error;
use crate::records::Platform;
use crate::schema::Table;
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use serde_json::Value;

/// Key of the slice of a table that one flow replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub date: NaiveDate,
    pub platform: Option<Platform>,
}

impl Partition {
    pub fn day(date: NaiveDate) -> Self {
        Partition {
            date,
            platform: None,
        }
    }

    pub fn day_and_platform(date: NaiveDate, platform: Platform) -> Self {
        Partition {
            date,
            platform: Some(platform),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The partition still holds rows the warehouse will not mutate yet. Inserting on top of them
    /// would duplicate data, so the caller must not load this partition in the current run.
    SkippedBuffered { reason: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Creates the dataset and the target tables when they are missing.
    async fn ensure_schema(&self) -> Result<(), Error>;

    /// Removes previously loaded rows of a partition.
    async fn delete_partition(
        &self,
        table: Table,
        partition: &Partition,
    ) -> Result<DeleteOutcome, Error>;

    /// Appends one chunk of rows belonging to `partition`.
    async fn insert_rows(
        &self,
        table: Table,
        partition: &Partition,
        rows: Vec<Value>,
    ) -> Result<(), Error>;
}

/// Inserts `records` in sequential chunks of at most `batch_size` rows.
///
/// # Returns
/// The number of rows inserted. An empty input issues no request.
pub async fn insert_batched<W, R>(
    warehouse: &W,
    table: Table,
    partition: &Partition,
    records: &[R],
    batch_size: usize,
) -> Result<usize, Error>
where
    W: Warehouse + ?Sized,
    R: Serialize,
{
    if records.is_empty() {
        return Ok(0);
    }

    let batch_size = batch_size.max(1);
    let chunks = records.len().div_ceil(batch_size);
    let mut inserted = 0;

    for (index, chunk) in records.chunks(batch_size).enumerate() {
        let rows = chunk
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        warehouse.insert_rows(table, partition, rows).await?;
        inserted += chunk.len();

        info!(
            "inserted chunk {}/{} ({} rows) into {}",
            index + 1,
            chunks,
            chunk.len(),
            table
        );
    }

    info!("inserted {} rows into {} for {}", inserted, table, partition.date);

    Ok(inserted)
}
