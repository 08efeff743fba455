use crate::api_client::ReportApi;
use crate::error::Error;
use crate::records::{DateRange, Platform, RunStamp};
use crate::schema::Table;
use crate::warehouse::{insert_batched, DeleteOutcome, Partition, Warehouse};
use chrono::NaiveDate;
use futures::TryStreamExt;
use log::{error, info, warn};
use serde::Serialize;

/// Outcome of one collect-then-load flow.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(into = "FlowResult")]
pub enum FlowOutcome {
    Loaded { count: usize },
    /// The partition could not be cleared, so nothing was loaded.
    Skipped { reason: String },
    Failed { error: String },
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlowOutcome::Loaded { .. })
    }
}

/// Wire shape of a flow outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowResult {
    pub success: bool,
    pub count: usize,
    pub error: Option<String>,
}

impl From<FlowOutcome> for FlowResult {
    fn from(outcome: FlowOutcome) -> Self {
        match outcome {
            FlowOutcome::Loaded { count } => FlowResult {
                success: true,
                count,
                error: None,
            },
            FlowOutcome::Skipped { reason } => FlowResult {
                success: false,
                count: 0,
                error: Some(reason),
            },
            FlowOutcome::Failed { error } => FlowResult {
                success: false,
                count: 0,
                error: Some(error),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpressionSummary {
    pub android: FlowOutcome,
    pub ios: FlowOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub revenue_hourly: FlowOutcome,
    pub revenue_fill_rate: FlowOutcome,
    pub impressions: ImpressionSummary,
}

impl CollectionSummary {
    fn all(outcome: FlowOutcome) -> Self {
        CollectionSummary {
            revenue_hourly: outcome.clone(),
            revenue_fill_rate: outcome.clone(),
            impressions: ImpressionSummary {
                android: outcome.clone(),
                ios: outcome,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        [
            &self.revenue_hourly,
            &self.revenue_fill_rate,
            &self.impressions.android,
            &self.impressions.ios,
        ]
        .iter()
        .all(|outcome| outcome.is_success())
    }
}

/// Lists every day from `start` to `end`, both included.
pub fn days_between(start: &NaiveDate, end: &NaiveDate) -> Result<Vec<NaiveDate>, Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    Ok(start.iter_days().take_while(|day| day <= end).collect())
}

/// Runs the four collection flows for `date` one after another.
///
/// A failing flow never stops the others; its error ends up in the summary instead.
pub async fn collect<A, W>(
    api: &A,
    warehouse: &W,
    date: NaiveDate,
    batch_size: usize,
) -> CollectionSummary
where
    A: ReportApi + ?Sized,
    W: Warehouse + ?Sized,
{
    let stamp = RunStamp::new(date);
    info!("collecting {} (run at {})", date, stamp.collected_at);

    if let Err(err) = warehouse.ensure_schema().await {
        error!("failed to ensure warehouse schema: {}", err);
        return CollectionSummary::all(FlowOutcome::Failed {
            error: err.to_string(),
        });
    }

    let revenue_hourly = settle(
        "revenue hourly",
        revenue_hourly_flow(api, warehouse, stamp, batch_size).await,
    );
    let revenue_fill_rate = settle(
        "revenue fill rate",
        revenue_fill_rate_flow(api, warehouse, stamp, batch_size).await,
    );
    let android = settle(
        "android impressions",
        impressions_flow(api, warehouse, stamp, Platform::Android, batch_size).await,
    );
    let ios = settle(
        "ios impressions",
        impressions_flow(api, warehouse, stamp, Platform::Ios, batch_size).await,
    );

    CollectionSummary {
        revenue_hourly,
        revenue_fill_rate,
        impressions: ImpressionSummary { android, ios },
    }
}

fn settle(flow: &str, result: Result<FlowOutcome, Error>) -> FlowOutcome {
    match result {
        Ok(outcome) => {
            info!("{} flow finished: {:?}", flow, outcome);
            outcome
        }
        Err(err) => {
            error!("{} flow failed: {}", flow, err);
            FlowOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// Clears the partition before it is loaded again.
///
/// # Returns
/// `Some(Skipped)` when the warehouse refused the delete and the load must not happen.
async fn clear_partition<W>(
    warehouse: &W,
    table: Table,
    partition: &Partition,
) -> Result<Option<FlowOutcome>, Error>
where
    W: Warehouse + ?Sized,
{
    match warehouse.delete_partition(table, partition).await? {
        DeleteOutcome::Deleted => Ok(None),
        DeleteOutcome::SkippedBuffered { reason } => {
            warn!("skipping load of {} for {}: {}", table, partition.date, reason);
            Ok(Some(FlowOutcome::Skipped {
                reason: format!(
                    "skipped: rows of {} for {} are still in the streaming buffer ({})",
                    table, partition.date, reason
                ),
            }))
        }
    }
}

async fn revenue_hourly_flow<A, W>(
    api: &A,
    warehouse: &W,
    stamp: RunStamp,
    batch_size: usize,
) -> Result<FlowOutcome, Error>
where
    A: ReportApi + ?Sized,
    W: Warehouse + ?Sized,
{
    let table = Table::RevenueHourly;
    let partition = Partition::day(stamp.date);
    if let Some(skipped) = clear_partition(warehouse, table, &partition).await? {
        return Ok(skipped);
    }

    let records = api
        .fetch_revenue_hourly(DateRange::single(stamp.date), stamp)
        .await?;
    let count = insert_batched(warehouse, table, &partition, &records, batch_size).await?;

    Ok(FlowOutcome::Loaded { count })
}

async fn revenue_fill_rate_flow<A, W>(
    api: &A,
    warehouse: &W,
    stamp: RunStamp,
    batch_size: usize,
) -> Result<FlowOutcome, Error>
where
    A: ReportApi + ?Sized,
    W: Warehouse + ?Sized,
{
    let table = Table::RevenueFillRate;
    let partition = Partition::day(stamp.date);
    if let Some(skipped) = clear_partition(warehouse, table, &partition).await? {
        return Ok(skipped);
    }

    let records = api
        .fetch_revenue_fill_rate(DateRange::single(stamp.date), stamp)
        .await?;
    let count = insert_batched(warehouse, table, &partition, &records, batch_size).await?;

    Ok(FlowOutcome::Loaded { count })
}

async fn impressions_flow<A, W>(
    api: &A,
    warehouse: &W,
    stamp: RunStamp,
    platform: Platform,
    batch_size: usize,
) -> Result<FlowOutcome, Error>
where
    A: ReportApi + ?Sized,
    W: Warehouse + ?Sized,
{
    let table = Table::Impressions;
    let partition = Partition::day_and_platform(stamp.date, platform);
    if let Some(skipped) = clear_partition(warehouse, table, &partition).await? {
        return Ok(skipped);
    }

    let mut batches = api
        .fetch_impression_stream(stamp, platform, batch_size)
        .await?;

    let mut count = 0;
    while let Some(batch) = batches.try_next().await? {
        count += insert_batched(warehouse, table, &partition, &batch, batch_size).await?;
    }

    Ok(FlowOutcome::Loaded { count })
}
