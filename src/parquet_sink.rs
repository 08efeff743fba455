use crate::config::Config;
use crate::error::Error;
use crate::schema::{arrow_schema, Table};
use crate::warehouse::{DeleteOutcome, Partition, Warehouse};
use datafusion::arrow::json::ReaderBuilder;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::SessionContext;
use log::info;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes each table as a directory tree of parquet files, one directory per partition.
///
/// Layout: `<root>/<table>/<date column>=<date>[/platform=<platform>]/part-NNNNN.parquet`.
#[derive(Clone)]
pub struct ParquetWarehouse {
    root: PathBuf,
}

impl ParquetWarehouse {
    pub fn new(config: &Config) -> Self {
        ParquetWarehouse {
            root: PathBuf::from(&config.output_dir),
        }
    }

    fn partition_dir(&self, table: Table, partition: &Partition) -> PathBuf {
        let mut dir = self
            .root
            .join(table.name())
            .join(format!("{}={}", table.date_column(), partition.date.format("%Y-%m-%d")));
        if let Some(platform) = partition.platform {
            dir = dir.join(format!("platform={}", platform));
        }
        dir
    }
}

fn next_part_path(dir: &Path) -> Result<PathBuf, Error> {
    let existing = fs::read_dir(dir)?.count();
    Ok(dir.join(format!("part-{:05}.parquet", existing)))
}

#[async_trait::async_trait]
impl Warehouse for ParquetWarehouse {
    async fn ensure_schema(&self) -> Result<(), Error> {
        for table in Table::ALL {
            fs::create_dir_all(self.root.join(table.name()))?;
        }
        Ok(())
    }

    async fn delete_partition(
        &self,
        table: Table,
        partition: &Partition,
    ) -> Result<DeleteOutcome, Error> {
        let dir = self.partition_dir(table, partition);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            info!("removed partition {}", dir.display());
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_rows(
        &self,
        table: Table,
        partition: &Partition,
        rows: Vec<Value>,
    ) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut decoder = ReaderBuilder::new(arrow_schema(table))
            .with_batch_size(rows.len())
            .build_decoder()?;
        decoder.serialize(&rows)?;
        let Some(batch) = decoder.flush()? else {
            return Ok(());
        };

        let dir = self.partition_dir(table, partition);
        fs::create_dir_all(&dir)?;
        let path = next_part_path(&dir)?;

        let ctx = SessionContext::new();
        ctx.read_batch(batch)?
            .write_parquet(&path.to_string_lossy(), DataFrameWriteOptions::default(), None)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ImpressionRecord, Platform, RevenueFillRateRecord};
    use chrono::{NaiveDate, Utc};
    use datafusion::arrow::array::Array;
    use datafusion::arrow::datatypes::{DataType, TimeUnit};
    use datafusion::prelude::ParquetReadOptions;
    use tempfile::TempDir;

    fn warehouse(temp_dir: &TempDir) -> ParquetWarehouse {
        let config = Config {
            output_dir: temp_dir.path().to_str().unwrap().to_string(),
            ..Config::for_tests()
        };
        ParquetWarehouse::new(&config)
    }

    fn impression(revenue: f64, collected_date: NaiveDate) -> Value {
        serde_json::to_value(ImpressionRecord {
            impression_at: collected_date.and_hms_opt(10, 0, 0),
            ad_unit_id: Some("unit-1".to_string()),
            ad_unit_name: None,
            waterfall: None,
            ad_format: Some("REWARD".to_string()),
            placement: None,
            country: Some("us".to_string()),
            device_type: None,
            idfa: None,
            idfv: None,
            user_id: None,
            revenue,
            network: None,
            ad_placement: None,
            custom_data: None,
            platform: Platform::Android,
            collected_date,
        })
        .unwrap()
    }

    async fn row_count(path: &Path) -> usize {
        let ctx = SessionContext::new();
        let df = ctx
            .read_parquet(path.to_str().unwrap(), ParquetReadOptions::default())
            .await
            .unwrap();
        df.collect()
            .await
            .unwrap()
            .iter()
            .map(|batch| batch.num_rows())
            .sum()
    }

    #[tokio::test]
    async fn test_insert_writes_one_file_per_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = warehouse(&temp_dir);
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let partition = Partition::day_and_platform(date, Platform::Android);

        warehouse.ensure_schema().await.unwrap();
        warehouse
            .insert_rows(Table::Impressions, &partition, vec![impression(0.5, date), impression(0.25, date)])
            .await
            .unwrap();
        warehouse
            .insert_rows(Table::Impressions, &partition, vec![impression(1.0, date)])
            .await
            .unwrap();

        let dir = temp_dir
            .path()
            .join("impressions/collected_date=2024-03-01/platform=android");
        assert_eq!(row_count(&dir.join("part-00000.parquet")).await, 2);
        assert_eq!(row_count(&dir.join("part-00001.parquet")).await, 1);
    }

    fn fill_rate(date: NaiveDate, attempts: Option<i64>, fill_rate: Option<f64>) -> Value {
        serde_json::to_value(RevenueFillRateRecord {
            date,
            hour: 9,
            platform: "android".to_string(),
            application: Some("Demo".to_string()),
            package_name: None,
            ad_format: Some("INTER".to_string()),
            network: None,
            network_placement: None,
            country: None,
            device_type: None,
            max_ad_unit_id: None,
            ad_unit_waterfall_name: None,
            impressions: 640,
            estimated_revenue: 1.234567891,
            ecpm: 1.92,
            attempts,
            responses: attempts,
            fill_rate,
            collected_at: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_fill_rate_rows() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = warehouse(&temp_dir);
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let partition = Partition::day(date);

        warehouse
            .insert_rows(
                Table::RevenueFillRate,
                &partition,
                vec![fill_rate(date, Some(1000), Some(0.64)), fill_rate(date, None, None)],
            )
            .await
            .unwrap();

        let path = temp_dir
            .path()
            .join("revenue_fill_rate/date=2024-03-01/part-00000.parquet");
        let ctx = SessionContext::new();
        let batches = ctx
            .read_parquet(path.to_str().unwrap(), ParquetReadOptions::default())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let rows: usize = batches.iter().map(|batch| batch.num_rows()).sum();
        assert_eq!(rows, 2);

        let batch = &batches[0];
        let schema = batch.schema();
        let collected_at = schema.field_with_name("collected_at").unwrap();
        assert_eq!(
            collected_at.data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
        assert_eq!(batch.column(schema.index_of("collected_at").unwrap()).null_count(), 0);
        assert_eq!(batch.column(schema.index_of("attempts").unwrap()).null_count(), 1);
        assert_eq!(batch.column(schema.index_of("fill_rate").unwrap()).null_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_only_its_partition() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = warehouse(&temp_dir);
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let android = Partition::day_and_platform(date, Platform::Android);
        let ios = Partition::day_and_platform(date, Platform::Ios);

        warehouse
            .insert_rows(Table::Impressions, &android, vec![impression(0.5, date)])
            .await
            .unwrap();
        warehouse
            .insert_rows(Table::Impressions, &ios, vec![impression(0.5, date)])
            .await
            .unwrap();

        let outcome = warehouse
            .delete_partition(Table::Impressions, &android)
            .await
            .unwrap();

        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(!warehouse.partition_dir(Table::Impressions, &android).exists());
        assert!(warehouse.partition_dir(Table::Impressions, &ios).exists());
    }

    #[tokio::test]
    async fn test_delete_missing_partition_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = warehouse(&temp_dir);
        let partition = Partition::day(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let outcome = warehouse
            .delete_partition(Table::RevenueHourly, &partition)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }
}
