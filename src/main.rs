mod api_client;
mod bigquery;
mod config;
mod csv_stream;
mod error;
mod normalize;
mod parquet_sink;
mod records;
mod runner;
mod schema;
mod warehouse;

use api_client::ApiClient;
use bigquery::BigQueryWarehouse;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use config::{Config, Sink};
use error::Error;
use log::{error, info};
use parquet_sink::ParquetWarehouse;
use warehouse::Warehouse;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collects one day of revenue and impression data.
    Collect {
        #[arg(long, help = "Date should be in the form YYYY-MM-DD, defaults to yesterday (UTC)", value_parser = validate_date)]
        date: Option<NaiveDate>,
    },
    /// Collects every day of an inclusive date range, oldest first.
    Backfill {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    let dates = match &args.command {
        Command::Collect { date } => {
            vec![date.unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1))]
        }
        Command::Backfill { start, end } => match runner::days_between(start, end) {
            Ok(dates) => dates,
            Err(err) => {
                error!("invalid backfill range: {}", err);
                std::process::exit(1);
            }
        },
    };

    let api = ApiClient::new(&args.config);
    let warehouse: Box<dyn Warehouse> = match args.config.sink {
        Sink::BigQuery => Box::new(BigQueryWarehouse::new(&args.config)),
        Sink::Parquet => Box::new(ParquetWarehouse::new(&args.config)),
    };

    let mut all_succeeded = true;
    for date in dates {
        let summary = runner::collect(&api, warehouse.as_ref(), date, args.config.batch_size()).await;
        all_succeeded &= summary.is_success();
        info!("collection for {} finished, success: {}", date, summary.is_success());
        println!("{}", serde_json::to_string(&summary)?);
    }

    if !all_succeeded {
        error!("one or more collection flows did not load");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_date() {
        assert_eq!(
            validate_date("2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(validate_date("2024-02-30").is_err());
        assert!(validate_date("2024-13-01").is_err());
        assert!(validate_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_collect_command() {
        let args = Args::try_parse_from([
            "max-revenue-collector",
            "--api-key",
            "key",
            "--android-package",
            "com.example.game",
            "--ios-package",
            "id123",
            "--sink",
            "parquet",
            "collect",
            "--date",
            "2024-03-01",
        ])
        .unwrap();

        assert_eq!(args.config.sink, Sink::Parquet);
        assert_eq!(args.config.batch_size(), 5000);
        assert!(matches!(
            args.command,
            Command::Collect { date: Some(date) } if date == NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        ));
    }
}
