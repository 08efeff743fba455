use clap::{Args as ClapArgs, ValueEnum};

const DEFAULT_API_URL: &str = "https://r.applovin.com";
const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_DATASET: &str = "max_revenue";
const OUTPUT_DIR: &str = "./warehouse";
const BATCH_SIZE: &str = "5000";

/// Where normalized records are loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Sink {
    #[value(name = "bigquery")]
    BigQuery,
    Parquet,
}

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "MAX_API_URL")]
    pub(crate) api_url: String,

    #[arg(long, env = "MAX_API_KEY", hide_env_values = true)]
    pub(crate) api_key: String,

    #[arg(long, env = "ANDROID_PACKAGE_NAME")]
    pub(crate) android_package: String,

    #[arg(long, env = "IOS_PACKAGE_NAME")]
    pub(crate) ios_package: String,

    #[arg(long, value_enum, default_value_t = Sink::BigQuery, env = "WAREHOUSE_SINK")]
    pub(crate) sink: Sink,

    #[arg(long, default_value = "", env = "GCP_PROJECT_ID")]
    pub(crate) project_id: String,

    #[arg(long, default_value = DEFAULT_DATASET, env = "BIGQUERY_DATASET")]
    pub(crate) dataset: String,

    #[arg(long, default_value = DEFAULT_BIGQUERY_URL, env = "BIGQUERY_URL")]
    pub(crate) bigquery_url: String,

    #[arg(long, default_value = "", env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) bigquery_token: String,

    #[arg(long, default_value = OUTPUT_DIR, env = "OUTPUT_DIR")]
    pub(crate) output_dir: String,

    /// Rows per streamed batch and per insert request; 5000 keeps an insert under the
    /// streaming-insert request size limit.
    #[arg(long, default_value = BATCH_SIZE, env = "BATCH_SIZE")]
    pub(crate) batch_size: usize,
}

impl Config {
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Config {
            api_url: String::from("https://api.example.com"),
            api_key: String::from("test_key"),
            android_package: String::from("com.example.game"),
            ios_package: String::from("id123456789"),
            sink: Sink::Parquet,
            project_id: String::from("test-project"),
            dataset: String::from("max_revenue"),
            bigquery_url: String::from("https://bigquery.example.com"),
            bigquery_token: String::from("test_token"),
            output_dir: String::from("/path/to/output"),
            batch_size: 5000,
        }
    }
}
