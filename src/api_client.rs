use crate::config::Config;
use crate::csv_stream::csv_batches;
use crate::error::Error;
use crate::normalize::{
    normalize_impression, normalize_revenue_fill_rate, normalize_revenue_hourly, JsonRow,
};
use crate::records::{
    DateRange, ImpressionRecord, Platform, RevenueFillRateRecord, RevenueHourlyRecord, RunStamp,
};
use futures::stream::{self, BoxStream, StreamExt};
use log::{info, warn};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;

/// Lazy sequence of normalized impression batches.
pub type ImpressionStream = BoxStream<'static, Result<Vec<ImpressionRecord>, Error>>;

/// Application code signalling a successful report.
const SUCCESS_CODE: i64 = 200;

/// Status of the impression report endpoint while the day's report has not been generated yet.
const NOT_READY_CODE: i64 = 404;

const DIMENSIONS: &[&str] = &[
    "day",
    "hour",
    "platform",
    "application",
    "package_name",
    "ad_format",
    "network",
    "network_placement",
    "country",
    "device_type",
    "max_ad_unit_id",
    "ad_unit_waterfall_name",
];

const METRICS: &[&str] = &["impressions", "estimated_revenue", "ecpm"];

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportApi: Send + Sync + 'static {
    /// Fetches the hourly revenue report, broken down by MAX placement.
    async fn fetch_revenue_hourly(
        &self,
        range: DateRange,
        stamp: RunStamp,
    ) -> Result<Vec<RevenueHourlyRecord>, Error>;

    /// Fetches the hourly revenue report with fill-rate metrics.
    async fn fetch_revenue_fill_rate(
        &self,
        range: DateRange,
        stamp: RunStamp,
    ) -> Result<Vec<RevenueFillRateRecord>, Error>;

    /// Opens the per-impression report of one platform for `stamp.date`.
    ///
    /// # Returns
    /// A stream of batches of at most `batch_size` records. When the report has no download
    /// link the stream is empty.
    async fn fetch_impression_stream(
        &self,
        stamp: RunStamp,
        platform: Platform,
        batch_size: usize,
    ) -> Result<ImpressionStream, Error>;
}

/// Column sets of the aggregate report. The upstream API refuses to combine `max_placement` with
/// the fill-rate metrics in one query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnSet {
    MaxPlacement,
    FillRate,
}

impl ColumnSet {
    pub fn columns(&self) -> String {
        let extra: &[&str] = match self {
            ColumnSet::MaxPlacement => &["max_placement"],
            ColumnSet::FillRate => &["attempts", "responses", "fill_rate"],
        };
        DIMENSIONS
            .iter()
            .chain(METRICS)
            .chain(extra)
            .copied()
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Deserialize, Debug)]
struct AggregateReport {
    code: i64,
    #[serde(default)]
    count: i64,
    #[serde(default)]
    results: Vec<JsonRow>,
}

#[derive(Deserialize, Debug)]
struct ImpressionReportStatus {
    status: i64,
    url: Option<String>,
    ad_revenue_report_url: Option<String>,
    report_url: Option<String>,
}

impl ImpressionReportStatus {
    fn download_url(self) -> Option<String> {
        [self.url, self.ad_revenue_report_url, self.report_url]
            .into_iter()
            .flatten()
            .find(|url| !url.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    android_package: String,
    ios_package: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        ApiClient {
            client: Client::new(),
            base_url: config.api_url.to_string(),
            api_key: config.api_key.to_string(),
            android_package: config.android_package.to_string(),
            ios_package: config.ios_package.to_string(),
        }
    }

    fn package(&self, platform: Platform) -> &str {
        match platform {
            Platform::Android => &self.android_package,
            Platform::Ios => &self.ios_package,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_aggregate_report(
        &self,
        range: DateRange,
        columns: ColumnSet,
    ) -> Result<Vec<JsonRow>, Error> {
        let mut url = self.endpoint(&["maxReport"])?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("start", &range.start.format("%Y-%m-%d").to_string())
            .append_pair("end", &range.end.format("%Y-%m-%d").to_string())
            .append_pair("columns", &columns.columns())
            .append_pair("format", "json");

        let resp = self.client.get(url).send().await?;
        let body = success_body(resp).await?;
        let report = parse_aggregate_report(&body)?;

        info!(
            "fetched {} {:?} report rows for {} to {}",
            report.count, columns, range.start, range.end
        );

        Ok(report.results)
    }

    async fn resolve_impression_url(
        &self,
        stamp: &RunStamp,
        platform: Platform,
    ) -> Result<Option<String>, Error> {
        let mut url = self.endpoint(&["max", "userAdRevenueReport"])?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("date", &stamp.date.format("%Y-%m-%d").to_string())
            .append_pair("platform", platform.as_str())
            .append_pair("application", self.package(platform));

        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = success_body(resp).await?;

        parse_impression_status(&body)
    }
}

/// Returns the body of a 2xx response, or the status and body as an error.
async fn success_body(resp: Response) -> Result<String, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(Error::UpstreamStatus {
            status: status.as_u16(),
            body,
        });
    }

    Ok(body)
}

fn parse_aggregate_report(body: &str) -> Result<AggregateReport, Error> {
    let report: AggregateReport = serde_json::from_str(body)?;

    if report.code != SUCCESS_CODE {
        return Err(Error::UpstreamCode {
            code: report.code,
            body: body.to_string(),
        });
    }

    Ok(report)
}

/// Extracts the download link of the impression report.
///
/// # Returns
/// `None` when the report is not available (yet); that is not an error.
fn parse_impression_status(body: &str) -> Result<Option<String>, Error> {
    let status: ImpressionReportStatus = serde_json::from_str(body)?;
    let code = status.status;

    match code {
        SUCCESS_CODE => Ok(status.download_url()),
        NOT_READY_CODE => Ok(None),
        code => Err(Error::UpstreamCode {
            code,
            body: body.to_string(),
        }),
    }
}

#[async_trait::async_trait]
impl ReportApi for ApiClient {
    async fn fetch_revenue_hourly(
        &self,
        range: DateRange,
        stamp: RunStamp,
    ) -> Result<Vec<RevenueHourlyRecord>, Error> {
        let rows = self
            .fetch_aggregate_report(range, ColumnSet::MaxPlacement)
            .await?;

        Ok(rows
            .iter()
            .map(|row| normalize_revenue_hourly(row, &stamp))
            .collect())
    }

    async fn fetch_revenue_fill_rate(
        &self,
        range: DateRange,
        stamp: RunStamp,
    ) -> Result<Vec<RevenueFillRateRecord>, Error> {
        let rows = self
            .fetch_aggregate_report(range, ColumnSet::FillRate)
            .await?;

        Ok(rows
            .iter()
            .map(|row| normalize_revenue_fill_rate(row, &stamp))
            .collect())
    }

    async fn fetch_impression_stream(
        &self,
        stamp: RunStamp,
        platform: Platform,
        batch_size: usize,
    ) -> Result<ImpressionStream, Error> {
        let Some(download_url) = self.resolve_impression_url(&stamp, platform).await? else {
            warn!("no {} impression report available for {}", platform, stamp.date);
            return Ok(stream::empty().boxed());
        };

        let resp = self.client.get(download_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        info!("streaming {} impression report for {}", platform, stamp.date);

        Ok(csv_batches(resp.bytes_stream(), batch_size, move |row| {
            normalize_impression(&row, platform, &stamp)
        }))
    }
}
