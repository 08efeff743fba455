use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of report days.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        DateRange {
            start: date,
            end: date,
        }
    }
}

/// Identity of one collection run. Every record produced by the run copies the same stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunStamp {
    pub date: NaiveDate,
    pub collected_at: DateTime<Utc>,
}

impl RunStamp {
    pub fn new(date: NaiveDate) -> Self {
        RunStamp {
            date,
            collected_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevenueHourlyRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub platform: String,
    pub application: Option<String>,
    pub package_name: Option<String>,
    pub ad_format: Option<String>,
    pub network: Option<String>,
    pub network_placement: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub max_ad_unit_id: Option<String>,
    pub max_placement: Option<String>,
    pub ad_unit_waterfall_name: Option<String>,
    pub impressions: i64,
    pub estimated_revenue: f64,
    pub ecpm: f64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevenueFillRateRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub platform: String,
    pub application: Option<String>,
    pub package_name: Option<String>,
    pub ad_format: Option<String>,
    pub network: Option<String>,
    pub network_placement: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub max_ad_unit_id: Option<String>,
    pub ad_unit_waterfall_name: Option<String>,
    pub impressions: i64,
    pub estimated_revenue: f64,
    pub ecpm: f64,
    pub attempts: Option<i64>,
    pub responses: Option<i64>,
    pub fill_rate: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpressionRecord {
    pub impression_at: Option<NaiveDateTime>,
    pub ad_unit_id: Option<String>,
    pub ad_unit_name: Option<String>,
    pub waterfall: Option<String>,
    pub ad_format: Option<String>,
    pub placement: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub idfa: Option<String>,
    pub idfv: Option<String>,
    pub user_id: Option<String>,
    pub revenue: f64,
    pub network: Option<String>,
    pub ad_placement: Option<String>,
    pub custom_data: Option<String>,
    pub platform: Platform,
    pub collected_date: NaiveDate,
}
