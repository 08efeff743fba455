//! Mapping of loosely typed report rows into the warehouse record types.
//!
//! Nothing in here fails: a missing or unparsable optional value becomes `None`, a missing
//! required number becomes `0`.

use crate::records::{ImpressionRecord, Platform, RevenueFillRateRecord, RevenueHourlyRecord, RunStamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

/// One row of an aggregate JSON report.
pub type JsonRow = serde_json::Map<String, Value>;

/// One row of the impression CSV report, keyed by header name.
pub type CsvRow = HashMap<String, String>;

const DECIMAL_SCALE: f64 = 1_000_000_000.0;

/// Rounds to the 9 fractional digits a `NUMERIC` column stores.
pub fn round_decimal(value: f64) -> f64 {
    (value * DECIMAL_SCALE).round() / DECIMAL_SCALE
}

pub fn normalize_revenue_hourly(row: &JsonRow, stamp: &RunStamp) -> RevenueHourlyRecord {
    RevenueHourlyRecord {
        date: report_day(row, stamp),
        hour: parse_hour(json_text(row, "hour")),
        platform: json_text(row, "platform").unwrap_or_else(|| "unknown".to_string()),
        application: json_text(row, "application"),
        package_name: json_text(row, "package_name"),
        ad_format: json_text(row, "ad_format"),
        network: json_text(row, "network"),
        network_placement: json_text(row, "network_placement"),
        country: json_text(row, "country"),
        device_type: json_text(row, "device_type"),
        max_ad_unit_id: json_text(row, "max_ad_unit_id"),
        max_placement: json_text(row, "max_placement"),
        ad_unit_waterfall_name: json_text(row, "ad_unit_waterfall_name"),
        impressions: parse_int("impressions", json_text(row, "impressions"))
            .filter(|impressions| *impressions >= 0)
            .unwrap_or(0),
        estimated_revenue: parse_decimal("estimated_revenue", json_text(row, "estimated_revenue"))
            .unwrap_or(0.0),
        ecpm: parse_decimal("ecpm", json_text(row, "ecpm")).unwrap_or(0.0),
        collected_at: stamp.collected_at,
    }
}

pub fn normalize_revenue_fill_rate(row: &JsonRow, stamp: &RunStamp) -> RevenueFillRateRecord {
    RevenueFillRateRecord {
        date: report_day(row, stamp),
        hour: parse_hour(json_text(row, "hour")),
        platform: json_text(row, "platform").unwrap_or_else(|| "unknown".to_string()),
        application: json_text(row, "application"),
        package_name: json_text(row, "package_name"),
        ad_format: json_text(row, "ad_format"),
        network: json_text(row, "network"),
        network_placement: json_text(row, "network_placement"),
        country: json_text(row, "country"),
        device_type: json_text(row, "device_type"),
        max_ad_unit_id: json_text(row, "max_ad_unit_id"),
        ad_unit_waterfall_name: json_text(row, "ad_unit_waterfall_name"),
        impressions: parse_int("impressions", json_text(row, "impressions"))
            .filter(|impressions| *impressions >= 0)
            .unwrap_or(0),
        estimated_revenue: parse_decimal("estimated_revenue", json_text(row, "estimated_revenue"))
            .unwrap_or(0.0),
        ecpm: parse_decimal("ecpm", json_text(row, "ecpm")).unwrap_or(0.0),
        attempts: parse_int("attempts", json_text(row, "attempts")),
        responses: parse_int("responses", json_text(row, "responses")),
        fill_rate: parse_decimal("fill_rate", json_text(row, "fill_rate")),
        collected_at: stamp.collected_at,
    }
}

pub fn normalize_impression(row: &CsvRow, platform: Platform, stamp: &RunStamp) -> ImpressionRecord {
    ImpressionRecord {
        impression_at: parse_timestamp(csv_text(row, "Date")),
        ad_unit_id: csv_text(row, "Ad Unit ID"),
        ad_unit_name: csv_text(row, "Ad Unit Name"),
        waterfall: csv_text(row, "Waterfall"),
        ad_format: csv_text(row, "Ad Format"),
        placement: csv_text(row, "Placement"),
        country: csv_text(row, "Country"),
        device_type: csv_text(row, "Device Type"),
        idfa: csv_text(row, "IDFA"),
        idfv: csv_text(row, "IDFV"),
        user_id: csv_text(row, "User ID"),
        revenue: parse_decimal("Revenue", csv_text(row, "Revenue"))
            .filter(|revenue| *revenue >= 0.0)
            .unwrap_or(0.0),
        network: csv_text(row, "Network"),
        ad_placement: csv_text(row, "Ad Placement"),
        custom_data: csv_text(row, "Custom Data"),
        platform,
        collected_date: stamp.date,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn json_text(row: &JsonRow, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn csv_text(row: &CsvRow, key: &str) -> Option<String> {
    row.get(key).and_then(|value| non_empty(value))
}

fn report_day(row: &JsonRow, stamp: &RunStamp) -> NaiveDate {
    json_text(row, "day")
        .and_then(|day| NaiveDate::parse_from_str(&day, "%Y-%m-%d").ok())
        .unwrap_or(stamp.date)
}

/// `"14:00"` is hour 14. Anything unreadable is hour 0.
fn parse_hour(raw: Option<String>) -> u32 {
    raw.as_deref()
        .and_then(|value| value.split(':').next())
        .and_then(|hour| hour.trim().parse::<u32>().ok())
        .filter(|hour| *hour < 24)
        .unwrap_or(0)
}

fn parse_int(field: &str, raw: Option<String>) -> Option<i64> {
    let raw = raw?;
    let parsed = raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i64)
    });
    if parsed.is_none() {
        debug!("ignoring malformed {} value {:?}", field, raw);
    }
    parsed
}

fn parse_decimal(field: &str, raw: Option<String>) -> Option<f64> {
    let raw = raw?;
    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(round_decimal);
    if parsed.is_none() {
        debug!("ignoring malformed {} value {:?}", field, raw);
    }
    parsed
}

fn parse_timestamp(raw: Option<String>) -> Option<NaiveDateTime> {
    let raw = raw?;
    let parsed = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|ts| ts.naive_utc())
        });
    if parsed.is_none() {
        debug!("ignoring malformed impression time {:?}", raw);
    }
    parsed
}
