use datafusion::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    RevenueHourly,
    RevenueFillRate,
    Impressions,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::RevenueHourly, Table::RevenueFillRate, Table::Impressions];

    pub fn name(&self) -> &'static str {
        match self {
            Table::RevenueHourly => "revenue_hourly",
            Table::RevenueFillRate => "revenue_fill_rate",
            Table::Impressions => "impressions",
        }
    }

    /// Column the table is day-partitioned on.
    pub fn date_column(&self) -> &'static str {
        match self {
            Table::RevenueHourly | Table::RevenueFillRate => "date",
            Table::Impressions => "collected_date",
        }
    }

    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::RevenueHourly => REVENUE_HOURLY,
            Table::RevenueFillRate => REVENUE_FILL_RATE,
            Table::Impressions => IMPRESSIONS,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    /// Fixed point with 9 fractional digits.
    Numeric,
    Date,
    /// Civil time without zone.
    DateTime,
    Timestamp,
}

impl ColumnType {
    pub fn bigquery_type(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INT64",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::String => DataType::Utf8,
            ColumnType::Integer => DataType::Int64,
            ColumnType::Numeric => DataType::Float64,
            ColumnType::Date => DataType::Date32,
            ColumnType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub required: bool,
}

const fn required(name: &'static str, kind: ColumnType) -> Column {
    Column {
        name,
        kind,
        required: true,
    }
}

const fn nullable(name: &'static str, kind: ColumnType) -> Column {
    Column {
        name,
        kind,
        required: false,
    }
}

const REVENUE_HOURLY: &[Column] = &[
    required("date", ColumnType::Date),
    required("hour", ColumnType::Integer),
    required("platform", ColumnType::String),
    nullable("application", ColumnType::String),
    nullable("package_name", ColumnType::String),
    nullable("ad_format", ColumnType::String),
    nullable("network", ColumnType::String),
    nullable("network_placement", ColumnType::String),
    nullable("country", ColumnType::String),
    nullable("device_type", ColumnType::String),
    nullable("max_ad_unit_id", ColumnType::String),
    nullable("max_placement", ColumnType::String),
    nullable("ad_unit_waterfall_name", ColumnType::String),
    required("impressions", ColumnType::Integer),
    required("estimated_revenue", ColumnType::Numeric),
    required("ecpm", ColumnType::Numeric),
    required("collected_at", ColumnType::Timestamp),
];

const REVENUE_FILL_RATE: &[Column] = &[
    required("date", ColumnType::Date),
    required("hour", ColumnType::Integer),
    required("platform", ColumnType::String),
    nullable("application", ColumnType::String),
    nullable("package_name", ColumnType::String),
    nullable("ad_format", ColumnType::String),
    nullable("network", ColumnType::String),
    nullable("network_placement", ColumnType::String),
    nullable("country", ColumnType::String),
    nullable("device_type", ColumnType::String),
    nullable("max_ad_unit_id", ColumnType::String),
    nullable("ad_unit_waterfall_name", ColumnType::String),
    required("impressions", ColumnType::Integer),
    required("estimated_revenue", ColumnType::Numeric),
    required("ecpm", ColumnType::Numeric),
    nullable("attempts", ColumnType::Integer),
    nullable("responses", ColumnType::Integer),
    nullable("fill_rate", ColumnType::Numeric),
    required("collected_at", ColumnType::Timestamp),
];

const IMPRESSIONS: &[Column] = &[
    nullable("impression_at", ColumnType::DateTime),
    nullable("ad_unit_id", ColumnType::String),
    nullable("ad_unit_name", ColumnType::String),
    nullable("waterfall", ColumnType::String),
    nullable("ad_format", ColumnType::String),
    nullable("placement", ColumnType::String),
    nullable("country", ColumnType::String),
    nullable("device_type", ColumnType::String),
    nullable("idfa", ColumnType::String),
    nullable("idfv", ColumnType::String),
    nullable("user_id", ColumnType::String),
    required("revenue", ColumnType::Numeric),
    nullable("network", ColumnType::String),
    nullable("ad_placement", ColumnType::String),
    nullable("custom_data", ColumnType::String),
    required("platform", ColumnType::String),
    required("collected_date", ColumnType::Date),
];

/// Creates the Arrow schema matching a table's column list.
pub fn arrow_schema(table: Table) -> Arc<Schema> {
    Arc::new(Schema::new(
        table
            .columns()
            .iter()
            .map(|column| Field::new(column.name, column.kind.arrow_type(), !column.required))
            .collect::<Vec<_>>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ImpressionRecord, Platform, RevenueFillRateRecord, RevenueHourlyRecord};
    use chrono::{NaiveDate, Utc};
    use serde::Serialize;

    fn serialized_keys<T: Serialize>(record: &T) -> Vec<String> {
        let mut keys: Vec<String> = match serde_json::to_value(record).unwrap() {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => panic!("Expected a JSON object"),
        };
        keys.sort();
        keys
    }

    fn column_names(table: Table) -> Vec<String> {
        let mut names: Vec<String> = table.columns().iter().map(|c| c.name.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_columns_match_record_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let hourly = RevenueHourlyRecord {
            date,
            hour: 0,
            platform: "android".to_string(),
            application: None,
            package_name: None,
            ad_format: None,
            network: None,
            network_placement: None,
            country: None,
            device_type: None,
            max_ad_unit_id: None,
            max_placement: None,
            ad_unit_waterfall_name: None,
            impressions: 0,
            estimated_revenue: 0.0,
            ecpm: 0.0,
            collected_at: Utc::now(),
        };
        let fill_rate = RevenueFillRateRecord {
            date,
            hour: 0,
            platform: "ios".to_string(),
            application: None,
            package_name: None,
            ad_format: None,
            network: None,
            network_placement: None,
            country: None,
            device_type: None,
            max_ad_unit_id: None,
            ad_unit_waterfall_name: None,
            impressions: 0,
            estimated_revenue: 0.0,
            ecpm: 0.0,
            attempts: None,
            responses: None,
            fill_rate: None,
            collected_at: Utc::now(),
        };
        let impression = ImpressionRecord {
            impression_at: None,
            ad_unit_id: None,
            ad_unit_name: None,
            waterfall: None,
            ad_format: None,
            placement: None,
            country: None,
            device_type: None,
            idfa: None,
            idfv: None,
            user_id: None,
            revenue: 0.0,
            network: None,
            ad_placement: None,
            custom_data: None,
            platform: Platform::Android,
            collected_date: date,
        };

        assert_eq!(serialized_keys(&hourly), column_names(Table::RevenueHourly));
        assert_eq!(serialized_keys(&fill_rate), column_names(Table::RevenueFillRate));
        assert_eq!(serialized_keys(&impression), column_names(Table::Impressions));
    }

    #[test]
    fn test_arrow_schema() {
        let schema = arrow_schema(Table::Impressions);
        assert_eq!(schema.fields().len(), 17);
        assert_eq!(schema.field(0).name(), "impression_at");
        assert!(schema.field(0).is_nullable());
        assert_eq!(schema.field(16).name(), "collected_date");
        assert_eq!(schema.field(16).data_type(), &DataType::Date32);
        assert!(!schema.field(16).is_nullable());
    }

    #[test]
    fn test_fill_rate_and_max_placement_are_exclusive() {
        let has = |table: Table, name: &str| table.columns().iter().any(|c| c.name == name);
        assert!(has(Table::RevenueHourly, "max_placement"));
        assert!(!has(Table::RevenueHourly, "fill_rate"));
        assert!(has(Table::RevenueFillRate, "fill_rate"));
        assert!(!has(Table::RevenueFillRate, "max_placement"));
    }
}
