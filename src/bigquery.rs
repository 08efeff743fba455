use crate::config::Config;
use crate::error::{Error, WarehouseErrorKind};
use crate::schema::Table;
use crate::warehouse::{DeleteOutcome, Partition, Warehouse};
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

/// Long-poll window for query jobs, in milliseconds.
const QUERY_TIMEOUT_MS: u64 = 60_000;

/// Loads rows into BigQuery through its REST API.
#[derive(Clone)]
pub struct BigQueryWarehouse {
    client: Client,
    base_url: String,
    token: String,
    project_id: String,
    dataset: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: JobReference,
    num_dml_affected_rows: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl BigQueryWarehouse {
    pub fn new(config: &Config) -> Self {
        BigQueryWarehouse {
            client: Client::new(),
            base_url: config.bigquery_url.to_string(),
            token: config.bigquery_token.to_string(),
            project_id: config.project_id.to_string(),
            dataset: config.dataset.to_string(),
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

    fn qualified_name(&self, table: Table) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset, table.name())
    }

    /// Creates a resource, treating "already exists" as success.
    async fn create(&self, url: Url, body: Value, what: &str) -> Result<(), Error> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        match check(resp).await {
            Ok(_) => {
                info!("created {}", what);
                Ok(())
            }
            Err(err) if err.warehouse_kind() == Some(WarehouseErrorKind::AlreadyExists) => {
                debug!("{} already exists", what);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn run_query(&self, body: Value) -> Result<QueryResponse, Error> {
        let url = self.endpoint(&["projects", &self.project_id, "queries"])?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let mut response: QueryResponse = check(resp).await?.json().await?;

        while !response.job_complete {
            debug!("waiting for query job {}", response.job_reference.job_id);
            let url = self.endpoint(&[
                "projects",
                &self.project_id,
                "queries",
                &response.job_reference.job_id,
            ])?;
            let mut request = self
                .client
                .get(url)
                .bearer_auth(&self.token)
                .query(&[("timeoutMs", QUERY_TIMEOUT_MS.to_string())]);
            if let Some(location) = &response.job_reference.location {
                request = request.query(&[("location", location)]);
            }
            let polled: QueryResponse = check(request.send().await?).await?.json().await?;
            response = QueryResponse {
                job_reference: response.job_reference,
                ..polled
            };
        }

        Ok(response)
    }
}

/// Builds the parameterised DELETE for one partition.
fn delete_query(qualified_table: &str, table: Table, partition: &Partition) -> Value {
    let mut statement = format!(
        "DELETE FROM {} WHERE {} = @date",
        qualified_table,
        table.date_column()
    );
    let mut parameters = vec![json!({
        "name": "date",
        "parameterType": { "type": "DATE" },
        "parameterValue": { "value": partition.date.format("%Y-%m-%d").to_string() },
    })];

    if let Some(platform) = partition.platform {
        statement.push_str(" AND platform = @platform");
        parameters.push(json!({
            "name": "platform",
            "parameterType": { "type": "STRING" },
            "parameterValue": { "value": platform.as_str() },
        }));
    }

    json!({
        "query": statement,
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": parameters,
        "timeoutMs": QUERY_TIMEOUT_MS,
    })
}

fn table_resource(project_id: &str, dataset: &str, table: Table) -> Value {
    let fields: Vec<Value> = table
        .columns()
        .iter()
        .map(|column| {
            json!({
                "name": column.name,
                "type": column.kind.bigquery_type(),
                "mode": if column.required { "REQUIRED" } else { "NULLABLE" },
            })
        })
        .collect();

    json!({
        "tableReference": {
            "projectId": project_id,
            "datasetId": dataset,
            "tableId": table.name(),
        },
        "schema": { "fields": fields },
        "timePartitioning": { "type": "DAY", "field": table.date_column() },
    })
}

/// Maps a failed warehouse response onto an error kind.
///
/// BigQuery reports the streaming-buffer conflict as a generic `invalidQuery`, so the message
/// text is the only signal available. This is the one place that inspects it.
fn classify(status: StatusCode, message: &str) -> WarehouseErrorKind {
    match status {
        StatusCode::CONFLICT => WarehouseErrorKind::AlreadyExists,
        StatusCode::NOT_FOUND => WarehouseErrorKind::NotFound,
        StatusCode::BAD_REQUEST if message.to_ascii_lowercase().contains("streaming buffer") => {
            WarehouseErrorKind::StreamingBuffer
        }
        _ => WarehouseErrorKind::Other,
    }
}

/// Builds the error for a failed response, preferring the `{"error":{"message"}}` envelope text.
fn warehouse_error(status: StatusCode, body: String) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);

    Error::Warehouse {
        kind: classify(status, &message),
        status: status.as_u16(),
        message,
    }
}

async fn check(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    Err(warehouse_error(status, resp.text().await?))
}

/// Maps the result of a partition DELETE onto its outcome. A streaming-buffer refusal is not an
/// error; the partition is skipped instead.
fn delete_outcome(
    table: Table,
    partition: &Partition,
    result: Result<QueryResponse, Error>,
) -> Result<DeleteOutcome, Error> {
    match result {
        Ok(response) => {
            info!(
                "deleted {} existing rows from {} for {}",
                response.num_dml_affected_rows.as_deref().unwrap_or("0"),
                table,
                partition.date
            );
            Ok(DeleteOutcome::Deleted)
        }
        Err(Error::Warehouse {
            kind: WarehouseErrorKind::StreamingBuffer,
            message,
            ..
        }) => {
            warn!("partition of {} for {} is still in the streaming buffer", table, partition.date);
            Ok(DeleteOutcome::SkippedBuffered { reason: message })
        }
        Err(err) => Err(err),
    }
}

#[async_trait::async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn ensure_schema(&self) -> Result<(), Error> {
        let url = self.endpoint(&["projects", &self.project_id, "datasets"])?;
        let dataset = json!({
            "datasetReference": { "projectId": self.project_id, "datasetId": self.dataset },
        });
        self.create(url, dataset, &format!("dataset {}", self.dataset))
            .await?;

        for table in Table::ALL {
            let url = self.endpoint(&["projects", &self.project_id, "datasets", &self.dataset, "tables"])?;
            let resource = table_resource(&self.project_id, &self.dataset, table);
            self.create(url, resource, &format!("table {}", table)).await?;
        }

        Ok(())
    }

    async fn delete_partition(
        &self,
        table: Table,
        partition: &Partition,
    ) -> Result<DeleteOutcome, Error> {
        let query = delete_query(&self.qualified_name(table), table, partition);

        delete_outcome(table, partition, self.run_query(query).await)
    }

    async fn insert_rows(
        &self,
        table: Table,
        _partition: &Partition,
        rows: Vec<Value>,
    ) -> Result<(), Error> {
        let url = self.endpoint(&[
            "projects",
            &self.project_id,
            "datasets",
            &self.dataset,
            "tables",
            table.name(),
            "insertAll",
        ])?;
        let body = json!({
            "skipInvalidRows": false,
            "rows": rows.into_iter().map(|row| json!({ "json": row })).collect::<Vec<_>>(),
        });

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let response: InsertAllResponse = check(resp).await?.json().await?;

        if !response.insert_errors.is_empty() {
            return Err(Error::Warehouse {
                kind: WarehouseErrorKind::Other,
                status: StatusCode::OK.as_u16(),
                message: format!(
                    "{} rows rejected by {}, first: {}",
                    response.insert_errors.len(),
                    table,
                    response.insert_errors[0]
                ),
            });
        }

        Ok(())
    }
}
