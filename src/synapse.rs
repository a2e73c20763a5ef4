//! Synapse REST collaborator.
//!
//! Requests are issued once; failures surface as errors and abort the run.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::TrackerError;
use crate::normalize::RawRecord;
use crate::progress::{COLUMNS, ProgressRow};

pub const DEFAULT_BASE_URL: &str = "https://repo-prod.prod.sagebase.org/repo/v1";

const QUERY_PAGE_SIZE: usize = 500;
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Annotations of one entity; `etag` guards concurrent updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityAnnotations {
    pub id: String,
    pub etag: Option<String>,
    pub values: BTreeMap<String, Vec<String>>,
}

impl EntityAnnotations {
    pub fn first(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Overwrites each key with a single value.
    pub fn merge(&mut self, updates: &BTreeMap<String, String>) {
        for (key, value) in updates {
            self.values.insert(key.clone(), vec![value.clone()]);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRow {
    pub row_id: Option<i64>,
    pub version: Option<i64>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableResult {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl TableResult {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn into_maps(self) -> Vec<BTreeMap<String, String>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row.values).collect())
            .collect()
    }
}

pub trait MetadataStore {
    /// Every file record under a container (folder or project).
    fn query_container(&self, container_id: &str) -> Result<Vec<RawRecord>, TrackerError>;
    fn get_annotations(&self, entity_id: &str) -> Result<EntityAnnotations, TrackerError>;
    fn set_annotations(&self, annotations: &EntityAnnotations) -> Result<(), TrackerError>;
    fn query_table(&self, table_id: &str, sql: &str) -> Result<TableResult, TrackerError>;
    /// Deletes every row, returning how many were removed.
    fn clear_table(&self, table_id: &str) -> Result<usize, TrackerError>;
    fn append_rows(&self, table_id: &str, rows: &[ProgressRow]) -> Result<usize, TrackerError>;

    /// Current progress table contents, read before a replace so they can be restored.
    fn table_rows(&self, table_id: &str) -> Result<Vec<ProgressRow>, TrackerError> {
        let sql = format!("select {} from {table_id}", COLUMNS.join(", "));
        self.query_table(table_id, &sql)?
            .into_maps()
            .iter()
            .map(ProgressRow::from_cells)
            .collect()
    }

    fn table_file_ids(&self, table_id: &str) -> Result<Vec<String>, TrackerError> {
        let result = self.query_table(table_id, &format!("select synapse_id from {table_id}"))?;
        let column = result.column("synapse_id").unwrap_or(0);
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.values.into_iter().nth(column))
            .filter(|id| !id.is_empty())
            .collect())
    }
}

/// Session handle for the Synapse repository service.
#[derive(Clone)]
pub struct SynapseHttpClient {
    client: Client,
    base_url: String,
}

impl SynapseHttpClient {
    /// Authenticates with `SYNAPSE_AUTH_TOKEN`; `SYNAPSE_BASE_URL` overrides the endpoint.
    pub fn new() -> Result<Self, TrackerError> {
        let token = std::env::var("SYNAPSE_AUTH_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or(TrackerError::MissingCredentials)?;
        let base_url =
            std::env::var("SYNAPSE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_token(&base_url, token.trim())
    }

    pub fn with_token(base_url: &str, token: &str) -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pcawg-tracker/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TrackerError::SynapseHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TrackerError::MissingCredentials)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| TrackerError::SynapseHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(request: RequestBuilder) -> Result<Response, TrackerError> {
        let response = request
            .send()
            .map_err(|err| TrackerError::SynapseHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, TrackerError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Synapse request failed".to_string());
        Err(TrackerError::SynapseStatus { status, message })
    }

    fn json<T: DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
        response
            .json()
            .map_err(|err| TrackerError::SynapseHttp(err.to_string()))
    }

    /// Starts an asynchronous job and polls until its response is ready.
    fn run_job(
        &self,
        start_path: &str,
        get_path: &str,
        body: &Value,
    ) -> Result<Value, TrackerError> {
        let started: JobToken =
            Self::json(Self::send(self.client.post(self.url(start_path)).json(body))?)?;
        let deadline = Instant::now() + JOB_TIMEOUT;
        let get_url = self.url(&format!("{get_path}/{}", started.token));
        loop {
            let response = self
                .client
                .get(&get_url)
                .send()
                .map_err(|err| TrackerError::SynapseHttp(err.to_string()))?;
            if response.status().as_u16() == 202 {
                if Instant::now() > deadline {
                    return Err(TrackerError::SynapseJob(format!(
                        "job {} did not finish within {}s",
                        started.token,
                        JOB_TIMEOUT.as_secs()
                    )));
                }
                thread::sleep(JOB_POLL_INTERVAL);
                continue;
            }
            return Self::json(Self::handle_status(response)?);
        }
    }

    fn column_ids(&self, table_id: &str) -> Result<BTreeMap<String, String>, TrackerError> {
        let url = self.url(&format!("/entity/{table_id}/column"));
        let response = Self::send(self.client.get(url))?;
        let columns: PaginatedColumns = Self::json(response)?;
        Ok(columns
            .results
            .into_iter()
            .map(|column| (column.name, column.id))
            .collect())
    }
}

impl MetadataStore for SynapseHttpClient {
    fn query_container(&self, container_id: &str) -> Result<Vec<RawRecord>, TrackerError> {
        let mut records = Vec::new();
        let mut offset = 1usize;
        loop {
            let query = format!(
                "select * from file where parentId==\"{container_id}\" \
                 limit {QUERY_PAGE_SIZE} offset {offset}"
            );
            let response = Self::send(
                self.client
                    .get(self.url("/query"))
                    .query(&[("query", query.as_str())]),
            )?;
            let page: QueryPage = Self::json(response)?;
            let fetched = page.results.len();
            records.extend(page.results);
            tracing::debug!(
                container = container_id,
                fetched,
                total = page.total,
                "query page"
            );
            if fetched == 0 || records.len() >= page.total {
                break;
            }
            offset += fetched;
        }
        Ok(records)
    }

    fn get_annotations(&self, entity_id: &str) -> Result<EntityAnnotations, TrackerError> {
        let response = Self::send(
            self.client
                .get(self.url(&format!("/entity/{entity_id}/annotations2"))),
        )?;
        let wire: WireAnnotations = Self::json(response)?;
        Ok(EntityAnnotations {
            id: wire.id,
            etag: wire.etag,
            values: wire
                .annotations
                .into_iter()
                .map(|(key, value)| {
                    let values = value.value.iter().map(value_text).collect::<Vec<_>>();
                    (key, values)
                })
                .collect(),
        })
    }

    fn set_annotations(&self, annotations: &EntityAnnotations) -> Result<(), TrackerError> {
        let body = json!({
            "id": annotations.id,
            "etag": annotations.etag,
            "annotations": annotations
                .values
                .iter()
                .map(|(key, values)| (key.clone(), json!({"type": "STRING", "value": values})))
                .collect::<serde_json::Map<_, _>>(),
        });
        Self::send(
            self.client
                .put(self.url(&format!("/entity/{}/annotations2", annotations.id)))
                .json(&body),
        )?;
        Ok(())
    }

    fn query_table(&self, table_id: &str, sql: &str) -> Result<TableResult, TrackerError> {
        let body = json!({
            "concreteType": "org.sagebionetworks.repo.model.table.QueryBundleRequest",
            "entityId": table_id,
            "query": { "sql": sql },
            "partMask": 1,
        });
        let bundle = self.run_job(
            &format!("/entity/{table_id}/table/query/async/start"),
            &format!("/entity/{table_id}/table/query/async/get"),
            &body,
        )?;
        parse_query_bundle(&bundle)
    }

    fn clear_table(&self, table_id: &str) -> Result<usize, TrackerError> {
        let existing = self.query_table(table_id, &format!("select * from {table_id}"))?;
        let rows = existing
            .rows
            .iter()
            .filter_map(|row| Some(json!({"rowId": row.row_id?, "versionNumber": row.version})))
            .collect::<Vec<_>>();
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        let body = json!({ "tableId": table_id, "headers": [], "rows": rows });
        Self::send(
            self.client
                .post(self.url(&format!("/entity/{table_id}/table/deleteRows")))
                .json(&body),
        )?;
        tracing::info!(table = table_id, count, "cleared progress table");
        Ok(count)
    }

    fn append_rows(&self, table_id: &str, rows: &[ProgressRow]) -> Result<usize, TrackerError> {
        let column_ids = self.column_ids(table_id)?;
        let ids = COLUMNS
            .iter()
            .map(|name| {
                column_ids.get(*name).cloned().ok_or_else(|| {
                    TrackerError::SynapseJob(format!("table {table_id} has no column {name}"))
                })
            })
            .collect::<Result<Vec<_>, TrackerError>>()?;

        let partial_rows = rows
            .iter()
            .map(|row| {
                let values = ids
                    .iter()
                    .cloned()
                    .zip(row.values())
                    .map(|(id, value)| (id, Value::String(value)))
                    .collect::<serde_json::Map<String, Value>>();
                json!({ "values": values })
            })
            .collect::<Vec<_>>();
        let body = json!({
            "concreteType": "org.sagebionetworks.repo.model.table.TableUpdateTransactionRequest",
            "entityId": table_id,
            "changes": [{
                "concreteType": "org.sagebionetworks.repo.model.table.AppendableRowSetRequest",
                "entityId": table_id,
                "toAppend": {
                    "concreteType": "org.sagebionetworks.repo.model.table.PartialRowSet",
                    "tableId": table_id,
                    "rows": partial_rows,
                }
            }]
        });
        self.run_job(
            &format!("/entity/{table_id}/table/transaction/async/start"),
            &format!("/entity/{table_id}/table/transaction/async/get"),
            &body,
        )?;
        Ok(rows.len())
    }
}

#[derive(Debug, Deserialize)]
struct JobToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "totalNumberOfResults", default)]
    total: usize,
    #[serde(default)]
    results: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct WireAnnotations {
    id: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    annotations: BTreeMap<String, WireAnnotationValue>,
}

#[derive(Debug, Deserialize)]
struct WireAnnotationValue {
    #[serde(default)]
    value: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PaginatedColumns {
    #[serde(default)]
    results: Vec<WireColumn>,
}

#[derive(Debug, Deserialize)]
struct WireColumn {
    id: String,
    name: String,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extracts headers and rows from a query bundle response.
pub fn parse_query_bundle(bundle: &Value) -> Result<TableResult, TrackerError> {
    let results = bundle
        .pointer("/queryResult/queryResults")
        .ok_or_else(|| TrackerError::SynapseJob("query bundle has no results".to_string()))?;
    let columns = results
        .get("headers")
        .and_then(Value::as_array)
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| header.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let rows = results
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| TableRow {
                    row_id: row.get("rowId").and_then(Value::as_i64),
                    version: row.get("versionNumber").and_then(Value::as_i64),
                    values: row
                        .get("values")
                        .and_then(Value::as_array)
                        .map(|values| values.iter().map(value_text).collect())
                        .unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(TableResult { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bundle_rows() {
        let bundle = json!({
            "queryResult": {
                "queryResults": {
                    "headers": [{"name": "Donor ID"}, {"name": "Tumour Analysis ID"}],
                    "rows": [
                        {"rowId": 1, "versionNumber": 3, "values": ["d1", "t1"]},
                        {"rowId": 2, "versionNumber": 3, "values": ["d2", null]}
                    ]
                }
            }
        });
        let result = parse_query_bundle(&bundle).unwrap();
        assert_eq!(result.column("Tumour Analysis ID"), Some(1));
        assert_eq!(result.rows[1].values, vec!["d2", ""]);
        let maps = result.into_maps();
        assert_eq!(maps[0]["Donor ID"], "d1");
    }

    #[test]
    fn merge_overwrites_with_single_value() {
        let mut annotations = EntityAnnotations {
            id: "syn1".to_string(),
            etag: None,
            values: [("sample_id".to_string(), vec!["a".to_string(), "b".to_string()])].into(),
        };
        annotations.merge(&[("sample_id".to_string(), "c".to_string())].into());
        assert_eq!(annotations.values["sample_id"], vec!["c"]);
        assert_eq!(annotations.first("sample_id"), Some("c"));
    }
}
