//! # REST Datastore Client
//!
//! HTTP implementation of [`Datastore`] against the IceProd REST API.
//!
//! Listing endpoints return objects keyed by id (`{"<job_id>": {...}}`);
//! creation endpoints return `{"result": "<new id>"}`; count endpoints return
//! `{"<status>": <count>}`. Unknown status keys are skipped with a warning so a
//! newer server does not break an older scheduler.

use super::{Datastore, DatastoreError, DatastoreResult, TaskFilter};
use crate::constants::{DatasetStatus, JobStatus, TaskStatus};
use crate::models::{Dataset, DatasetConfig, Group, Job, NewJob, NewTask, Task, User};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the REST datastore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestDatastoreConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
}

impl Default for RestDatastoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30000,
            auth_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct TaskListResponse {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse<T> {
    results: Vec<T>,
}

#[derive(Clone)]
pub struct RestDatastore {
    client: Client,
    base_url: Url,
    config: RestDatastoreConfig,
}

impl std::fmt::Debug for RestDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDatastore")
            .field("base_url", &self.base_url.as_str())
            .field("timeout_ms", &self.config.timeout_ms)
            .field("auth_enabled", &self.config.auth_token.is_some())
            .finish()
    }
}

impl RestDatastore {
    /// Build a client; fails on a malformed base URL or token
    pub fn new(config: RestDatastoreConfig) -> DatastoreResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| DatastoreError::InvalidRequest(format!("Invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DatastoreError::InvalidRequest(format!(
                "Base URL {} cannot carry a path",
                config.base_url
            )));
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("iceprod-scheduler/{}", env!("CARGO_PKG_VERSION")));

        if let Some(token) = &config.auth_token {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}").parse().map_err(|e| {
                    DatastoreError::InvalidRequest(format!("Invalid auth token: {e}"))
                })?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| DatastoreError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout_ms,
            auth_enabled = config.auth_token.is_some(),
            "Created REST datastore client"
        );

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Append escaped path segments to the base URL, keeping any base path prefix
    fn endpoint(&self, segments: &[&str]) -> DatastoreResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                DatastoreError::InvalidRequest(format!("Base URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Builder for `segments` plus the request path used in error context
    fn request(&self, method: Method, segments: &[&str]) -> DatastoreResult<(RequestBuilder, String)> {
        let url = self.endpoint(segments)?;
        debug!(method = %method, url = %url, "Datastore request");
        let path = url.path().to_string();
        Ok((self.client.request(method, url), path))
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> DatastoreResult<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DatastoreError::not_found(path));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DatastoreError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, path: &str) -> DatastoreResult<T> {
        self.execute(builder, path)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DatastoreError::Decode(format!("{path}: {e}")))
    }

    async fn send_empty(&self, builder: RequestBuilder, path: &str) -> DatastoreResult<()> {
        self.execute(builder, path).await.map(|_| ())
    }
}

fn map_transport_error(e: reqwest::Error) -> DatastoreError {
    if e.is_decode() {
        DatastoreError::Decode(e.to_string())
    } else {
        DatastoreError::Transport(e.to_string())
    }
}

fn parse_counts<K>(raw: HashMap<String, u64>) -> HashMap<K, u64>
where
    K: FromStr<Err = String> + Eq + Hash,
{
    raw.into_iter()
        .filter_map(|(key, count)| match K::from_str(&key) {
            Ok(status) => Some((status, count)),
            Err(e) => {
                warn!(status = %key, error = %e, "Skipping unknown status in count response");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Datastore for RestDatastore {
    async fn dataset_ids_by_status(&self) -> DatastoreResult<HashMap<DatasetStatus, Vec<String>>> {
        let (builder, path) = self.request(Method::GET, &["dataset_summaries", "status"])?;
        let raw: HashMap<String, Vec<String>> = self.send(builder, &path).await?;

        Ok(raw
            .into_iter()
            .filter_map(|(key, ids)| DatasetStatus::from_str(&key).ok().map(|s| (s, ids)))
            .collect())
    }

    async fn get_dataset(&self, dataset_id: &str) -> DatastoreResult<Dataset> {
        let (builder, path) = self.request(Method::GET, &["datasets", dataset_id])?;
        self.send(builder, &path).await
    }

    async fn get_dataset_config(&self, dataset_id: &str) -> DatastoreResult<DatasetConfig> {
        let (builder, path) = self.request(Method::GET, &["config", dataset_id])?;
        self.send(builder, &path).await
    }

    async fn list_jobs(&self, dataset_id: &str) -> DatastoreResult<Vec<Job>> {
        let (builder, path) = self.request(Method::GET, &["datasets", dataset_id, "jobs"])?;
        let builder = builder.query(&[("keys", "job_id|dataset_id|job_index|status")]);
        let raw: HashMap<String, Job> = self.send(builder, &path).await?;

        let mut jobs: Vec<Job> = raw.into_values().collect();
        jobs.sort_by_key(|j| j.job_index);
        Ok(jobs)
    }

    async fn create_job(&self, job: &NewJob) -> DatastoreResult<String> {
        let (builder, path) = self.request(Method::POST, &["jobs"])?;
        let created: CreatedResponse = self.send(builder.json(job), &path).await?;
        Ok(created.result)
    }

    async fn job_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<JobStatus, u64>> {
        let (builder, path) =
            self.request(Method::GET, &["datasets", dataset_id, "job_counts", "status"])?;
        let raw: HashMap<String, u64> = self.send(builder, &path).await?;
        Ok(parse_counts(raw))
    }

    async fn task_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        let (builder, path) =
            self.request(Method::GET, &["datasets", dataset_id, "task_counts", "status"])?;
        let raw: HashMap<String, u64> = self.send(builder, &path).await?;
        Ok(parse_counts(raw))
    }

    async fn list_tasks(
        &self,
        dataset_id: &str,
        filter: &TaskFilter,
    ) -> DatastoreResult<Vec<Task>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(job_id) = &filter.job_id {
            query.push(("job_id", job_id.clone()));
        }
        if let Some(job_index) = filter.job_index {
            query.push(("job_index", job_index.to_string()));
        }
        if let Some(status) = filter.status {
            query.push(("status", status.to_string()));
        }

        let (builder, path) = self.request(Method::GET, &["datasets", dataset_id, "tasks"])?;
        let raw: HashMap<String, Task> = self.send(builder.query(&query), &path).await?;

        let mut tasks: Vec<Task> = raw.into_values().collect();
        tasks.sort_by_key(|t| (t.job_index, t.task_index));
        Ok(tasks)
    }

    async fn get_task(&self, task_id: &str) -> DatastoreResult<Task> {
        let (builder, path) = self.request(Method::GET, &["tasks", task_id])?;
        self.send(builder, &path).await
    }

    async fn create_task(&self, task: &NewTask) -> DatastoreResult<String> {
        let (builder, path) = self.request(Method::POST, &["tasks"])?;
        let created: CreatedResponse = self.send(builder.json(task), &path).await?;
        Ok(created.result)
    }

    async fn update_task_priority(&self, task_id: &str, priority: f64) -> DatastoreResult<()> {
        let (builder, path) = self.request(Method::PATCH, &["tasks", task_id])?;
        let builder = builder.json(&serde_json::json!({ "priority": priority }));
        self.send_empty(builder, &path).await
    }

    async fn global_task_counts(&self) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        let (builder, path) = self.request(Method::GET, &["task_counts", "status"])?;
        let raw: HashMap<String, u64> = self.send(builder, &path).await?;
        Ok(parse_counts(raw))
    }

    async fn idle_tasks_by_priority(&self, limit: usize) -> DatastoreResult<Vec<Task>> {
        let (builder, path) = self.request(Method::GET, &["tasks"])?;
        let builder = builder.query(&[
            ("status", TaskStatus::Idle.to_string()),
            ("sort", "priority:desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let response: TaskListResponse = self.send(builder, &path).await?;
        Ok(response.tasks)
    }

    async fn bulk_set_task_status(
        &self,
        task_ids: &[String],
        status: TaskStatus,
    ) -> DatastoreResult<()> {
        let status = status.to_string();
        let (builder, path) =
            self.request(Method::POST, &["task_actions", "bulk_status", status.as_str()])?;
        let builder = builder.json(&serde_json::json!({ "tasks": task_ids }));
        self.send_empty(builder, &path).await
    }

    async fn list_users(&self) -> DatastoreResult<Vec<User>> {
        let (builder, path) = self.request(Method::GET, &["users"])?;
        let response: ResultsResponse<User> = self.send(builder, &path).await?;
        Ok(response.results)
    }

    async fn list_groups(&self) -> DatastoreResult<Vec<Group>> {
        let (builder, path) = self.request(Method::GET, &["groups"])?;
        let response: ResultsResponse<Group> = self.send(builder, &path).await?;
        Ok(response.results)
    }
}
