//! Authenticated platform client: request execution with retries and the
//! workflow polling endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::constants::{endpoints, DEFAULT_PAGE_LIMIT};
use crate::error::{IrpError, Result};
use crate::extract::{self, json_body, location_header, truncate_chars};
use crate::http_client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::polling::{
    poll_batch_until_settled, poll_until_terminal, BatchSnapshot, PollConfig, StatusFields,
};
use crate::validators;

/// Per-call request settings layered over the client defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Absolute URL; overrides `base_url` and the path.
    pub full_url: Option<String>,
    /// Base URL for this call only.
    pub base_url: Option<String>,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Adds `filter=<filter>` unless the filter is empty.
    pub fn filter(self, filter: &str) -> Self {
        if filter.is_empty() {
            self
        } else {
            self.query("filter", filter)
        }
    }

    pub fn page(self, limit: u32, offset: u32) -> Self {
        self.query("limit", limit).query("offset", offset)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn full_url(mut self, url: impl Into<String>) -> Self {
        self.full_url = Some(url.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of [`Client::execute_workflow`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// The submission did not start a workflow (status other than 201/202).
    Immediate(HttpResponse),
    /// Final body of the workflow referenced by the `Location` header.
    Completed(Value),
}

/// Batch of workflows collected across every page of a workflow search.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowBatch(pub Value);

impl BatchSnapshot for WorkflowBatch {
    fn jobs(&self) -> &[Value] {
        self.0
            .get("workflows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Platform API client shared by every manager.
#[derive(Clone)]
pub struct Client {
    http: Arc<dyn HttpClient>,
    config: ClientConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("resource_group_id", &self.config.resource_group_id)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client backed by reqwest.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    fn url_for(&self, path: &str, options: &RequestOptions) -> String {
        if let Some(url) = options.full_url.as_deref().filter(|url| !url.is_empty()) {
            return url.to_owned();
        }
        let base = options
            .base_url
            .as_deref()
            .unwrap_or(&self.config.base_url)
            .trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    fn build_request(&self, method: HttpMethod, path: &str, options: RequestOptions) -> HttpRequest {
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let mut request = HttpRequest::new(method, self.url_for(path, &options))
            .with_auth(&HttpAuth::ApiKey(self.config.api_key.clone()))
            .with_auth(&HttpAuth::Header {
                name: String::from("x-rms-resource-group-id"),
                value: self.config.resource_group_id.clone(),
            })
            .with_timeout_ms(timeout.as_millis() as u64);
        request.query = options.query;
        if let Some(body) = &options.json {
            request = request.with_json(body);
        }
        for (name, value) in options.headers {
            request = request.with_header(name, value);
        }
        request
    }

    /// Send one request, retrying per [`crate::retry::RetryConfig`].
    ///
    /// Non-2xx responses become [`IrpError::Api`] with the server body attached.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let request = self.build_request(method, path, options);
        let retry = &self.config.retry;
        debug!(%method, url = %request.url, "request");

        let mut attempt = 0;
        let response = loop {
            match self.http.execute(request.clone()).await {
                Ok(response)
                    if retry.should_retry_status(response.status)
                        && retry.allows_retry(method, attempt) =>
                {
                    let delay = retry_after(&response)
                        .map_or_else(|| retry.delay_for_attempt(attempt), |hint| {
                            hint.max(retry.delay_for_attempt(attempt))
                        });
                    warn!(%method, url = %request.url, status = response.status, attempt, ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(response) => break response,
                Err(error) if retry.should_retry_error(&error) && retry.allows_retry(method, attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(%method, url = %request.url, %error, attempt, ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    error!(%method, url = %request.url, %error, "request error");
                    return Err(error.into());
                }
            }
        };

        debug!(%method, url = %request.url, status = response.status, "response");
        if !response.is_success() {
            let detail = match response.parse_json::<Value>() {
                Ok(body) => format!(" | server: {body}"),
                Err(_) => format!(" | text: {}", truncate_chars(&response.text(), 500)),
            };
            error!(%method, url = %request.url, status = response.status, "HTTP request failed{}", detail);
            return Err(IrpError::api(format!(
                "HTTP request failed: {} for {method} {}{detail}",
                response.status, request.url
            )));
        }
        Ok(response)
    }

    /// Send a request and parse the JSON body; an empty body reads as `null`.
    pub async fn request_json(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value> {
        let response = self.request(method, path, options).await?;
        json_body(&response)
    }

    pub async fn get_json(&self, path: &str, options: RequestOptions) -> Result<Value> {
        self.request_json(HttpMethod::Get, path, options).await
    }

    /// Collect every page of a list endpoint, stopping at the first short page.
    pub async fn get_all_pages(&self, path: &str, filter: &str) -> Result<Vec<Value>> {
        let limit = DEFAULT_PAGE_LIMIT;
        let mut offset = 0;
        let mut all = Vec::new();
        loop {
            let page = extract::into_list(
                self.get_json(path, RequestOptions::new().filter(filter).page(limit, offset))
                    .await?,
            );
            let count = page.len();
            all.extend(page);
            if count < limit as usize {
                return Ok(all);
            }
            offset += limit;
        }
    }

    pub async fn get_workflow(&self, workflow_id: i64) -> Result<Value> {
        validators::positive(workflow_id, "workflow_id")?;
        self.get_json(&endpoints::workflow(workflow_id), RequestOptions::new())
            .await
            .map_err(|error| {
                error.context(format!(
                    "Failed to get workflow status for workflow ID {workflow_id}"
                ))
            })
    }

    /// Poll `GET /riskmodeler/v1/workflows/{id}` until the workflow is terminal.
    pub async fn poll_workflow_to_completion(
        &self,
        workflow_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        validators::positive(workflow_id, "workflow_id")?;
        let timeout = config.timeout.as_secs();
        poll_until_terminal(
            &format!("workflow {workflow_id}"),
            config,
            StatusFields::Required,
            || self.get_workflow(workflow_id),
            |status| {
                IrpError::job(format!(
                    "Workflow ID {workflow_id} did not complete within {timeout} seconds. Last status: {status}"
                ))
            },
        )
        .await
    }

    /// Poll an absolute workflow URL (typically a `Location` header).
    pub async fn poll_workflow(&self, workflow_url: &str, config: &PollConfig) -> Result<Value> {
        validators::non_empty_str(workflow_url, "workflow_url")?;
        let timeout = config.timeout.as_secs();
        poll_until_terminal(
            workflow_url,
            config,
            StatusFields::Lenient,
            || self.get_json("", RequestOptions::new().full_url(workflow_url)),
            |status| {
                IrpError::workflow(format!(
                    "Workflow did not complete within {timeout} seconds. Last status: {status}"
                ))
            },
        )
        .await
    }

    async fn fetch_workflow_batch(&self, ids: &str) -> Result<WorkflowBatch> {
        let limit = DEFAULT_PAGE_LIMIT;
        let mut offset = 0;
        let mut workflows = Vec::new();
        loop {
            let mut page = self
                .get_json(
                    endpoints::WORKFLOWS,
                    RequestOptions::new().query("ids", ids).page(limit, offset),
                )
                .await?;
            let total = page
                .get("totalMatchCount")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    IrpError::api("Missing 'totalMatchCount' in workflow batch response")
                })?;
            let fetched = extract::list_at(&page, "workflows");
            let page_len = fetched.len();
            workflows.extend(fetched);

            if workflows.len() as u64 >= total || page_len == 0 {
                page["workflows"] = Value::Array(workflows);
                return Ok(WorkflowBatch(page));
            }
            offset += limit;
        }
    }

    /// Poll many workflows until none is in progress.
    ///
    /// Returns the last page body with `workflows` holding every workflow.
    pub async fn poll_workflow_batch_to_completion(
        &self,
        workflow_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Value> {
        validators::non_empty_list(workflow_ids, "workflow_ids")?;
        let ids = workflow_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let timeout = config.timeout.as_secs();
        let batch = poll_batch_until_settled(
            &format!("workflows {ids}"),
            config,
            || self.fetch_workflow_batch(&ids),
            |_| {
                IrpError::workflow(format!(
                    "Batch workflows did not complete within {timeout} seconds"
                ))
            },
        )
        .await?;
        Ok(batch.0)
    }

    /// Submit a request and, when it starts a workflow, poll it to completion.
    pub async fn execute_workflow(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
        config: &PollConfig,
    ) -> Result<WorkflowOutcome> {
        info!(%method, path, "submitting workflow request");
        let response = self.request(method, path, options).await?;
        if !matches!(response.status, 201 | 202) {
            return Ok(WorkflowOutcome::Immediate(response));
        }
        let workflow_url = location_header(&response, "Workflow submission")?.to_owned();
        self.poll_workflow(&workflow_url, config)
            .await
            .map(WorkflowOutcome::Completed)
    }
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
