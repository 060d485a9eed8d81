//! Platform job kinds and the risk data job manager.
//!
//! Every asynchronous platform operation returns a job id that is polled at a
//! per-kind status endpoint. [`JobKind`] captures what differs between kinds:
//!
//! | Kind | Status endpoint | Batch lookup | Required fields |
//! |------|-----------------|--------------|-----------------|
//! | risk data | `/platform/riskdata/v1/jobs/{id}` | `jobId IN (...)` search | status, progress |
//! | import | `/platform/import/v1/jobs/{id}` | per id | status |
//! | geohaz | `/platform/geohaz/v1/jobs/{id}` | per id | status, progress |
//! | analysis | `/platform/model/v1/jobs/{id}` | `jobId IN (...)` search | status, progress |
//! | grouping | `/platform/grouping/v1/jobs/{id}` | per id | status, progress |
//! | export | `/platform/export/v1/jobs/{id}` | per id | status |
//! | RDM export | `/platform/export/v1/jobs/{id}` | per id | status, progress |
//! | data version upgrade | `/riskmodeler/v1/workflows/{id}` | per id | status, progress |

use serde_json::Value;
use tracing::info;

use crate::client::{Client, RequestOptions};
use crate::constants::{endpoints, DEFAULT_PAGE_LIMIT};
use crate::error::{IrpError, Result};
use crate::extract;
use crate::polling::{self, poll_batch_until_settled, poll_until_terminal, PollConfig, StatusFields};
use crate::validators;

/// Status endpoint and polling rules for one kind of platform job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKind {
    /// Capitalized name used in messages, e.g. `Risk data job`.
    pub name: &'static str,
    path: fn(i64) -> String,
    search_path: Option<&'static str>,
    fields: StatusFields,
}

impl JobKind {
    pub const RISK_DATA: Self = Self {
        name: "Risk data job",
        path: endpoints::risk_data_job,
        search_path: Some(endpoints::RISK_DATA_JOBS),
        fields: StatusFields::Required,
    };

    pub const IMPORT: Self = Self {
        name: "Import job",
        path: endpoints::import_job,
        search_path: None,
        fields: StatusFields::StatusOnly,
    };

    pub const GEOHAZ: Self = Self {
        name: "Geohaz job",
        path: endpoints::geohaz_job,
        search_path: None,
        fields: StatusFields::Required,
    };

    pub const ANALYSIS: Self = Self {
        name: "Analysis job",
        path: endpoints::analysis_job,
        search_path: Some(endpoints::ANALYSIS_JOBS),
        fields: StatusFields::Required,
    };

    pub const GROUPING: Self = Self {
        name: "Analysis grouping job",
        path: endpoints::grouping_job,
        search_path: None,
        fields: StatusFields::Required,
    };

    pub const EXPORT: Self = Self {
        name: "Export job",
        path: endpoints::export_job,
        search_path: None,
        fields: StatusFields::StatusOnly,
    };

    /// RDM exports share the export endpoint but always report progress.
    pub const RDM_EXPORT: Self = Self {
        name: "RDM Export job",
        path: endpoints::export_job,
        search_path: None,
        fields: StatusFields::Required,
    };

    /// EDM data version upgrades run as Risk Modeler workflows.
    pub const DATA_VERSION_UPGRADE: Self = Self {
        name: "Data version upgrade job",
        path: endpoints::workflow,
        search_path: None,
        fields: StatusFields::Required,
    };

    /// Same endpoint and rules under a more specific name, e.g. `EDM import job`.
    pub const fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    pub fn status_path(&self, job_id: i64) -> String {
        (self.path)(job_id)
    }

    fn lower_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub async fn get(&self, client: &Client, job_id: i64) -> Result<Value> {
        validators::positive(job_id, "job_id")?;
        client
            .get_json(&self.status_path(job_id), RequestOptions::new())
            .await
            .map_err(|error| {
                error.context(format!(
                    "Failed to get {} status for job ID {job_id}",
                    self.lower_name()
                ))
            })
    }

    /// One page of the kind's job search endpoint.
    pub async fn search(
        &self,
        client: &Client,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        let path = self.search_path.ok_or_else(|| {
            IrpError::validation(format!("{}s cannot be searched", self.name))
        })?;
        client
            .get_json(path, RequestOptions::new().filter(filter).page(limit, offset))
            .await
            .map(extract::into_list)
            .map_err(|error| error.context(format!("Failed to search {}s", self.lower_name())))
    }

    /// Poll one job until its status is terminal.
    pub async fn poll(&self, client: &Client, job_id: i64, config: &PollConfig) -> Result<Value> {
        validators::positive(job_id, "job_id")?;
        let timeout = config.timeout.as_secs();
        poll_until_terminal(
            &format!("{} {job_id}", self.lower_name()),
            config,
            self.fields,
            || self.get(client, job_id),
            |status| {
                IrpError::job(format!(
                    "{} ID {job_id} did not complete within {timeout} seconds. Last status: {status}",
                    self.name
                ))
            },
        )
        .await
    }

    /// Poll many jobs until none is in progress, returning the final bodies.
    pub async fn poll_batch(
        &self,
        client: &Client,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        validators::non_empty_list(job_ids, "job_ids")?;
        let label = format!(
            "{} ids {}",
            self.lower_name(),
            job_ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
        );
        let timeout = config.timeout.as_secs();
        poll_batch_until_settled(
            &label,
            config,
            || self.fetch_batch(client, job_ids),
            |_| {
                IrpError::job(format!(
                    "Batch {}s did not complete within {timeout} seconds",
                    self.lower_name()
                ))
            },
        )
        .await
    }

    async fn fetch_batch(&self, client: &Client, job_ids: &[i64]) -> Result<Vec<Value>> {
        if self.search_path.is_none() {
            let mut jobs = Vec::with_capacity(job_ids.len());
            for &job_id in job_ids {
                let job = self.get(client, job_id).await?;
                extract::require(&job, "status", &format!("job response for job ID {job_id}"))?;
                jobs.push(job);
            }
            return Ok(jobs);
        }

        let filter = polling::job_id_filter(job_ids);
        let limit = DEFAULT_PAGE_LIMIT;
        let mut offset = 0;
        let mut jobs = Vec::new();
        loop {
            let page = self.search(client, &filter, limit, offset).await?;
            if page.is_empty() {
                return Ok(jobs);
            }
            jobs.extend(page);
            if jobs.len() >= job_ids.len() {
                return Ok(jobs);
            }
            offset += limit;
        }
    }
}

/// Risk data jobs (`/platform/riskdata/v1/jobs`).
#[derive(Debug, Clone)]
pub struct JobManager {
    client: Client,
}

impl JobManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn get_risk_data_job(&self, job_id: i64) -> Result<Value> {
        JobKind::RISK_DATA.get(&self.client, job_id).await
    }

    pub async fn search_risk_data_jobs(
        &self,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        JobKind::RISK_DATA
            .search(&self.client, filter, limit, offset)
            .await
    }

    pub async fn poll_risk_data_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        info!(job_id, "polling risk data job");
        JobKind::RISK_DATA.poll(&self.client, job_id, config).await
    }

    pub async fn poll_risk_data_job_batch_to_completion(
        &self,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        JobKind::RISK_DATA
            .poll_batch(&self.client, job_ids, config)
            .await
    }
}
