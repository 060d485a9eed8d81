//! RDM (results database) export, import and cleanup.
//!
//! Exports write analyses into a SQL Server database on a Data Bridge
//! instance. Deletes go through the Data Bridge job API, whose jobs report a
//! plain-text status:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `Enqueued`, `Processing` | keep polling |
//! | `Succeeded` | done |
//! | anything else | failed |

use std::path::Path;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::analysis::{AnalysisManager, MemberLookup, SubmitOutcome};
use crate::client::{Client, RequestOptions};
use crate::constants::endpoints;
use crate::edm::EdmManager;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location};
use crate::http_client::HttpMethod;
use crate::job::JobKind;
use crate::polling::PollConfig;
use crate::s3::S3Manager;
use crate::validators;

/// Status of a Data Bridge job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBridgeJobStatus {
    Enqueued,
    Processing,
    Succeeded,
    Other(String),
}

impl DataBridgeJobStatus {
    /// Parse the response body, which is the bare status or a JSON string.
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        let status = serde_json::from_str::<String>(body).unwrap_or_else(|_| body.to_owned());
        match status.as_str() {
            "Enqueued" => Self::Enqueued,
            "Processing" => Self::Processing,
            "Succeeded" => Self::Succeeded,
            _ => Self::Other(status),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Enqueued => "Enqueued",
            Self::Processing => "Processing",
            Self::Succeeded => "Succeeded",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Enqueued | Self::Processing)
    }
}

/// Export of named analyses and groups into an RDM.
#[derive(Debug, Clone, PartialEq)]
pub struct RdmExportRequest {
    pub server_name: String,
    pub rdm_name: String,
    pub analysis_names: Vec<String>,
    /// Append to this existing database instead of creating `rdm_name`.
    pub database_id: Option<i64>,
    pub lookup: MemberLookup,
}

impl RdmExportRequest {
    pub fn new(
        server_name: impl Into<String>,
        rdm_name: impl Into<String>,
        analysis_names: Vec<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            rdm_name: rdm_name.into(),
            analysis_names,
            database_id: None,
            lookup: MemberLookup::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RdmManager {
    client: Client,
    s3: S3Manager,
}

impl RdmManager {
    pub fn new(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    /// Use `s3` for `.bak` uploads.
    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    fn edms(&self) -> EdmManager {
        EdmManager::new(self.client.clone())
    }

    async fn server_id(&self, server_name: &str) -> Result<i64> {
        let servers = self
            .edms()
            .search_database_servers(&format!("serverName=\"{server_name}\""))
            .await?;
        let server = servers.first().ok_or_else(|| {
            IrpError::api(format!("Database server '{server_name}' not found"))
        })?;
        extract::require_i64(server, "serverId", "database server response").map_err(|error| {
            error.context(format!("Failed to extract server ID for server '{server_name}'"))
        })
    }

    /// Export analyses to a new RDM and wait for the export to finish.
    ///
    /// Returns `None` when none of the analyses exist and nothing was exported.
    pub async fn export_analyses_to_rdm(
        &self,
        server_name: &str,
        rdm_name: &str,
        analysis_names: &[String],
        skip_missing: bool,
        config: &PollConfig,
    ) -> Result<Option<Value>> {
        let mut request = RdmExportRequest::new(server_name, rdm_name, analysis_names.to_vec());
        request.lookup.skip_missing = skip_missing;
        match self.submit_rdm_export_job(&request).await? {
            SubmitOutcome::Submitted { job_id, .. } => self
                .poll_rdm_export_job_to_completion(job_id, config)
                .await
                .map(Some),
            SubmitOutcome::Skipped { reason, .. } => {
                warn!(rdm_name, %reason, "RDM export skipped");
                Ok(None)
            }
        }
    }

    /// Submit an RDM export over named analyses and groups.
    ///
    /// Unless appending to `database_id`, fails when a database named like
    /// the RDM already exists on the server. PLT members switch HD losses to
    /// PLT export.
    pub async fn submit_rdm_export_job(&self, request: &RdmExportRequest) -> Result<SubmitOutcome> {
        let server_name = request.server_name.as_str();
        let rdm_name = request.rdm_name.as_str();
        validators::non_empty_str(server_name, "server_name")?;
        validators::non_empty_str(rdm_name, "rdm_name")?;
        validators::non_empty_list(&request.analysis_names, "analysis_names")?;
        info!(
            rdm_name,
            server_name,
            count = request.analysis_names.len(),
            "submitting RDM export job"
        );

        let server_id = self.server_id(server_name).await?;
        if request.database_id.is_none() {
            let existing = self
                .search_databases(server_name, &format!("databaseName LIKE \"{rdm_name}*\""), 100, 0)
                .await?;
            if let Some(database) = existing.first() {
                let found = database
                    .get("databaseName")
                    .and_then(Value::as_str)
                    .unwrap_or(rdm_name);
                return Err(IrpError::api(format!(
                    "RDM with name '{rdm_name}' already exists on server '{server_name}' (found: '{found}'). Please use a different RDM name or delete the existing RDM first."
                )));
            }
        }

        let analyses = AnalysisManager::new(self.client.clone());
        let mut uris = Vec::new();
        let mut included_items = Vec::new();
        let mut skipped_items = Vec::new();
        let mut export_hd_losses = false;
        for name in &request.analysis_names {
            let Some(member) = analyses
                .find_member(name, &request.lookup, " AND engineType = \"Group\"")
                .await?
            else {
                skipped_items.push(name.clone());
                continue;
            };
            uris.push(extract::require(&member, "uri", &format!("search result for '{name}'"))?.clone());
            included_items.push(name.clone());
            if member.get("analysisFramework").and_then(Value::as_str) == Some("PLT") {
                export_hd_losses = true;
            }
        }

        if uris.is_empty() {
            return Ok(SubmitOutcome::Skipped {
                reason: format!(
                    "All {} analyses/groups were not found",
                    skipped_items.len()
                ),
                skipped_items,
            });
        }

        let mut settings = match request.database_id {
            Some(database_id) => json!({"databaseId": database_id, "serverId": server_id}),
            None => json!({"rdmName": rdm_name, "serverId": server_id}),
        };
        if export_hd_losses {
            settings["exportHdLossesAs"] = json!("PLT");
        }
        let body = json!({
            "exportType": "RDM_DATABRIDGE",
            "resourceType": "analyses",
            "settings": settings,
            "resourceUris": uris,
        });

        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::EXPORT_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "RDM export job submission"))
            .map_err(|error| error.context("Failed to submit rdm export job"))?;
        info!(job_id, "RDM export job submitted");
        Ok(SubmitOutcome::Submitted {
            job_id,
            included_items,
            skipped_items,
            body,
        })
    }

    pub async fn get_rdm_export_job(&self, job_id: i64) -> Result<Value> {
        JobKind::RDM_EXPORT.get(&self.client, job_id).await
    }

    pub async fn poll_rdm_export_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::RDM_EXPORT.poll(&self.client, job_id, config).await
    }

    async fn find_rdm_database(&self, rdm_name: &str, server_name: &str) -> Result<Value> {
        let mut databases = self
            .search_databases(server_name, &format!("databaseName LIKE \"{rdm_name}*\""), 100, 0)
            .await?;
        match databases.len() {
            0 => Err(IrpError::api(format!(
                "RDM '{rdm_name}' not found on server '{server_name}'"
            ))),
            1 => Ok(databases.remove(0)),
            _ => Err(IrpError::api(format!(
                "Multiple RDMs found with name '{rdm_name}' on server '{server_name}'"
            ))),
        }
    }

    /// Database id of the RDM whose name starts with `rdm_name`.
    pub async fn get_rdm_database_id(&self, rdm_name: &str, server_name: &str) -> Result<i64> {
        let database = self.find_rdm_database(rdm_name, server_name).await?;
        extract::require_i64(&database, "databaseId", "database search response").map_err(
            |error| error.context(format!("Failed to extract databaseId for RDM '{rdm_name}'")),
        )
    }

    /// Full database name of the RDM whose name starts with `rdm_name`.
    /// Exports append a suffix to the requested name.
    pub async fn get_rdm_database_full_name(
        &self,
        rdm_name: &str,
        server_name: &str,
    ) -> Result<String> {
        let database = self.find_rdm_database(rdm_name, server_name).await?;
        extract::require_str(&database, "databaseName", "database search response")
            .map(str::to_owned)
            .map_err(|error| {
                error.context(format!("Failed to extract databaseName for RDM '{rdm_name}'"))
            })
    }

    pub async fn search_databases(
        &self,
        server_name: &str,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        let server_id = self.server_id(server_name).await?;
        self.client
            .get_json(
                &endpoints::server_databases(server_id),
                RequestOptions::new().page(limit, offset).filter(filter),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search databases"))
    }

    pub async fn search_databases_paginated(
        &self,
        server_name: &str,
        filter: &str,
    ) -> Result<Vec<Value>> {
        let server_id = self.server_id(server_name).await?;
        self.client
            .get_all_pages(&endpoints::server_databases(server_id), filter)
            .await
            .map_err(|error| error.context("Failed to search databases"))
    }

    /// Start deleting an RDM database; returns the Data Bridge job id.
    pub async fn submit_delete_rdm_job(&self, rdm_name: &str, server_name: &str) -> Result<String> {
        validators::non_empty_str(rdm_name, "rdm_name")?;
        validators::non_empty_str(server_name, "server_name")?;
        info!(rdm_name, server_name, "submitting delete RDM job");

        let full_name = self.get_rdm_database_full_name(rdm_name, server_name).await?;
        let response = self
            .client
            .request_json(
                HttpMethod::Delete,
                &endpoints::databridge_database(server_name, &full_name),
                RequestOptions::new(),
            )
            .await
            .map_err(|error| error.context(format!("Failed to delete RDM '{rdm_name}'")))?;
        match response.get("jobId") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(IrpError::api(format!(
                "Failed to delete RDM '{rdm_name}': Delete RDM response did not contain jobId: {response}"
            ))),
        }
    }

    pub async fn get_databridge_job(&self, job_id: &str) -> Result<DataBridgeJobStatus> {
        validators::non_empty_str(job_id, "job_id")?;
        self.client
            .request(
                HttpMethod::Get,
                &endpoints::databridge_job(job_id),
                RequestOptions::new(),
            )
            .await
            .map(|response| DataBridgeJobStatus::parse(&response.text()))
            .map_err(|error| {
                error.context(format!("Failed to get databridge job status for '{job_id}'"))
            })
    }

    /// Poll a delete job until it succeeds; any status other than
    /// `Enqueued`, `Processing` or `Succeeded` is a failure.
    pub async fn poll_delete_rdm_job_to_completion(
        &self,
        job_id: &str,
        config: &PollConfig,
    ) -> Result<DataBridgeJobStatus> {
        validators::non_empty_str(job_id, "job_id")?;
        config.validate()?;
        let start = Instant::now();
        loop {
            info!(job_id, "polling delete RDM job");
            let status = self.get_databridge_job(job_id).await?;
            info!(job_id, status = status.as_str(), "delete RDM job status");

            if status == DataBridgeJobStatus::Succeeded {
                return Ok(status);
            }
            if !status.is_in_progress() {
                return Err(IrpError::job(format!(
                    "Delete RDM job ID {job_id} failed with status: {}",
                    status.as_str()
                )));
            }
            if start.elapsed() > config.timeout {
                let timeout = config.timeout.as_secs();
                error!(job_id, timeout_secs = timeout, status = status.as_str(), "delete RDM job timed out");
                return Err(IrpError::job(format!(
                    "Delete RDM job ID {job_id} did not complete within {timeout} seconds. Last status: {}",
                    status.as_str()
                )));
            }
            tokio::time::sleep(config.interval).await;
        }
    }

    /// Grant a group access to an RDM database. Without `group_id` the
    /// client's configured Data Bridge group is used.
    pub async fn add_group_access_to_rdm(
        &self,
        database_name: &str,
        group_id: Option<&str>,
        server_name: &str,
    ) -> Result<Value> {
        validators::non_empty_str(database_name, "database_name")?;
        validators::non_empty_str(server_name, "server_name")?;
        let group_id = match group_id {
            Some(group_id) => group_id.to_owned(),
            None => self.client.config().databridge_group_id.clone().ok_or_else(|| {
                IrpError::api(
                    "group_id parameter not provided and DATABRIDGE_GROUP_ID environment variable is not set",
                )
            })?,
        };
        validators::non_empty_str(&group_id, "group_id")?;

        let body = json!([{
            "operation": "Add",
            "targetProperty": "groupId",
            "value": group_id,
        }]);
        let response = self
            .client
            .request(
                HttpMethod::Patch,
                &endpoints::databridge_database_access(server_name, database_name),
                RequestOptions::new().json(body),
            )
            .await
            .map_err(|error| {
                error.context(format!("Failed to add group access to RDM '{database_name}'"))
            })?;
        if response.status == 204 {
            return Ok(json!({}));
        }
        extract::json_body(&response)
    }

    pub async fn search_imported_rdms(
        &self,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        self.client
            .get_json(
                endpoints::IMPORTED_RDMS,
                RequestOptions::new().page(limit, offset).filter(filter),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search imported RDMs"))
    }

    /// Import an RDM `.bak` file into the EDM called `edm_name`.
    ///
    /// Creates an `RDM` import folder, uploads the file to its S3 location
    /// and submits the import job. Returns the job id and request body.
    pub async fn submit_rdm_import_job(
        &self,
        rdm_name: &str,
        edm_name: &str,
        rdm_file_path: &Path,
    ) -> Result<(i64, Value)> {
        validators::non_empty_str(rdm_name, "rdm_name")?;
        validators::non_empty_str(edm_name, "edm_name")?;
        validators::file_exists(rdm_file_path)?;

        let edms = self
            .edms()
            .search_edms(&format!("exposureName=\"{edm_name}\""), 100, 0)
            .await?;
        let edm = edms
            .first()
            .ok_or_else(|| IrpError::api(format!("EDM '{edm_name}' not found")))?;
        let resource_uri = extract::require_str(edm, "uri", "EDM search response")
            .map_err(|error| error.context("Failed to extract resource URI from EDM"))?;

        let folder = self
            .client
            .request_json(
                HttpMethod::Post,
                endpoints::IMPORT_FOLDERS,
                RequestOptions::new().json(json!({
                    "folderType": "RDM",
                    "properties": {"fileExtension": "bak"}
                })),
            )
            .await?;
        let context = "create import folder response";
        let folder_id = extract::require_i64(&folder, "folderId", context)?;
        let folder_type = extract::require_str(&folder, "folderType", context)?;
        let upload_details = extract::require(&folder, "uploadDetails", context)
            .and_then(|details| extract::require(details, "resultsFile", context))?;

        self.s3
            .upload_file(rdm_file_path, upload_details, None)
            .await?;

        let body = json!({
            "importType": folder_type,
            "resourceUri": resource_uri,
            "settings": {
                "folderId": folder_id,
                "rdmName": rdm_name,
            }
        });
        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::IMPORT_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "RDM import job submission"))?;
        info!(rdm_name, job_id, "submitted RDM import job");
        Ok((job_id, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::edm::DEFAULT_DATABASE_SERVER;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::job::tests::scripted_client;
    use crate::retry::RetryConfig;
    use crate::s3::tests::{upload_details, MemoryProvider};
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_poll() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn databridge_status_reads_bare_and_quoted_bodies() {
        assert_eq!(DataBridgeJobStatus::parse("Processing\n"), DataBridgeJobStatus::Processing);
        assert_eq!(DataBridgeJobStatus::parse("\"Succeeded\""), DataBridgeJobStatus::Succeeded);
        assert_eq!(
            DataBridgeJobStatus::parse("Failed"),
            DataBridgeJobStatus::Other(String::from("Failed"))
        );
    }

    #[tokio::test]
    async fn delete_poll_continues_until_succeeded() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push(HttpResponse::new(200, "Enqueued"));
        http.push(HttpResponse::new(200, "Processing"));
        http.push(HttpResponse::new(200, "Succeeded"));
        let rdms = RdmManager::new(scripted_client(http.clone()));

        let status = rdms
            .poll_delete_rdm_job_to_completion("db-job-1", &fast_poll())
            .await
            .unwrap();

        assert_eq!(status, DataBridgeJobStatus::Succeeded);
        assert_eq!(http.requests().len(), 3);
        assert!(http.requests()[0].url.ends_with("/databridge/v1/jobs/db-job-1"));
    }

    #[tokio::test]
    async fn unexpected_delete_status_fails_the_job() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push(HttpResponse::new(200, "Enqueued"));
        http.push(HttpResponse::new(200, "Failed"));
        let rdms = RdmManager::new(scripted_client(http));

        let error = rdms
            .poll_delete_rdm_job_to_completion("db-job-1", &fast_poll())
            .await
            .unwrap_err();

        assert_eq!(error.code(), "irp.job");
        assert_eq!(error.to_string(), "Delete RDM job ID db-job-1 failed with status: Failed");
    }

    #[tokio::test]
    async fn delete_resolves_full_database_name() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"serverId": 3}]));
        http.push_json(200, json!([{"databaseId": 8, "databaseName": "RDM_A_x1y2"}]));
        http.push_json(200, json!({"jobId": "db-job-9"}));
        let rdms = RdmManager::new(scripted_client(http.clone()));

        let job_id = rdms
            .submit_delete_rdm_job("RDM_A", DEFAULT_DATABASE_SERVER)
            .await
            .unwrap();

        assert_eq!(job_id, "db-job-9");
        let requests = http.requests();
        assert_eq!(requests[1].query_value("filter"), Some("databaseName LIKE \"RDM_A*\""));
        assert!(requests[2]
            .url
            .ends_with("/databridge/v1/sql-instances/databridge-1/databases/RDM_A_x1y2"));
    }

    #[tokio::test]
    async fn group_access_uses_configured_group_and_accepts_no_content() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push(HttpResponse::new(204, Vec::new()));
        let config = ClientConfig::default()
            .with_base_url("https://api.test")
            .with_retry(RetryConfig::no_retry())
            .with_databridge_group_id("group-7");
        let rdms = RdmManager::new(Client::with_http_client(config, http.clone()));

        let response = rdms
            .add_group_access_to_rdm("RDM_A_x1y2", None, DEFAULT_DATABASE_SERVER)
            .await
            .unwrap();

        assert_eq!(response, json!({}));
        assert_eq!(
            http.requests()[0].json_body(),
            json!([{"operation": "Add", "targetProperty": "groupId", "value": "group-7"}])
        );
    }

    #[tokio::test]
    async fn group_access_without_group_is_an_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        let rdms = RdmManager::new(scripted_client(http.clone()));

        let error = rdms
            .add_group_access_to_rdm("RDM_A", None, DEFAULT_DATABASE_SERVER)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("DATABRIDGE_GROUP_ID"));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn export_refuses_existing_rdm_name() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"serverId": 3}]));
        http.push_json(200, json!([{"serverId": 3}]));
        http.push_json(200, json!([{"databaseName": "RDM_A_old"}]));
        let rdms = RdmManager::new(scripted_client(http));
        let request = RdmExportRequest::new("databridge-1", "RDM_A", vec![String::from("run")]);

        let error = rdms.submit_rdm_export_job(&request).await.unwrap_err();

        assert!(error.to_string().contains("(found: 'RDM_A_old')"));
    }

    #[tokio::test]
    async fn export_of_plt_group_requests_plt_losses() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"serverId": 3}]));
        http.push_json(200, json!([{"uri": "/analyses/4", "analysisFramework": "PLT"}]));
        http.push_location(201, "https://api.test/platform/export/v1/jobs/12");
        let rdms = RdmManager::new(scripted_client(http.clone()));
        let mut request = RdmExportRequest::new("databridge-1", "RDM_A", vec![String::from("HD group")]);
        request.database_id = Some(8);
        request.lookup.group_names.insert(String::from("HD group"));

        let outcome = rdms.submit_rdm_export_job(&request).await.unwrap();

        let SubmitOutcome::Submitted { job_id, body, .. } = outcome else {
            panic!("expected submission");
        };
        assert_eq!(job_id, 12);
        assert_eq!(
            body["settings"],
            json!({"databaseId": 8, "serverId": 3, "exportHdLossesAs": "PLT"})
        );
        assert_eq!(
            http.requests()[1].query_value("filter"),
            Some("analysisName = \"HD group\" AND engineType = \"Group\"")
        );
    }

    #[tokio::test]
    async fn rdm_import_uploads_results_file() {
        let dir = tempfile::tempdir().unwrap();
        let bak = dir.path().join("rdm.bak");
        std::fs::write(&bak, b"backup").unwrap();
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"uri": "/platform/riskdata/v1/exposures/5"}]));
        http.push_json(
            201,
            json!({
                "folderId": "41",
                "folderType": "RDM",
                "uploadDetails": {"resultsFile": upload_details("https://bucket.s3.amazonaws.com/imports/41/rdm.bak")}
            }),
        );
        http.push_location(201, "https://api.test/platform/import/v1/jobs/300");
        let memory = Arc::new(InMemory::new());
        let s3 = S3Manager::new(Arc::new(MemoryProvider(memory.clone())), http.clone());
        let rdms = RdmManager::new(scripted_client(http)).with_s3(s3);

        let (job_id, body) = rdms.submit_rdm_import_job("RDM_A", "EDM_A", &bak).await.unwrap();

        assert_eq!(job_id, 300);
        assert_eq!(body["settings"], json!({"folderId": 41, "rdmName": "RDM_A"}));
        let stored = memory
            .get(&ObjectPath::from("imports/41/rdm.bak"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), b"backup");
    }
}
