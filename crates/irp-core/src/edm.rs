//! Exposure data managers (EDMs): creation, data version upgrades, deletion,
//! `.bak` imports and the cedant/LOB lookups used by treaties.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::analysis::AnalysisManager;
use crate::client::{Client, RequestOptions};
use crate::constants::endpoints;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location, quoted_list};
use crate::http_client::HttpMethod;
use crate::job::{JobKind, JobManager};
use crate::polling::PollConfig;
use crate::s3::S3Manager;
use crate::validators;

pub const DEFAULT_DATABASE_SERVER: &str = "databridge-1";
pub const DEFAULT_IMPORT_SERVER: &str = "sql-instance-1";

/// One EDM to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EdmSpec {
    pub edm_name: String,
    pub server_name: String,
}

/// One EDM data version upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EdmUpgrade {
    pub edm_name: String,
    pub edm_version: String,
}

#[derive(Debug, Clone)]
pub struct EdmManager {
    client: Client,
    s3: S3Manager,
}

impl EdmManager {
    pub fn new(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    /// Use `s3` for `.bak` uploads.
    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    /// Fail if any of `edm_names` already exists.
    pub async fn validate_unique_edms(&self, edm_names: &[String]) -> Result<()> {
        let filter = format!("exposureName IN ({})", quoted_list(edm_names));
        let edms = self.search_edms(&filter, 100, 0).await?;
        if edms.is_empty() {
            return Ok(());
        }
        let existing = edms
            .iter()
            .map(|edm| extract::require_str(edm, "exposureName", "EDM search response"))
            .collect::<Result<Vec<_>>>()
            .map_err(|error| error.context("Failed to extract EDM names from search response"))?;
        Err(IrpError::api(format!(
            "The following EDMs already exist: {}; please use unique names",
            quoted_list(&existing)
        )))
    }

    pub async fn search_database_servers(&self, filter: &str) -> Result<Vec<Value>> {
        self.client
            .get_json(endpoints::DATA_SERVERS, RequestOptions::new().filter(filter))
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search database servers"))
    }

    pub async fn search_exposure_sets(&self, filter: &str) -> Result<Vec<Value>> {
        self.client
            .get_json(endpoints::EXPOSURE_SETS, RequestOptions::new().filter(filter))
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search exposure sets"))
    }

    /// Create an exposure set, returning its id.
    pub async fn create_exposure_set(&self, name: &str) -> Result<i64> {
        validators::non_empty_str(name, "name")?;
        let response = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::EXPOSURE_SETS,
                RequestOptions::new().json(json!({"exposureSetName": name})),
            )
            .await
            .and_then(|response| id_from_location(&response, "exposure set creation"));
        response.map_err(|error| error.context(format!("Failed to create exposure set '{name}'")))
    }

    pub async fn search_edms(&self, filter: &str, limit: u32, offset: u32) -> Result<Vec<Value>> {
        self.client
            .get_json(
                endpoints::EXPOSURES,
                RequestOptions::new().filter(filter).page(limit, offset),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search EDMs"))
    }

    /// Every EDM matching `filter`, across all pages.
    pub async fn search_edms_paginated(&self, filter: &str) -> Result<Vec<Value>> {
        self.client
            .get_all_pages(endpoints::EXPOSURES, filter)
            .await
            .map_err(|error| error.context("Failed to search EDMs"))
    }

    /// Exposure id of the single EDM called `edm_name`.
    pub async fn exposure_id_by_name(&self, edm_name: &str) -> Result<i64> {
        validators::non_empty_str(edm_name, "edm_name")?;
        let edms = self
            .search_edms(&format!("exposureName=\"{edm_name}\""), 100, 0)
            .await?;
        let edm = extract::exactly_one(edms, &format!("EDM with name '{edm_name}'"))?;
        extract::require_i64(&edm, "exposureId", "EDM search response").map_err(|error| {
            error.context(format!("Failed to extract exposure ID for EDM '{edm_name}'"))
        })
    }

    async fn server_id(&self, server_name: &str) -> Result<Value> {
        let servers = self
            .search_database_servers(&format!("serverName=\"{server_name}\""))
            .await?;
        if servers.len() != 1 {
            return Err(IrpError::reference_data(format!(
                "Database server '{server_name}' not found"
            )));
        }
        extract::require(&servers[0], "serverId", "database server response")
            .cloned()
            .map_err(|error| error.context("Failed to extract server ID"))
    }

    async fn exposure_set_id_or_create(&self, name: &str, filter: &str) -> Result<i64> {
        let sets = self.search_exposure_sets(filter).await?;
        match sets.first() {
            Some(set) => extract::require_i64(set, "exposureSetId", "exposure set search response")
                .map_err(|error| error.context("Failed to extract exposure set ID")),
            None => self.create_exposure_set(name).await,
        }
    }

    /// Submit creation of an empty EDM; returns the job id and request body.
    ///
    /// The exposure set of the same name is reused when it exists.
    pub async fn submit_create_edm_job(
        &self,
        edm_name: &str,
        server_name: &str,
    ) -> Result<(i64, Value)> {
        validators::non_empty_str(edm_name, "edm_name")?;
        let server_id = self.server_id(server_name).await?;
        let exposure_set_id = self
            .exposure_set_id_or_create(edm_name, &format!("exposureSetName={edm_name}"))
            .await?;

        let body = json!({"exposureName": edm_name, "serverId": server_id});
        info!(edm_name, exposure_set_id, "submitting EDM creation");
        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                &endpoints::exposure_set_exposures(exposure_set_id),
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "EDM creation"))
            .map_err(|error| error.context(format!("Failed to create EDM '{edm_name}'")))?;
        Ok((job_id, body))
    }

    /// Check name uniqueness, then submit one creation job per EDM.
    pub async fn submit_create_edm_jobs(&self, edms: &[EdmSpec]) -> Result<Vec<i64>> {
        validators::non_empty_list(edms, "edm_data")?;
        let names: Vec<String> = edms.iter().map(|edm| edm.edm_name.clone()).collect();
        self.validate_unique_edms(&names).await?;

        let mut job_ids = Vec::with_capacity(edms.len());
        for edm in edms {
            let (job_id, _) = self
                .submit_create_edm_job(&edm.edm_name, &edm.server_name)
                .await?;
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    pub async fn submit_upgrade_edm_data_version_job(
        &self,
        edm_name: &str,
        edm_version: &str,
    ) -> Result<(i64, Value)> {
        validators::non_empty_str(edm_name, "edm_name")?;
        validators::non_empty_str(edm_version, "edm_version")?;
        let exposure_id = self.exposure_id_by_name(edm_name).await?;

        let body = json!({"edmDataVersion": edm_version});
        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                &endpoints::exposure_data_upgrade(exposure_id),
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "EDM data version upgrade"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to upgrade EDM data version for EDM '{edm_name}'"
                ))
            })?;
        Ok((job_id, body))
    }

    pub async fn submit_upgrade_edm_data_version_jobs(
        &self,
        upgrades: &[EdmUpgrade],
    ) -> Result<Vec<i64>> {
        validators::non_empty_list(upgrades, "edm_data")?;
        let mut job_ids = Vec::with_capacity(upgrades.len());
        for upgrade in upgrades {
            let (job_id, _) = self
                .submit_upgrade_edm_data_version_job(&upgrade.edm_name, &upgrade.edm_version)
                .await?;
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    /// Upgrades are tracked as workflows, fetched one id at a time.
    pub async fn poll_data_version_upgrade_job_batch_to_completion(
        &self,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        JobKind::DATA_VERSION_UPGRADE
            .named("Upgrade edm version job")
            .poll_batch(&self.client, job_ids, config)
            .await
    }

    /// Delete an EDM together with every analysis run against it, waiting for
    /// the delete job to finish.
    pub async fn delete_edm(&self, edm_name: &str, config: &PollConfig) -> Result<Value> {
        let exposure_id = self.exposure_id_by_name(edm_name).await?;

        let analyses = AnalysisManager::new(self.client.clone());
        for analysis in analyses
            .search_analyses(&format!("exposureName=\"{edm_name}\""), 100, 0)
            .await?
        {
            let analysis_id = extract::require_i64(&analysis, "analysisId", "analysis data")
                .map_err(|error| error.context("Failed to extract analysis ID from analysis data"))?;
            analyses.delete_analysis(analysis_id).await?;
        }

        let job_id = self.submit_delete_edm_job(exposure_id).await?;
        JobManager::new(self.client.clone())
            .poll_risk_data_job_to_completion(job_id, config)
            .await
    }

    pub async fn submit_delete_edm_job(&self, exposure_id: i64) -> Result<i64> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .request(
                HttpMethod::Delete,
                &endpoints::exposure(exposure_id),
                RequestOptions::new(),
            )
            .await
            .and_then(|response| id_from_location(&response, "EDM deletion"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to delete EDM with exposure ID '{exposure_id}'"
                ))
            })
    }

    pub async fn get_cedants_by_edm(&self, exposure_id: i64) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_json(&endpoints::exposure_cedants(exposure_id), RequestOptions::new())
            .await
            .map(extract::into_list)
            .map_err(|error| {
                error.context(format!("Failed to get cedants for exposure ID '{exposure_id}'"))
            })
    }

    pub async fn get_lobs_by_edm(&self, exposure_id: i64) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_json(&endpoints::exposure_lobs(exposure_id), RequestOptions::new())
            .await
            .map(extract::into_list)
            .map_err(|error| {
                error.context(format!("Failed to get LOBs for exposure ID '{exposure_id}'"))
            })
    }

    /// Import an EDM from a SQL Server `.bak` file.
    ///
    /// Creates an `EDM` import folder, uploads the file to its S3 location,
    /// reuses or creates the exposure set and submits the import job.
    /// Returns the import job id and request body.
    pub async fn submit_edm_import_job(
        &self,
        edm_name: &str,
        edm_file_path: &Path,
        server_name: &str,
    ) -> Result<(i64, Value)> {
        validators::non_empty_str(edm_name, "edm_name")?;
        validators::file_exists(edm_file_path)?;
        validators::non_empty_str(server_name, "server_name")?;

        let server_id = self.server_id(server_name).await?;

        let folder = self
            .client
            .request_json(
                HttpMethod::Post,
                endpoints::IMPORT_FOLDERS,
                RequestOptions::new().json(json!({
                    "folderType": "EDM",
                    "properties": {"fileExtension": "bak"}
                })),
            )
            .await?;
        let context = "create import folder response";
        let folder_id = extract::require_i64(&folder, "folderId", context)?;
        let folder_type = extract::require_str(&folder, "folderType", context)?;
        let upload_details = extract::require(&folder, "uploadDetails", context)
            .and_then(|details| extract::require(details, "exposureFile", context))?;

        self.s3
            .upload_file(edm_file_path, upload_details, None)
            .await?;

        let exposure_set_id = self
            .exposure_set_id_or_create(edm_name, &format!("exposureSetName=\"{edm_name}\""))
            .await?;

        let body = json!({
            "importType": folder_type,
            "resourceUri": format!("{}/{exposure_set_id}", endpoints::EXPOSURE_SETS),
            "settings": {
                "folderId": folder_id,
                "exposureName": edm_name,
                "serverId": server_id,
            }
        });
        let response = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::IMPORT_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await?;
        let job_id = id_from_location(&response, "EDM import job submission")?;
        info!(edm_name, job_id, "submitted EDM import job");
        Ok((job_id, body))
    }

    pub async fn get_edm_import_job(&self, job_id: i64) -> Result<Value> {
        JobKind::IMPORT.get(&self.client, job_id).await
    }

    pub async fn poll_edm_import_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::IMPORT
            .named("EDM import job")
            .poll(&self.client, job_id, config)
            .await
    }
}
