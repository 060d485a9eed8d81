//! MRI imports: account and location CSV files loaded into a portfolio.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::client::{Client, RequestOptions};
use crate::constants::endpoints;
use crate::edm::EdmManager;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location};
use crate::http_client::HttpMethod;
use crate::job::JobKind;
use crate::polling::PollConfig;
use crate::portfolio::PortfolioManager;
use crate::s3::S3Manager;
use crate::validators;

pub const DEFAULT_DELIMITER: &str = "TAB";

fn default_delimiter() -> String {
    String::from(DEFAULT_DELIMITER)
}

/// Files and target of one MRI import.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MriImportRequest {
    pub edm_name: String,
    pub portfolio_name: String,
    pub accounts_file_path: PathBuf,
    pub locations_file_path: PathBuf,
    /// Optional `.mff` mapping file.
    #[serde(default)]
    pub mapping_file_path: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl MriImportRequest {
    pub fn new(
        edm_name: impl Into<String>,
        portfolio_name: impl Into<String>,
        accounts_file_path: impl Into<PathBuf>,
        locations_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            edm_name: edm_name.into(),
            portfolio_name: portfolio_name.into(),
            accounts_file_path: accounts_file_path.into(),
            locations_file_path: locations_file_path.into(),
            mapping_file_path: None,
            delimiter: default_delimiter(),
        }
    }

    pub fn with_mapping_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mapping_file_path = Some(path.into());
        self
    }

    /// Upload slots requested from the import folder, paired with local files.
    fn files(&self) -> Vec<(&'static str, &Path)> {
        let mut files = vec![
            ("accountsFile", self.accounts_file_path.as_path()),
            ("locationsFile", self.locations_file_path.as_path()),
        ];
        if let Some(mapping) = &self.mapping_file_path {
            files.push(("mappingFile", mapping.as_path()));
        }
        files
    }
}

#[derive(Debug, Clone)]
pub struct MriImportManager {
    client: Client,
    s3: S3Manager,
}

impl MriImportManager {
    pub fn new(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    /// Upload the request's files to a new `MRI` import folder and submit
    /// the import into the named portfolio. Returns the job id and request
    /// body.
    pub async fn submit_mri_import_job(&self, request: &MriImportRequest) -> Result<(i64, Value)> {
        let edm_name = request.edm_name.as_str();
        let portfolio_name = request.portfolio_name.as_str();
        validators::non_empty_str(edm_name, "edm_name")?;
        validators::non_empty_str(portfolio_name, "portfolio_name")?;
        let files = request.files();
        for (_, path) in &files {
            validators::file_exists(path)?;
        }

        info!(edm_name, "looking up EDM");
        let exposure_id = EdmManager::new(self.client.clone())
            .exposure_id_by_name(edm_name)
            .await?;

        info!(portfolio_name, "looking up portfolio");
        let portfolios = PortfolioManager::new(self.client.clone())
            .search_portfolios(
                exposure_id,
                &format!("portfolioName=\"{portfolio_name}\""),
                100,
                0,
            )
            .await?;
        let portfolio = match portfolios.as_slice() {
            [] => {
                return Err(IrpError::api(format!(
                    "Portfolio with name {portfolio_name} not found"
                )))
            }
            [portfolio] => portfolio,
            many => {
                return Err(IrpError::api(format!(
                    "{} portfolios found with name {portfolio_name}, please use a unique name",
                    many.len()
                )))
            }
        };
        let portfolio_id = extract::require_i64(portfolio, "portfolioId", "portfolio search response")
            .map_err(|error| {
                error.context(format!(
                    "Failed to extract portfolio ID for portfolio '{portfolio_name}'"
                ))
            })?;

        let file_types: Vec<&str> = files.iter().map(|(slot, _)| *slot).collect();
        info!("creating import folder");
        let folder = self
            .client
            .request_json(
                HttpMethod::Post,
                endpoints::IMPORT_FOLDERS,
                RequestOptions::new().json(json!({
                    "folderType": "MRI",
                    "properties": {
                        "fileExtension": "csv",
                        "fileTypes": file_types,
                    }
                })),
            )
            .await?;
        let context = "create import folder response";
        let folder_id = extract::require_i64(&folder, "folderId", context)?;
        let upload_details = extract::require(&folder, "uploadDetails", context)?;

        for (slot, path) in &files {
            let details = upload_details
                .get(*slot)
                .ok_or_else(|| IrpError::api(format!("Upload details missing {slot}")))?;
            info!(file = %path.display(), slot, "uploading import file");
            self.s3.upload_file(path, details, None).await?;
        }

        let body = json!({
            "importType": "MRI",
            "resourceUri": endpoints::portfolio(exposure_id, portfolio_id),
            "settings": {
                "folderId": folder_id,
                "delimiter": request.delimiter,
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
            .and_then(|response| id_from_location(&response, "MRI import job submission"))?;
        info!(edm_name, portfolio_name, job_id, "submitted MRI import job");
        Ok((job_id, body))
    }

    pub async fn get_mri_import_job(&self, job_id: i64) -> Result<Value> {
        JobKind::IMPORT.get(&self.client, job_id).await
    }

    pub async fn poll_mri_import_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::IMPORT
            .named("MRI import job")
            .poll(&self.client, job_id, config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::ScriptedHttpClient;
    use crate::job::tests::scripted_client;
    use crate::s3::tests::{upload_details, MemoryProvider};
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStore;
    use std::sync::Arc;

    #[test]
    fn delimiter_defaults_to_tab() {
        let request: MriImportRequest = serde_json::from_value(json!({
            "edm_name": "EDM_A",
            "portfolio_name": "P1",
            "accounts_file_path": "accounts.csv",
            "locations_file_path": "locations.csv"
        }))
        .unwrap();

        assert_eq!(request.delimiter, "TAB");
        assert_eq!(request.files().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_fails_before_any_request() {
        let http = Arc::new(ScriptedHttpClient::new());
        let imports = MriImportManager::new(scripted_client(http.clone()));
        let request = MriImportRequest::new("EDM_A", "P1", "/nope/accounts.csv", "/nope/locations.csv");

        let error = imports.submit_mri_import_job(&request).await.unwrap_err();

        assert_eq!(error.code(), "irp.validation");
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn every_file_is_uploaded_and_import_targets_portfolio() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = dir.path().join("accounts.csv");
        let locations = dir.path().join("locations.csv");
        let mapping = dir.path().join("map.mff");
        std::fs::write(&accounts, "ACCNTNUM\n1\n").unwrap();
        std::fs::write(&locations, "LOCNUM\n1\n").unwrap();
        std::fs::write(&mapping, "mapping").unwrap();

        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"exposureId": 5}]));
        http.push_json(200, json!([{"portfolioId": 9}]));
        http.push_json(
            201,
            json!({
                "folderId": 61,
                "uploadDetails": {
                    "accountsFile": upload_details("https://bkt.s3.amazonaws.com/mri/61/accounts.csv"),
                    "locationsFile": upload_details("https://bkt.s3.amazonaws.com/mri/61/locations.csv"),
                    "mappingFile": upload_details("https://bkt.s3.amazonaws.com/mri/61/map.mff")
                }
            }),
        );
        http.push_location(201, "https://api.test/platform/import/v1/jobs/401");
        let memory = Arc::new(InMemory::new());
        let s3 = S3Manager::new(Arc::new(MemoryProvider(memory.clone())), http.clone());
        let imports = MriImportManager::new(scripted_client(http.clone())).with_s3(s3);
        let request =
            MriImportRequest::new("EDM_A", "P1", &accounts, &locations).with_mapping_file(&mapping);

        let (job_id, body) = imports.submit_mri_import_job(&request).await.unwrap();

        assert_eq!(job_id, 401);
        assert_eq!(
            body["resourceUri"],
            "/platform/riskdata/v1/exposures/5/portfolios/9"
        );
        assert_eq!(body["settings"], json!({"folderId": 61, "delimiter": "TAB"}));
        assert_eq!(
            http.requests()[2].json_body()["properties"]["fileTypes"],
            json!(["accountsFile", "locationsFile", "mappingFile"])
        );
        for key in ["mri/61/accounts.csv", "mri/61/locations.csv", "mri/61/map.mff"] {
            assert!(memory.head(&ObjectPath::from(key)).await.is_ok(), "{key}");
        }
    }

    #[tokio::test]
    async fn duplicate_portfolio_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = dir.path().join("accounts.csv");
        std::fs::write(&accounts, "x").unwrap();
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"exposureId": 5}]));
        http.push_json(200, json!([{"portfolioId": 9}, {"portfolioId": 10}]));
        let imports = MriImportManager::new(scripted_client(http));
        let request = MriImportRequest::new("EDM_A", "P1", &accounts, &accounts);

        let error = imports.submit_mri_import_job(&request).await.unwrap_err();

        assert_eq!(
            error.to_string(),
            "2 portfolios found with name P1, please use a unique name"
        );
    }
}
