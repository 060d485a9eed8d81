//! Platform export jobs and their result downloads.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde_json::Value;
use tracing::info;

use crate::client::Client;
use crate::error::{IrpError, Result};
use crate::job::JobKind;
use crate::polling::PollConfig;
use crate::s3::S3Manager;
use crate::validators;

const DOWNLOAD_TASK: &str = "DOWNLOAD_RESULTS";

#[derive(Debug, Clone)]
pub struct ExportJobManager {
    client: Client,
    s3: S3Manager,
}

impl ExportJobManager {
    pub fn new(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    pub async fn get_export_job(&self, job_id: i64) -> Result<Value> {
        JobKind::EXPORT.get(&self.client, job_id).await
    }

    pub async fn poll_export_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::EXPORT.poll(&self.client, job_id, config).await
    }

    /// Download the archive produced by a `FINISHED` export job into
    /// `output_dir`, keeping the file name from the download URL.
    pub async fn download_export_results(&self, job_id: i64, output_dir: &Path) -> Result<PathBuf> {
        validators::positive(job_id, "job_id")?;
        let job = self.get_export_job(job_id).await?;
        let status = job.get("status").and_then(Value::as_str).unwrap_or("unknown");
        if status != "FINISHED" {
            return Err(IrpError::job(format!(
                "Export job {job_id} is not finished (status: {status}). Cannot download results."
            )));
        }

        let url = download_url(&job)
            .ok_or_else(|| IrpError::api(format!("No download URL found in export job {job_id}")))?;
        let file_name = file_name_from_url(url).ok_or_else(|| {
            IrpError::api(format!("Invalid download URL in export job {job_id}"))
        })?;

        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            IrpError::file(format!(
                "Failed to create output directory '{}': {e}",
                output_dir.display()
            ))
        })?;
        let destination = output_dir.join(file_name);
        info!(job_id, destination = %destination.display(), "downloading export results");
        self.s3
            .download_from_url(url, &destination)
            .await
            .map_err(|error| {
                IrpError::api(format!(
                    "Failed to download export results for job {job_id}: {error}"
                ))
            })?;
        Ok(destination)
    }
}

fn download_url(job: &Value) -> Option<&str> {
    job.get("tasks")?
        .as_array()?
        .iter()
        .find(|task| task.get("name").and_then(Value::as_str) == Some(DOWNLOAD_TASK))?
        .pointer("/output/log/downloadUrl")?
        .as_str()
        .filter(|url| !url.is_empty())
}

/// Percent-decoded last path segment, ignoring any query string.
fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    (!decoded.is_empty()).then_some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::job::tests::scripted_client;
    use serde_json::json;
    use std::sync::Arc;

    fn finished_job(url: &str) -> Value {
        json!({
            "jobId": 12,
            "status": "FINISHED",
            "tasks": [
                {"name": "EXPORT_RESULTS", "output": {}},
                {"name": "DOWNLOAD_RESULTS", "output": {"log": {"downloadUrl": url}}}
            ]
        })
    }

    #[test]
    fn file_name_is_decoded_and_query_dropped() {
        assert_eq!(
            file_name_from_url("https://cdn.test/exports/23530777_usfl%20commercial_Losses.zip?sig=abc")
                .as_deref(),
            Some("23530777_usfl commercial_Losses.zip")
        );
        assert_eq!(file_name_from_url("https://cdn.test/"), None);
    }

    #[tokio::test]
    async fn unfinished_job_cannot_be_downloaded() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!({"status": "RUNNING"}));
        let exports = ExportJobManager::new(scripted_client(http));
        let dir = tempfile::tempdir().unwrap();

        let error = exports.download_export_results(12, dir.path()).await.unwrap_err();

        assert_eq!(error.code(), "irp.job");
        assert_eq!(
            error.to_string(),
            "Export job 12 is not finished (status: RUNNING). Cannot download results."
        );
    }

    #[tokio::test]
    async fn missing_download_task_is_an_api_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!({"status": "FINISHED", "tasks": []}));
        let exports = ExportJobManager::new(scripted_client(http));
        let dir = tempfile::tempdir().unwrap();

        let error = exports.download_export_results(12, dir.path()).await.unwrap_err();

        assert_eq!(error.to_string(), "No download URL found in export job 12");
    }

    #[tokio::test]
    async fn results_are_written_under_output_dir() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, finished_job("https://cdn.test/out/run_Losses.zip?token=1"));
        http.push(HttpResponse::new(200, b"PK\x03\x04".to_vec()));
        let exports = ExportJobManager::new(scripted_client(http.clone()));
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("nested");

        let path = exports.download_export_results(12, &output_dir).await.unwrap();

        assert_eq!(path, output_dir.join("run_Losses.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04");
        assert_eq!(http.requests()[1].url, "https://cdn.test/out/run_Losses.zip?token=1");
    }

    #[tokio::test]
    async fn failed_download_names_the_job() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, finished_job("https://cdn.test/out/run.zip"));
        http.push(HttpResponse::new(403, Vec::new()));
        let exports = ExportJobManager::new(scripted_client(http));
        let dir = tempfile::tempdir().unwrap();

        let error = exports.download_export_results(12, dir.path()).await.unwrap_err();

        assert!(error
            .to_string()
            .starts_with("Failed to download export results for job 12"));
    }
}
