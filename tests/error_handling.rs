//! Behavior-driven tests for error reporting
//!
//! These tests verify that failures carry a stable category code and a
//! message that tells the caller what went wrong and where.

use std::sync::Arc;
use std::time::Duration;

use irp_core::{HttpError, HttpResponse, ImportType, IrpError, PollConfig, ValidationError};
use irp_tests::{scripted_irp, ScriptedHttpClient};
use serde_json::json;
use tempfile::tempdir;

// =============================================================================
// Validation
// =============================================================================

#[test]
fn when_poll_interval_is_zero_the_config_is_rejected() {
    let error = PollConfig::new(Duration::ZERO, Duration::from_secs(60)).expect_err("zero interval");

    assert_eq!(error, ValidationError::NonPositive { field: "interval" });
    assert_eq!(error.to_string(), "field 'interval' must be a positive integer");
}

#[test]
fn when_import_type_is_unknown_the_allowed_types_are_listed() {
    let error = "CSV".parse::<ImportType>().expect_err("unknown type");
    assert_eq!(
        error.to_string(),
        "Invalid import_type 'CSV'. Must be one of: EDM, MRI, RDM"
    );
    assert_eq!(" rdm ".parse::<ImportType>(), Ok(ImportType::Rdm));
}

#[tokio::test]
async fn when_required_names_are_blank_no_request_is_sent() {
    let http = Arc::new(ScriptedHttpClient::new());
    let irp = scripted_irp(http.clone());

    let error = irp
        .edm()
        .exposure_id_by_name("   ")
        .await
        .expect_err("blank name");

    assert_eq!(error.code(), "irp.validation");
    assert_eq!(error.to_string(), "field 'edm_name' must be a non-empty string");
    assert!(http.requests().is_empty());
}

// =============================================================================
// Malformed responses
// =============================================================================

#[tokio::test]
async fn when_workflow_status_lacks_progress_polling_stops_with_an_api_error() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!({"status": "RUNNING"}));
    let irp = scripted_irp(http.clone());

    let error = irp
        .client()
        .poll_workflow_to_completion(7, &PollConfig::single())
        .await
        .expect_err("progress missing");

    assert_eq!(error.code(), "irp.api");
    assert_eq!(
        error.to_string(),
        "Missing 'status' or 'progress' in job response for workflow 7"
    );
    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn when_a_created_resource_has_no_location_the_operation_is_named() {
    // Given: EDM creation answered with 201 but no Location header
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"serverId": 5}]));
    http.push_json(200, json!([{"exposureSetId": 41}]));
    http.push(HttpResponse::new(201, Vec::new()));
    let irp = scripted_irp(http);

    // When: Creating the EDM
    let error = irp
        .edm()
        .submit_create_edm_job("EDM_A", "databridge-1")
        .await
        .expect_err("no job id");

    // Then: The message names the EDM and the missing header
    assert_eq!(error.code(), "irp.api");
    assert_eq!(
        error.to_string(),
        "Failed to create EDM 'EDM_A': EDM creation succeeded but Location header is missing"
    );
}

#[tokio::test]
async fn when_an_edm_search_finds_nothing_the_error_says_how_many_were_found() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([]));
    let irp = scripted_irp(http);

    let error = irp
        .edm()
        .exposure_id_by_name("EDM_A")
        .await
        .expect_err("no EDM");

    assert_eq!(error.code(), "irp.api");
    assert!(error.to_string().contains("found 0"));
}

// =============================================================================
// Transport and HTTP failures
// =============================================================================

#[tokio::test]
async fn when_the_connection_fails_the_context_is_kept() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_error(HttpError::connect("connection refused"));
    let irp = scripted_irp(http);

    let error = irp.client().get_workflow(4).await.expect_err("no connection");

    assert_eq!(error.code(), "irp.api");
    let message = error.to_string();
    assert!(message.starts_with("Failed to get workflow status for workflow ID 4: request error"));
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn when_the_server_returns_text_the_body_is_quoted_in_the_error() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(HttpResponse::new(404, "Not Found"));
    let irp = scripted_irp(http);

    let error = irp.job().get_risk_data_job(5).await.expect_err("not found");

    assert!(matches!(error, IrpError::Api { .. }));
    assert!(error
        .to_string()
        .contains("HTTP request failed: 404 for GET https://api.test/platform/riskdata/v1/jobs/5 | text: Not Found"));
}

// =============================================================================
// Job outcomes
// =============================================================================

#[tokio::test]
async fn when_export_is_unfinished_results_cannot_be_downloaded() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!({"status": "RUNNING", "progress": 50}));
    let irp = scripted_irp(http.clone());
    let dir = tempdir().expect("tempdir");

    let error = irp
        .export_job()
        .download_export_results(12, dir.path())
        .await
        .expect_err("not finished");

    assert_eq!(error.code(), "irp.job");
    assert_eq!(
        error.to_string(),
        "Export job 12 is not finished (status: RUNNING). Cannot download results."
    );
    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn when_finished_export_has_no_download_task_the_job_is_named() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(
        200,
        json!({"status": "FINISHED", "tasks": [{"name": "EXPORT", "output": {}}]}),
    );
    let irp = scripted_irp(http);
    let dir = tempdir().expect("tempdir");

    let error = irp
        .export_job()
        .download_export_results(12, dir.path())
        .await
        .expect_err("no url");

    assert_eq!(error.code(), "irp.api");
    assert_eq!(error.to_string(), "No download URL found in export job 12");
}

#[tokio::test]
async fn when_an_export_download_breaks_off_no_partial_archive_is_left() {
    // Given: A finished export whose archive stream fails after two chunks
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(
        200,
        json!({"status": "FINISHED", "tasks": [{
            "name": "DOWNLOAD_RESULTS",
            "output": {"log": {"downloadUrl": "https://cdn.test/out/run_Losses.zip"}}
        }]}),
    );
    http.push_chunked(
        200,
        vec![
            Ok(b"PK\x03\x04".to_vec()),
            Ok(vec![0_u8; 4096]),
            Err(HttpError::new("connection reset by peer")),
        ],
    );
    let irp = scripted_irp(http);
    let dir = tempdir().expect("tempdir");

    // When: Downloading the results
    let error = irp
        .export_job()
        .download_export_results(12, dir.path())
        .await
        .expect_err("stream broke off");

    // Then: The job is named and the truncated archive was removed
    let message = error.to_string();
    assert!(message.starts_with("Failed to download export results for job 12"));
    assert!(message.contains("connection reset by peer"));
    assert!(!dir.path().join("run_Losses.zip").exists());
}

#[tokio::test(start_paused = true)]
async fn when_a_job_times_out_the_job_kind_is_named() {
    let http = Arc::new(ScriptedHttpClient::new());
    for _ in 0..3 {
        http.push_json(200, json!({"status": "PENDING", "progress": 0}));
    }
    let irp = scripted_irp(http);
    let config = PollConfig::new(Duration::from_secs(30), Duration::from_secs(45))
        .expect("valid poll config");

    let error = irp
        .analysis()
        .poll_analysis_job_to_completion(81, &config)
        .await
        .expect_err("times out");

    assert_eq!(error.code(), "irp.job");
    assert!(error
        .to_string()
        .ends_with("ID 81 did not complete within 45 seconds. Last status: PENDING"));
}
