//! Behavior-driven tests for the exposure lifecycle
//!
//! These tests follow an EDM from creation through imports to deletion,
//! checking the requests the platform receives and what lands in S3.

use std::sync::Arc;

use irp_core::{EdmSpec, HttpMethod, HttpResponse, ImportRequest, MriImportRequest, PollConfig};
use irp_tests::{scripted_irp, upload_details, with_memory_s3, ScriptedHttpClient};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde_json::json;
use tempfile::tempdir;

// =============================================================================
// EDM creation
// =============================================================================

#[tokio::test]
async fn when_user_creates_edms_names_are_checked_before_any_job_is_submitted() {
    // Given: One of the requested names is already taken
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"exposureName": "EDM_B"}]));
    let irp = scripted_irp(http.clone());
    let edms = vec![
        EdmSpec {
            edm_name: "EDM_A".into(),
            server_name: "databridge-1".into(),
        },
        EdmSpec {
            edm_name: "EDM_B".into(),
            server_name: "databridge-1".into(),
        },
    ];

    // When: Submitting both creations
    let error = irp
        .edm()
        .submit_create_edm_jobs(&edms)
        .await
        .expect_err("duplicate name");

    // Then: Only the uniqueness search was sent
    assert!(error.to_string().contains("EDM_B"));
    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn when_user_creates_an_edm_the_job_id_comes_from_the_location_header() {
    // Given: A known server and an existing exposure set
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"serverId": 5, "serverName": "databridge-1"}]));
    http.push_json(200, json!([{"exposureSetId": 41}]));
    http.push_location(201, "https://api.test/platform/riskdata/v1/jobs/900");
    let irp = scripted_irp(http.clone());

    // When: Creating the EDM
    let (job_id, body) = irp
        .edm()
        .submit_create_edm_job("EDM_A", "databridge-1")
        .await
        .expect("creation submitted");

    // Then: The job id is parsed and the body names the EDM and server
    assert_eq!(job_id, 900);
    assert_eq!(body, json!({"exposureName": "EDM_A", "serverId": 5}));
    let requests = http.requests();
    assert_eq!(requests[2].method, HttpMethod::Post);
    assert_eq!(
        requests[2].url,
        "https://api.test/platform/riskdata/v1/exposuresets/41/exposures"
    );
}

// =============================================================================
// Imports
// =============================================================================

#[tokio::test]
async fn when_user_imports_an_edm_backup_it_is_uploaded_then_imported() {
    // Given: A local .bak file and an import folder with upload details
    let dir = tempdir().expect("tempdir");
    let bak = dir.path().join("edm.bak");
    std::fs::write(&bak, b"backup").expect("write bak");

    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"serverId": 3}]));
    http.push_json(
        201,
        json!({
            "folderId": "12",
            "folderType": "EDM",
            "uploadDetails": {
                "exposureFile": upload_details("https://bkt.s3.amazonaws.com/imports/edm.bak")
            }
        }),
    );
    http.push_json(200, json!([{"exposureSetId": 8}]));
    http.push_location(201, "https://api.test/platform/import/v1/jobs/55");
    let (irp, memory) = with_memory_s3(scripted_irp(http.clone()), http.clone());

    // When: Submitting the import through the generic import manager
    let (job_id, body) = irp
        .import_job()
        .submit_job(&ImportRequest::edm("EDM_A", &bak))
        .await
        .expect("import submitted");

    // Then: The backup is in the bucket and the job targets the exposure set
    assert_eq!(job_id, 55);
    assert_eq!(body["importType"], "EDM");
    assert_eq!(body["resourceUri"], "/platform/riskdata/v1/exposuresets/8");
    let stored = memory
        .get(&ObjectPath::from("imports/edm.bak"))
        .await
        .expect("object stored")
        .bytes()
        .await
        .expect("object bytes");
    assert_eq!(stored.as_ref(), b"backup");
}

#[tokio::test]
async fn when_user_imports_mri_files_they_land_in_the_named_portfolio() {
    // Given: Account and location CSVs for an existing portfolio
    let dir = tempdir().expect("tempdir");
    let accounts = dir.path().join("accounts.csv");
    let locations = dir.path().join("locations.csv");
    std::fs::write(&accounts, "ACCNTNUM\n1\n").expect("write accounts");
    std::fs::write(&locations, "LOCNUM\n1\n").expect("write locations");

    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"exposureId": 5}]));
    http.push_json(200, json!([{"portfolioId": 9}]));
    http.push_json(
        201,
        json!({
            "folderId": 61,
            "uploadDetails": {
                "accountsFile": upload_details("https://bkt.s3.amazonaws.com/mri/61/accounts.csv"),
                "locationsFile": upload_details("https://bkt.s3.amazonaws.com/mri/61/locations.csv")
            }
        }),
    );
    http.push_location(201, "https://api.test/platform/import/v1/jobs/401");
    let (irp, memory) = with_memory_s3(scripted_irp(http.clone()), http.clone());
    let request = MriImportRequest::new("EDM_A", "P1", &accounts, &locations);

    // When: Submitting the MRI import
    let (job_id, body) = irp
        .import_job()
        .submit_job(&ImportRequest::Mri(request))
        .await
        .expect("import submitted");

    // Then: Both files are uploaded and the job points at the portfolio
    assert_eq!(job_id, 401);
    assert_eq!(
        body["resourceUri"],
        "/platform/riskdata/v1/exposures/5/portfolios/9"
    );
    assert_eq!(body["settings"]["delimiter"], "TAB");
    for key in ["mri/61/accounts.csv", "mri/61/locations.csv"] {
        assert!(memory.head(&ObjectPath::from(key)).await.is_ok(), "{key}");
    }
}

#[tokio::test]
async fn when_mri_portfolio_does_not_exist_nothing_is_uploaded() {
    let dir = tempdir().expect("tempdir");
    let accounts = dir.path().join("accounts.csv");
    std::fs::write(&accounts, "x").expect("write accounts");

    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"exposureId": 5}]));
    http.push_json(200, json!([]));
    let irp = scripted_irp(http.clone());
    let request = MriImportRequest::new("EDM_A", "P1", &accounts, &accounts);

    let error = irp
        .mri_import()
        .submit_mri_import_job(&request)
        .await
        .expect_err("missing portfolio");

    assert_eq!(error.to_string(), "Portfolio with name P1 not found");
    assert_eq!(http.requests().len(), 2);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_user_deletes_an_edm_its_analyses_go_first() {
    // Given: An EDM with one analysis and a delete job that finishes
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"exposureId": 10}]));
    http.push_json(200, json!([{"analysisId": 7}]));
    http.push(HttpResponse::new(204, Vec::new()));
    http.push_location(202, "https://api.test/platform/riskdata/v1/jobs/31");
    http.push_json(200, json!({"status": "FINISHED", "progress": 100}));
    let irp = scripted_irp(http.clone());

    // When: Deleting the EDM
    let job = irp
        .edm()
        .delete_edm("EDM_A", &PollConfig::single())
        .await
        .expect("edm deleted");

    // Then: The analysis delete precedes the EDM delete, then the job is polled
    assert_eq!(job["status"], "FINISHED");
    let requests = http.requests();
    let deletes: Vec<&str> = requests
        .iter()
        .filter(|r| r.method == HttpMethod::Delete)
        .map(|r| r.url.as_str())
        .collect();
    assert_eq!(
        deletes,
        vec![
            "https://api.test/platform/riskdata/v1/analyses/7",
            "https://api.test/platform/riskdata/v1/exposures/10",
        ]
    );
    assert_eq!(
        requests[4].url,
        "https://api.test/platform/riskdata/v1/jobs/31"
    );
}

#[tokio::test]
async fn when_edm_name_is_ambiguous_deletion_is_refused() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(200, json!([{"exposureId": 1}, {"exposureId": 2}]));
    let irp = scripted_irp(http.clone());

    let error = irp
        .edm()
        .delete_edm("EDM_A", &PollConfig::single())
        .await
        .expect_err("two EDMs share the name");

    assert!(error.to_string().contains("found 2"));
    assert_eq!(http.requests().len(), 1);
}
