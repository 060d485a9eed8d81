//! Behavior-driven tests for Data Bridge SQL templates
//!
//! These tests verify how `{{ name }}` placeholders are rendered in each
//! SQL context and what callers see when a script runs against a
//! connector.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use irp_core::{
    render_sql, DataBridgeConfig, DataBridgeError, DataBridgeManager, ResultSet, SqlConnector,
    SqlParams,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn params(value: Value) -> SqlParams {
    serde_json::from_value(value).expect("object params")
}

/// Records every statement and answers with fixed result sets.
#[derive(Default)]
struct FakeConnector {
    statements: Mutex<Vec<String>>,
    results: Vec<ResultSet>,
    error: Option<String>,
}

impl FakeConnector {
    fn answering(results: Vec<ResultSet>) -> Arc<Self> {
        Arc::new(Self {
            results,
            ..Self::default()
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            error: Some(message.to_owned()),
            ..Self::default()
        })
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().expect("statements lock").clone()
    }

    fn record(&self, sql: &str) -> Result<(), DataBridgeError> {
        self.statements
            .lock()
            .expect("statements lock")
            .push(sql.to_owned());
        match &self.error {
            Some(message) => Err(DataBridgeError::Query(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlConnector for FakeConnector {
    async fn query(
        &self,
        sql: &str,
        _database: Option<&str>,
    ) -> Result<Vec<ResultSet>, DataBridgeError> {
        self.record(sql)?;
        Ok(self.results.clone())
    }

    async fn execute(&self, sql: &str, _database: Option<&str>) -> Result<u64, DataBridgeError> {
        self.record(sql)?;
        Ok(12)
    }
}

fn accounts() -> ResultSet {
    ResultSet {
        columns: vec!["ACCGRPNUM".into(), "TIV".into()],
        rows: vec![
            vec![json!("A-1"), json!(1500.5)],
            vec![json!("A-2"), json!(200)],
        ],
    }
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn when_a_value_is_compared_it_is_rendered_as_a_literal() {
    let sql = render_sql(
        "SELECT * FROM acc WHERE name = {{ name }} AND year = {{ year }} AND active = {{ active }}",
        &params(json!({"name": "Lloyd's", "year": 2025, "active": false})),
    )
    .expect("rendered");

    assert_eq!(
        sql,
        "SELECT * FROM acc WHERE name = 'Lloyd''s' AND year = 2025 AND active = 0"
    );
}

#[test]
fn when_a_value_names_a_database_it_is_rendered_raw() {
    // Given: The same parameter used in a bracket and in a quoted string
    let template = "USE [{{ edm }}];\nSELECT DB_ID('{{ edm }}') AS id, * FROM portinfo_{{ cycle }}";

    // When: Rendering
    let sql = render_sql(template, &params(json!({"edm": "EDM Q1-2025", "cycle": 4})))
        .expect("rendered");

    // Then: Identifier contexts receive the raw text
    assert_eq!(
        sql,
        "USE [EDM Q1-2025];\nSELECT DB_ID('EDM Q1-2025') AS id, * FROM portinfo_4"
    );
}

#[test]
fn when_an_identifier_value_carries_sql_it_is_refused() {
    let error = render_sql(
        "SELECT * FROM [{{ edm }}].dbo.loc",
        &params(json!({"edm": "EDM]; DELETE FROM loc; --"})),
    )
    .expect_err("unsafe identifier");

    assert!(matches!(error, DataBridgeError::Query(_)));
    assert!(error
        .to_string()
        .contains("Invalid identifier value for parameter 'edm'"));
}

#[test]
fn when_a_placeholder_has_no_parameter_the_error_lists_what_was_provided() {
    let error = render_sql(
        "SELECT {{ a }} + {{ missing }}",
        &params(json!({"a": 1, "b": 2})),
    )
    .expect_err("missing parameter");

    assert!(error
        .to_string()
        .contains("Missing required parameter: 'missing'. Provided parameters: a, b"));
}

#[test]
fn when_braces_are_doubled_again_they_survive_rendering() {
    let sql = render_sql(
        "SELECT '{{{{' AS open_braces, {{ id }} AS id",
        &params(json!({"id": 3})),
    )
    .expect("rendered");

    assert_eq!(sql, "SELECT '{{' AS open_braces, 3 AS id");
}

#[test]
fn when_no_parameters_are_given_the_script_is_untouched() {
    let script = "SELECT '{{ not a placeholder }}'";
    assert_eq!(render_sql(script, &SqlParams::new()).expect("rendered"), script);
}

// =============================================================================
// Execution
// =============================================================================

#[tokio::test]
async fn when_user_runs_a_query_rows_come_back_as_records() {
    let connector = FakeConnector::answering(vec![accounts()]);
    let databridge = DataBridgeManager::new(connector.clone(), "databridge");

    let set = databridge
        .execute_query(
            "SELECT ACCGRPNUM, TIV FROM [{{ edm }}].dbo.accgrp",
            &params(json!({"edm": "EDM_A"})),
            None,
        )
        .await
        .expect("query ran");

    assert_eq!(set.len(), 2);
    assert_eq!(set.records()[0], json!({"ACCGRPNUM": "A-1", "TIV": 1500.5}));
    assert_eq!(
        connector.statements(),
        vec!["SELECT ACCGRPNUM, TIV FROM [EDM_A].dbo.accgrp".to_owned()]
    );
}

#[tokio::test]
async fn when_user_runs_a_command_the_affected_rows_are_returned() {
    let connector = FakeConnector::answering(Vec::new());
    let databridge = DataBridgeManager::new(connector.clone(), "DATABRIDGE");

    let affected = databridge
        .execute_command(
            "UPDATE acc SET flag = {{ flag }} WHERE id = {{ id }}",
            &params(json!({"flag": true, "id": 9})),
            Some("EDM_A"),
        )
        .await
        .expect("command ran");

    assert_eq!(affected, 12);
    assert_eq!(
        connector.statements(),
        vec!["UPDATE acc SET flag = 1 WHERE id = 9".to_owned()]
    );
}

#[tokio::test]
async fn when_a_script_file_fails_the_error_names_connection_and_file() {
    // Given: A script file and a connector that rejects it
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("summary.sql");
    std::fs::write(&script, "SELECT * FROM nope").expect("write script");
    let databridge = DataBridgeManager::new(FakeConnector::failing("Invalid object name 'nope'"), "reporting");

    // When: Running the file
    let error = databridge
        .execute_query_from_file(&script, &SqlParams::new(), None)
        .await
        .expect_err("query fails");

    // Then: The message carries the upper-cased connection and the path
    assert_eq!(error.code(), "irp.databridge.query");
    let message = error.to_string();
    assert!(message.contains("connection: REPORTING"));
    assert!(message.contains("summary.sql"));
    assert!(message.contains("Invalid object name 'nope'"));
}

#[tokio::test]
async fn when_a_script_file_is_missing_nothing_is_executed() {
    let connector = FakeConnector::answering(Vec::new());
    let databridge = DataBridgeManager::new(connector.clone(), "DATABRIDGE");

    let error = databridge
        .execute_query_from_file(
            std::path::Path::new("/no/such/script.sql"),
            &SqlParams::new(),
            None,
        )
        .await
        .expect_err("missing file");

    assert_eq!(error.code(), "irp.validation");
    assert!(connector.statements().is_empty());
}

#[tokio::test]
async fn when_the_server_is_unreachable_the_connection_test_is_false() {
    let databridge = DataBridgeManager::new(FakeConnector::failing("login failed"), "DATABRIDGE");
    assert!(!databridge.test_connection().await);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn when_connection_settings_are_missing_every_missing_variable_is_named() {
    let error = DataBridgeConfig::from_lookup(Some("analytics"), |name| match name {
        "MSSQL_ANALYTICS_SERVER" => Some(String::from("sql.test")),
        _ => None,
    })
    .expect_err("incomplete settings");

    assert_eq!(error.code(), "irp.databridge.config");
    let message = error.to_string();
    assert!(message.contains("MSSQL_ANALYTICS_USER"));
    assert!(message.contains("MSSQL_ANALYTICS_PASSWORD"));
    assert!(!message.contains("MSSQL_ANALYTICS_SERVER"));
}

#[test]
fn when_only_required_settings_are_given_defaults_fill_the_rest() {
    let config = DataBridgeConfig::from_lookup(None, |name| match name {
        "MSSQL_DATABRIDGE_SERVER" => Some(String::from("sql.test")),
        "MSSQL_DATABRIDGE_USER" => Some(String::from("reader")),
        "MSSQL_DATABRIDGE_PASSWORD" => Some(String::from("secret")),
        _ => None,
    })
    .expect("complete settings");

    assert_eq!(config.connection_name, "DATABRIDGE");
    assert_eq!(config.port, 1433);
    assert!(config.trust_cert);
    assert_eq!(config.timeout, std::time::Duration::from_secs(30));
}
