use irp_core::{render_sql, DataBridgeManager, ResultSet, SqlParams};
use serde_json::{json, Value};

use crate::cli::{SqlAction, SqlSource};
use crate::error::CliError;

pub async fn run(action: &SqlAction) -> Result<Value, CliError> {
    match action {
        SqlAction::Render { source } => {
            let params = parse_params(&source.params)?;
            let sql = read_source(source)?;
            let rendered = render_sql(&sql, &params).map_err(irp_core::IrpError::from)?;
            Ok(Value::String(rendered))
        }
        SqlAction::Query {
            source,
            connection,
            database,
        } => {
            let params = parse_params(&source.params)?;
            let databridge = DataBridgeManager::from_env(connection.as_deref())?;
            let database = database.as_deref();
            let sets = match (&source.file, &source.query) {
                (Some(file), _) => {
                    databridge
                        .execute_query_from_file(file, &params, database)
                        .await?
                }
                (None, Some(query)) => {
                    vec![databridge.execute_query(query, &params, database).await?]
                }
                (None, None) => return Err(CliError::Argument("a query or --file is required".into())),
            };
            Ok(Value::Array(sets.iter().map(result_set_json).collect()))
        }
    }
}

fn read_source(source: &SqlSource) -> Result<String, CliError> {
    match (&source.file, &source.query) {
        (Some(file), _) => Ok(std::fs::read_to_string(file)?),
        (None, Some(query)) => Ok(query.clone()),
        (None, None) => Err(CliError::Argument("a query or --file is required".into())),
    }
}

fn result_set_json(set: &ResultSet) -> Value {
    json!({
        "columns": set.columns,
        "row_count": set.len(),
        "rows": set.records(),
    })
}

/// `name=value` pairs; JSON-parsable values keep their type.
fn parse_params(raw: &[String]) -> Result<SqlParams, CliError> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| CliError::Argument(format!("parameter '{pair}' must be NAME=VALUE")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(CliError::Argument(format!("parameter '{pair}' has an empty name")));
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
            Ok((name.to_owned(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source(query: Option<&str>, file: Option<PathBuf>, params: &[&str]) -> SqlSource {
        SqlSource {
            query: query.map(str::to_owned),
            file,
            params: params.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    #[test]
    fn params_keep_json_types() {
        let params = parse_params(&[
            "id=7".into(),
            "name=EDM A".into(),
            "code=\"007\"".into(),
            "flag=true".into(),
        ])
        .unwrap();

        assert_eq!(params["id"], json!(7));
        assert_eq!(params["name"], json!("EDM A"));
        assert_eq!(params["code"], json!("007"));
        assert_eq!(params["flag"], json!(true));
    }

    #[test]
    fn param_without_equals_is_rejected() {
        let error = parse_params(&["id".into()]).unwrap_err();
        assert_eq!(error.exit_code(), 2);
    }

    #[tokio::test]
    async fn render_substitutes_inline_query() {
        let action = SqlAction::Render {
            source: source(
                Some("SELECT * FROM [{{ db }}].dbo.acc WHERE id = {{ id }}"),
                None,
                &["db=EDM_A", "id=7"],
            ),
        };

        let value = run(&action).await.unwrap();

        assert_eq!(value, json!("SELECT * FROM [EDM_A].dbo.acc WHERE id = 7"));
    }

    #[tokio::test]
    async fn render_reads_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("q.sql");
        std::fs::write(&file, "SELECT {{ name }}").unwrap();
        let action = SqlAction::Render {
            source: source(None, Some(file), &["name=O'Brien"]),
        };

        assert_eq!(run(&action).await.unwrap(), json!("SELECT 'O''Brien'"));
    }

    #[tokio::test]
    async fn render_missing_parameter_exits_with_api_code() {
        let action = SqlAction::Render {
            source: source(Some("SELECT {{ a }}, {{ b }}"), None, &["a=1"]),
        };

        let error = run(&action).await.unwrap_err();

        assert_eq!(error.exit_code(), 3);
        assert!(error.to_string().contains("Missing required parameter: 'b'"));
    }
}
