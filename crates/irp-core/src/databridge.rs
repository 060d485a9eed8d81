//! Data Bridge: SQL Server access for the platform's hosted databases.
//!
//! Scripts use `{{ name }}` placeholders. How a parameter is rendered depends
//! on where its placeholder sits in the script:
//!
//! | Context | Example | Rendering |
//! |---------|---------|-----------|
//! | bracketed identifier | `USE [{{ db }}]` | raw text |
//! | inside a quoted literal | `'{{ db }}.dbo'` | raw text |
//! | part of an object name | `tbl_{{ cycle }}`, `{{ cycle }}_stage` | raw text |
//! | anywhere else | `WHERE id = {{ id }}` | SQL literal |
//!
//! Raw text is restricted to alphanumerics, `_`, `-`, space and `/`. SQL
//! literals are `NULL`, `1`/`0` for booleans, numbers verbatim and strings in
//! single quotes with embedded quotes doubled. `{{{{` renders a literal `{{`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tiberius::{AuthMethod, ColumnData, FromSql, Row};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::{debug, error, info, warn};

use crate::config::DataBridgeConfig;
use crate::error::{DataBridgeError, IrpError, Result};
use crate::extract::truncate_chars;
use crate::validators;

/// Named template parameters.
pub type SqlParams = BTreeMap<String, Value>;

const PLACEHOLDER: &str =
    r"\{\{\s*(?:(?P<escaped>\{\{)|(?P<named>[_a-zA-Z][_a-zA-Z0-9]*)\s*\}\}|(?P<invalid>))";

const QUERY_PREVIEW_CHARS: usize = 200;

fn identifier_patterns(key: &str) -> Vec<String> {
    let placeholder = format!(r"\{{\{{\s*{}\s*\}}\}}", regex::escape(key));
    vec![
        format!(r"\[\s*{placeholder}\s*\]"),
        format!(r"'[^'\n\r]*{placeholder}[^'\n\r]*'"),
        format!(r"\w+_{placeholder}"),
        format!(r"{placeholder}_\w+"),
    ]
}

fn compile(pattern: &str) -> std::result::Result<Regex, DataBridgeError> {
    Regex::new(pattern)
        .map_err(|e| DataBridgeError::Query(format!("Parameter substitution error: {e}")))
}

/// Whether any placeholder for `key` sits in an identifier context.
fn is_identifier_context(sql: &str, key: &str) -> std::result::Result<bool, DataBridgeError> {
    for pattern in identifier_patterns(key) {
        if compile(&pattern)?.is_match(sql) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ' ' | '/')
}

/// Render `value` as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => String::from("NULL"),
        Value::Bool(flag) => String::from(if *flag { "1" } else { "0" }),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote(text),
        other => quote(&other.to_string()),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn identifier_text(key: &str, value: &Value) -> std::result::Result<String, DataBridgeError> {
    match value {
        Value::String(text) => {
            if !text.chars().all(is_identifier_char) {
                return Err(DataBridgeError::Query(format!(
                    "Parameter substitution error: Invalid identifier value for parameter '{key}': {text}. \
                     Identifiers can only contain alphanumeric characters, underscores, hyphens, and spaces."
                )));
            }
            Ok(text.clone())
        }
        Value::Null => Ok(String::from("None")),
        Value::Bool(flag) => Ok(String::from(if *flag { "True" } else { "False" })),
        other => Ok(other.to_string()),
    }
}

/// Substitute `{{ name }}` placeholders in `sql` from `params`.
///
/// With no parameters the script is returned unchanged.
pub fn render_sql(sql: &str, params: &SqlParams) -> std::result::Result<String, DataBridgeError> {
    if params.is_empty() {
        return Ok(sql.to_owned());
    }
    debug!(parameters = params.len(), "substituting query parameters");

    let mut rendered = BTreeMap::new();
    for (key, value) in params {
        let text = if is_identifier_context(sql, key)? {
            identifier_text(key, value)?
        } else {
            sql_literal(value)
        };
        rendered.insert(key.as_str(), text);
    }

    let placeholder = compile(PLACEHOLDER)?;
    let mut output = String::with_capacity(sql.len());
    let mut last = 0;
    for captures in placeholder.captures_iter(sql) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        output.push_str(&sql[last..whole.start()]);
        last = whole.end();
        if captures.name("escaped").is_some() {
            output.push_str("{{");
        } else if let Some(name) = captures.name("named") {
            let value = rendered.get(name.as_str()).ok_or_else(|| {
                DataBridgeError::Query(format!(
                    "Missing required parameter: '{}'. Provided parameters: {}",
                    name.as_str(),
                    params.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
                ))
            })?;
            output.push_str(value);
        } else {
            let (line, column) = line_and_column(sql, whole.start());
            return Err(DataBridgeError::Query(format!(
                "Parameter substitution error: Invalid placeholder in string: line {line}, col {column}"
            )));
        }
    }
    output.push_str(&sql[last..]);
    Ok(output)
}

fn line_and_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(offset, |newline| offset - newline - 1) + 1;
    (line, column)
}

/// One result set: column names and row values in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                Value::Object(
                    self.columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<Map<_, _>>(),
                )
            })
            .collect()
    }
}

/// Executes rendered SQL against a server.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Run a batch and return every result set it produced.
    async fn query(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> std::result::Result<Vec<ResultSet>, DataBridgeError>;

    /// Run a command and return the number of rows affected.
    async fn execute(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> std::result::Result<u64, DataBridgeError>;
}

/// TDS connector over tokio, one connection per call.
#[derive(Debug, Clone)]
pub struct TiberiusConnector {
    config: DataBridgeConfig,
}

impl TiberiusConnector {
    pub fn new(config: DataBridgeConfig) -> Self {
        Self { config }
    }

    fn tds_config(&self, database: Option<&str>) -> tiberius::Config {
        let mut config = tiberius::Config::new();
        config.host(&self.config.server);
        config.port(self.config.port);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));
        if self.config.trust_cert {
            config.trust_cert();
        }
        if let Some(database) = database {
            config.database(database);
        }
        config
    }

    async fn connect(
        &self,
        database: Option<&str>,
    ) -> std::result::Result<tiberius::Client<tokio_util::compat::Compat<TcpStream>>, DataBridgeError>
    {
        let connection = &self.config.connection_name;
        let config = self.tds_config(database);
        let connect = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| e.to_string())?;
            tcp.set_nodelay(true).map_err(|e| e.to_string())?;
            tiberius::Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| e.to_string())
        };
        match tokio::time::timeout(self.config.timeout, connect).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(message)) => {
                error!(connection = %connection, server = %self.config.server, "SQL Server connection failed");
                Err(DataBridgeError::Connection(format!(
                    "Failed to connect to SQL Server '{connection}' ({}): {message}",
                    self.config.server
                )))
            }
            Err(_) => Err(DataBridgeError::Connection(format!(
                "Timed out connecting to SQL Server '{connection}' ({}) after {}s",
                self.config.server,
                self.config.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl SqlConnector for TiberiusConnector {
    async fn query(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> std::result::Result<Vec<ResultSet>, DataBridgeError> {
        let mut client = self.connect(database).await?;
        let results = client
            .simple_query(sql)
            .await
            .map_err(|e| DataBridgeError::Query(e.to_string()))?
            .into_results()
            .await
            .map_err(|e| DataBridgeError::Query(e.to_string()))?;
        Ok(results.into_iter().map(result_set).collect())
    }

    async fn execute(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> std::result::Result<u64, DataBridgeError> {
        let mut client = self.connect(database).await?;
        let result = client
            .execute(sql, &[])
            .await
            .map_err(|e| DataBridgeError::Query(e.to_string()))?;
        Ok(result.total())
    }
}

fn result_set(rows: Vec<Row>) -> ResultSet {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_owned())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|cell| cell_value(&cell)).collect())
        .collect();
    ResultSet { columns, rows }
}

fn formatted<T>(data: &ColumnData<'static>, format: impl Fn(T) -> Option<String>) -> Value
where
    T: for<'a> FromSql<'a>,
{
    T::from_sql(data)
        .ok()
        .flatten()
        .and_then(format)
        .map_or(Value::Null, Value::String)
}

fn cell_value(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(value) => value.map_or(Value::Null, Value::from),
        ColumnData::I16(value) => value.map_or(Value::Null, Value::from),
        ColumnData::I32(value) => value.map_or(Value::Null, Value::from),
        ColumnData::I64(value) => value.map_or(Value::Null, Value::from),
        ColumnData::F32(value) => value.map_or(Value::Null, |v| Value::from(f64::from(v))),
        ColumnData::F64(value) => value.map_or(Value::Null, Value::from),
        ColumnData::Bit(value) => value.map_or(Value::Null, Value::from),
        ColumnData::String(value) => value.as_deref().map_or(Value::Null, Value::from),
        ColumnData::Guid(value) => value
            .as_ref()
            .map_or(Value::Null, |guid| Value::from(guid.to_string())),
        ColumnData::Numeric(value) => value.as_ref().map_or(Value::Null, |numeric| {
            let scaled = numeric.value() as f64 / 10f64.powi(i32::from(numeric.scale()));
            Value::from(scaled)
        }),
        ColumnData::Binary(value) => value.as_deref().map_or(Value::Null, |bytes| {
            Value::from(general_purpose::STANDARD.encode(bytes))
        }),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            formatted(data, |value: time::PrimitiveDateTime| {
                value
                    .format(format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                    ))
                    .ok()
            })
        }
        ColumnData::Date(_) => formatted(data, |value: time::Date| {
            value.format(format_description!("[year]-[month]-[day]")).ok()
        }),
        ColumnData::Time(_) => formatted(data, |value: time::Time| {
            value
                .format(format_description!("[hour]:[minute]:[second]"))
                .ok()
        }),
        ColumnData::DateTimeOffset(_) => {
            formatted(data, |value: time::OffsetDateTime| value.format(&Rfc3339).ok())
        }
        ColumnData::Xml(value) => value
            .clone()
            .map_or(Value::Null, |xml| Value::from(xml.into_owned().into_string())),
    }
}

/// SQL execution with `{{ name }}` templating over a [`SqlConnector`].
#[derive(Clone)]
pub struct DataBridgeManager {
    connector: Arc<dyn SqlConnector>,
    connection_name: String,
}

impl std::fmt::Debug for DataBridgeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBridgeManager")
            .field("connection_name", &self.connection_name)
            .finish_non_exhaustive()
    }
}

impl DataBridgeManager {
    pub fn new(connector: Arc<dyn SqlConnector>, connection_name: impl Into<String>) -> Self {
        Self {
            connector,
            connection_name: connection_name.into().to_uppercase(),
        }
    }

    /// Connect with `MSSQL_{NAME}_*` settings for `connection_name`
    /// (default `DATABRIDGE`).
    pub fn from_env(connection_name: Option<&str>) -> Result<Self> {
        let config = DataBridgeConfig::from_env(connection_name)?;
        let name = config.connection_name.clone();
        Ok(Self::new(Arc::new(TiberiusConnector::new(config)), name))
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    fn query_error(&self, error: DataBridgeError, what: &str, sql: &str) -> IrpError {
        match error {
            DataBridgeError::Query(message) => {
                let mut preview = truncate_chars(sql, QUERY_PREVIEW_CHARS);
                if sql.chars().count() > QUERY_PREVIEW_CHARS {
                    preview.push_str("...");
                }
                IrpError::DataBridge(DataBridgeError::Query(format!(
                    "{what} failed (connection: {}): {message}\nQuery: {preview}",
                    self.connection_name
                )))
            }
            other => IrpError::DataBridge(other),
        }
    }

    /// First result set of a rendered query; empty when the batch returned none.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: &SqlParams,
        database: Option<&str>,
    ) -> Result<ResultSet> {
        let sql = render_sql(sql, params)?;
        let sets = self
            .connector
            .query(&sql, database)
            .await
            .map_err(|e| self.query_error(e, "Query execution", &sql))?;
        Ok(sets.into_iter().next().unwrap_or_default())
    }

    /// First column of the first row, if any.
    pub async fn execute_scalar(
        &self,
        sql: &str,
        params: &SqlParams,
        database: Option<&str>,
    ) -> Result<Option<Value>> {
        let sql = render_sql(sql, params)?;
        let sets = self
            .connector
            .query(&sql, database)
            .await
            .map_err(|e| self.query_error(e, "Scalar query execution", &sql))?;
        Ok(sets
            .into_iter()
            .next()
            .and_then(|set| set.rows.into_iter().next())
            .and_then(|row| row.into_iter().next()))
    }

    /// Rows affected by a rendered command.
    pub async fn execute_command(
        &self,
        sql: &str,
        params: &SqlParams,
        database: Option<&str>,
    ) -> Result<u64> {
        let sql = render_sql(sql, params)?;
        let affected = self
            .connector
            .execute(&sql, database)
            .await
            .map_err(|e| self.query_error(e, "Command execution", &sql))?;
        info!(connection = %self.connection_name, affected, "command executed");
        Ok(affected)
    }

    /// Run a script file and return every result set it produced.
    pub async fn execute_query_from_file(
        &self,
        file_path: &Path,
        params: &SqlParams,
        database: Option<&str>,
    ) -> Result<Vec<ResultSet>> {
        validators::file_exists(file_path)?;
        let script = tokio::fs::read_to_string(file_path).await.map_err(|e| {
            DataBridgeError::Query(format!(
                "Failed to read SQL script file '{}': {e}",
                file_path.display()
            ))
        })?;
        let sql = render_sql(&script, params)?;
        info!(file = %file_path.display(), connection = %self.connection_name, "executing query from file");
        let sets = self.connector.query(&sql, database).await.map_err(|e| match e {
            DataBridgeError::Query(message) => IrpError::DataBridge(DataBridgeError::Query(format!(
                "Query execution failed (connection: {}, file: {}): {message}",
                self.connection_name,
                file_path.display()
            ))),
            other => IrpError::DataBridge(other),
        })?;
        if sets.is_empty() {
            warn!(
                file = %file_path.display(),
                "no result sets returned; the script may contain only DDL/DML or dynamic SQL"
            );
        }
        info!(result_sets = sets.len(), "query completed");
        Ok(sets)
    }

    /// `SELECT 1` round trip. Failures are logged, not returned.
    pub async fn test_connection(&self) -> bool {
        match self.connector.query("SELECT 1 AS test", None).await {
            Ok(_) => {
                info!(connection = %self.connection_name, "connection test succeeded");
                true
            }
            Err(e) => {
                error!(connection = %self.connection_name, error = %e, "connection test failed");
                false
            }
        }
    }
}
