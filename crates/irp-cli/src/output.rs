use std::io::Write;

use serde_json::Value;

use crate::error::CliError;

/// Print `value` to stdout as pretty JSON; bare strings print as-is.
pub fn render(value: &Value) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match value {
        Value::String(text) => writeln!(out, "{text}")?,
        other => writeln!(out, "{}", serde_json::to_string_pretty(other)?)?,
    }
    Ok(())
}
