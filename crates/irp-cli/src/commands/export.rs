use irp_core::IrpClient;
use serde_json::{json, Value};

use crate::cli::ExportAction;
use crate::error::CliError;

pub async fn run(action: &ExportAction, irp: &IrpClient) -> Result<Value, CliError> {
    let ExportAction::Download { job_id, output_dir } = action;
    let path = irp
        .export_job()
        .download_export_results(*job_id, output_dir)
        .await?;
    Ok(json!({"job_id": job_id, "path": path.display().to_string()}))
}
