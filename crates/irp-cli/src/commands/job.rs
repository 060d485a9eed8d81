use irp_core::{IrpClient, PollConfig};
use serde_json::Value;

use crate::cli::JobAction;
use crate::error::CliError;

pub async fn run(action: &JobAction, irp: &IrpClient) -> Result<Value, CliError> {
    let value = match action {
        JobAction::Get { kind, job_id } => kind.kind().get(irp.client(), *job_id).await?,
        JobAction::Poll { kind, job_id, poll } => {
            let config = poll.config(PollConfig::single())?;
            kind.kind().poll(irp.client(), *job_id, &config).await?
        }
    };
    Ok(value)
}
