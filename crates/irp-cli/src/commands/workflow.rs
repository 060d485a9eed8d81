use irp_core::{IrpClient, PollConfig};
use serde_json::Value;

use crate::cli::WorkflowAction;
use crate::error::CliError;

pub async fn run(action: &WorkflowAction, irp: &IrpClient) -> Result<Value, CliError> {
    let client = irp.client();
    let value = match action {
        WorkflowAction::Get { workflow_id } => client.get_workflow(*workflow_id).await?,
        WorkflowAction::Poll { workflow_id, poll } => {
            let config = poll.config(PollConfig::single())?;
            client.poll_workflow_to_completion(*workflow_id, &config).await?
        }
        WorkflowAction::PollBatch { workflow_ids, poll } => {
            let config = poll.config(PollConfig::batch())?;
            client
                .poll_workflow_batch_to_completion(workflow_ids, &config)
                .await?
        }
    };
    Ok(value)
}
