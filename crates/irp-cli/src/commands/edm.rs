use irp_core::IrpClient;
use serde_json::Value;

use crate::cli::EdmAction;
use crate::error::CliError;

pub async fn run(action: &EdmAction, irp: &IrpClient) -> Result<Value, CliError> {
    let EdmAction::Search {
        filter,
        all,
        limit,
        offset,
    } = action;
    let edms = if *all {
        irp.edm().search_edms_paginated(filter).await?
    } else {
        irp.edm().search_edms(filter, *limit, *offset).await?
    };
    Ok(Value::Array(edms))
}
