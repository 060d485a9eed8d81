mod edm;
mod export;
mod job;
mod sql;
mod workflow;

use irp_core::IrpClient;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Command::Workflow(args) => workflow::run(&args.action, &IrpClient::from_env()).await,
        Command::Job(args) => job::run(&args.action, &IrpClient::from_env()).await,
        Command::Edm(args) => edm::run(&args.action, &IrpClient::from_env()).await,
        Command::Sql(args) => sql::run(&args.action).await,
        Command::Export(args) => export::run(&args.action, &IrpClient::from_env()).await,
    }
}
