use irp_core::{DataBridgeError, IrpError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Irp(#[from] IrpError),

    #[error(transparent)]
    Validation(#[from] irp_core::ValidationError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Argument(_) => 2,
            Self::Irp(error) => match error {
                IrpError::Validation(_) | IrpError::DataBridge(DataBridgeError::Config(_)) => 2,
                IrpError::Job { .. } | IrpError::Workflow { .. } => 4,
                IrpError::File { .. } | IrpError::Io(_) => 10,
                _ => 3,
            },
            Self::Serialization(_) => 3,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_map_to_exit_codes() {
        assert_eq!(CliError::from(IrpError::validation("bad")).exit_code(), 2);
        assert_eq!(CliError::from(IrpError::api("500")).exit_code(), 3);
        assert_eq!(CliError::from(IrpError::reference_data("missing")).exit_code(), 3);
        assert_eq!(CliError::from(IrpError::job("timed out")).exit_code(), 4);
        assert_eq!(CliError::from(IrpError::workflow("failed")).exit_code(), 4);
        assert_eq!(CliError::from(IrpError::file("disk")).exit_code(), 10);
        assert_eq!(
            CliError::from(IrpError::DataBridge(DataBridgeError::Config("MSSQL_X_SERVER".into())))
                .exit_code(),
            2
        );
    }

    #[test]
    fn argument_errors_are_usage_errors() {
        assert_eq!(CliError::Argument("x".into()).exit_code(), 2);
    }
}
