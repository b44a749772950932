use docharvest_core::{ConfigError, CoreError, StoreError, ValidationError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Io(String),
}

impl From<CoreError> for CliError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Validation(error) => Self::Validation(error),
            CoreError::Config(error) => Self::Config(error),
            CoreError::Store(error) => Self::Store(error),
            CoreError::Serialization(error) => Self::Serialization(error),
            io @ CoreError::Io { .. } => Self::Io(io.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Command(_) => 2,
            Self::Store(_) | Self::Warehouse(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn configuration_errors_exit_before_work_with_code_two() {
        let error = CliError::from(ConfigError::InvalidTotalInstances { total: 0 });
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn core_errors_keep_their_category() {
        let io = CliError::from(CoreError::Io {
            path: PathBuf::from("entities.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        });
        assert_eq!(io.exit_code(), 10);
        assert!(io.to_string().contains("entities.txt"));

        let validation = CliError::from(CoreError::Validation(ValidationError::EmptyEntityId));
        assert_eq!(validation.exit_code(), 2);
    }
}
