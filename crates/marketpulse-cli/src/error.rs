use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] marketpulse_core::ValidationError),

    #[error(transparent)]
    Config(#[from] marketpulse_core::ConfigError),

    #[error(transparent)]
    Core(#[from] marketpulse_core::CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] marketpulse_core::StoreError),

    #[error(transparent)]
    Warehouse(#[from] marketpulse_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Core(_) => 2,
            Self::Command(_) => 2,
            Self::NotFound(_) => 3,
            Self::Serialization(_) => 4,
            Self::Store(_) => 6,
            Self::Warehouse(_) => 6,
            Self::Io(_) => 10,
        }
    }
}
