use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store error: {0}")]
    Storage(String),

    /// The remote directory could not be listed at all.
    #[error("Backup discovery failed: {0}")]
    Discovery(String),

    /// A candidate archive was empty, ambiguous or unreadable.
    #[error("Archive validation failed: {0}")]
    Validation(String),

    #[error("{operation} failed on database '{database}': {message}")]
    EngineCommand {
        operation: String,
        database: String,
        message: String,
    },

    #[error("Sanitization step '{step}' failed: {message}")]
    Sanitization { step: String, message: String },

    #[error("Sync linking failed: {0}")]
    Linking(String),

    #[error("Could not determine the instance: {0}")]
    UnknownInstance(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation interrupted")]
    Interrupted,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn engine(
        operation: impl Into<String>,
        database: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        AppError::EngineCommand {
            operation: operation.into(),
            database: database.into(),
            message: message.to_string(),
        }
    }

    /// Process exit status for the failure class of this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::InvalidInput(_) => 2,
            AppError::UnknownInstance(_) => 3,
            AppError::Discovery(_) | AppError::Storage(_) | AppError::Http(_) => 4,
            AppError::Validation(_) => 5,
            AppError::Interrupted => 130,
            _ => 1,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, AppError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
