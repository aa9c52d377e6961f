use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

/// Server error codes the provisioning tools react to.
pub mod codes {
    pub const HOST_UNREACHABLE: i32 = 6;
    pub const HOST_NOT_FOUND: i32 = 7;
    pub const AUTHENTICATION_FAILED: i32 = 18;
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    pub const NAMESPACE_EXISTS: i32 = 48;
    pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
    pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
    pub const NETWORK_TIMEOUT: i32 = 89;
    pub const SHUTDOWN_IN_PROGRESS: i32 = 91;
    pub const DUPLICATE_KEY: i32 = 11000;
    pub const DUPLICATE_KEY_LEGACY: i32 = 11001;
    pub const USER_ALREADY_EXISTS: i32 = 51003;
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Already exists: {0}")]
    AlreadyExists(anyhow::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(anyhow::Error),

    #[error("Index conflict: {0}")]
    IndexConflict(anyhow::Error),

    #[error("Connection failure: {0}")]
    ConnectionFailure(anyhow::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Classify a server reply by its numeric error code.
    pub fn from_server_code(code: i32, err: anyhow::Error) -> Self {
        match code {
            codes::NAMESPACE_EXISTS | codes::USER_ALREADY_EXISTS => AppError::AlreadyExists(err),
            codes::DUPLICATE_KEY | codes::DUPLICATE_KEY_LEGACY => {
                AppError::ConstraintViolation(err)
            }
            codes::INDEX_OPTIONS_CONFLICT | codes::INDEX_KEY_SPECS_CONFLICT => {
                AppError::IndexConflict(err)
            }
            codes::AUTHENTICATION_FAILED => AppError::AuthenticationFailed(err),
            codes::HOST_UNREACHABLE
            | codes::HOST_NOT_FOUND
            | codes::NETWORK_TIMEOUT
            | codes::SHUTDOWN_IN_PROGRESS => AppError::ConnectionFailure(err),
            _ => AppError::DatabaseError(err),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AppError::AlreadyExists(_))
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, AppError::ConnectionFailure(_))
    }

    /// Process exit status reported by command line tools for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::ConfigError(_) => 2,
            AppError::ConnectionFailure(_) => 3,
            AppError::AlreadyExists(_) | AppError::IndexConflict(_) => 4,
            AppError::ConstraintViolation(_) => 5,
            AppError::AuthenticationFailed(_) => 6,
            AppError::DatabaseError(_) | AppError::InternalError(_) => 1,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

enum DriverFailure {
    Server(i32),
    Authentication,
    Transport,
    Other,
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        let failure = match err.kind.as_ref() {
            ErrorKind::Command(command) => DriverFailure::Server(command.code),
            ErrorKind::Write(WriteFailure::WriteError(write)) => DriverFailure::Server(write.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => {
                DriverFailure::Server(concern.code)
            }
            ErrorKind::Authentication { .. } => DriverFailure::Authentication,
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => DriverFailure::Transport,
            _ => DriverFailure::Other,
        };

        let source = anyhow::Error::new(err);
        match failure {
            DriverFailure::Server(code) => AppError::from_server_code(code, source),
            DriverFailure::Authentication => AppError::AuthenticationFailed(source),
            DriverFailure::Transport => AppError::ConnectionFailure(source),
            DriverFailure::Other => AppError::DatabaseError(source),
        }
    }
}
