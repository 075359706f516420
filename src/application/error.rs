use thiserror::Error;

use crate::{config::LoadError, domain::error::DomainError, infra::error::InfraError};

/// Errors that end a command. Per-item render failures never surface here;
/// they are shown inline on the page instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for this error: 2 for bad input, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Validation(_) | AppError::Domain(_) => 2,
            AppError::Infra(InfraError::Document { .. }) => 2,
            AppError::Infra(_) | AppError::Unexpected(_) => 1,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_exit_with_two() {
        assert_eq!(AppError::validation("bad focus").exit_code(), 2);
        assert_eq!(
            AppError::from(InfraError::document("/docs", "missing settings")).exit_code(),
            2
        );
        assert_eq!(AppError::unexpected("boom").exit_code(), 1);
    }

    #[test]
    fn io_errors_convert_through_infra() {
        let error = AppError::from(std::io::Error::other("disk full"));
        assert!(matches!(error, AppError::Infra(InfraError::Io(_))));
        assert_eq!(error.to_string(), "io error: disk full");
    }
}
