use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("invalid level `{value}`: {reason}")]
    InvalidLevel { value: String, reason: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn invalid_level(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLevel {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
