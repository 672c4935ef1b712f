use thiserror::Error;

use crate::common::error::AppError;

/// Authorization errors for resource and room access
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Admin access required")]
    AdminRequired,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthenticationRequired => AppError::Authentication,
            other => AppError::Authorization(other.to_string()),
        }
    }
}
