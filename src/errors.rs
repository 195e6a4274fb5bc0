//! Typed error hierarchy for the todo-list service.
//!
//! `AppError` covers the failures the service models explicitly. Anything
//! else travels as `anyhow::Error` and surfaces as a 500 at the HTTP boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Verifying request failed")]
    InvalidSignature,

    #[error("Webhook secret is not configured")]
    WebhookSecretMissing,

    #[error("Missing required parameters")]
    MissingParameters,

    #[error("Invite token not found")]
    InviteNotFound,

    #[error("Invite token has expired")]
    InviteExpired,

    #[error("Invite token has already been used")]
    InviteUsed,

    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("No file uploaded")]
    NoFile,

    #[error("Failed to process image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Only the author can modify this {0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_entity_and_id() {
        let err = AppError::NotFound { entity: "Task", id: 42 };
        assert_eq!(err.to_string(), "Task 42 not found");
    }

    #[test]
    fn signature_error_message_matches_webhook_response() {
        assert_eq!(AppError::InvalidSignature.to_string(), "Verifying request failed");
    }

    #[test]
    fn anyhow_errors_convert_transparently() {
        let err: AppError = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(err, AppError::Other(_)));
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AppError::InviteUsed);
        assert_std_error(&AppError::Forbidden("comment"));
    }
}
