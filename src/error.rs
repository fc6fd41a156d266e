use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Field name -> list of violation messages, in field order.
#[derive(Debug, Default, Serialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn of(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(ValidationErrors),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not found")]
    NotFound,
    /// Bad verification/reset proof. Deliberately generic: never says
    /// whether the link was expired, forged or for the wrong user.
    #[error("{0}")]
    InvalidLink(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": "The given data was invalid.",
                    "errors": errors,
                })),
            )
                .into_response(),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unauthenticated." })),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "Not found." })),
            )
                .into_response(),
            ApiError::InvalidLink(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": message })),
            )
                .into_response(),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "Server error." })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_serialize_as_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "The email has already been taken.");
        errors.add("email", "The email must be a valid email address.");
        errors.add("password", "The password must be at least 8 characters.");

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json["email"],
            serde_json::json!([
                "The email has already been taken.",
                "The email must be a valid email address."
            ])
        );
        assert_eq!(json["password"][0], "The password must be at least 8 characters.");
    }

    #[test]
    fn empty_errors_convert_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn non_empty_errors_convert_to_err() {
        let errors = ValidationErrors::of("email", "required");
        assert!(errors.into_result().is_err());
    }
}
