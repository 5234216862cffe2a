use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Hardware error: {0}")]
    Hardware(String),
    #[error("Device not found: {0}")]
    NotFoundDevice(u8),
    #[error("Device {0} is not backed by an output pin")]
    NotOutput(u8),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundDevice(_) => StatusCode::NOT_FOUND,
            AppError::NotOutput(_) | AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) | AppError::Hardware(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
