use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use thiserror::Error;

use crate::models::ApiResponse;

/// Every way a booking or update request can be rejected.
///
/// Business-rule rejections carry a human-readable reason and map to 4xx.
/// `Internal` is opaque: the detail goes to the log, never to the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("The shop is closed on this date")]
    ClosedDay,

    #[error("The requested time is outside business hours")]
    OutsideHours,

    #[error("This time slot is already taken")]
    SlotOccupied,

    #[error("This phone number belongs to {existing_name}. Check the name or log in.")]
    PhoneNameConflict { existing_name: String },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("No fields provided to update")]
    NoFieldsProvided,

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Admin access required")]
    Forbidden,

    #[error("Internal error")]
    Internal(#[from] sqlx::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::NoFieldsProvided => StatusCode::BAD_REQUEST,
            ApiError::ClosedDay | ApiError::OutsideHours => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::SlotOccupied | ApiError::PhoneNameConflict { .. } => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, sent alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::ClosedDay => "closed_day",
            ApiError::OutsideHours => "outside_hours",
            ApiError::SlotOccupied => "slot_occupied",
            ApiError::PhoneNameConflict { .. } => "phone_name_conflict",
            ApiError::NotFound(_) => "not_found",
            ApiError::NoFieldsProvided => "no_fields_provided",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            tracing::error!("internal error: {}", e);
        }
        let body = ApiResponse::<()>::error_with_kind(self.kind(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}

// ── Tests ──
