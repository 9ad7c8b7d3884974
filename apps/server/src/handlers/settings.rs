use axum::{
    extract::{Path, State},
    http::header,
    Json,
};
use std::sync::Arc;

use crate::{auth, db::new_id, error::ApiError, models::*, schedule::ShopConfig, AppState};

/// GET /api/admin/settings — the active shop configuration (created with
/// defaults on first read).
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<ShopConfig>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let config = ShopConfig::load(&state.db).await?;
    Ok(Json(ApiResponse::success(config)))
}

/// PUT /api/admin/settings — partial update of business hours/closed days.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<ApiResponse<ShopConfig>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let current = ShopConfig::load(&state.db).await?;

    let start_hour = body.start_hour.unwrap_or(current.start_hour as i64);
    let end_hour = body.end_hour.unwrap_or(current.end_hour as i64);
    if !(0..=24).contains(&start_hour) || !(0..=24).contains(&end_hour) || start_hour >= end_hour {
        return Err(ApiError::InvalidInput(format!(
            "Invalid business hours: {start_hour}..{end_hour}"
        )));
    }
    if let Some(days) = &body.closed_days {
        if days.iter().any(|d| *d > 6) {
            return Err(ApiError::InvalidInput(
                "closed_days must be 0 (Sunday) through 6 (Saturday)".into(),
            ));
        }
    }
    let interval = body.slot_interval_min.unwrap_or(current.slot_interval_min as i64);
    if !(5..=240).contains(&interval) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid slot interval: {interval}"
        )));
    }

    let closed_days = body.closed_days.unwrap_or(current.closed_days);
    let exceptions = body.exceptions.unwrap_or(current.exceptions);

    sqlx::query(
        "UPDATE shop_settings SET start_hour = ?, end_hour = ?, closed_days = ?, exceptions = ?, slot_interval_min = ?
         WHERE id = 1",
    )
    .bind(start_hour)
    .bind(end_hour)
    .bind(serde_json::to_string(&closed_days).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&exceptions).unwrap_or_else(|_| "{}".into()))
    .bind(interval)
    .execute(&state.db)
    .await?;

    let config = ShopConfig::load(&state.db).await?;
    Ok(Json(ApiResponse::success(config)))
}

/// GET /api/admin/services — full catalog, inactive included.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let services =
        sqlx::query_as::<_, Service>("SELECT * FROM services ORDER BY sort_order ASC")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    if body.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("Service name is required".into()));
    }
    if !body.price.is_finite() || body.price < 0.0 {
        return Err(ApiError::InvalidInput(format!(
            "Invalid price: {}",
            body.price
        )));
    }

    let id = new_id();
    sqlx::query(
        "INSERT INTO services (id, name, description, price, duration_min, sort_order)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(body.name.trim())
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.price)
    .bind(body.duration_min.unwrap_or(30))
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await?;

    let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/:id — partial update.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let current = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Service"))?;

    if let Some(price) = body.price {
        if !price.is_finite() || price < 0.0 {
            return Err(ApiError::InvalidInput(format!("Invalid price: {price}")));
        }
    }

    sqlx::query(
        "UPDATE services SET name = ?, description = ?, price = ?, duration_min = ?, is_active = ?, sort_order = ?
         WHERE id = ?",
    )
    .bind(body.name.as_deref().unwrap_or(&current.name))
    .bind(body.description.as_deref().unwrap_or(&current.description))
    .bind(body.price.unwrap_or(current.price))
    .bind(body.duration_min.unwrap_or(current.duration_min))
    .bind(body.is_active.unwrap_or(current.is_active))
    .bind(body.sort_order.unwrap_or(current.sort_order))
    .bind(&id)
    .execute(&state.db)
    .await?;

    let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(service)))
}
