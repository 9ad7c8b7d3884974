use axum::{
    extract::{Path, State},
    http::header,
    Json,
};
use std::sync::Arc;

use crate::{
    auth,
    clock::shop_now,
    db::new_id,
    error::ApiError,
    models::*,
    reconcile::{fetch_client, CLIENT_STATUS_NEW},
    AppState,
};

/// POST /api/clients/register — full account with credentials. Reuses an
/// existing guest record with the same phone instead of duplicating it.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let name = body.name.trim();
    let phone = body.phone.trim();
    if name.is_empty() || phone.is_empty() {
        return Err(ApiError::InvalidInput("Name and phone are required".into()));
    }
    if body.password.len() < 6 {
        return Err(ApiError::InvalidInput(
            "Password must have at least 6 characters".into(),
        ));
    }

    let password_hash = auth::hash_password(&body.password)
        .map_err(|_| ApiError::InvalidInput("Invalid password".into()))?;

    let existing = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE phone = ? LIMIT 1")
        .bind(phone)
        .fetch_optional(&state.db)
        .await?;

    let id = match existing {
        Some(client) if client.password_hash.is_some() => {
            return Err(ApiError::InvalidInput(
                "This phone is already registered. Log in instead.".into(),
            ));
        }
        Some(client) => {
            // Claim the guest record created by an earlier booking.
            sqlx::query(
                "UPDATE clients SET name = ?, email = ?, password_hash = ? WHERE id = ?",
            )
            .bind(name)
            .bind(&body.email)
            .bind(&password_hash)
            .bind(&client.id)
            .execute(&state.db)
            .await?;
            client.id
        }
        None => {
            let id = new_id();
            let created_at = shop_now().format("%Y-%m-%d %H:%M:%S").to_string();
            sqlx::query(
                "INSERT INTO clients (id, seq, name, phone, email, password_hash, status, level, notes, created_at)
                 VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM clients), ?, ?, ?, ?, ?, 1, '', ?)",
            )
            .bind(&id)
            .bind(name)
            .bind(phone)
            .bind(&body.email)
            .bind(&password_hash)
            .bind(CLIENT_STATUS_NEW)
            .bind(&created_at)
            .execute(&state.db)
            .await?;
            id
        }
    };

    let client = fetch_client(&state.db, &id)
        .await?
        .ok_or(ApiError::NotFound("Client"))?;
    let token = auth::issue_token(&state.auth_secret, &id, auth::ROLE_CLIENT);

    Ok(Json(ApiResponse::success(LoginResponse {
        token,
        client: Some(client),
    })))
}

/// POST /api/clients/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE phone = ? LIMIT 1")
        .bind(body.phone.trim())
        .fetch_optional(&state.db)
        .await?;

    let client = client
        .filter(|c| {
            c.password_hash
                .as_deref()
                .is_some_and(|hash| auth::verify_password(&body.password, hash))
        })
        .ok_or(ApiError::Unauthorized("Invalid phone or password"))?;

    let token = auth::issue_token(&state.auth_secret, &client.id, auth::ROLE_CLIENT);
    Ok(Json(ApiResponse::success(LoginResponse {
        token,
        client: Some(client),
    })))
}

/// POST /api/auth/admin — admin login with the shared shop password.
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdminLoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    if state.admin_password.is_empty() || body.password != state.admin_password {
        return Err(ApiError::Unauthorized("Invalid password"));
    }
    let token = auth::issue_token(&state.auth_secret, "admin", auth::ROLE_ADMIN);
    Ok(Json(ApiResponse::success(LoginResponse {
        token,
        client: None,
    })))
}

/// GET /api/admin/clients — full directory, newest first.
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<Client>>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let clients =
        sqlx::query_as::<_, Client>("SELECT * FROM clients ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(ApiResponse::success(clients)))
}

/// GET /api/clients/:id — a client can read their own record; admin any.
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Client>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = auth::require_user(auth_header, &state.auth_secret)?;
    if user.id != id && !auth::is_admin(&user) {
        return Err(ApiError::Forbidden);
    }

    let client = fetch_client(&state.db, &id)
        .await?
        .ok_or(ApiError::NotFound("Client"))?;
    Ok(Json(ApiResponse::success(client)))
}

/// PUT /api/admin/clients/:id — partial update of profile fields.
pub async fn update_client(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateClientRequest>,
) -> Result<Json<ApiResponse<Client>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let current = fetch_client(&state.db, &id)
        .await?
        .ok_or(ApiError::NotFound("Client"))?;

    if body.name.is_none()
        && body.phone.is_none()
        && body.email.is_none()
        && body.status.is_none()
        && body.notes.is_none()
        && body.img.is_none()
    {
        return Err(ApiError::NoFieldsProvided);
    }

    sqlx::query(
        "UPDATE clients SET name = ?, phone = ?, email = ?, status = ?, notes = ?, img = ?
         WHERE id = ?",
    )
    .bind(body.name.as_deref().unwrap_or(&current.name))
    .bind(body.phone.as_deref().unwrap_or(&current.phone))
    .bind(body.email.as_deref().or(current.email.as_deref()))
    .bind(body.status.as_deref().unwrap_or(&current.status))
    .bind(body.notes.as_deref().unwrap_or(&current.notes))
    .bind(body.img.as_deref().or(current.img.as_deref()))
    .bind(&id)
    .execute(&state.db)
    .await?;

    let client = fetch_client(&state.db, &id)
        .await?
        .ok_or(ApiError::NotFound("Client"))?;
    Ok(Json(ApiResponse::success(client)))
}
