use axum::{
    extract::{Path, Query, State},
    http::header,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    auth,
    clock::shop_today,
    db::is_unique_violation,
    error::ApiError,
    lifecycle::{apply_completion_effects, check_transition, STATUS_CANCELLED, STATUS_COMPLETED},
    models::*,
    AppState,
};

use super::booking::appointment_detail_select;

/// PUT /api/admin/appointments/:id — status change and/or partial field
/// update. Completing an appointment promotes its client (see lifecycle).
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiResponse<AppointmentDetail>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let detail = apply_update(&state.db, &id, body).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// The update core, independent of the HTTP layer. Only supplied fields are
/// touched; everything else keeps its stored value.
pub async fn apply_update(
    pool: &SqlitePool,
    id: &str,
    body: UpdateAppointmentRequest,
) -> Result<AppointmentDetail, ApiError> {
    if body.is_empty() {
        return Err(ApiError::NoFieldsProvided);
    }

    let current = sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Appointment"))?;

    if let Some(date) = &body.date {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| ApiError::InvalidInput(format!("Invalid date: {date}")))?;
    }
    if let Some(time) = &body.time {
        NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| ApiError::InvalidInput(format!("Invalid time: {time}")))?;
    }
    if let Some(price) = body.price {
        if !price.is_finite() || price < 0.0 {
            return Err(ApiError::InvalidInput(format!("Invalid price: {price}")));
        }
    }
    if let Some(service_id) = &body.service_id {
        if !super::booking::service_exists(pool, service_id).await? {
            return Err(ApiError::NotFound("Service"));
        }
    }

    let new_status = match &body.status {
        Some(status) => {
            check_transition(&current.status, status)?;
            status.as_str()
        }
        None => current.status.as_str(),
    };

    let date = body.date.as_deref().unwrap_or(&current.date);
    let time = body.time.as_deref().unwrap_or(&current.time);
    let notes = body.notes.as_deref().unwrap_or(&current.notes);
    let price = body.price.unwrap_or(current.price);
    let service_id = body.service_id.as_deref().unwrap_or(&current.service_id);

    // One statement so a reschedule onto an occupied slot trips the partial
    // unique index and maps to the usual conflict.
    let result = sqlx::query(
        "UPDATE appointments SET status = ?, date = ?, time = ?, notes = ?, price = ?, service_id = ?
         WHERE id = ?",
    )
    .bind(new_status)
    .bind(date)
    .bind(time)
    .bind(notes)
    .bind(price)
    .bind(service_id)
    .bind(id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        if is_unique_violation(&e) {
            return Err(ApiError::SlotOccupied);
        }
        return Err(e.into());
    }

    // Loyalty side effects fire once, on the transition into completed.
    if current.status != STATUS_COMPLETED && new_status == STATUS_COMPLETED {
        let updated_date = date.to_string();
        let updated = Appointment {
            date: updated_date,
            ..current
        };
        apply_completion_effects(pool, &updated).await?;
    }

    let detail = sqlx::query_as::<_, AppointmentDetail>(&format!(
        "{} WHERE a.id = ?",
        appointment_detail_select()
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NotFound("Appointment"))?;

    Ok(detail)
}

/// GET /api/admin/appointments — list by exact date, range, or upcoming.
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<ApiResponse<Vec<AppointmentDetail>>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require_admin(auth_header, &state.auth_secret)?;

    let select = appointment_detail_select();
    let appointments = if let Some(date) = &query.date {
        sqlx::query_as::<_, AppointmentDetail>(&format!(
            "{select} WHERE a.date = ? ORDER BY a.time ASC"
        ))
        .bind(date)
        .fetch_all(&state.db)
        .await?
    } else if let (Some(from), Some(to)) = (&query.from, &query.to) {
        sqlx::query_as::<_, AppointmentDetail>(&format!(
            "{select} WHERE a.date BETWEEN ? AND ? ORDER BY a.date ASC, a.time ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query_as::<_, AppointmentDetail>(&format!(
            "{select} WHERE a.date >= ? AND a.status != 'cancelled'
             ORDER BY a.date ASC, a.time ASC"
        ))
        .bind(shop_today())
        .fetch_all(&state.db)
        .await?
    };

    Ok(Json(ApiResponse::success(appointments)))
}

/// GET /api/appointments/my — the authenticated client's upcoming visits.
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<AppointmentDetail>>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = auth::require_user(auth_header, &state.auth_secret)?;

    let appointments = sqlx::query_as::<_, AppointmentDetail>(&format!(
        "{} WHERE a.client_id = ? AND a.status != 'cancelled'
         ORDER BY a.date ASC, a.time ASC",
        appointment_detail_select()
    ))
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiResponse::success(appointments)))
}

/// DELETE /api/appointments/:id — a client cancels their own appointment.
/// Cancellation is a status transition; the row stays.
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<AppointmentDetail>>, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = auth::require_user(auth_header, &state.auth_secret)?;

    let owns: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM appointments WHERE id = ? AND client_id = ?",
    )
    .bind(&id)
    .bind(&user.id)
    .fetch_one(&state.db)
    .await?;
    if !owns && !auth::is_admin(&user) {
        return Err(ApiError::NotFound("Appointment"));
    }

    let detail = apply_update(
        &state.db,
        &id,
        UpdateAppointmentRequest {
            status: Some(STATUS_CANCELLED.into()),
            ..Default::default()
        },
    )
    .await?;

    Ok(Json(ApiResponse::success(detail)))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{new_id, test_pool};
    use crate::lifecycle::{STATUS_CONFIRMED, STATUS_PENDING};

    async fn seed(pool: &SqlitePool) -> (String, String) {
        let service_id: String = sqlx::query_scalar("SELECT id FROM services LIMIT 1")
            .fetch_one(pool)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO clients (id, name, phone, status, level, notes, created_at)
             VALUES ('c1', 'Ana', '11999998888', 'guest', 1, '', '')",
        )
        .execute(pool)
        .await
        .unwrap();

        let id = new_id();
        sqlx::query(
            "INSERT INTO appointments (id, client_name, client_id, service_id, date, time, status, price, notes, created_at)
             VALUES (?, 'Ana', 'c1', ?, '2026-05-20', '14:00', 'pending', 45.0, '', '')",
        )
        .bind(&id)
        .bind(&service_id)
        .execute(pool)
        .await
        .unwrap();

        (id, service_id)
    }

    fn update(status: Option<&str>) -> UpdateAppointmentRequest {
        UpdateAppointmentRequest {
            status: status.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;
        let err = apply_update(&pool, &id, update(None)).await.unwrap_err();
        assert!(matches!(err, ApiError::NoFieldsProvided));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let pool = test_pool().await;
        let err = apply_update(&pool, "ghost", update(Some(STATUS_CONFIRMED)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_partial_update_touches_only_supplied_fields() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        let detail = apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                notes: Some("trouxe o filho".into()),
                price: Some(50.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(detail.notes, "trouxe o filho");
        assert_eq!(detail.price, 50.0);
        // Untouched fields survive
        assert_eq!(detail.status, STATUS_PENDING);
        assert_eq!(detail.time, "14:00");
    }

    #[tokio::test]
    async fn test_completion_promotes_linked_client() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        apply_update(&pool, &id, update(Some(STATUS_COMPLETED)))
            .await
            .unwrap();

        let (status, level, last_visit): (String, i64, Option<String>) =
            sqlx::query_as("SELECT status, level, last_visit FROM clients WHERE id = 'c1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "active");
        assert_eq!(level, 2);
        assert_eq!(last_visit.as_deref(), Some("20/05/2026"));
    }

    #[tokio::test]
    async fn test_repeating_completed_does_not_increment_again() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        apply_update(&pool, &id, update(Some(STATUS_COMPLETED)))
            .await
            .unwrap();
        // Same terminal status again is a no-op transition
        apply_update(&pool, &id, update(Some(STATUS_COMPLETED)))
            .await
            .unwrap();

        let level: i64 = sqlx::query_scalar("SELECT level FROM clients WHERE id = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(level, 2);
    }

    #[tokio::test]
    async fn test_leaving_terminal_state_rejected() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        apply_update(&pool, &id, update(Some(STATUS_CANCELLED)))
            .await
            .unwrap();
        let err = apply_update(&pool, &id, update(Some(STATUS_PENDING)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_reschedule_onto_taken_slot_conflicts() {
        let pool = test_pool().await;
        let (id, service_id) = seed(&pool).await;

        sqlx::query(
            "INSERT INTO appointments (id, client_name, service_id, date, time, status, created_at)
             VALUES (?, 'Bruno', ?, '2026-05-20', '15:00', 'confirmed', '')",
        )
        .bind(new_id())
        .bind(&service_id)
        .execute(&pool)
        .await
        .unwrap();

        let err = apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                time: Some("15:00".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::SlotOccupied));
    }

    #[tokio::test]
    async fn test_reschedule_to_free_slot_succeeds() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        let detail = apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                date: Some("2026-05-21".into()),
                time: Some("09:30".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(detail.date, "2026-05-21");
        assert_eq!(detail.time, "09:30");
    }

    #[tokio::test]
    async fn test_unknown_service_in_update_rejected() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        let err = apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                service_id: Some("no-such-service".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Service")));
    }

    #[tokio::test]
    async fn test_malformed_date_rejected() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        let err = apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                date: Some("20/05/2026".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_completion_uses_updated_date_for_last_visit() {
        let pool = test_pool().await;
        let (id, _) = seed(&pool).await;

        apply_update(
            &pool,
            &id,
            UpdateAppointmentRequest {
                status: Some(STATUS_COMPLETED.into()),
                date: Some("2026-06-01".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let last_visit: Option<String> =
            sqlx::query_scalar("SELECT last_visit FROM clients WHERE id = 'c1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(last_visit.as_deref(), Some("01/06/2026"));
    }
}
