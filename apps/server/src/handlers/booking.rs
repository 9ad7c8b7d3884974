use axum::{
    extract::{Query, State},
    http::header,
    Json,
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    alerts, auth,
    clock::shop_now,
    db::{is_unique_violation, new_id},
    error::ApiError,
    lifecycle::{is_known_status, STATUS_PENDING},
    models::*,
    reconcile::{resolve_client, CLIENT_STATUS_ACTIVE, CLIENT_STATUS_GUEST, CLIENT_STATUS_NEW},
    schedule::{check_slot_open, slot_starts, ShopConfig},
    AppState,
};

const APPOINTMENT_DETAIL_SELECT: &str =
    "SELECT a.id, a.client_name, a.client_id, a.service_id, s.name as service_name,
            a.date, a.time, a.status, a.price, a.notes, a.created_at
     FROM appointments a
     JOIN services s ON s.id = a.service_id";

/// POST /api/appointments — book a slot.
///
/// Pipeline: availability → conflict pre-check → client reconciliation →
/// insert. The insert is additionally guarded by the partial unique index,
/// so a raced duplicate surfaces as the same conflict error.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiResponse<AppointmentDetail>>, ApiError> {
    // A logged-in client booking for themselves counts as an explicit id.
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token_client_id = auth_header
        .and_then(|h| auth::extract_user_from_header(h, &state.auth_secret))
        .filter(|u| u.role == auth::ROLE_CLIENT)
        .map(|u| u.id);

    let detail = book(&state.db, body, token_client_id.as_deref()).await?;

    alerts::notify(
        &state.webhook_url,
        &format!(
            "Nova reserva: {} — {} em {} às {}",
            detail.client_name, detail.service_name, detail.date, detail.time
        ),
    );

    Ok(Json(ApiResponse::success(detail)))
}

/// The booking core, independent of the HTTP layer.
pub async fn book(
    pool: &SqlitePool,
    body: CreateAppointmentRequest,
    token_client_id: Option<&str>,
) -> Result<AppointmentDetail, ApiError> {
    if !body.price.is_finite() || body.price < 0.0 {
        return Err(ApiError::InvalidInput(format!(
            "Invalid price: {}",
            body.price
        )));
    }

    let status = match body.status.as_deref() {
        None => STATUS_PENDING,
        Some(s) if is_known_status(s) => s,
        Some(s) => return Err(ApiError::InvalidInput(format!("Unknown status: {s}"))),
    };

    // The service must exist before anything is written; otherwise the
    // insert would die on the foreign key and surface as an opaque 500.
    if !service_exists(pool, &body.service_id).await? {
        return Err(ApiError::NotFound("Service"));
    }

    // 1. Shop open at this instant? Also validates the date/time format.
    let config = ShopConfig::load(pool).await?;
    check_slot_open(&body.date, &body.time, &config)?;

    // 2. Optimistic conflict pre-check: a fast, friendly rejection. The
    //    unique index remains the correctness backstop underneath.
    if slot_is_taken(pool, &body.date, &body.time).await? {
        return Err(ApiError::SlotOccupied);
    }

    // 3. Resolve the client before inserting, so a failed client write
    //    never leaves an appointment pointing at nothing.
    let explicit_id = body.client_id.as_deref().or(token_client_id);
    let resolved = resolve_client(pool, explicit_id, &body.client_name, body.phone.as_deref())
        .await?;

    // 4. Insert.
    let id = new_id();
    let created_at = shop_now().format("%Y-%m-%d %H:%M:%S").to_string();
    let result = sqlx::query(
        "INSERT INTO appointments (id, client_name, client_id, service_id, date, time, status, price, notes, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(body.client_name.trim())
    .bind(resolved.as_ref().map(|r| r.client.id.as_str()))
    .bind(&body.service_id)
    .bind(&body.date)
    .bind(&body.time)
    .bind(status)
    .bind(body.price)
    .bind(body.notes.as_deref().unwrap_or(""))
    .bind(&created_at)
    .execute(pool)
    .await;

    if let Err(e) = result {
        if is_unique_violation(&e) {
            // Lost the race past the pre-check.
            return Err(ApiError::SlotOccupied);
        }
        return Err(e.into());
    }

    // Booking itself signals engagement: fresh or provisional clients go
    // active right away, not only on completion.
    if let Some(resolved) = &resolved {
        let status = resolved.client.status.as_str();
        if resolved.created || status == CLIENT_STATUS_GUEST || status == CLIENT_STATUS_NEW {
            if let Err(e) = sqlx::query("UPDATE clients SET status = ? WHERE id = ?")
                .bind(CLIENT_STATUS_ACTIVE)
                .bind(&resolved.client.id)
                .execute(pool)
                .await
            {
                tracing::error!("failed to promote client {}: {}", resolved.client.id, e);
            }
        }
    }

    let detail = sqlx::query_as::<_, AppointmentDetail>(&format!(
        "{} WHERE a.id = ?",
        APPOINTMENT_DETAIL_SELECT
    ))
    .bind(&id)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NotFound("Appointment"))?;

    Ok(detail)
}

pub async fn service_exists(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) > 0 FROM services WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Is there an active (non-cancelled) appointment at this exact slot?
pub async fn slot_is_taken(
    pool: &SqlitePool,
    date: &str,
    time: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM appointments
         WHERE date = ? AND time = ? AND status != 'cancelled'",
    )
    .bind(date)
    .bind(time)
    .fetch_one(pool)
    .await
}

/// GET /api/available-times?date=YYYY-MM-DD — open slot starts for a date.
pub async fn available_times(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableTimesQuery>,
) -> Result<Json<ApiResponse<AvailableTimesResponse>>, ApiError> {
    let config = ShopConfig::load(&state.db).await?;
    let all = slot_starts(&query.date, &config);

    if all.is_empty() {
        return Ok(Json(ApiResponse::success(AvailableTimesResponse {
            date: query.date,
            open: false,
            times: vec![],
        })));
    }

    let taken: Vec<String> = sqlx::query_scalar(
        "SELECT time FROM appointments WHERE date = ? AND status != 'cancelled'",
    )
    .bind(&query.date)
    .fetch_all(&state.db)
    .await?;

    let times = all.into_iter().filter(|t| !taken.contains(t)).collect();

    Ok(Json(ApiResponse::success(AvailableTimesResponse {
        date: query.date,
        open: true,
        times,
    })))
}

/// GET /api/services — active catalog, public.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT * FROM services WHERE is_active = 1 ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiResponse::success(services)))
}

pub fn appointment_detail_select() -> &'static str {
    APPOINTMENT_DETAIL_SELECT
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn request(date: &str, time: &str) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            client_name: "Ana".into(),
            service_id: "svc".into(),
            date: date.into(),
            time: time.into(),
            price: 45.0,
            client_id: None,
            phone: None,
            notes: None,
            status: None,
        }
    }

    async fn pool_with_service() -> (SqlitePool, String) {
        let pool = test_pool().await;
        let service_id: String = sqlx::query_scalar("SELECT id FROM services LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        (pool, service_id)
    }

    // 2026-05-20 is a Wednesday; defaults are 8..19, Sundays closed.

    #[tokio::test]
    async fn test_booking_succeeds_in_pending() {
        let (pool, svc) = pool_with_service().await;
        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;

        let detail = book(&pool, req, None).await.unwrap();
        assert_eq!(detail.status, "pending");
        assert_eq!(detail.date, "2026-05-20");
        assert_eq!(detail.time, "14:00");
    }

    #[tokio::test]
    async fn test_booking_on_sunday_rejected() {
        let (pool, svc) = pool_with_service().await;
        let mut req = request("2026-05-24", "10:00"); // Sunday
        req.service_id = svc;

        let err = book(&pool, req, None).await.unwrap_err();
        assert!(matches!(err, ApiError::ClosedDay));
    }

    #[tokio::test]
    async fn test_booking_outside_hours_rejected() {
        let (pool, svc) = pool_with_service().await;

        let mut before = request("2026-05-20", "07:00");
        before.service_id = svc.clone();
        assert!(matches!(
            book(&pool, before, None).await.unwrap_err(),
            ApiError::OutsideHours
        ));

        // Closing boundary is exclusive: 19:00 with end_hour=19 rejected
        let mut at_close = request("2026-05-20", "19:00");
        at_close.service_id = svc;
        assert!(matches!(
            book(&pool, at_close, None).await.unwrap_err(),
            ApiError::OutsideHours
        ));
    }

    #[tokio::test]
    async fn test_double_booking_rejected() {
        let (pool, svc) = pool_with_service().await;

        let mut first = request("2026-05-20", "14:00");
        first.service_id = svc.clone();
        book(&pool, first, None).await.unwrap();

        let mut second = request("2026-05-20", "14:00");
        second.service_id = svc;
        second.client_name = "Bruno".into();
        let err = book(&pool, second, None).await.unwrap_err();
        assert!(matches!(err, ApiError::SlotOccupied));
    }

    #[tokio::test]
    async fn test_slot_reusable_after_cancellation() {
        let (pool, svc) = pool_with_service().await;

        let mut first = request("2026-05-20", "14:00");
        first.service_id = svc.clone();
        let booked = book(&pool, first, None).await.unwrap();

        sqlx::query("UPDATE appointments SET status = 'cancelled' WHERE id = ?")
            .bind(&booked.id)
            .execute(&pool)
            .await
            .unwrap();

        let mut retry = request("2026-05-20", "14:00");
        retry.service_id = svc;
        retry.client_name = "Bruno".into();
        book(&pool, retry, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_raced_insert_maps_to_slot_occupied() {
        let (pool, svc) = pool_with_service().await;

        // Simulate the TOCTOU window: a competing row lands after the
        // pre-check would have run.
        sqlx::query(
            "INSERT INTO appointments (id, client_name, service_id, date, time, status, created_at)
             VALUES (?, 'Rival', ?, '2026-05-20', '14:00', 'confirmed', '')",
        )
        .bind(new_id())
        .bind(&svc)
        .execute(&pool)
        .await
        .unwrap();

        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;
        let err = book(&pool, req, None).await.unwrap_err();
        assert!(matches!(err, ApiError::SlotOccupied));
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let (pool, svc) = pool_with_service().await;
        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;
        req.price = -1.0;
        assert!(matches!(
            book(&pool, req, None).await.unwrap_err(),
            ApiError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let (pool, _) = pool_with_service().await;
        let req = request("2026-05-20", "14:00"); // service_id = "svc", not seeded

        let err = book(&pool, req, None).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Service")));

        // Rejected before anything was written
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_unknown_status_rejected() {
        let (pool, svc) = pool_with_service().await;
        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;
        req.status = Some("maybe".into());
        assert!(matches!(
            book(&pool, req, None).await.unwrap_err(),
            ApiError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_guest_created_and_promoted_on_booking() {
        let (pool, svc) = pool_with_service().await;
        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;
        req.phone = Some("11977776666".into());

        let detail = book(&pool, req, None).await.unwrap();
        let client_id = detail.client_id.expect("client linked");

        let (status, img): (String, Option<String>) =
            sqlx::query_as("SELECT status, img FROM clients WHERE id = ?")
                .bind(&client_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        // Created as guest, then promoted right away by the booking
        assert_eq!(status, "active");
        assert!(img.is_some());
    }

    #[tokio::test]
    async fn test_phone_name_conflict_blocks_booking() {
        let (pool, svc) = pool_with_service().await;
        sqlx::query(
            "INSERT INTO clients (id, name, phone, status, level, notes, created_at)
             VALUES ('c1', 'Carlos', '11999998888', 'active', 1, '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut req = request("2026-05-20", "14:00");
        req.service_id = svc;
        req.client_name = "João".into();
        req.phone = Some("11999998888".into());

        let err = book(&pool, req, None).await.unwrap_err();
        assert!(matches!(err, ApiError::PhoneNameConflict { .. }));

        // The rejection created nothing
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_logged_in_client_is_linked_directly() {
        let (pool, svc) = pool_with_service().await;
        sqlx::query(
            "INSERT INTO clients (id, name, phone, status, level, notes, created_at)
             VALUES ('c9', 'Paulo', '11911112222', 'active', 2, '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut req = request("2026-05-20", "15:00");
        req.service_id = svc;
        req.client_name = "Paulo".into();

        let detail = book(&pool, req, Some("c9")).await.unwrap();
        assert_eq!(detail.client_id.as_deref(), Some("c9"));
    }
}
