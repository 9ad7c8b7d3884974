use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::error::ApiError;
use crate::models::Appointment;
use crate::reconcile::CLIENT_STATUS_ACTIVE;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_CANCELLED: &str = "cancelled";

const ALL_STATUSES: [&str; 5] = [
    STATUS_PENDING,
    STATUS_CONFIRMED,
    STATUS_IN_PROGRESS,
    STATUS_COMPLETED,
    STATUS_CANCELLED,
];

pub fn is_known_status(status: &str) -> bool {
    ALL_STATUSES.contains(&status)
}

/// `completed` and `cancelled` accept no further transitions.
pub fn is_terminal(status: &str) -> bool {
    status == STATUS_COMPLETED || status == STATUS_CANCELLED
}

/// Validate a status change. Unknown targets are `InvalidInput`; leaving a
/// terminal state is rejected. Skipping forward (e.g. pending → completed)
/// is allowed: the barber marks the visit done however it went.
pub fn check_transition(from: &str, to: &str) -> Result<(), ApiError> {
    if !is_known_status(to) {
        return Err(ApiError::InvalidInput(format!("Unknown status: {to}")));
    }
    if from == to {
        return Ok(());
    }
    if is_terminal(from) {
        return Err(ApiError::InvalidInput(format!(
            "Appointment is already {from}"
        )));
    }
    Ok(())
}

/// `YYYY-MM-DD` → `DD/MM/YYYY` for the client's last-visit display field.
/// Unparseable input is passed through untouched.
pub fn format_display_date(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d.format("%d/%m/%Y").to_string(),
        Err(_) => date.to_string(),
    }
}

/// Side effects of an appointment completing: the linked client goes
/// `active`, gains exactly one loyalty level, and has its last visit stamped
/// with the appointment's date. Called once per transition into `completed`.
pub async fn apply_completion_effects(
    pool: &SqlitePool,
    appointment: &Appointment,
) -> Result<(), sqlx::Error> {
    let Some(client_id) = &appointment.client_id else {
        return Ok(());
    };

    let last_visit = format_display_date(&appointment.date);
    sqlx::query(
        "UPDATE clients SET status = ?, level = level + 1, last_visit = ? WHERE id = ?",
    )
    .bind(CLIENT_STATUS_ACTIVE)
    .bind(&last_visit)
    .bind(client_id)
    .execute(pool)
    .await?;

    tracing::info!(
        "appointment {} completed, client {} promoted",
        appointment.id,
        client_id
    );
    Ok(())
}

// ── Tests ──
