use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: String,
    pub seq: Option<i64>,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub img: Option<String>,
    pub status: String,
    pub level: i64,
    pub last_visit: Option<String>,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub duration_min: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Appointment {
    pub id: String,
    pub client_name: String,
    pub client_id: Option<String>,
    pub service_id: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub price: f64,
    pub notes: String,
    pub photo: Option<String>,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub client_name: String,
    pub service_id: String,
    pub date: String,
    pub time: String,
    pub price: f64,
    pub client_id: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
    pub price: Option<f64>,
    pub service_id: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.date.is_none()
            && self.time.is_none()
            && self.notes.is_none()
            && self.price.is_none()
            && self.service_id.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailableTimesQuery {
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct AvailableTimesResponse {
    pub date: String,
    pub open: bool,
    pub times: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AppointmentDetail {
    pub id: String,
    pub client_name: String,
    pub client_id: Option<String>,
    pub service_id: String,
    pub service_name: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub price: f64,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub phone: String,
    pub password: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub client: Option<Client>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub img: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_min: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub duration_min: Option<i64>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub start_hour: Option<i64>,
    pub end_hour: Option<i64>,
    pub closed_days: Option<Vec<u8>>,
    pub exceptions: Option<std::collections::HashMap<String, bool>>,
    pub slot_interval_min: Option<i64>,
}

// ── Response envelope ──

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            error_kind: None,
        }
    }

    pub fn error_with_kind(kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            error_kind: Some(kind),
        }
    }
}
