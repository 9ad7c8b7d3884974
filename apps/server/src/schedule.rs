use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::ApiError;

/// Business hours and closed days for the shop. One active row; created with
/// defaults on first read.
#[derive(Debug, Clone, Serialize)]
pub struct ShopConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Weekdays the shop is closed, 0=Sunday .. 6=Saturday.
    pub closed_days: Vec<u8>,
    /// Per-date overrides: `true` opens a normally-closed date,
    /// `false` closes a normally-open one.
    pub exceptions: HashMap<String, bool>,
    pub slot_interval_min: u32,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 19,
            closed_days: vec![0],
            exceptions: HashMap::new(),
            slot_interval_min: 30,
        }
    }
}

impl ShopConfig {
    /// Load the singleton settings row, inserting defaults if absent.
    pub async fn load(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let row: Option<(i64, i64, String, String, i64)> = sqlx::query_as(
            "SELECT start_hour, end_hour, closed_days, exceptions, slot_interval_min
             FROM shop_settings WHERE id = 1",
        )
        .fetch_optional(pool)
        .await?;

        match row {
            Some((start, end, closed, exceptions, interval)) => Ok(Self {
                start_hour: start as u32,
                end_hour: end as u32,
                closed_days: serde_json::from_str(&closed).unwrap_or_default(),
                exceptions: serde_json::from_str(&exceptions).unwrap_or_default(),
                slot_interval_min: interval.max(1) as u32,
            }),
            None => {
                let config = Self::default();
                sqlx::query(
                    "INSERT OR IGNORE INTO shop_settings
                     (id, start_hour, end_hour, closed_days, exceptions, slot_interval_min)
                     VALUES (1, ?, ?, ?, ?, ?)",
                )
                .bind(config.start_hour as i64)
                .bind(config.end_hour as i64)
                .bind(serde_json::to_string(&config.closed_days).unwrap_or_else(|_| "[]".into()))
                .bind("{}")
                .bind(config.slot_interval_min as i64)
                .execute(pool)
                .await?;
                Ok(config)
            }
        }
    }
}

/// Decide whether the shop accepts a booking at `date` + `time`.
///
/// Pure predicate over the supplied config. The closing boundary is
/// exclusive: with `end_hour = 19`, a 19:00 request is rejected.
pub fn check_slot_open(date: &str, time: &str, config: &ShopConfig) -> Result<(), ApiError> {
    let parsed_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::InvalidInput(format!("Invalid date: {date}")))?;
    let parsed_time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| ApiError::InvalidInput(format!("Invalid time: {time}")))?;

    let weekday = parsed_date.weekday().num_days_from_sunday() as u8;
    match config.exceptions.get(date) {
        Some(false) => return Err(ApiError::ClosedDay),
        Some(true) => {} // explicitly opened, skip the weekday rule
        None => {
            if config.closed_days.contains(&weekday) {
                return Err(ApiError::ClosedDay);
            }
        }
    }

    let hour = chrono::Timelike::hour(&parsed_time);
    if hour < config.start_hour || hour >= config.end_hour {
        return Err(ApiError::OutsideHours);
    }

    Ok(())
}

/// All slot start times for a date, ignoring existing appointments.
/// Empty when the date is closed.
pub fn slot_starts(date: &str, config: &ShopConfig) -> Vec<String> {
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return Vec::new();
    };

    let weekday = parsed.weekday().num_days_from_sunday() as u8;
    let closed = match config.exceptions.get(date) {
        Some(open) => !open,
        None => config.closed_days.contains(&weekday),
    };
    if closed {
        return Vec::new();
    }

    let mut times = Vec::new();
    let mut minutes = config.start_hour * 60;
    let end = config.end_hour * 60;
    while minutes < end {
        times.push(format!("{:02}:{:02}", minutes / 60, minutes % 60));
        minutes += config.slot_interval_min;
    }
    times
}

// ── Tests ──
