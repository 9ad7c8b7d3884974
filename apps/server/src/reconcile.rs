use sqlx::SqlitePool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::db::new_id;
use crate::error::ApiError;
use crate::models::Client;
use crate::clock::shop_now;

/// Minimum number of digits for a phone to be trusted as an identity key.
const MIN_PHONE_DIGITS: usize = 9;

/// Profile pictures assigned to guests so no client is left without one.
const GUEST_AVATARS: [&str; 6] = [
    "/avatars/guest-1.png",
    "/avatars/guest-2.png",
    "/avatars/guest-3.png",
    "/avatars/guest-4.png",
    "/avatars/guest-5.png",
    "/avatars/guest-6.png",
];

pub const CLIENT_STATUS_NEW: &str = "new";
pub const CLIENT_STATUS_GUEST: &str = "guest";
pub const CLIENT_STATUS_ACTIVE: &str = "active";

/// Outcome of resolving booking identity hints to a client record.
#[derive(Debug)]
pub struct ResolvedClient {
    pub client: Client,
    pub created: bool,
}

/// Whether two names plausibly belong to the same person: trimmed,
/// case-insensitive containment in either direction. "carlos" matches
/// "Carlos Silva"; "João" does not match "Carlos".
pub fn names_are_compatible(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.contains(&b) || b.contains(&a)
}

/// Digits in a phone string, skipping separators and formatting.
fn phone_digits(phone: &str) -> usize {
    phone.chars().filter(|c| c.is_ascii_digit()).count()
}

/// Deterministic pick from the avatar pool, keyed on the identity hints so
/// retries of the same booking land on the same picture.
fn guest_avatar(name: &str, phone: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    name.trim().to_lowercase().hash(&mut hasher);
    phone.trim().hash(&mut hasher);
    GUEST_AVATARS[(hasher.finish() % GUEST_AVATARS.len() as u64) as usize]
}

/// Map a booking's (explicit id?, name, phone) to exactly one client record,
/// creating a guest when nothing matches.
///
/// Returns `None` only when there is no explicit id, no usable phone and no
/// usable name: the appointment then stays anonymous (denormalized name
/// only). A phone that matches a differently-named person is rejected with
/// `PhoneNameConflict` instead of silently linking to a stranger's history.
pub async fn resolve_client(
    pool: &SqlitePool,
    explicit_id: Option<&str>,
    name: &str,
    phone: Option<&str>,
) -> Result<Option<ResolvedClient>, ApiError> {
    // 1. Trusted caller supplied the id (e.g. a logged-in client).
    if let Some(id) = explicit_id {
        let client = fetch_client(pool, id)
            .await?
            .ok_or(ApiError::NotFound("Client"))?;
        return Ok(Some(ResolvedClient {
            client,
            created: false,
        }));
    }

    let name = name.trim();
    let phone = phone.map(str::trim).unwrap_or("");

    // 2. Phone lookup, when the phone is substantial enough to identify someone.
    if phone_digits(phone) >= MIN_PHONE_DIGITS {
        let found = sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE phone = ? LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(pool)
        .await?;

        if let Some(client) = found {
            if !names_are_compatible(&client.name, name) {
                return Err(ApiError::PhoneNameConflict {
                    existing_name: client.name,
                });
            }
            let client = backfill(pool, client, None, true).await?;
            return Ok(Some(ResolvedClient {
                client,
                created: false,
            }));
        }
    }

    // 3. Name lookup (case-insensitive exact match).
    if !name.is_empty() {
        let found = sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE lower(name) = lower(?) LIMIT 1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;

        if let Some(client) = found {
            let new_phone = if phone_digits(phone) >= MIN_PHONE_DIGITS && client.phone.is_empty() {
                Some(phone)
            } else {
                None
            };
            let client = backfill(pool, client, new_phone, true).await?;
            return Ok(Some(ResolvedClient {
                client,
                created: false,
            }));
        }
    }

    // Nothing to key a record on: anonymous, name-only appointment.
    if name.is_empty() && phone.is_empty() {
        return Ok(None);
    }

    // 4. Brand-new guest.
    let id = new_id();
    let img = guest_avatar(name, phone);
    let created_at = shop_now().format("%Y-%m-%d %H:%M:%S").to_string();
    sqlx::query(
        "INSERT INTO clients (id, seq, name, phone, img, status, level, notes, created_at)
         VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM clients), ?, ?, ?, ?, 1, '', ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(phone)
    .bind(img)
    .bind(CLIENT_STATUS_GUEST)
    .bind(&created_at)
    .execute(pool)
    .await?;

    let client = fetch_client(pool, &id)
        .await?
        .ok_or(ApiError::NotFound("Client"))?;
    Ok(Some(ResolvedClient {
        client,
        created: true,
    }))
}

pub async fn fetch_client(pool: &SqlitePool, id: &str) -> Result<Option<Client>, sqlx::Error> {
    sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Fill in missing profile data on a reused record. Never overwrites
/// existing values.
async fn backfill(
    pool: &SqlitePool,
    mut client: Client,
    phone: Option<&str>,
    avatar: bool,
) -> Result<Client, sqlx::Error> {
    if let Some(phone) = phone {
        sqlx::query("UPDATE clients SET phone = ? WHERE id = ? AND phone = ''")
            .bind(phone)
            .bind(&client.id)
            .execute(pool)
            .await?;
        if client.phone.is_empty() {
            client.phone = phone.to_string();
        }
    }
    if avatar && client.img.is_none() {
        let img = guest_avatar(&client.name, &client.phone);
        sqlx::query("UPDATE clients SET img = ? WHERE id = ? AND img IS NULL")
            .bind(img)
            .bind(&client.id)
            .execute(pool)
            .await?;
        client.img = Some(img.to_string());
    }
    Ok(client)
}

// ── Tests ──
