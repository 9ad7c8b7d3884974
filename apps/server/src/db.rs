use sqlx::SqlitePool;
use uuid::Uuid;

/// Opaque string id for new rows.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, "001_init").await? {
        let migration_sql = include_str!("../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await?;
            }
        }
        mark_applied(pool, "001_init").await?;
        tracing::info!("Applied migration: 001_init");
    }

    // 002: seed the service catalog
    if !is_applied(pool, "002_seed_services").await? {
        let catalog: [(&str, &str, f64, i64); 4] = [
            ("Corte", "Corte de cabelo", 45.0, 30),
            ("Barba", "Barba completa com toalha quente", 35.0, 30),
            ("Corte + Barba", "Combo corte e barba", 70.0, 60),
            ("Pezinho", "Acabamento rápido", 15.0, 15),
        ];
        for (i, (name, description, price, duration)) in catalog.iter().enumerate() {
            sqlx::query(
                "INSERT INTO services (id, name, description, price, duration_min, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(name)
            .bind(description)
            .bind(price)
            .bind(duration)
            .bind(i as i64 + 1)
            .execute(pool)
            .await?;
        }
        mark_applied(pool, "002_seed_services").await?;
        tracing::info!("Applied migration: 002_seed_services");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

async fn is_applied(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
}

async fn mark_applied(pool: &SqlitePool, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Whether a storage error is the unique-index violation raised when two
/// requests race for the same slot. The partial index on
/// `appointments(date, time) WHERE status != 'cancelled'` is the backstop
/// behind the application-level pre-check.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

// ── Test support ──

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // A single connection keeps the in-memory database alive and shared.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}
