//! Find-or-create for the shared reference entities (companies, keywords).
//!
//! Two concurrent uploads may race to introduce the same name; the unique
//! constraint on `name` is the safety net. The loser's INSERT hits the
//! conflict, inserts nothing, and the follow-up SELECT observes the winner's
//! row — same id both times, never a duplicate.

use sqlx::PgPool;
use uuid::Uuid;

use crate::resumes::normalize::title_case;

/// Resolves each company name to an entity id, creating missing entities.
/// Names are title-cased before lookup so "google" and "Google" map to the
/// same entity.
pub async fn find_or_create_companies(
    pool: &PgPool,
    names: &[String],
) -> Result<Vec<Uuid>, sqlx::Error> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let formatted = title_case(name.trim());
        if formatted.is_empty() {
            continue;
        }
        ids.push(find_or_create(pool, "companies", &formatted).await?);
    }
    Ok(ids)
}

/// Resolves each keyword to an entity id, creating missing entities.
/// Keywords keep their spelling ("C++", "MATLAB"), only trimmed.
pub async fn find_or_create_keywords(
    pool: &PgPool,
    names: &[String],
) -> Result<Vec<Uuid>, sqlx::Error> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        ids.push(find_or_create(pool, "keywords", trimmed).await?);
    }
    Ok(ids)
}

async fn find_or_create(pool: &PgPool, table: &str, name: &str) -> Result<Uuid, sqlx::Error> {
    let insert =
        format!("INSERT INTO {table} (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING RETURNING id");
    if let Some(id) = sqlx::query_scalar::<_, Uuid>(&insert)
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    // Lost the race (or the entity predates this upload); the row exists.
    let select = format!("SELECT id FROM {table} WHERE name = $1");
    sqlx::query_scalar::<_, Uuid>(&select)
        .bind(name)
        .fetch_one(pool)
        .await
}
