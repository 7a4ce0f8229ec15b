//! Query/filter service — builds the multi-field resume search and the
//! filter-value listing. All matching is delegated to Postgres; comma-joined
//! params OR together within a field and AND across fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::resume::ResumeRow;
use crate::resumes::normalize::split_csv;
use crate::storage::BlobStore;

/// Signed read URLs handed to clients stay valid this long.
pub const SIGNED_URL_TTL_SECS: u64 = 900;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Free-text query across name/major/graduation year.
    pub query: Option<String>,
    pub name: Option<String>,
    pub major: Option<String>,
    pub company: Option<String>,
    pub graduation_year: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSummary {
    pub id: Uuid,
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub pdf_url: String,
    /// Time-limited read URL; null when signing failed.
    pub signed_pdf_url: Option<String>,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FilterValues {
    pub majors: Vec<String>,
    pub graduation_years: Vec<String>,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
}

/// Runs the filtered search and decorates each hit with populated
/// company/keyword names and a signed read URL.
pub async fn search_resumes(
    db: &PgPool,
    blobs: &dyn BlobStore,
    params: &SearchParams,
) -> Result<Vec<ResumeSummary>, AppError> {
    // Entity filters resolve to id sets first. A filter that matches no
    // entity can never match a resume, so it short-circuits to empty.
    let company_ids = match resolve_entity_ids(db, "companies", params.company.as_deref()).await? {
        EntityFilter::NoMatch => return Ok(Vec::new()),
        EntityFilter::Ids(ids) => ids,
        EntityFilter::Unfiltered => Vec::new(),
    };
    let keyword_ids = match resolve_entity_ids(db, "keywords", params.keyword.as_deref()).await? {
        EntityFilter::NoMatch => return Ok(Vec::new()),
        EntityFilter::Ids(ids) => ids,
        EntityFilter::Unfiltered => Vec::new(),
    };

    let mut qb: QueryBuilder<sqlx::Postgres> =
        QueryBuilder::new("SELECT * FROM resumes WHERE is_active = TRUE");

    if let Some(query) = non_empty(params.query.as_deref()) {
        let pattern = like_pattern(query);
        qb.push(" AND (name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR major ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR graduation_year ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    if let Some(name) = non_empty(params.name.as_deref()) {
        qb.push(" AND name ILIKE ");
        qb.push_bind(like_pattern(name));
    }

    if let Some(major) = non_empty(params.major.as_deref()) {
        let majors = split_csv(major);
        if !majors.is_empty() {
            qb.push(" AND (");
            for (i, value) in majors.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("major ILIKE ");
                qb.push_bind(like_pattern(value));
            }
            qb.push(")");
        }
    }

    if let Some(year) = non_empty(params.graduation_year.as_deref()) {
        let years = split_csv(year);
        if !years.is_empty() {
            qb.push(" AND graduation_year = ANY(");
            qb.push_bind(years);
            qb.push(")");
        }
    }

    if !company_ids.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM resume_companies rc WHERE rc.resume_id = resumes.id AND rc.company_id = ANY(");
        qb.push_bind(company_ids);
        qb.push("))");
    }

    if !keyword_ids.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM resume_keywords rk WHERE rk.resume_id = resumes.id AND rk.keyword_id = ANY(");
        qb.push_bind(keyword_ids);
        qb.push("))");
    }

    qb.push(" ORDER BY created_at DESC");

    let rows: Vec<ResumeRow> = qb.build_query_as().fetch_all(db).await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut companies = linked_names(db, "resume_companies", "company_id", "companies", &ids).await?;
    let mut keywords = linked_names(db, "resume_keywords", "keyword_id", "keywords", &ids).await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let signed_pdf_url = signed_url_or_none(blobs, &row.storage_key).await;
        summaries.push(ResumeSummary {
            id: row.id,
            name: row.name,
            major: row.major,
            graduation_year: row.graduation_year,
            pdf_url: row.pdf_url,
            signed_pdf_url,
            companies: companies.remove(&row.id).unwrap_or_default(),
            keywords: keywords.remove(&row.id).unwrap_or_default(),
        });
    }
    Ok(summaries)
}

/// Distinct filter values across active resumes, for the search UI.
pub async fn fetch_filter_values(db: &PgPool) -> Result<FilterValues, AppError> {
    let majors: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT major FROM resumes WHERE is_active = TRUE AND major <> '' ORDER BY major",
    )
    .fetch_all(db)
    .await?;

    let graduation_years: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT graduation_year FROM resumes WHERE is_active = TRUE AND graduation_year <> '' ORDER BY graduation_year",
    )
    .fetch_all(db)
    .await?;

    let companies: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT c.name FROM companies c
        JOIN resume_companies rc ON rc.company_id = c.id
        JOIN resumes r ON r.id = rc.resume_id
        WHERE r.is_active = TRUE
        ORDER BY c.name
        "#,
    )
    .fetch_all(db)
    .await?;

    let keywords: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT k.name FROM keywords k
        JOIN resume_keywords rk ON rk.keyword_id = k.id
        JOIN resumes r ON r.id = rk.resume_id
        WHERE r.is_active = TRUE
        ORDER BY k.name
        "#,
    )
    .fetch_all(db)
    .await?;

    Ok(FilterValues {
        majors,
        graduation_years,
        companies,
        keywords,
    })
}

/// Company/keyword names linked to each of the given resumes.
pub async fn linked_names(
    db: &PgPool,
    junction: &str,
    entity_column: &str,
    entity_table: &str,
    resume_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<String>>, AppError> {
    let sql = format!(
        "SELECT j.resume_id, e.name FROM {junction} j JOIN {entity_table} e ON e.id = j.{entity_column} WHERE j.resume_id = ANY($1) ORDER BY e.name"
    );
    let pairs: Vec<(Uuid, String)> = sqlx::query_as(&sql)
        .bind(resume_ids)
        .fetch_all(db)
        .await?;

    let mut map: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (resume_id, name) in pairs {
        map.entry(resume_id).or_default().push(name);
    }
    Ok(map)
}

/// Signing failure degrades to no URL rather than failing the search.
pub async fn signed_url_or_none(blobs: &dyn BlobStore, storage_key: &str) -> Option<String> {
    match blobs.signed_read_url(storage_key, SIGNED_URL_TTL_SECS).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Error generating signed URL for key {storage_key}: {e}");
            None
        }
    }
}

enum EntityFilter {
    /// Param absent — no constraint.
    Unfiltered,
    /// Param present and at least one entity matched.
    Ids(Vec<Uuid>),
    /// Param present but nothing matched — the search result is empty.
    NoMatch,
}

async fn resolve_entity_ids(
    db: &PgPool,
    table: &str,
    param: Option<&str>,
) -> Result<EntityFilter, AppError> {
    let Some(raw) = non_empty(param) else {
        return Ok(EntityFilter::Unfiltered);
    };
    let patterns: Vec<String> = split_csv(raw).iter().map(|v| like_pattern(v)).collect();
    if patterns.is_empty() {
        return Ok(EntityFilter::Unfiltered);
    }

    let sql = format!("SELECT id FROM {table} WHERE name ILIKE ANY($1)");
    let ids: Vec<Uuid> = sqlx::query_scalar(&sql).bind(&patterns).fetch_all(db).await?;

    if ids.is_empty() {
        Ok(EntityFilter::NoMatch)
    } else {
        Ok(EntityFilter::Ids(ids))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Substring ILIKE pattern with the user's wildcards neutralized.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_wraps_in_wildcards() {
        assert_eq!(like_pattern("google"), "%google%");
    }

    #[test]
    fn test_like_pattern_escapes_user_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_non_empty_filters_blank_params() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some(" x ")), Some("x"));
    }
}
