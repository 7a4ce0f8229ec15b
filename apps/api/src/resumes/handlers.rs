use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::resume::ResumeRow;
use crate::resumes::associate::{find_or_create_companies, find_or_create_keywords};
use crate::resumes::ingest::{ingest, UploadOverrides};
use crate::resumes::normalize::split_csv;
use crate::resumes::search::{
    fetch_filter_values, linked_names, search_resumes, signed_url_or_none, FilterValues,
    ResumeSummary, SearchParams,
};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub data: UploadData,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadData {
    pub id: Uuid,
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub pdf_url: String,
    /// Set when parsing degraded to fallback data; the upload still succeeded.
    pub parsing_warning: Option<String>,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
}

/// POST /api/v1/resumes
/// Multipart upload: a `file` part plus optional override fields.
pub async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let uploaded_by = headers
        .get("x-uploaded-by")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("admin")
        .to_string();

    let mut file: Option<(String, Bytes)> = None;
    let mut overrides = UploadOverrides::default();

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let field_name = field.name().unwrap_or("").to_string();
                if field_name == "file" {
                    let filename = field.file_name().unwrap_or("Unnamed file").to_string();
                    match field.bytes().await {
                        Ok(bytes) => file = Some((filename, bytes)),
                        Err(e) => {
                            return AppError::Validation(format!("Failed to read uploaded file: {e}"))
                                .into_response()
                        }
                    }
                    continue;
                }
                let value = match field.text().await {
                    Ok(v) => v,
                    Err(e) => {
                        return AppError::Validation(format!(
                            "Failed to read form field '{field_name}': {e}"
                        ))
                        .into_response()
                    }
                };
                match field_name.as_str() {
                    "name" => overrides.name = Some(value),
                    "major" => overrides.major = Some(value),
                    "graduationYear" => overrides.graduation_year = Some(value),
                    "companies" => overrides.companies = Some(value),
                    "keywords" => overrides.keywords = Some(value),
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(e) => {
                return AppError::Validation(format!("Malformed multipart request: {e}"))
                    .into_response()
            }
        }
    }

    let Some((filename, bytes)) = file else {
        return AppError::Validation("No PDF file uploaded.".to_string()).into_response();
    };

    match ingest(
        &state.db,
        state.blobs.as_ref(),
        &state.llm,
        bytes,
        &filename,
        overrides,
        &uploaded_by,
    )
    .await
    {
        Ok(outcome) => {
            let body = UploadResponse {
                message: format!("Resume \"{filename}\" uploaded successfully."),
                data: UploadData {
                    id: outcome.resume.id,
                    name: outcome.resume.name,
                    major: outcome.resume.major,
                    graduation_year: outcome.resume.graduation_year,
                    pdf_url: outcome.resume.pdf_url,
                    parsing_warning: outcome.parsing_warning,
                    companies: outcome.companies,
                    keywords: outcome.keywords,
                },
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub data: Vec<ResumeSummary>,
}

/// GET /api/v1/resumes
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let data = search_resumes(&state.db, state.blobs.as_ref(), &params).await?;
    Ok(Json(SearchResponse {
        count: data.len(),
        data,
    }))
}

/// GET /api/v1/resumes/filters
pub async fn handle_filters(
    State(state): State<AppState>,
) -> Result<Json<FilterValues>, AppError> {
    Ok(Json(fetch_filter_values(&state.db).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDetail {
    pub id: Uuid,
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub pdf_url: String,
    pub signed_pdf_url: Option<String>,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GET /api/v1/resumes/:id
pub async fn handle_get_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeDetail>, AppError> {
    let resume = fetch_active(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Resume not found.".to_string()))?;
    Ok(Json(build_detail(&state, resume).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub major: Option<String>,
    pub graduation_year: Option<String>,
    /// Comma-joined replacement for the company set.
    pub companies: Option<String>,
    /// Comma-joined replacement for the keyword set.
    pub keywords: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub message: String,
    pub data: ResumeDetail,
}

/// PUT /api/v1/resumes/:id
/// Updates scalar fields and/or replaces the reference sets in one
/// transaction. Absent/empty fields keep their current values.
pub async fn handle_update_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, AppError> {
    let resume = fetch_active(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Resume not found.".to_string()))?;

    let name = provided(req.name.as_deref()).unwrap_or(&resume.name);
    let major = provided(req.major.as_deref()).unwrap_or(&resume.major);
    let graduation_year =
        provided(req.graduation_year.as_deref()).unwrap_or(&resume.graduation_year);

    // Entity resolution happens against the pool; only the record and its
    // junction rows change inside the transaction.
    let company_ids = match provided(req.companies.as_deref()) {
        Some(csv) => Some(find_or_create_companies(&state.db, &split_csv(csv)).await?),
        None => None,
    };
    let keyword_ids = match provided(req.keywords.as_deref()) {
        Some(csv) => Some(find_or_create_keywords(&state.db, &split_csv(csv)).await?),
        None => None,
    };

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE resumes SET name = $1, major = $2, graduation_year = $3, updated_at = now() WHERE id = $4",
    )
    .bind(name)
    .bind(major)
    .bind(graduation_year)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(ids) = &company_ids {
        sqlx::query("DELETE FROM resume_companies WHERE resume_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for company_id in ids {
            sqlx::query("INSERT INTO resume_companies (resume_id, company_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(id)
                .bind(company_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    if let Some(ids) = &keyword_ids {
        sqlx::query("DELETE FROM resume_keywords WHERE resume_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for keyword_id in ids {
            sqlx::query("INSERT INTO resume_keywords (resume_id, keyword_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(id)
                .bind(keyword_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    let updated = fetch_active(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Resume not found.".to_string()))?;
    Ok(Json(UpdateResponse {
        message: "Resume updated successfully.".to_string(),
        data: build_detail(&state, updated).await?,
    }))
}

/// DELETE /api/v1/resumes/:id
/// Soft delete: the record goes inactive and the retention sweep hard-deletes
/// it (and its blob) once the retention window passes.
pub async fn handle_delete_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = sqlx::query(
        "UPDATE resumes SET is_active = FALSE, deleted_at = now(), updated_at = now() WHERE id = $1 AND is_active = TRUE",
    )
    .bind(id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Resume not found.".to_string()));
    }

    Ok(Json(json!({ "message": "Resume deleted successfully." })))
}

/// DELETE /api/v1/resumes
/// Bulk soft delete of every active resume.
pub async fn handle_delete_all(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = sqlx::query(
        "UPDATE resumes SET is_active = FALSE, deleted_at = now(), updated_at = now() WHERE is_active = TRUE",
    )
    .execute(&state.db)
    .await?;

    let count = result.rows_affected();
    if count == 0 {
        return Err(AppError::NotFound(
            "No active resumes found to delete.".to_string(),
        ));
    }

    Ok(Json(json!({
        "message": format!("Successfully deleted {count} resumes.")
    })))
}

async fn fetch_active(db: &sqlx::PgPool, id: Uuid) -> Result<Option<ResumeRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM resumes WHERE id = $1 AND is_active = TRUE")
            .bind(id)
            .fetch_optional(db)
            .await?,
    )
}

async fn build_detail(state: &AppState, resume: ResumeRow) -> Result<ResumeDetail, AppError> {
    let ids = [resume.id];
    let mut companies =
        linked_names(&state.db, "resume_companies", "company_id", "companies", &ids).await?;
    let mut keywords =
        linked_names(&state.db, "resume_keywords", "keyword_id", "keywords", &ids).await?;
    let signed_pdf_url = signed_url_or_none(state.blobs.as_ref(), &resume.storage_key).await;

    Ok(ResumeDetail {
        id: resume.id,
        name: resume.name,
        major: resume.major,
        graduation_year: resume.graduation_year,
        pdf_url: resume.pdf_url,
        signed_pdf_url,
        companies: companies.remove(&resume.id).unwrap_or_default(),
        keywords: keywords.remove(&resume.id).unwrap_or_default(),
        uploaded_by: resume.uploaded_by,
        created_at: resume.created_at,
        updated_at: resume.updated_at,
    })
}

fn provided(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
