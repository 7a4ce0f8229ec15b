//! Resume ingestion pipeline.
//!
//! Linear steps: validation -> resume_parsing -> data_processing ->
//! s3_upload -> associate_companies -> associate_keywords ->
//! database_create -> transaction_commit.
//!
//! Parsing failures degrade to fallback data and surface as a warning on the
//! success response. Association failures are logged and drop links, nothing
//! else. Blob upload and persistence failures are fatal; a fatal failure
//! after the blob was written deletes it again (the record transaction rolls
//! back on its own, the blob store cannot).

use std::collections::HashSet;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::llm_client::LlmClient;
use crate::models::resume::ResumeRow;
use crate::resumes::associate::{find_or_create_companies, find_or_create_keywords};
use crate::resumes::parse::{extract_fields, ExtractedFields, UNSPECIFIED};
use crate::resumes::pdf::{extract_text, PDF_MAGIC};
use crate::storage::BlobStore;

/// Uploads above this are rejected before any side effect.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
/// Scalar fields are clamped to a sane display width.
const MAX_FIELD_CHARS: usize = 255;
/// Company/keyword lists are capped to keep one resume from flooding the
/// reference tables.
const MAX_LIST_ITEMS: usize = 100;

/// Named pipeline steps, used in logs and step-specific error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStep {
    Validation,
    ResumeParsing,
    DataProcessing,
    S3Upload,
    AssociateCompanies,
    AssociateKeywords,
    DatabaseCreate,
    TransactionCommit,
}

impl IngestStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStep::Validation => "validation",
            IngestStep::ResumeParsing => "resume_parsing",
            IngestStep::DataProcessing => "data_processing",
            IngestStep::S3Upload => "s3_upload",
            IngestStep::AssociateCompanies => "associate_companies",
            IngestStep::AssociateKeywords => "associate_keywords",
            IngestStep::DatabaseCreate => "database_create",
            IngestStep::TransactionCommit => "transaction_commit",
        }
    }

    /// Steps whose fatal failure strands an already-written blob, requiring
    /// compensating deletion. A failure at or before the upload itself wrote
    /// nothing that needs cleanup.
    pub fn compensates_blob(&self) -> bool {
        matches!(
            self,
            IngestStep::AssociateCompanies
                | IngestStep::AssociateKeywords
                | IngestStep::DatabaseCreate
                | IngestStep::TransactionCommit
        )
    }
}

#[derive(Debug, Error)]
#[error("upload of \"{filename}\" failed at {}: {detail}", .step.as_str())]
pub struct IngestError {
    pub step: IngestStep,
    pub filename: String,
    pub detail: String,
}

impl IngestError {
    fn new(step: IngestStep, filename: &str, detail: impl Into<String>) -> Self {
        Self {
            step,
            filename: filename.to_string(),
            detail: detail.into(),
        }
    }

    /// Step-specific message shown to the client.
    pub fn user_message(&self) -> String {
        let filename = &self.filename;
        match self.step {
            IngestStep::Validation => self.detail.clone(),
            IngestStep::ResumeParsing => format!(
                "Failed to parse resume content for \"{filename}\". Please check if the PDF is valid and not password-protected."
            ),
            IngestStep::S3Upload => {
                format!("Error storing the file for resume \"{filename}\". Please try again.")
            }
            IngestStep::DatabaseCreate | IngestStep::TransactionCommit => {
                format!("Failed to save resume \"{filename}\". Please try again.")
            }
            _ => format!(
                "An unexpected error occurred while processing \"{filename}\": {}",
                self.detail
            ),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self.step {
            IngestStep::Validation => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Upload failed at step {}: {}", self.step.as_str(), self.detail);
        }
        let body = Json(json!({
            "error": {
                "code": "UPLOAD_FAILED",
                "message": self.user_message(),
                "step": self.step.as_str(),
                "details": self.detail
            }
        }));
        (status, body).into_response()
    }
}

/// Optional form fields that take precedence over parsed values.
/// List fields arrive as comma-joined strings.
#[derive(Debug, Default)]
pub struct UploadOverrides {
    pub name: Option<String>,
    pub major: Option<String>,
    pub graduation_year: Option<String>,
    pub companies: Option<String>,
    pub keywords: Option<String>,
}

/// Final field values after precedence, defaulting, truncation and dedup.
#[derive(Debug, PartialEq)]
pub struct ResolvedFields {
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
}

/// What the upload handler returns on success.
#[derive(Debug)]
pub struct IngestOutcome {
    pub resume: ResumeRow,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
    pub parsing_warning: Option<String>,
}

/// Runs the full pipeline for one uploaded PDF.
pub async fn ingest(
    db: &PgPool,
    blobs: &dyn BlobStore,
    llm: &LlmClient,
    bytes: Bytes,
    original_filename: &str,
    overrides: UploadOverrides,
    uploaded_by: &str,
) -> Result<IngestOutcome, IngestError> {
    info!(
        "[{original_filename}] Starting resume upload. Size: {} bytes",
        bytes.len()
    );

    validate_upload(&bytes)
        .map_err(|msg| IngestError::new(IngestStep::Validation, original_filename, msg))?;

    // resume_parsing: never fatal. A text-extraction failure falls back to
    // filename-derived data and the reason rides along as a warning.
    info!(
        "[{original_filename}] Step {}: parsing resume...",
        IngestStep::ResumeParsing.as_str()
    );
    let now_ms = Utc::now().timestamp_millis();
    let fallback_name =
        filename_stem(original_filename).unwrap_or_else(|| format!("Resume_{now_ms}"));

    let (parsed, parsing_warning) = match extract_text(&bytes).await {
        Ok(text) => {
            let extraction = extract_fields(llm, &text).await;
            (extraction.fields, extraction.warning)
        }
        Err(e) => {
            warn!("[{original_filename}] Text extraction failed: {e}. Using fallback data.");
            (ExtractedFields::fallback(), Some(e.to_string()))
        }
    };

    let resolved = resolve_fields(&overrides, &parsed, &fallback_name, now_ms);
    info!(
        "[{original_filename}] Step {} done. Name: \"{}\", Major: \"{}\", GradYear: \"{}\", Companies: {}, Keywords: {}",
        IngestStep::DataProcessing.as_str(),
        resolved.name,
        resolved.major,
        resolved.graduation_year,
        resolved.companies.len(),
        resolved.keywords.len()
    );

    // s3_upload: fatal on failure, nothing written yet so no compensation.
    let key = storage_key(&resolved.name, now_ms);
    let pdf_url = blobs
        .put(bytes.clone(), &key, "application/pdf")
        .await
        .map_err(|e| IngestError::new(IngestStep::S3Upload, original_filename, e.to_string()))?;
    info!("[{original_filename}] Blob upload successful: {key}");

    // associate_*: a category failure drops that category's links, nothing
    // else. Runs against the pool so a failed statement cannot poison the
    // record transaction below.
    let company_ids = match find_or_create_companies(db, &resolved.companies).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(
                "[{original_filename}] Step {} failed: {e}. Continuing without company links.",
                IngestStep::AssociateCompanies.as_str()
            );
            Vec::new()
        }
    };
    let keyword_ids = match find_or_create_keywords(db, &resolved.keywords).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(
                "[{original_filename}] Step {} failed: {e}. Continuing without keyword links.",
                IngestStep::AssociateKeywords.as_str()
            );
            Vec::new()
        }
    };

    match create_record(db, &resolved, &pdf_url, &key, uploaded_by, &company_ids, &keyword_ids)
        .await
    {
        Ok(resume) => {
            info!("[{original_filename}] Transaction committed. Upload complete. ID: {}", resume.id);
            Ok(IngestOutcome {
                resume,
                companies: resolved.companies,
                keywords: resolved.keywords,
                parsing_warning,
            })
        }
        Err((step, detail)) => {
            if step.compensates_blob() {
                info!("[{original_filename}] Cleaning up blob {key} after failed {}", step.as_str());
                if let Err(delete_err) = blobs.delete(&key).await {
                    // Logged only; the original failure is what the caller sees.
                    error!("[{original_filename}] Error cleaning up blob {key}: {delete_err}");
                }
            }
            Err(IngestError::new(step, original_filename, detail))
        }
    }
}

/// Inserts the resume row and its junction rows in one transaction.
async fn create_record(
    db: &PgPool,
    resolved: &ResolvedFields,
    pdf_url: &str,
    storage_key: &str,
    uploaded_by: &str,
    company_ids: &[Uuid],
    keyword_ids: &[Uuid],
) -> Result<ResumeRow, (IngestStep, String)> {
    let mut tx = db
        .begin()
        .await
        .map_err(|e| (IngestStep::DatabaseCreate, e.to_string()))?;

    let resume: ResumeRow = sqlx::query_as(
        r#"
        INSERT INTO resumes (id, name, major, graduation_year, pdf_url, storage_key, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&resolved.name)
    .bind(&resolved.major)
    .bind(&resolved.graduation_year)
    .bind(pdf_url)
    .bind(storage_key)
    .bind(uploaded_by)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| (IngestStep::DatabaseCreate, e.to_string()))?;

    for company_id in company_ids {
        sqlx::query(
            "INSERT INTO resume_companies (resume_id, company_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(resume.id)
        .bind(company_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| (IngestStep::DatabaseCreate, e.to_string()))?;
    }

    for keyword_id in keyword_ids {
        sqlx::query(
            "INSERT INTO resume_keywords (resume_id, keyword_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(resume.id)
        .bind(keyword_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| (IngestStep::DatabaseCreate, e.to_string()))?;
    }

    tx.commit()
        .await
        .map_err(|e| (IngestStep::TransactionCommit, e.to_string()))?;

    Ok(resume)
}

/// Pre-side-effect checks on the uploaded bytes.
fn validate_upload(bytes: &Bytes) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("Empty file content.".to_string());
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err("File too large. Maximum file size is 10MB.".to_string());
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err("Invalid PDF file format.".to_string());
    }
    Ok(())
}

/// Filename with its extension stripped, or None when nothing usable remains.
fn filename_stem(filename: &str) -> Option<String> {
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        Some(_) => "",
        None => filename,
    };
    let stem = stem.trim();
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Applies the precedence rule (explicit override > parsed value > fallback),
/// defaults empty fields, truncates oversize strings and caps/dedups lists.
fn resolve_fields(
    overrides: &UploadOverrides,
    parsed: &ExtractedFields,
    fallback_name: &str,
    now_ms: i64,
) -> ResolvedFields {
    let name = first_non_empty(&[
        overrides.name.as_deref().unwrap_or(""),
        &parsed.name,
        fallback_name,
    ])
    .unwrap_or_else(|| format!("Unknown_Resume_{now_ms}"));
    let name = truncate_field(&name);

    let major = first_non_empty(&[overrides.major.as_deref().unwrap_or(""), &parsed.major])
        .unwrap_or_else(|| UNSPECIFIED.to_string());
    let major = truncate_field(&major);

    let graduation_year = first_non_empty(&[
        overrides.graduation_year.as_deref().unwrap_or(""),
        &parsed.graduation_year,
    ])
    .unwrap_or_else(|| UNSPECIFIED.to_string());
    // A year that long is noise, not a year worth truncating.
    let graduation_year = if graduation_year.chars().count() > MAX_FIELD_CHARS {
        UNSPECIFIED.to_string()
    } else {
        graduation_year
    };

    let companies = override_list(overrides.companies.as_deref(), &parsed.companies);
    let keywords = override_list(overrides.keywords.as_deref(), &parsed.keywords);

    ResolvedFields {
        name,
        major,
        graduation_year,
        companies: cap_and_dedup(companies),
        keywords: cap_and_dedup(keywords),
    }
}

fn first_non_empty(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .map(|c| c.to_string())
}

fn override_list(override_csv: Option<&str>, parsed: &[String]) -> Vec<String> {
    match override_csv {
        Some(csv) if !csv.trim().is_empty() => crate::resumes::normalize::split_csv(csv),
        _ => parsed.to_vec(),
    }
}

fn cap_and_dedup(mut items: Vec<String>) -> Vec<String> {
    if items.len() > MAX_LIST_ITEMS {
        warn!("Truncating list from {} to {} items", items.len(), MAX_LIST_ITEMS);
        items.truncate(MAX_LIST_ITEMS);
    }
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
    items
}

fn truncate_field(value: &str) -> String {
    if value.chars().count() <= MAX_FIELD_CHARS {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(MAX_FIELD_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Blob key derived from the resolved name plus a timestamp; the timestamp,
/// not a content hash, is what avoids collisions.
fn storage_key(name: &str, now_ms: i64) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .take(100)
        .collect();
    let safe = if sanitized.is_empty() {
        format!("resume_{now_ms}")
    } else {
        sanitized
    };
    format!("resumes/{safe}_{now_ms}.pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_bytes(len: usize) -> Bytes {
        let mut data = b"%PDF-1.4".to_vec();
        data.resize(len, b' ');
        Bytes::from(data)
    }

    #[test]
    fn test_validate_upload_accepts_valid_pdf() {
        assert!(validate_upload(&pdf_bytes(200)).is_ok());
    }

    #[test]
    fn test_validate_upload_rejects_empty() {
        assert_eq!(
            validate_upload(&Bytes::new()).unwrap_err(),
            "Empty file content."
        );
    }

    #[test]
    fn test_validate_upload_rejects_oversize() {
        let err = validate_upload(&pdf_bytes(MAX_UPLOAD_BYTES + 1)).unwrap_err();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_validate_upload_rejects_bad_signature() {
        let err = validate_upload(&Bytes::from_static(b"PK\x03\x04 not a pdf")).unwrap_err();
        assert_eq!(err, "Invalid PDF file format.");
    }

    #[test]
    fn test_filename_stem() {
        assert_eq!(filename_stem("resume.pdf"), Some("resume".to_string()));
        assert_eq!(filename_stem("jane.doe.pdf"), Some("jane.doe".to_string()));
        assert_eq!(filename_stem("noext"), Some("noext".to_string()));
        assert_eq!(filename_stem(".pdf"), None);
        assert_eq!(filename_stem(""), None);
    }

    fn parsed_fixture() -> ExtractedFields {
        ExtractedFields {
            name: "Jane Doe".to_string(),
            major: "Computer Science".to_string(),
            graduation_year: "2026".to_string(),
            companies: vec!["IBM".to_string(), "NASA".to_string()],
            keywords: vec!["Rust".to_string()],
        }
    }

    #[test]
    fn test_resolve_fields_parsed_values_win_over_fallback() {
        let resolved = resolve_fields(&UploadOverrides::default(), &parsed_fixture(), "file", 1);
        assert_eq!(resolved.name, "Jane Doe");
        assert_eq!(resolved.major, "Computer Science");
        assert_eq!(resolved.graduation_year, "2026");
        assert_eq!(resolved.companies, vec!["IBM", "NASA"]);
    }

    #[test]
    fn test_resolve_fields_overrides_win_over_parsed() {
        let overrides = UploadOverrides {
            name: Some("Override Name".to_string()),
            major: Some("Physics".to_string()),
            graduation_year: Some("2027".to_string()),
            companies: Some("Google, Apple".to_string()),
            keywords: Some("C++".to_string()),
        };
        let resolved = resolve_fields(&overrides, &parsed_fixture(), "file", 1);
        assert_eq!(resolved.name, "Override Name");
        assert_eq!(resolved.major, "Physics");
        assert_eq!(resolved.graduation_year, "2027");
        assert_eq!(resolved.companies, vec!["Google", "Apple"]);
        assert_eq!(resolved.keywords, vec!["C++"]);
    }

    #[test]
    fn test_resolve_fields_fallback_record_gets_sentinels() {
        let resolved = resolve_fields(
            &UploadOverrides::default(),
            &ExtractedFields::fallback(),
            "jane_resume",
            99,
        );
        assert_eq!(resolved.name, "jane_resume");
        assert_eq!(resolved.major, UNSPECIFIED);
        assert_eq!(resolved.graduation_year, UNSPECIFIED);
        assert!(resolved.companies.is_empty());
    }

    #[test]
    fn test_resolve_fields_everything_empty_yields_placeholder_name() {
        let parsed = ExtractedFields {
            name: String::new(),
            major: String::new(),
            graduation_year: String::new(),
            companies: vec![],
            keywords: vec![],
        };
        let resolved = resolve_fields(&UploadOverrides::default(), &parsed, "", 42);
        assert_eq!(resolved.name, "Unknown_Resume_42");
        assert_eq!(resolved.major, UNSPECIFIED);
        assert_eq!(resolved.graduation_year, UNSPECIFIED);
    }

    #[test]
    fn test_resolve_fields_truncates_oversize_name() {
        let overrides = UploadOverrides {
            name: Some("x".repeat(300)),
            ..UploadOverrides::default()
        };
        let resolved = resolve_fields(&overrides, &parsed_fixture(), "file", 1);
        assert_eq!(resolved.name.chars().count(), 255);
        assert!(resolved.name.ends_with("..."));
    }

    #[test]
    fn test_resolve_fields_oversize_year_becomes_sentinel() {
        let overrides = UploadOverrides {
            graduation_year: Some("9".repeat(300)),
            ..UploadOverrides::default()
        };
        let resolved = resolve_fields(&overrides, &parsed_fixture(), "file", 1);
        assert_eq!(resolved.graduation_year, UNSPECIFIED);
    }

    #[test]
    fn test_cap_and_dedup_removes_duplicates() {
        let items = vec!["IBM", "NASA", "IBM", "ibm", "NASA"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(cap_and_dedup(items), vec!["IBM", "NASA", "ibm"]);
    }

    #[test]
    fn test_cap_and_dedup_caps_at_limit() {
        let items: Vec<String> = (0..150).map(|i| format!("Company {i}")).collect();
        assert_eq!(cap_and_dedup(items).len(), MAX_LIST_ITEMS);
    }

    #[test]
    fn test_storage_key_sanitizes_name() {
        assert_eq!(storage_key("Jane", 1234), "resumes/jane_1234.pdf");
        assert_eq!(storage_key("Jane Doe!", 1234), "resumes/jane_doe__1234.pdf");
    }

    #[test]
    fn test_storage_key_empty_name_falls_back() {
        assert_eq!(storage_key("", 1234), "resumes/resume_1234_1234.pdf");
    }

    #[test]
    fn test_storage_key_caps_long_names() {
        let key = storage_key(&"a".repeat(500), 7);
        assert_eq!(key, format!("resumes/{}_7.pdf", "a".repeat(100)));
    }

    #[test]
    fn test_compensation_applies_only_after_blob_upload() {
        assert!(!IngestStep::Validation.compensates_blob());
        assert!(!IngestStep::ResumeParsing.compensates_blob());
        assert!(!IngestStep::DataProcessing.compensates_blob());
        assert!(!IngestStep::S3Upload.compensates_blob());
        assert!(IngestStep::AssociateCompanies.compensates_blob());
        assert!(IngestStep::AssociateKeywords.compensates_blob());
        assert!(IngestStep::DatabaseCreate.compensates_blob());
        assert!(IngestStep::TransactionCommit.compensates_blob());
    }

    #[test]
    fn test_step_names() {
        assert_eq!(IngestStep::Validation.as_str(), "validation");
        assert_eq!(IngestStep::TransactionCommit.as_str(), "transaction_commit");
    }

    #[test]
    fn test_user_message_mentions_filename() {
        let err = IngestError::new(IngestStep::S3Upload, "jane.pdf", "bucket unreachable");
        assert!(err.user_message().contains("jane.pdf"));
        let err = IngestError::new(IngestStep::DatabaseCreate, "jane.pdf", "constraint");
        assert!(err.user_message().contains("jane.pdf"));
    }
}
