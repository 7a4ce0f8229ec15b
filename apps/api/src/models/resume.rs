use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored resume record. `is_active = false` marks a soft delete pending
/// the retention sweep; `deleted_at` drives the sweep's cutoff.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub pdf_url: String,
    pub storage_key: String,
    pub uploaded_by: String,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompanyRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KeywordRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Row shape for the sweep's candidate query — just enough to delete.
#[derive(Debug, Clone, FromRow)]
pub struct SweepCandidate {
    pub id: Uuid,
    pub name: String,
    pub storage_key: String,
}
