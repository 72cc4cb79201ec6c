//! Row types for the tables shaped by the migration chain.
//!
//! Each struct mirrors its table after every built-in revision is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role value that grants `is_superuser` during the backfill.
pub const ADMIN_ROLE: &str = "admin";

/// Role assigned by the server default.
pub const DEFAULT_ROLE: &str = "user";

/// Credits granted by the server default.
pub const DEFAULT_CREDITS: i16 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: String,
    pub is_superuser: bool,
    pub credits: i16,
    pub date_claim: Option<DateTime<Utc>>,
    pub education_level: Option<String>,
    pub age: Option<i32>,
    pub ai_familiarity: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A dataset as returned by `GET /datasets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub display_name: String,
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DatasetFile {
    pub id: Uuid,
    pub dataset_id: Uuid,
    /// Name of the object in storage.
    pub stored_filename: String,
    /// Name the file had when it was uploaded.
    pub original_filename: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A user's saved selection of datasets and scoring weights.
///
/// `user_id` is not enforced by a foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub criteria: serde_json::Value,
    pub weights: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Experiment {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub dataset_id: Option<Uuid>,
    pub name: String,
    pub status: String,
    pub metrics: Option<serde_json::Value>,
    pub artifact_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cached data-quality report for one dataset version.
///
/// Nothing in this workspace writes, reads or evicts these rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataQualityAnalysis {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub dataset_version: String,
    pub analysis: serde_json::Value,
    pub column_strategies: serde_json::Value,
    pub quality_score: Option<f64>,
    pub row_count: Option<i32>,
    pub column_count: Option<i32>,
    pub analysis_duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Known dataset names and the display names the backfill assigns to them.
pub const DATASET_DISPLAY_NAMES: [(&str, &str); 7] = [
    ("oulad_dataset", "OULAD"),
    ("student_performance", "Student Performance"),
    ("student_dropout", "Student Dropout"),
    ("xapi_edu_data", "xAPI-Edu-Data"),
    ("mooc_engagement", "MOOC Engagement"),
    ("ednet_kt1", "EdNet KT1"),
    ("assistments_2009", "ASSISTments 2009"),
];

/// Display name for a dataset: the mapped value, or the raw name.
pub fn display_name_for(name: &str) -> &str {
    DATASET_DISPLAY_NAMES
        .iter()
        .find(|(raw, _)| *raw == name)
        .map(|(_, display)| *display)
        .unwrap_or(name)
}
