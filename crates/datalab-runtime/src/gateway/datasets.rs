use axum::extract::State;
use axum::Json;
use sqlx::PgPool;
use tracing::error;

use datalab_core::models::Dataset;

use super::response::ApiError;

/// `GET /datasets`: every dataset row, in storage order.
pub async fn list_datasets(State(pool): State<PgPool>) -> Result<Json<Vec<Dataset>>, ApiError> {
    let datasets = sqlx::query_as::<_, Dataset>(
        "SELECT id, name, description, display_name, storage_path, created_at FROM datasets",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!("Failed to list datasets: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(datasets))
}
