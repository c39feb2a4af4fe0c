//! Runtime log filter control

use super::dto::{LogLevelResponse, SetLogLevelRequest};
use axum::body::Bytes;
use axum::response::Json;
use common::logging;
use common::AppError;

/// Read the active log filter
#[utoipa::path(
    get,
    path = "/api/admin/logs/level",
    responses(
        (status = 200, description = "Active filter", body = LogLevelResponse),
        (status = 503, description = "Logging not initialized", body = common::ErrorBody)
    ),
    tag = "admin"
)]
pub async fn get_log_level() -> Result<Json<LogLevelResponse>, AppError> {
    logging::get_log_level()
        .map(|level| Json(LogLevelResponse { level }))
        .ok_or_else(|| logging::LogLevelError::NotInitialized.into())
}

/// Replace the log filter without a restart
#[utoipa::path(
    post,
    path = "/api/admin/logs/level",
    request_body = SetLogLevelRequest,
    responses(
        (status = 200, description = "Filter applied", body = LogLevelResponse),
        (status = 400, description = "Malformed body or filter", body = common::ErrorBody),
        (status = 503, description = "Logging not initialized", body = common::ErrorBody)
    ),
    tag = "admin"
)]
pub async fn set_log_level(body: Bytes) -> Result<Json<LogLevelResponse>, AppError> {
    let req: SetLogLevelRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON body: {}", e)))?;
    let level = req.level.trim();
    if level.is_empty() {
        return Err(AppError::validation_error("level", "level must not be empty"));
    }
    logging::set_log_level(level)?;
    Ok(Json(LogLevelResponse {
        level: level.to_string(),
    }))
}
