//! Router assembly

use super::admin_handlers::{get_log_level, set_log_level};
use super::handlers::{device_status, discover, health, send_command};
use super::{require_api_key, AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

#[cfg(feature = "swagger-ui")]
use utoipa::OpenApi;
#[cfg(feature = "swagger-ui")]
use utoipa_swagger_ui::SwaggerUi;

// OpenAPI documentation - only compiled when swagger-ui feature is enabled
#[cfg(feature = "swagger-ui")]
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health,
        crate::api::handlers::send_command,
        crate::api::handlers::discover,
        crate::api::handlers::device_status,
        crate::api::admin_handlers::get_log_level,
        crate::api::admin_handlers::set_log_level
    ),
    components(
        schemas(
            crate::api::dto::CommandRequest,
            crate::api::dto::DiscoverRequest,
            crate::api::dto::StatusRequestBody,
            crate::api::dto::SetLogLevelRequest,
            crate::api::dto::LogLevelResponse,
            common::ErrorBody
        )
    ),
    tags(
        (name = "essrv", description = "Marstek UDP relay bridge"),
        (name = "admin", description = "Runtime administration")
    )
)]
pub struct EssrvApiDoc;

/// Raw commands are capped at 64 KiB; the envelope gets some headroom
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Create all routes of the relay bridge
pub fn create_routes(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/command", post(send_command))
        .route("/api/discover", post(discover))
        .route("/api/status", post(device_status))
        .route(
            "/api/admin/logs/level",
            get(get_log_level).post(set_log_level),
        );

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", EssrvApiDoc::openapi()),
    );

    router
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        // Apply HTTP request logging middleware
        .layer(middleware::from_fn(common::logging::http_request_logger))
        .with_state(state)
}
