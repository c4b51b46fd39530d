//! Axum Router Configuration
//!
//! HTTP routing for the service: session issuance, the relay WebSocket, the
//! health probe and the OpenAPI documentation. CORS is applied here so every
//! route, preflight included, answers cross-origin callers.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse, SessionActionRequest, SignedUrlResponse, SuccessResponse},
    state::AppState,
    ws::relay_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::voice_session, handlers::health),
    components(
        schemas(SessionActionRequest, SignedUrlResponse, SuccessResponse, ErrorResponse, HealthResponse)
    ),
    tags(
        (name = "Voice Relay API", description = "Signed URL issuance and WebSocket relay for voice conversations")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/voice-session", post(handlers::voice_session))
        .route("/relay", get(relay_handler))
        .route("/health", get(handlers::health))
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(cors)
}
