pub mod cli;
pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::AuthConfig;
use crate::dtos::auth::HealthResponse;
use crate::services::{
    bounded, AccessPlatformClient, AdminService, AuditRecorder, AuthService, Clock,
    CredentialStore, JwtService, ProtectedAccountGuard, RetentionPruner, ServiceError,
    SessionManager, SessionPolicy, SessionStore,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
    ),
    components(
        schemas(
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::HealthResponse,
            dtos::ErrorResponse,
            services::TokenResponse,
        )
    ),
    tags(
        (name = "Authentication", description = "Login and refresh session management"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

/// Everything the HTTP layer and the entry points share. The store handle is
/// owned by the caller and passed in.
#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn SessionStore>,
    pub sessions: SessionManager,
    pub audit: AuditRecorder,
    pub auth_service: AuthService,
    pub admin_service: AdminService,
    pub pruner: RetentionPruner,
    pub access_platform: Option<AccessPlatformClient>,
}

impl AppState {
    pub fn build<S>(config: AuthConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self, ServiceError>
    where
        S: SessionStore + CredentialStore + 'static,
    {
        let timeout = config.database.store_timeout();
        let sessions_store: Arc<dyn SessionStore> = store.clone();
        let credential_store: Arc<dyn CredentialStore> = store;

        let jwt = JwtService::new(&config.jwt)?;
        let audit = AuditRecorder::new(sessions_store.clone(), timeout);
        let sessions = SessionManager::new(
            sessions_store.clone(),
            audit.clone(),
            jwt.clone(),
            clock.clone(),
            SessionPolicy {
                refresh_ttl: jwt.refresh_session_ttl(),
                revoke_lineage_on_reuse: config.session.revoke_lineage_on_reuse,
                store_timeout: timeout,
            },
        );
        let guard = ProtectedAccountGuard::new(credential_store.clone(), clock.clone(), timeout);
        let auth_service = AuthService::new(
            credential_store.clone(),
            sessions.clone(),
            audit.clone(),
            clock.clone(),
            timeout,
        );
        let admin_service = AdminService::new(credential_store, guard, clock, timeout);
        let pruner = RetentionPruner::new(sessions_store.clone(), audit.clone(), timeout);
        let access_platform = config
            .access_platform
            .as_ref()
            .map(AccessPlatformClient::new)
            .transpose()?;

        Ok(Self {
            config,
            store: sessions_store,
            sessions,
            audit,
            auth_service,
            admin_service,
            pruner,
            access_platform,
        })
    }
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and store are healthy", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = HealthResponse)
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = bounded(
        state.config.database.store_timeout(),
        state.store.health_check(),
    )
    .await
    .is_ok();

    let (status, label) = if store_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: state.config.service_version.clone(),
        }),
    )
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
}
