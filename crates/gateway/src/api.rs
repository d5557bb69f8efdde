//! HTTP API handlers and routes using axum.
//!
//! Routes:
//! - GET /health - Health check
//! - GET /stats - Registry/store statistics
//! - GET /presence - Public online snapshot (guest reconciliation)
//! - GET /notifications?limit&cursor - Paged durable history (bearer auth)
//! - PATCH /notifications - Mark ids read (bearer auth)
//! - POST /notifications - Internal ingest for business events (admin auth)
//! - GET /ws - WebSocket upgrade

use crate::auth::Principal;
use crate::broker::Scope;
use crate::error::GatewayError;
use crate::store::StoreStats;
use crate::ws_server::{ws_handler, AppState};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use common::protocol::{
    AppendRequest, MarkReadRequest, MarkReadResponse, NotificationPage, PresenceSnapshot,
    ServerMessage,
};
use common::types::{Notification, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Page size when the query string names none.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/presence", get(presence_handler))
        .route(
            "/notifications",
            get(list_notifications_handler)
                .patch(mark_read_handler)
                .post(append_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    online: usize,
}

/// Health check endpoint.
/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connections: state.broker.connection_count(),
        online: state.presence.online_count(),
    })
}

#[derive(Serialize)]
struct StatsResponse {
    online_principals: usize,
    live_connections: usize,
    public_subscribers: usize,
    private_scopes: usize,
    store: StoreStats,
}

/// Get registry/store statistics.
/// GET /stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        online_principals: state.presence.online_count(),
        live_connections: state.presence.connection_count(),
        public_subscribers: state.broker.public_count(),
        private_scopes: state.broker.private_scope_count(),
        store: state.store.stats(),
    })
}

/// Public presence snapshot: the online-seller set guests may see.
/// GET /presence
async fn presence_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(PresenceSnapshot {
        online: state.presence.online_freelancers(),
    })
}

/// Query parameters for notification history.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Page through the caller's durable notification history, newest-first.
/// GET /notifications?limit&cursor
async fn list_notifications_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<NotificationPage>, ApiError> {
    let principal = bearer_principal(&state, &headers)?;
    let page = state
        .store
        .list_page(
            &principal.id,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.cursor.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

/// Mark the caller's notifications read. Ids not owned by the caller are
/// skipped; the response reports exactly how many flipped.
/// PATCH /notifications
async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let principal = bearer_principal(&state, &headers)?;
    let ids: HashSet<_> = request.ids.into_iter().collect();
    let updated = state.store.mark_read(&principal.id, &ids).await?;

    if !updated.is_empty() {
        state.broker.publish(
            Scope::Private(&principal.id),
            &ServerMessage::NotificationRead {
                updated: updated.len(),
                ids: updated.clone(),
            },
        );
    }

    Ok(Json(MarkReadResponse {
        updated: updated.len(),
    }))
}

/// Internal ingest: the marketplace backend posts business events here.
/// A durable-store failure surfaces as a 500 so the triggering business
/// action sees it and can retry.
/// POST /notifications
async fn append_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AppendRequest>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let principal = bearer_principal(&state, &headers)?;
    if principal.role != Role::Admin {
        return Err(ApiError::Forbidden(
            "notification ingest is internal".to_string(),
        ));
    }

    let notification = state.store.append(&request.owner_id, request.payload).await?;

    info!(
        "Appended notification {} for {}",
        notification.id, notification.owner_id
    );

    state.broker.publish(
        Scope::Private(&request.owner_id),
        &ServerMessage::NotificationNew {
            notification: notification.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(notification)))
}

/// Resolve the bearer token in the Authorization header to a principal.
fn bearer_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".to_string()))?;
    state
        .verifier
        .verify(token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))
}

// ============================================================================
// Error Handling
// ============================================================================

/// API error types.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => ApiError::Unauthorized(msg),
            GatewayError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            GatewayError::Json(e) => ApiError::BadRequest(e.to_string()),
            GatewayError::Store(msg) => ApiError::Internal(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{far_future, mint};
    use crate::auth::JwtVerifier;
    use crate::broker::DeliveryBroker;
    use crate::history::MemoryHistory;
    use crate::presence::PresenceRegistry;
    use crate::store::NotificationStore;
    use common::types::{NotificationKind, NotificationPayload};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn app_state() -> Arc<AppState> {
        Arc::new(AppState {
            presence: Arc::new(PresenceRegistry::new()),
            store: Arc::new(NotificationStore::new(Arc::new(MemoryHistory::new()))),
            broker: Arc::new(DeliveryBroker::new()),
            verifier: Arc::new(JwtVerifier::new(SECRET)),
        })
    }

    fn bearer(sub: &str, role: Role) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = mint(SECRET, sub, role, far_future());
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::bare(NotificationKind::MessageReceived)
    }

    #[tokio::test]
    async fn test_append_requires_admin() {
        let state = app_state();
        let request = AppendRequest {
            owner_id: "u1".to_string(),
            payload: payload(),
        };

        let err = append_handler(
            State(state.clone()),
            bearer("u2", Role::Client),
            Json(request.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let (status, Json(notification)) = append_handler(
            State(state),
            bearer("backend", Role::Admin),
            Json(request),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(notification.owner_id, "u1");
        assert!(!notification.read);
    }

    #[tokio::test]
    async fn test_append_pushes_to_owner_connections() {
        let state = app_state();

        let (tx, mut rx) = mpsc::channel(8);
        let conn = Uuid::new_v4();
        state.broker.register(conn, tx);
        state.broker.subscribe_private(&conn, "u1");

        append_handler(
            State(state),
            bearer("backend", Role::Admin),
            Json(AppendRequest {
                owner_id: "u1".to_string(),
                payload: payload(),
            }),
        )
        .await
        .unwrap();

        let frame = rx.try_recv().unwrap();
        match frame {
            axum::extract::ws::Message::Text(text) => {
                assert!(text.contains("notification_new"));
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_and_mark_read_roundtrip() {
        let state = app_state();
        let appended = state.store.append("u1", payload()).await.unwrap();

        let Json(page) = list_notifications_handler(
            State(state.clone()),
            bearer("u1", Role::Freelancer),
            Query(PageQuery {
                limit: Some(1),
                cursor: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.items[0].id, appended.id);
        assert!(page.next_cursor.is_none());

        let Json(response) = mark_read_handler(
            State(state.clone()),
            bearer("u1", Role::Freelancer),
            Json(MarkReadRequest {
                ids: vec![appended.id],
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.updated, 1);

        // Another principal's bearer sees their own (empty) history.
        let Json(foreign) = list_notifications_handler(
            State(state),
            bearer("u2", Role::Client),
            Query(PageQuery {
                limit: None,
                cursor: None,
            }),
        )
        .await
        .unwrap();
        assert!(foreign.items.is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_malformed_bearer_is_unauthorized() {
        let state = app_state();

        let err = list_notifications_handler(
            State(state.clone()),
            HeaderMap::new(),
            Query(PageQuery {
                limit: None,
                cursor: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        let err = list_notifications_handler(
            State(state),
            headers,
            Query(PageQuery {
                limit: None,
                cursor: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
