use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use gwcore_common::hash_key;
use gwcore_storage::{CredentialInput, ProviderInput, Storage, StorageError};

/// Thin CRUD surface over the `Storage` trait (spec §1 lists the admin
/// API as out of scope for the request-handling core; this exists only
/// so the persisted-state layout in §6 has a real writer, matching the
/// teacher's `gproxy-admin` crate split from its core).
#[derive(Clone)]
pub struct AdminState {
    storage: Arc<dyn Storage>,
    /// SHA-256 hash of `ADMIN_KEY`. `None` means the gateway was started
    /// without an admin key configured, in which case every admin request
    /// is rejected rather than silently left open (unlike the Credential
    /// Gate's zero-credential bootstrap mode, which is a request-path
    /// concern this surface does not share).
    admin_key_hash: Option<String>,
}

pub fn router(storage: Arc<dyn Storage>, admin_key_hash: Option<String>) -> Router {
    let state = AdminState {
        storage,
        admin_key_hash,
    };

    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers).post(create_provider))
        .route(
            "/providers/{id}",
            put(update_provider).delete(delete_provider),
        )
        .route("/credentials", get(list_credentials).post(create_credential))
        .route(
            "/credentials/{id}",
            put(update_credential).delete(delete_credential),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.admin_key_hash.as_deref() else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let key = extract_admin_key(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    if hash_key(&key) != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key") {
        let s = value.to_str().ok()?.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let auth = value.to_str().ok()?.trim();
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct ProviderPayload {
    name: String,
    provider_type: String,
    api_base: String,
    api_key: String,
    #[serde(default = "default_weight")]
    weight: i32,
    #[serde(default)]
    model_mapping: serde_json::Value,
    #[serde(default = "default_true")]
    is_enabled: bool,
    #[serde(default)]
    anthropic_version: Option<String>,
    #[serde(default)]
    gcp_project: Option<String>,
    #[serde(default)]
    gcp_location: Option<String>,
    #[serde(default)]
    gcp_publisher: Option<String>,
}

fn default_weight() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl ProviderPayload {
    fn into_input(self, id: Option<i64>) -> ProviderInput {
        ProviderInput {
            id,
            name: self.name,
            provider_type: self.provider_type,
            api_base: self.api_base,
            api_key: self.api_key,
            weight: self.weight,
            model_mapping: self.model_mapping,
            is_enabled: self.is_enabled,
            anthropic_version: self.anthropic_version,
            gcp_project: self.gcp_project,
            gcp_location: self.gcp_location,
            gcp_publisher: self.gcp_publisher,
        }
    }
}

async fn list_providers(State(state): State<AdminState>) -> Response {
    match state.storage.load_snapshot().await {
        Ok(snapshot) => {
            let providers: Vec<_> = snapshot
                .providers
                .into_iter()
                .map(|p| {
                    json!({
                        "id": p.id,
                        "name": p.name,
                        "provider_type": p.provider_type,
                        "api_base": p.api_base,
                        "weight": p.weight,
                        "model_mapping": p.model_mapping,
                        "is_enabled": p.is_enabled,
                        "anthropic_version": p.anthropic_version,
                        "gcp_project": p.gcp_project,
                        "gcp_location": p.gcp_location,
                        "gcp_publisher": p.gcp_publisher,
                        "updated_at": p.updated_at,
                    })
                })
                .collect();
            Json(json!({ "providers": providers })).into_response()
        }
        Err(err) => storage_error_response(err),
    }
}

async fn create_provider(
    State(state): State<AdminState>,
    Json(payload): Json<ProviderPayload>,
) -> Response {
    match state.storage.upsert_provider(payload.into_input(None)).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(err) => storage_error_response(err),
    }
}

async fn update_provider(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(payload): Json<ProviderPayload>,
) -> Response {
    match state.storage.upsert_provider(payload.into_input(Some(id))).await {
        Ok(id) => (StatusCode::OK, Json(json!({ "id": id }))).into_response(),
        Err(err) => storage_error_response(err),
    }
}

async fn delete_provider(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_provider(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => storage_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct CredentialPayload {
    name: String,
    /// Raw key, presented once. A create request with this absent gets a
    /// freshly generated key returned in the response body; it is never
    /// retrievable again since only its hash is persisted (spec
    /// invariant 3).
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    allowed_models: serde_json::Value,
    #[serde(default)]
    rate_limit_rps: Option<i32>,
    #[serde(default)]
    burst_size: Option<i32>,
    #[serde(default = "default_true")]
    is_enabled: bool,
}

async fn list_credentials(State(state): State<AdminState>) -> Response {
    match state.storage.load_snapshot().await {
        Ok(snapshot) => {
            let credentials: Vec<_> = snapshot
                .credentials
                .into_iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "name": c.name,
                        "allowed_models": c.allowed_models,
                        "rate_limit_rps": c.rate_limit_rps,
                        "burst_size": c.burst_size,
                        "is_enabled": c.is_enabled,
                        "updated_at": c.updated_at,
                    })
                })
                .collect();
            Json(json!({ "credentials": credentials })).into_response()
        }
        Err(err) => storage_error_response(err),
    }
}

async fn create_credential(
    State(state): State<AdminState>,
    Json(payload): Json<CredentialPayload>,
) -> Response {
    let raw_key = payload
        .api_key
        .clone()
        .unwrap_or_else(|| format!("sk-gw-{}", uuid::Uuid::new_v4()));
    let input = CredentialInput {
        id: None,
        name: payload.name,
        key_hash: hash_key(&raw_key),
        allowed_models: payload.allowed_models,
        rate_limit_rps: payload.rate_limit_rps,
        burst_size: payload.burst_size,
        is_enabled: payload.is_enabled,
    };
    match state.storage.upsert_credential(input).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({ "id": id, "api_key": raw_key })),
        )
            .into_response(),
        Err(err) => storage_error_response(err),
    }
}

async fn update_credential(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(payload): Json<CredentialPayload>,
) -> Response {
    // A key rotation only happens when the caller supplies a new
    // `api_key`; otherwise the existing hash must survive the update, so
    // we read it back from storage rather than re-hashing nothing.
    let existing_hash = match state.storage.load_snapshot().await {
        Ok(snapshot) => snapshot
            .credentials
            .into_iter()
            .find(|c| c.id == id)
            .map(|c| c.key_hash),
        Err(err) => return storage_error_response(err),
    };
    let Some(existing_hash) = existing_hash else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "credential_not_found" }))).into_response();
    };

    let key_hash = match payload.api_key.as_deref() {
        Some(raw) => hash_key(raw),
        None => existing_hash,
    };
    let input = CredentialInput {
        id: Some(id),
        name: payload.name,
        key_hash,
        allowed_models: payload.allowed_models,
        rate_limit_rps: payload.rate_limit_rps,
        burst_size: payload.burst_size,
        is_enabled: payload.is_enabled,
    };
    match state.storage.upsert_credential(input).await {
        Ok(id) => (StatusCode::OK, Json(json!({ "id": id }))).into_response(),
        Err(err) => storage_error_response(err),
    }
}

async fn delete_credential(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_credential(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => storage_error_response(err),
    }
}

fn storage_error_response(err: StorageError) -> Response {
    tracing::error!(error = %err, "admin storage operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gwcore_storage::SeaOrmStorage;
    use tower::ServiceExt;

    async fn storage() -> Arc<dyn Storage> {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        storage.sync().await.unwrap();
        Arc::new(storage)
    }

    #[tokio::test]
    async fn health_requires_no_auth_bypass_but_still_needs_admin_key_configured() {
        let app = router(storage().await, Some(hash_key("s3cret")));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-admin-key", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_admin_key_header_is_unauthorized() {
        let app = router(storage().await, Some(hash_key("s3cret")));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_configured_admin_key_rejects_every_request() {
        let app = router(storage().await, None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-admin-key", "anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn create_provider_then_list_round_trips() {
        let app = router(storage().await, Some(hash_key("s3cret")));
        let body = json!({
            "name": "p1",
            "provider_type": "openai",
            "api_base": "https://api.openai.com",
            "api_key": "sk-live",
            "model_mapping": [{"pattern": "gpt-4", "upstream_model": "gpt-4-0613"}],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/providers")
                    .header("x-admin-key", "s3cret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/providers")
                    .header("x-admin-key", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["providers"][0]["name"], "p1");
    }

    #[tokio::test]
    async fn create_credential_without_api_key_generates_and_returns_one() {
        let app = router(storage().await, Some(hash_key("s3cret")));
        let body = json!({ "name": "k1" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/credentials")
                    .header("x-admin-key", "s3cret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["api_key"].as_str().unwrap().starts_with("sk-gw-"));
    }
}
