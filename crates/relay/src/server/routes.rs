use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::metrics::gather_metrics;
use crate::server::Server;
use crate::sources::WebhookPayload;
use crate::Error;

/// Bearer-token gate, applied to every route when a token is configured.
pub async fn require_bearer(
    State(server): State<Arc<Server>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &server.auth_token {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn metrics() -> impl IntoResponse {
    gather_metrics()
}

/// Accept a webhook batch and return immediately; normalization and
/// processing run detached on the server's task tracker so shutdown can
/// wait for them. Malformed payloads are logged and dropped with a 200 so
/// the sender does not retry a poison pill.
pub async fn ingest_alerts(State(server): State<Arc<Server>>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<WebhookPayload>(&body) {
        Ok(payload) => {
            let tasks = server.tasks.clone();
            tasks.spawn(async move {
                let alerts = server.normalizer.normalize(&payload).await;
                for alert in alerts {
                    if let Err(e) = server.processor.process(alert).await {
                        error!(component = "ingress", error = %e, "Alert processing failed");
                    }
                }
            });
        }
        Err(e) => {
            warn!(component = "ingress", error = %e, "Dropping malformed alert payload");
        }
    }
    (StatusCode::OK, Json(json!({"received": true})))
}

pub async fn reload(State(server): State<Arc<Server>>) -> impl IntoResponse {
    match server.rules.reload_from_file().await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({"ok": true, "entries": entries})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

pub async fn get_config(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({"config": server.rules.snapshot().await}))
}

pub async fn push_config(
    State(server): State<Arc<Server>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    match server.rules.push(payload).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({"ok": true, "entries": entries})),
        ),
        Err(Error::Validation(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": message})),
        ),
        Err(e) => {
            error!(component = "config", error = %e, "Failed to persist pushed config");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GuideQuery {
    #[serde(rename = "alertType")]
    alert_type: Option<String>,
}

pub async fn get_guides(
    State(server): State<Arc<Server>>,
    Query(query): Query<GuideQuery>,
) -> Response {
    let Some(db) = &server.db else {
        return no_database();
    };
    match query.alert_type {
        Some(name) => match db.get_guide(&name).await {
            Ok(Some(guide)) => (
                StatusCode::OK,
                Json(json!({"alertType": guide.rule_name, "content": guide.content})),
            )
                .into_response(),
            Ok(None) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "no guide for alert type", "alertType": name})),
            )
                .into_response(),
            Err(e) => internal_error(e),
        },
        None => match db.list_guides().await {
            Ok(guides) => {
                let guides: Vec<_> = guides
                    .into_iter()
                    .map(|g| json!({"alertType": g.rule_name, "content": g.content}))
                    .collect();
                (StatusCode::OK, Json(json!({"guides": guides}))).into_response()
            }
            Err(e) => internal_error(e),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct GuideBody {
    #[serde(rename = "alertType")]
    alert_type: String,
    content: String,
}

pub async fn post_guide(
    State(server): State<Arc<Server>>,
    Json(body): Json<GuideBody>,
) -> Response {
    let Some(db) = &server.db else {
        return no_database();
    };
    match db
        .upsert_guide(&body.alert_type, &body.content, server.clock.now())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
        Err(e) => internal_error(e),
    }
}

fn no_database() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "no database configured"})),
    )
        .into_response()
}

fn internal_error(e: Error) -> Response {
    error!(component = "server", error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}
