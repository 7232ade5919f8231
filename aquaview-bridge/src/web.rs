// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP surface of the dashboard
//!
//! Read endpoints serve the latest snapshots published by the app loop.
//! Command endpoints forward to the loop and map the outcome to a status
//! code.

use aquaview::{
    to_csv_string, CommandError, CommandOutcome, DataPoint, LONG_EXPORT_FILE, SHORT_EXPORT_FILE,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::app::{AppHandle, CommandKind, ControlSnapshot, HealthSnapshot, TelemetrySnapshot};
use crate::error::SubmitError;
use crate::metrics::encode_metrics;

/// Build the dashboard router
pub fn router(handle: AppHandle) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/telemetry", get(telemetry_handler))
        .route("/api/telemetry/short.csv", get(short_csv_handler))
        .route("/api/telemetry/long.csv", get(long_csv_handler))
        .route("/api/control", get(control_handler))
        .route("/api/control/hour", post(hour_handler))
        .route("/api/control/mode", post(mode_handler))
        .with_state(handle)
}

/// Root handler - lists the endpoints.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Aquaview</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>Aquaview</h1>
    <p>Water-quality telemetry and device control.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/api/telemetry">/api/telemetry</a> - Rolling windows (JSON)</div>
        <div class="endpoint"><a href="/api/telemetry/short.csv">/api/telemetry/short.csv</a> - Last hour (CSV)</div>
        <div class="endpoint"><a href="/api/telemetry/long.csv">/api/telemetry/long.csv</a> - Last 24 hours (CSV)</div>
        <div class="endpoint"><a href="/api/control">/api/control</a> - Control state (JSON)</div>
        <div class="endpoint"><code>POST /api/control/hour</code>, <code>POST /api/control/mode</code> - Operator commands</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
    </div>
</body>
</html>"#,
    )
}

/// Health check handler; 503 when a component is unhealthy.
async fn health_handler(State(handle): State<AppHandle>) -> (StatusCode, Json<HealthSnapshot>) {
    let health = handle.health();
    let status = if health.operational {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

async fn telemetry_handler(State(handle): State<AppHandle>) -> Json<TelemetrySnapshot> {
    Json(handle.telemetry())
}

async fn control_handler(State(handle): State<AppHandle>) -> Json<ControlSnapshot> {
    Json(handle.control())
}

async fn short_csv_handler(State(handle): State<AppHandle>) -> Response {
    csv_response(&handle.telemetry().short, SHORT_EXPORT_FILE)
}

async fn long_csv_handler(State(handle): State<AppHandle>) -> Response {
    csv_response(&handle.telemetry().long, LONG_EXPORT_FILE)
}

fn csv_response(points: &[DataPoint], filename: &str) -> Response {
    match to_csv_string(points) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename),
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "csv export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Body of a command request
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub value: String,
}

/// Body of a command response
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn hour_handler(
    State(handle): State<AppHandle>,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    command_response(handle.submit(CommandKind::Hour, request.value).await)
}

async fn mode_handler(
    State(handle): State<AppHandle>,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    command_response(handle.submit(CommandKind::Mode, request.value).await)
}

fn command_response(
    result: Result<CommandOutcome, SubmitError>,
) -> (StatusCode, Json<CommandResponse>) {
    let (status, body) = match result {
        Ok(CommandOutcome::Ignored) => (
            StatusCode::OK,
            CommandResponse {
                status: "ignored",
                topic: None,
                error: None,
            },
        ),
        Ok(CommandOutcome::Published { topic, .. }) => (
            StatusCode::OK,
            CommandResponse {
                status: "published",
                topic: Some(topic),
                error: None,
            },
        ),
        Err(e) => {
            let status = match &e {
                SubmitError::Command(CommandError::InvalidHour(_)) => StatusCode::BAD_REQUEST,
                SubmitError::Command(CommandError::Channel(_)) => StatusCode::BAD_GATEWAY,
                SubmitError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                CommandResponse {
                    status: "rejected",
                    topic: None,
                    error: Some(e.to_string()),
                },
            )
        }
    };
    (status, Json(body))
}
