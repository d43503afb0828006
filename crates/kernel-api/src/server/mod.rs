use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Method;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    Action, ApiError, ErrorCode, Event, EventType, RoundRecord, RunStatus, ScenarioSetup,
    SCHEMA_VERSION_V1,
};
use kernel_core::scenario::ScenarioError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use crate::{EngineApi, PersistedRunSummary, PersistenceError};

const DEFAULT_PAGE_SIZE: usize = 500;
const MAX_PAGE_SIZE: usize = 5000;
const DEFAULT_SQLITE_PATH: &str = "consensus_runs.sqlite";

include!("error.rs");
include!("state.rs");
include!("routes/control.rs");
include!("routes/query.rs");
include!("routes/stream.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr) -> Result<(), ServerError> {
    let state = AppState::new();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/runs", post(create_run).get(list_runs))
        .route("/api/v1/runs/{run_id}/step", post(step_run))
        .route(
            "/api/v1/runs/{run_id}/run_to_completion",
            post(run_to_completion),
        )
        .route("/api/v1/runs/{run_id}/status", get(get_status))
        .route(
            "/api/v1/runs/{run_id}/actions",
            post(submit_action).get(get_actions),
        )
        .route("/api/v1/runs/{run_id}/rounds", get(get_rounds))
        .route("/api/v1/runs/{run_id}/events", get(get_events))
        .route("/api/v1/runs/{run_id}/influence", get(get_influence))
        .route("/api/v1/runs/{run_id}/probe", get(get_probe))
        .route("/api/v1/runs/{run_id}/export", get(get_export))
        .route("/api/v1/runs/{run_id}/replay", get(get_replay))
        .route("/api/v1/runs/{run_id}/stream", get(stream_run))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}
