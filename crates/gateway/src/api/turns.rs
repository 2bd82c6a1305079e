//! `POST /v1/turns` — run one full turn; `POST /v1/sessions/:id/stop` —
//! cancel the in-flight turn of a session.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use cg_domain::Error;

use crate::runtime::turn::{run_turn as run, TurnRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub session_id: String,
    pub query: String,
}

pub async fn run_turn(
    State(state): State<AppState>,
    Json(body): Json<TurnBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if body.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "query must not be empty"})),
        ));
    }

    let request = TurnRequest {
        session_id: body.session_id,
        query: body.query,
    };
    match run(&state, request).await {
        Ok(outcome) => Ok(Json(serde_json::to_value(outcome).unwrap_or(Value::Null))),
        Err(Error::SessionBusy) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "a turn is already in progress for this session"})),
        )),
        Err(e) => {
            tracing::error!(error = %e, "turn failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            ))
        }
    }
}

pub async fn stop_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let stopped = state.cancel_map.cancel(&session_id);
    Json(json!({"stopped": stopped}))
}
