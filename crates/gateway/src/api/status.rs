//! `GET /v1/status` — breaker states, cache stats, reflection stats, and
//! the contract-monitor summary; `GET /v1/sessions/:id/context` — live
//! session snapshot.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "breakers": {
            "llm": state.llm_breaker.status(),
            "tools": state.tool_breaker.status(),
        },
        "caches": {
            "response": state.response_cache.layer().stats(),
            "claims": state.claim_cache.layer().stats(),
            "tool_output": state.tool_cache.layer().stats(),
        },
        "reflection": state.reflection_stats.snapshot(),
        "contracts": state.monitor.summary(),
        "sessions": {
            "active_locks": state.session_locks.session_count(),
            "tracked": state.sessions.session_count(),
        },
    }))
}

pub async fn session_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let snapshot = state.sessions.snapshot(&session_id);
    Json(serde_json::to_value(snapshot).unwrap_or(Value::Null))
}
