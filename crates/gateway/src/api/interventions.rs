//! Intervention endpoints: list pending blockers and resolve one from the
//! outside (the in-process half of the two-path protocol).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"pending": state.interventions.list_pending()}))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveBody {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let note = body.and_then(|Json(b)| b.note);
    if state.interventions.resolve(&id, note) {
        Ok(Json(json!({"resolved": true})))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown intervention id"})),
        ))
    }
}
