use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use cowatch_core::lobby::LobbyPage;
use cowatch_core::room::{generate_room_code, is_valid_room_code};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{ACTIVE_ROOMS_KEY, room_key};

/// Attempts at finding an unused code before giving up.
const CODE_ATTEMPTS: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ListRoomsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /api/rooms: paged lobby listing, busiest rooms first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<LobbyPage>, AppError> {
    let page = state
        .lobby
        .list_paged(query.page.unwrap_or(1), query.limit)
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct CheckRoomQuery {
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckRoomResponse {
    pub exists: bool,
}

/// GET /api/rooms/check: whether room state exists for `?code=`.
pub async fn check_room(
    State(state): State<AppState>,
    Query(query): Query<CheckRoomQuery>,
) -> Result<Json<CheckRoomResponse>, AppError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Room code is required".to_string()))?;
    if !is_valid_room_code(&code) {
        return Ok(Json(CheckRoomResponse { exists: false }));
    }
    let exists = state.store.exists(&room_key(&code)).await?;
    Ok(Json(CheckRoomResponse { exists }))
}

#[derive(Debug, Serialize)]
pub struct NewCodeResponse {
    pub code: String,
}

/// POST /api/rooms/code: a random 4-digit code with no live room.
pub async fn new_room_code(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<NewCodeResponse>), AppError> {
    let active = state.store.smembers(ACTIVE_ROOMS_KEY).await?;
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_room_code();
        if active.contains(&code) || state.store.exists(&room_key(&code)).await? {
            continue;
        }
        return Ok((StatusCode::CREATED, Json(NewCodeResponse { code })));
    }
    Err(AppError::Internal(
        "Could not find a free room code".to_string(),
    ))
}

/// Fallback for unknown `/api` routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("No such endpoint".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_fields_optional() {
        let q: ListRoomsQuery = serde_json::from_str("{}").unwrap();
        assert!(q.page.is_none());
        assert!(q.limit.is_none());
    }

    #[test]
    fn check_response_shape() {
        let json = serde_json::to_string(&CheckRoomResponse { exists: true }).unwrap();
        assert_eq!(json, r#"{"exists":true}"#);
    }
}
