use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use motorchat_db::StoreError;
use motorchat_gateway::auth::Identity;
use motorchat_types::api::{ThreadQuery, UnreadResponse};

use crate::state::AppState;

fn internal(e: StoreError) -> StatusCode {
    error!("Message store error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// The caller's inbox, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversations = state
        .store
        .list_conversations(identity.user_id)
        .await
        .map_err(internal)?;
    Ok(Json(conversations))
}

/// Full history with one other user, oldest first. Without `listingId` this
/// is the general conversation, not every listing thread merged.
pub async fn get_thread(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Query(query): Query<ThreadQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    if other_user_id == identity.user_id {
        return Err(StatusCode::BAD_REQUEST);
    }
    let messages = state
        .store
        .list_thread(identity.user_id, other_user_id, query.listing_id)
        .await
        .map_err(internal)?;
    Ok(Json(messages))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let unread = state.store.unread_count(identity.user_id).await.map_err(internal)?;
    Ok(Json(UnreadResponse { unread }))
}
