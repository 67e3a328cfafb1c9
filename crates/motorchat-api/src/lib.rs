pub mod messages;
pub mod middleware;
pub mod state;

use axum::{Router, middleware::from_fn_with_state, routing::get};

pub use state::{AppState, AppStateInner};

/// Read-only history routes, all behind bearer authentication.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/conversations", get(messages::list_conversations))
        .route("/api/conversations/{other_user_id}/messages", get(messages::get_thread))
        .route("/api/unread", get(messages::unread_count))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
