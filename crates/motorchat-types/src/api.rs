use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Identity assertion issued by the marketplace's auth service and checked by
/// both the gateway (at connect) and the read API (per request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- History --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadQuery {
    pub listing_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadResponse {
    pub unread: u64,
}
