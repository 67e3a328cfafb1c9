use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a 1:1 conversation, optionally scoped to a listing.
///
/// Derived from the unordered participant pair, so both sides compute the
/// same id no matter who opened the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn for_participants(a: Uuid, b: Uuid, listing_id: Option<Uuid>) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        match listing_id {
            Some(listing) => Self(format!("{lo}:{hi}:{listing}")),
            None => Self(format!("{lo}:{hi}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
