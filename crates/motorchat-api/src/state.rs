use std::sync::Arc;

use motorchat_db::MessageStore;
use motorchat_gateway::auth::Authenticator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn MessageStore>,
    pub authenticator: Arc<dyn Authenticator>,
}
