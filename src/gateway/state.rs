use std::sync::Arc;

use crate::custody::CustodyCallbackHandler;
use crate::relay::ActorRegistry;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub callback: Arc<CustodyCallbackHandler>,
    pub actors: Arc<ActorRegistry>,
}

impl AppState {
    pub fn new(callback: Arc<CustodyCallbackHandler>, actors: Arc<ActorRegistry>) -> Self {
        Self { callback, actors }
    }
}
