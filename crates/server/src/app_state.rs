use std::sync::Arc;

use engine::Engine;

use crate::{config::Settings, session::SessionBackend};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<Engine>,
    pub(crate) sessions: Arc<dyn SessionBackend>,
    pub(crate) settings: Settings,
}
