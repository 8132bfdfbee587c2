use splitcache_lib::{Poller, PreloadScriptBuilder};

/// Shared application state for the HTTP server.
pub struct AppState {
    pub poller: Poller,
    pub preload: PreloadScriptBuilder,
}

impl AppState {
    pub fn new(poller: Poller) -> Self {
        let preload = PreloadScriptBuilder::new(poller.clone());
        Self { poller, preload }
    }
}
