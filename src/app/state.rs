//! Application state shared across routes

use std::sync::Arc;

use crate::config::{Config, MatchRules};
use crate::game::MatchRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Gameplay rules every hosted match is created with
    pub rules: Arc<MatchRules>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let rules = Arc::new(config.rules.clone());
        Self {
            config: Arc::new(config),
            rules,
            match_registry: Arc::new(MatchRegistry::new()),
        }
    }
}
