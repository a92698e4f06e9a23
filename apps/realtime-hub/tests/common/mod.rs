#![allow(dead_code)]

use axum::Router;

use realtime_hub::config::Config;
use realtime_hub::AppState;

/// Build a test AppState with default configuration.
pub fn test_state() -> AppState {
    test_state_with(Config::default())
}

pub fn test_state_with(config: Config) -> AppState {
    AppState::new(config)
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = realtime_hub::routes::router().with_state(state.clone());
    (app, state)
}
