//! Test Helper Utilities
//!
//! Shared fakes for btk-tagger integration tests

#![allow(dead_code)]

pub mod fake_board;
pub mod scripted_provider;

pub use fake_board::FakeBoard;
pub use scripted_provider::ScriptedProvider;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use btk_tagger::providers::ProviderSet;
use btk_tagger::services::{ProviderController, RetryPolicy, SessionState};
use btk_tagger::workflow::{Orchestrator, OrchestratorOptions};

/// Controller with millisecond delays so tests stay fast
pub fn fast_controller(max_attempts: u32) -> ProviderController {
    ProviderController::new(
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        },
        Duration::from_secs(5),
        Duration::from_millis(1),
        Arc::new(SessionState::new()),
        CancellationToken::new(),
    )
}

/// Options with relations and ML off unless a test turns them on
pub fn test_options() -> OrchestratorOptions {
    let mut options = OrchestratorOptions::default();
    options.board_url = "http://board.test".to_string();
    options.aggregator.use_relations = false;
    options
}

pub fn orchestrator(board: &Arc<FakeBoard>, providers: ProviderSet, options: OrchestratorOptions) -> Orchestrator {
    Orchestrator::new(board.clone(), providers, fast_controller(3), options)
}

pub fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
