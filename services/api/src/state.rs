//! Shared Application State

use aijaz_core::{assistant::FinanceAssistant, ledger::Ledger};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Mutex<Ledger>>,
    pub assistant: Arc<dyn FinanceAssistant>,
}

impl AppState {
    pub fn new(ledger: Ledger, assistant: Arc<dyn FinanceAssistant>) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            assistant,
        }
    }
}
