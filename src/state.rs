use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::SubmitError;
use crate::history::ConversationHistoryStore;
use crate::identity::IdentityStore;
use crate::orchestrator::ConversationOrchestrator;
use crate::preview::PreviewRegistry;

// Core application state shared by the command handlers
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<ConversationHistoryStore>,
    pub identity: Arc<dyn IdentityStore>,
    pub previews: Arc<PreviewRegistry>,
    // One orchestrator per session; the mutex is what enforces a single in-flight turn.
    pub orchestrator: Arc<Mutex<ConversationOrchestrator>>,
}

impl AppState {
    pub fn new(
        history: Arc<ConversationHistoryStore>,
        identity: Arc<dyn IdentityStore>,
        previews: Arc<PreviewRegistry>,
        orchestrator: ConversationOrchestrator,
    ) -> Self {
        Self {
            history,
            identity,
            previews,
            orchestrator: Arc::new(Mutex::new(orchestrator)),
        }
    }

    /// The orchestrator, or `Busy` while another command holds it.
    pub fn try_orchestrator(&self) -> Result<MutexGuard<'_, ConversationOrchestrator>, SubmitError> {
        self.orchestrator.try_lock().map_err(|_| SubmitError::Busy)
    }
}
