use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riskchat_lib::api::{GenerativeProvider, ProviderResponse};
use riskchat_lib::commands::{send_message, suggested_prompts};
use riskchat_lib::error::{ProviderError, SubmitError};
use riskchat_lib::history::ConversationHistoryStore;
use riskchat_lib::i18n::{Catalog, Localizer};
use riskchat_lib::identity::{LocalIdentityStore, MemoryCredentialStore, UserIdentity};
use riskchat_lib::models::RiskLevel;
use riskchat_lib::orchestrator::{ConversationOrchestrator, TurnState};
use riskchat_lib::preview::PreviewRegistry;
use riskchat_lib::prompt::ProviderRequest;
use riskchat_lib::staging::AttachmentStager;
use riskchat_lib::state::AppState;
use riskchat_lib::storage::{KeyValueStore, MemoryStore};

/// Answers every request after a fixed delay and counts the calls.
struct SlowProvider {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl GenerativeProvider for SlowProvider {
    async fn generate(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(ProviderResponse {
            text: r#"{"riskLevel":"LOW","explanation":"Looks routine.","suggestions":[]}"#.to_string(),
            citations: Vec::new(),
        })
    }
}

fn app_state(provider: Arc<SlowProvider>) -> AppState {
    let localizer: Arc<dyn Localizer> = Arc::new(Catalog::english());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let history = Arc::new(ConversationHistoryStore::new(store.clone(), localizer.clone()));
    let identity = Arc::new(LocalIdentityStore::new(
        store,
        Arc::new(MemoryCredentialStore::new()),
        UserIdentity::local("testuser"),
    ));
    let previews = Arc::new(PreviewRegistry::new());
    let orchestrator = ConversationOrchestrator::new(
        "testuser",
        provider,
        history.clone(),
        AttachmentStager::new(previews.clone()),
        localizer,
    );
    AppState::new(history, identity, previews, orchestrator)
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_send_is_rejected_as_busy() {
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_millis(200),
        calls: AtomicUsize::new(0),
    });
    let state = app_state(provider.clone());

    let (first, second, prompts) = tokio::join!(
        send_message(&state, "Is this invoice real?".to_string()),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            send_message(&state, "and this one?".to_string()).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            suggested_prompts(&state)
        },
    );

    assert_eq!(second.unwrap_err(), SubmitError::Busy.to_string());
    assert_eq!(prompts.unwrap_err(), SubmitError::Busy.to_string());
    let reply = first.unwrap();
    assert_eq!(reply.analysis.unwrap().risk_level, Some(RiskLevel::Low));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let orchestrator = state.orchestrator.lock().await;
    assert_eq!(orchestrator.state(), TurnState::Idle);
    assert_eq!(orchestrator.conversation().turn_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_after_previous_turn_completes_is_accepted() {
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_millis(50),
        calls: AtomicUsize::new(0),
    });
    let state = app_state(provider.clone());

    send_message(&state, "first".to_string()).await.unwrap();
    send_message(&state, "second".to_string()).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.orchestrator.lock().await.conversation().turn_count, 2);
}
