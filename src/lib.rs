// Declare the modules
pub mod api;
pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod i18n;
pub mod identity;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod preview;
pub mod prompt;
pub mod staging;
pub mod state;
pub mod storage;

use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::{GeminiProvider, GenerativeProvider};
use crate::commands::{dispatch, parse_command, render_conversation, Outcome};
use crate::config::{get_api_key, ChatConfig};
use crate::history::ConversationHistoryStore;
use crate::i18n::{Catalog, Localizer};
use crate::identity::{IdentityStore, KeyringCredentialStore, LocalIdentityStore, UserIdentity};
use crate::orchestrator::ConversationOrchestrator;
use crate::preview::PreviewRegistry;
use crate::staging::AttachmentStager;
use crate::state::AppState;
use crate::storage::{KeyValueStore, StorageManager};

pub fn run() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(start())
}

async fn start() -> anyhow::Result<()> {
    let config = ChatConfig::from_env().context("Invalid configuration")?;
    let state = build_state(config).await?;
    repl(&state).await
}

/// Wires storage, localization, provider and identity into the shared state.
pub async fn build_state(config: ChatConfig) -> anyhow::Result<AppState> {
    let localizer: Arc<dyn Localizer> = Arc::new(match &config.locale_dir {
        Some(dir) => Catalog::load(dir, &config.locale)
            .with_context(|| format!("Failed to load locale '{}' from {}", config.locale, dir.display()))?,
        None => Catalog::builtin(&config.locale),
    });

    let db_path = config.resolve_db_path()?;
    let storage: Arc<dyn KeyValueStore> = Arc::new(StorageManager::new(&db_path).await?);

    let history = Arc::new(
        ConversationHistoryStore::new(storage.clone(), localizer.clone())
            .with_max_conversations(config.max_saved_conversations),
    );

    let identity: Arc<dyn IdentityStore> = Arc::new(LocalIdentityStore::new(
        storage,
        Arc::new(KeyringCredentialStore::new()),
        UserIdentity::local(&config.user_id),
    ));
    let user_id = match identity.current().await {
        Ok(Some(user)) => user.id,
        Ok(None) => config.user_id.clone(),
        Err(e) => {
            log::warn!("Failed to restore session, continuing as '{}': {}", config.user_id, e);
            config.user_id.clone()
        }
    };

    let api_key = get_api_key(&config).unwrap_or_else(|e| {
        log::warn!("{} ({}); requests will fail until a key is configured", e, config.api_key_ref);
        String::new()
    });
    let provider: Arc<dyn GenerativeProvider> =
        Arc::new(GeminiProvider::new(&config.api_url, &config.model, api_key));

    let previews = Arc::new(PreviewRegistry::new());
    let orchestrator = ConversationOrchestrator::new(
        user_id,
        provider,
        history.clone(),
        AttachmentStager::new(previews.clone()),
        localizer,
    )
    .with_request_timeout(config.request_timeout());

    log::info!("riskchat ready (model {}, database {})", config.model, db_path.display());
    Ok(AppState::new(history, identity, previews, orchestrator))
}

async fn repl(state: &AppState) -> anyhow::Result<()> {
    {
        let orchestrator = state.orchestrator.lock().await;
        println!("{}", render_conversation(orchestrator.conversation()));
    }
    println!("(type /help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match dispatch(state, parse_command(&line)).await {
            Ok(Outcome::Output(text)) => println!("{}", text),
            Ok(Outcome::Quit) => break,
            Err(message) => println!("! {}", message),
        }
    }
    Ok(())
}
