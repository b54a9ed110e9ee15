use futures::{Stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{GenerativeProvider, ProviderResponse};
use crate::capture::{CaptureEvent, DraftBuffer};
use crate::error::{ProviderError, StagingError, SubmitError};
use crate::history::ConversationHistoryStore;
use crate::i18n::Localizer;
use crate::models::{AttachmentRef, Conversation, Message};
use crate::parser::ResponseParser;
use crate::preview::is_volatile;
use crate::prompt::{PromptBuilder, ProviderRequest, RequestMode};
use crate::staging::{AttachmentStager, RawFile};

const GENERAL_PROMPT_KEYS: [&str; 3] = [
    "chat.suggestedPrompts.general1",
    "chat.suggestedPrompts.general2",
    "chat.suggestedPrompts.general3",
];
const FILE_PROMPT_KEYS: [&str; 4] = [
    "chat.suggestedPrompts.file1",
    "chat.suggestedPrompts.file2",
    "chat.suggestedPrompts.file3",
    "chat.suggestedPrompts.file4",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Building,
    AwaitingResponse,
    ApplyingResult,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedPrompt {
    pub text: String,
    pub for_file: bool,
}

/// Drives one active conversation through its turn state machine.
pub struct ConversationOrchestrator {
    user_id: String,
    conversation: Conversation,
    state: TurnState,
    staged: Vec<AttachmentRef>,
    draft: DraftBuffer,
    last_error: Option<String>,
    // Placeholder id of a turn whose response has not been applied yet
    in_flight: Option<u64>,
    provider: Arc<dyn GenerativeProvider>,
    prompts: PromptBuilder,
    parser: ResponseParser,
    history: Arc<ConversationHistoryStore>,
    stager: AttachmentStager,
    localizer: Arc<dyn Localizer>,
    request_timeout: Option<Duration>,
}

impl ConversationOrchestrator {
    pub fn new(
        user_id: impl Into<String>,
        provider: Arc<dyn GenerativeProvider>,
        history: Arc<ConversationHistoryStore>,
        stager: AttachmentStager,
        localizer: Arc<dyn Localizer>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation: Conversation::new(localizer.text("chat.initialSystemMessage")),
            state: TurnState::Idle,
            staged: Vec::new(),
            draft: DraftBuffer::default(),
            last_error: None,
            in_flight: None,
            provider,
            prompts: PromptBuilder::new(localizer.clone()),
            parser: ResponseParser::new(localizer.clone()),
            history,
            stager,
            localizer,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn staged(&self) -> &[AttachmentRef] {
        &self.staged
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn localizer(&self) -> &dyn Localizer {
        self.localizer.as_ref()
    }

    pub fn draft(&self) -> String {
        self.draft.text()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft.set(text);
    }

    fn transition(&mut self, next: TurnState) {
        log::debug!(
            "Conversation {}: {:?} -> {:?}",
            self.conversation.id,
            self.state,
            next
        );
        self.state = next;
    }

    /// Submits one turn. Empty input is rejected without any state change or
    /// provider call. Provider failures still leave a readable error message in
    /// the log and return the orchestrator to `Idle`. Overlapping turns are
    /// rejected by the lock in `AppState`.
    pub async fn submit(&mut self, text: &str) -> Result<Message, SubmitError> {
        self.recover_interrupted().await;

        let text = text.trim();
        if text.is_empty() && self.staged.is_empty() {
            return Err(SubmitError::EmptyInput);
        }

        self.transition(TurnState::Building);
        let request = match self.prompts.build(
            text,
            &self.staged,
            self.conversation.turn_count,
            &self.conversation.messages,
        ) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Not sending turn: {}", e);
                self.transition(TurnState::Idle);
                return Err(e.into());
            }
        };

        let attachments = std::mem::take(&mut self.staged);
        let user_text = if text.is_empty() {
            self.localizer
                .format("chat.stagedFiles", &[("count", attachments.len().to_string().as_str())])
        } else {
            text.to_string()
        };
        let user_message_id = self.conversation.next_message_id();
        self.conversation
            .messages
            .push(Message::user(user_message_id, Some(user_text), attachments));
        let pending_id = user_message_id + 1;
        self.conversation
            .messages
            .push(Message::pending(pending_id, self.localizer.text("chat.typing")));
        self.conversation.turn_count += 1;
        self.last_error = None;
        self.in_flight = Some(pending_id);

        self.transition(TurnState::AwaitingResponse);
        let outcome = self.call_provider(&request).await;
        self.remove_placeholder(pending_id);

        match outcome {
            Ok(response) => {
                self.transition(TurnState::ApplyingResult);
                let reply = self.reply_message(pending_id, request.mode, response);
                self.conversation.messages.push(reply.clone());
                self.history.save(&self.user_id, &mut self.conversation).await;
                self.transition(TurnState::Idle);
                Ok(reply)
            }
            Err(err) => {
                self.fail_turn(pending_id, &err).await;
                Err(err.into())
            }
        }
    }

    /// Submits whatever the draft holds.
    pub async fn submit_draft(&mut self) -> Result<Message, SubmitError> {
        let text = self.draft.text();
        let result = self.submit(&text).await;
        if !matches!(result, Err(SubmitError::EmptyInput | SubmitError::Build(_))) {
            self.draft.clear();
        }
        result
    }

    async fn call_provider(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.generate(request))
                .await
                .unwrap_or_else(|_| {
                    log::warn!("Provider did not answer within {:?}", limit);
                    Err(ProviderError::Timeout(limit))
                }),
            None => self.provider.generate(request).await,
        }
    }

    fn remove_placeholder(&mut self, pending_id: u64) {
        self.conversation.messages.retain(|m| m.id != pending_id);
        self.in_flight = None;
    }

    fn reply_message(&self, id: u64, mode: RequestMode, response: ProviderResponse) -> Message {
        match mode {
            RequestMode::Analysis => {
                Message::ai_analysis(id, self.parser.parse_with_citations(&response.text, &response.citations))
            }
            RequestMode::FollowUp => {
                let (text, carrier) = self.parser.conversational(&response.text, &response.citations);
                let text = if text.trim().is_empty() {
                    self.localizer.text("chat.emptyContent")
                } else {
                    text
                };
                Message {
                    analysis: carrier,
                    ..Message::ai_text(id, text)
                }
            }
        }
    }

    async fn fail_turn(&mut self, id: u64, err: &ProviderError) {
        self.transition(TurnState::Failed);
        log::error!("Turn failed for conversation {}: {}", self.conversation.id, err);
        let shown = err.localized(self.localizer.as_ref());
        let text = format!("{} {}", self.localizer.text("chat.errorPrefix"), shown);
        self.conversation.messages.push(Message::ai_text(id, text));
        self.last_error = Some(shown);
        self.history.save(&self.user_id, &mut self.conversation).await;
        self.transition(TurnState::Idle);
    }

    /// Closes out a turn whose submit future was dropped before the response
    /// was applied. Returns whether anything was recovered.
    pub async fn recover_interrupted(&mut self) -> bool {
        if self.state == TurnState::Idle && self.in_flight.is_none() {
            return false;
        }
        log::warn!(
            "Recovering interrupted turn in conversation {} (state {:?})",
            self.conversation.id,
            self.state
        );
        match self.in_flight {
            Some(pending_id) => {
                self.remove_placeholder(pending_id);
                self.fail_turn(pending_id, &ProviderError::Interrupted).await;
            }
            None => self.transition(TurnState::Idle),
        }
        true
    }

    /// Stages a batch of files. Accepted files are queued for the next turn;
    /// rejected ones are returned.
    pub async fn stage_files(&mut self, files: Vec<RawFile>) -> Vec<StagingError> {
        let mut rejected = Vec::new();
        for result in self.stager.stage_all(files).await {
            match result {
                Ok(attachment) => self.staged.push(attachment),
                Err(e) => rejected.push(e),
            }
        }
        rejected
    }

    pub async fn stage_path(&mut self, path: &Path) -> Result<&AttachmentRef, StagingError> {
        let attachment = self.stager.stage_path(path).await.map_err(|e| {
            log::warn!("Failed to stage {}: {}", path.display(), e);
            e
        })?;
        self.staged.push(attachment);
        Ok(&self.staged[self.staged.len() - 1])
    }

    /// Unstages the attachment at `index`, releasing its preview handle.
    pub fn remove_staged(&mut self, index: usize) -> Option<AttachmentRef> {
        if index >= self.staged.len() {
            return None;
        }
        let removed = self.staged.remove(index);
        if let Some(handle) = removed.preview_ref.as_deref() {
            self.stager.previews().release(handle);
        }
        Some(removed)
    }

    /// Feeds one capture-device event into the draft or the staging area.
    pub async fn apply_capture_event(&mut self, event: CaptureEvent) -> Result<(), StagingError> {
        match event {
            CaptureEvent::TextDelta(delta) => self.draft.push_delta(&delta),
            CaptureEvent::FinalText(text) => self.draft.push_final(&text),
            CaptureEvent::FileReady(file) => {
                let attachment = self.stager.stage(file)?;
                self.staged.push(attachment);
            }
        }
        Ok(())
    }

    /// Drains a capture stream to completion, collecting staging failures.
    pub async fn consume_capture<S>(&mut self, mut events: S) -> Vec<StagingError>
    where
        S: Stream<Item = CaptureEvent> + Unpin,
    {
        let mut rejected = Vec::new();
        while let Some(event) = events.next().await {
            if let Err(e) = self.apply_capture_event(event).await {
                log::warn!("Discarding captured file: {}", e);
                rejected.push(e);
            }
        }
        rejected
    }

    /// Prompts to offer: none while a turn is running or before the first
    /// turn, file-oriented ones while attachments are staged.
    pub fn suggested_prompts(&self) -> Vec<SuggestedPrompt> {
        if self.state != TurnState::Idle {
            return Vec::new();
        }
        let initial = self.conversation.messages.iter().all(|m| m.is_seed);
        if initial && self.conversation.turn_count == 0 {
            return Vec::new();
        }
        let (keys, for_file): (&[&str], bool) = if self.staged.is_empty() {
            (&GENERAL_PROMPT_KEYS[..], false)
        } else {
            (&FILE_PROMPT_KEYS[..], true)
        };
        keys.iter()
            .map(|key| SuggestedPrompt {
                text: self.localizer.text(key),
                for_file,
            })
            .collect()
    }

    /// Abandons the current conversation and starts a fresh one.
    pub fn start_new(&mut self) {
        let fresh = Conversation::new(self.localizer.text("chat.initialSystemMessage"));
        self.reset_to(fresh);
    }

    /// Switches to a saved conversation. Leaves the current one untouched if `id` is unknown.
    pub async fn load(&mut self, id: Uuid) -> bool {
        match self.history.load(&self.user_id, id).await {
            Some(conversation) => {
                self.reset_to(conversation);
                true
            }
            None => false,
        }
    }

    fn reset_to(&mut self, conversation: Conversation) {
        if self.in_flight.is_some() {
            log::warn!("Discarding unfinished turn in conversation {}", self.conversation.id);
        }
        self.release_previews();
        log::info!("Switching to conversation {}", conversation.id);
        self.conversation = conversation;
        self.staged.clear();
        self.draft.clear();
        self.last_error = None;
        self.in_flight = None;
        self.state = TurnState::Idle;
    }

    fn release_previews(&self) {
        let handles = self
            .staged
            .iter()
            .chain(self.conversation.messages.iter().flat_map(|m| m.attachments.iter()))
            .filter_map(|a| a.preview_ref.as_deref())
            .filter(|h| is_volatile(h));
        let released = self.stager.previews().release_all(handles);
        if released > 0 {
            log::debug!("Released {} preview handle(s)", released);
        }
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        self.release_previews();
    }
}
