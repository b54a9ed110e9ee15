use chrono::{Local, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::i18n::Localizer;
use crate::models::{AttachmentRef, Conversation, Message, Sender};
use crate::preview::{data_uri, is_volatile};
use crate::storage::KeyValueStore;

pub const MAX_SAVED_CONVERSATIONS: usize = 10;
const HISTORY_KEY_PREFIX: &str = "chatHistoryList_";

const TITLE_WORDS: usize = 5;
const TITLE_MAX_CHARS: usize = 35;
const ELLIPSIS: &str = "...";

/// Per-user archive of conversations, stored as one ordered document per user.
pub struct ConversationHistoryStore {
    store: Arc<dyn KeyValueStore>,
    localizer: Arc<dyn Localizer>,
    max_conversations: usize,
}

impl ConversationHistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, localizer: Arc<dyn Localizer>) -> Self {
        Self {
            store,
            localizer,
            max_conversations: MAX_SAVED_CONVERSATIONS,
        }
    }

    pub fn with_max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = max.max(1);
        self
    }

    fn key(user_id: &str) -> String {
        format!("{}{}", HISTORY_KEY_PREFIX, user_id)
    }

    async fn read_list(&self, user_id: &str) -> Result<Vec<Conversation>, PersistenceError> {
        let key = Self::key(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str::<Vec<Conversation>>(&raw).map_err(|e| PersistenceError::CorruptRecord {
            key,
            reason: e.to_string(),
        })
    }

    async fn write_list(&self, user_id: &str, list: &[Conversation]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(list).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        self.store.set(&Self::key(user_id), &json).await
    }

    /// Saved conversations, most recent first. Storage failures degrade to an empty list.
    pub async fn list(&self, user_id: &str) -> Vec<Conversation> {
        if user_id.is_empty() {
            return Vec::new();
        }
        match self.read_list(user_id).await {
            Ok(mut list) => {
                list.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
                list.into_iter().map(hydrate_after_load).collect()
            }
            Err(e) => {
                log::error!("Failed to load conversation list for '{}': {}", user_id, e);
                Vec::new()
            }
        }
    }

    pub async fn load(&self, user_id: &str, id: Uuid) -> Option<Conversation> {
        let found = self.list(user_id).await.into_iter().find(|c| c.id == id);
        if found.is_none() {
            log::warn!("Conversation {} not found for user '{}'", id, user_id);
        }
        found
    }

    /// Best-effort save. Renames the conversation and bumps its activity time
    /// in place; failures are logged and swallowed.
    pub async fn save(&self, user_id: &str, conversation: &mut Conversation) {
        if let Err(e) = self.try_save(user_id, conversation).await {
            log::error!(
                "Failed to save conversation {} for user '{}': {}",
                conversation.id,
                user_id,
                e
            );
        }
    }

    /// Upserts `conversation`, re-sorts by activity and evicts beyond the cap.
    /// Conversations holding nothing but the seed greeting are not stored.
    pub async fn try_save(&self, user_id: &str, conversation: &mut Conversation) -> Result<(), PersistenceError> {
        if user_id.is_empty() || !conversation.has_user_interaction() {
            log::debug!("Skipping save of conversation {} (no user interaction)", conversation.id);
            return Ok(());
        }

        conversation.name = generate_conversation_name(&conversation.messages, self.localizer.as_ref());
        conversation.last_activity_at = Utc::now().max(conversation.last_activity_at);

        let mut list = match self.read_list(user_id).await {
            Ok(list) => list,
            Err(PersistenceError::CorruptRecord { key, reason }) => {
                log::warn!("Discarding corrupt history under '{}': {}", key, reason);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let record = sanitize_for_storage(conversation);
        match list.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => *existing = record,
            None => list.push(record),
        }
        list.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        if list.len() > self.max_conversations {
            let evicted: Vec<Uuid> = list[self.max_conversations..].iter().map(|c| c.id).collect();
            log::info!("Evicting {} conversation(s) beyond the cap: {:?}", evicted.len(), evicted);
            list.truncate(self.max_conversations);
        }

        self.write_list(user_id, &list).await?;
        log::debug!("Saved conversation {} as '{}'", conversation.id, conversation.name);
        Ok(())
    }

    pub async fn delete(&self, user_id: &str, id: Uuid) {
        if user_id.is_empty() {
            return;
        }
        let result = async {
            let mut list = self.read_list(user_id).await?;
            let before = list.len();
            list.retain(|c| c.id != id);
            if list.len() != before {
                self.write_list(user_id, &list).await?;
            }
            Ok::<_, PersistenceError>(())
        }
        .await;
        if let Err(e) = result {
            log::error!("Failed to delete conversation {} for '{}': {}", id, user_id, e);
        }
    }

    pub async fn clear_all(&self, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        if let Err(e) = self.store.remove(&Self::key(user_id)).await {
            log::error!("Failed to clear history for '{}': {}", user_id, e);
        }
    }
}

/// Storage form: pending placeholders dropped, session-local previews stripped.
pub fn sanitize_for_storage(conversation: &Conversation) -> Conversation {
    let messages = conversation
        .messages
        .iter()
        .filter(|m| !m.is_pending)
        .map(|m| Message {
            attachments: m.attachments.iter().map(strip_volatile_preview).collect(),
            ..m.clone()
        })
        .collect();
    Conversation {
        messages,
        ..conversation.clone()
    }
}

fn strip_volatile_preview(attachment: &AttachmentRef) -> AttachmentRef {
    let mut cleaned = attachment.clone();
    if cleaned.preview_ref.as_deref().is_some_and(is_volatile) {
        cleaned.preview_ref = None;
    }
    cleaned
}

/// Display form after a reload: images get a `data:` preview from their inline
/// data, and volatile handles from an earlier session are dropped.
pub fn hydrate_after_load(mut conversation: Conversation) -> Conversation {
    for attachment in conversation.messages.iter_mut().flat_map(|m| m.attachments.iter_mut()) {
        if attachment.preview_ref.as_deref().is_some_and(is_volatile) {
            attachment.preview_ref = None;
        }
        if attachment.is_image() && attachment.preview_ref.is_none() {
            if let Some(data) = attachment.inline_data.as_deref().filter(|d| !d.is_empty()) {
                attachment.preview_ref = Some(data_uri(&attachment.mime_type, data));
            }
        }
    }
    conversation
}

/// Display name derived from the first meaningful user message.
pub fn generate_conversation_name(messages: &[Message], localizer: &dyn Localizer) -> String {
    let first_user = messages.iter().find(|m| {
        m.sender == Sender::User && (m.trimmed_text().is_some() || !m.attachments.is_empty())
    });

    if let Some(message) = first_user {
        let text = message.trimmed_text();
        let file_count = message.attachments.len();
        let is_staged_placeholder = file_count > 0
            && text.is_some_and(|t| {
                t == localizer.format("chat.stagedFiles", &[("count", file_count.to_string().as_str())])
            });

        if file_count > 0 && (text.is_none() || is_staged_placeholder) {
            return localizer.format(
                "chatHistory.fileChatName",
                &[
                    ("count", file_count.to_string().as_str()),
                    ("fileName", message.attachments[0].name.as_str()),
                ],
            );
        }
        if let Some(text) = text {
            return text_title(text);
        }
    }

    let relevant: Vec<&Message> = messages.iter().filter(|m| !m.is_seed).collect();
    let time = messages
        .iter()
        .map(|m| m.timestamp)
        .max()
        .unwrap_or_else(Utc::now)
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string();
    let key = if relevant.is_empty() || (relevant.len() == 1 && relevant[0].sender == Sender::Ai) {
        "chatHistory.newChatName"
    } else {
        "chatHistory.untitledChatName"
    };
    localizer.format(key, &[("time", time.as_str())])
}

fn text_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let title = words[..words.len().min(TITLE_WORDS)].join(" ");
    let title_chars = title.chars().count();
    if title_chars > TITLE_MAX_CHARS {
        let head: String = title.chars().take(TITLE_MAX_CHARS - ELLIPSIS.len()).collect();
        format!("{}{}", head, ELLIPSIS)
    } else if words.len() > TITLE_WORDS && title_chars + ELLIPSIS.len() <= TITLE_MAX_CHARS {
        format!("{}{}", title, ELLIPSIS)
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Catalog;
    use crate::storage::MemoryStore;

    fn attachment(name: &str, mime: &str, preview: Option<&str>) -> AttachmentRef {
        AttachmentRef {
            name: name.to_string(),
            mime_type: mime.to_string(),
            inline_data: Some("AAAA".to_string()),
            text_content: None,
            preview_ref: preview.map(str::to_string),
        }
    }

    fn name_of(messages: &[Message]) -> String {
        generate_conversation_name(messages, &Catalog::english())
    }

    #[test]
    fn test_name_from_first_five_words() {
        let messages = vec![
            Message::seed(1, "Welcome"),
            Message::user(2, Some("Is this a scam email asking for my bank password".into()), vec![]),
        ];
        let name = name_of(&messages);
        assert_eq!(name, "Is this a scam email...");
        assert!(name.chars().count() <= 35);
    }

    #[test]
    fn test_name_truncates_long_words() {
        let messages = vec![Message::user(
            1,
            Some("Supercalifragilistic expialidocious antidisestablishment words here".into()),
            vec![],
        )];
        let name = name_of(&messages);
        assert_eq!(name.chars().count(), 35);
        assert!(name.ends_with("..."));
    }

    #[test]
    fn test_short_text_kept_verbatim() {
        let messages = vec![Message::user(1, Some("  hello   there ".into()), vec![])];
        assert_eq!(name_of(&messages), "hello there");
    }

    #[test]
    fn test_file_based_name_for_placeholder_text() {
        let files = vec![attachment("photo.png", "image/png", None)];
        let placeholder = Message::user(2, Some("1 file(s) attached".into()), files.clone());
        assert_eq!(name_of(&[placeholder]), "1 file(s): photo.png");

        let no_text = Message::user(2, None, files.clone());
        assert_eq!(name_of(&[no_text]), "1 file(s): photo.png");

        let real_text = Message::user(2, Some("what is this".into()), files);
        assert_eq!(name_of(&[real_text]), "what is this");
    }

    #[test]
    fn test_generic_names() {
        let seed_only = vec![Message::seed(1, "Welcome")];
        assert!(name_of(&seed_only).starts_with("New chat at "));

        let only_ai = vec![Message::seed(1, "Welcome"), Message::ai_text(2, "hi")];
        assert!(name_of(&only_ai).starts_with("New chat at "));

        let blank_user = vec![
            Message::seed(1, "Welcome"),
            Message::user(2, Some("   ".into()), vec![]),
            Message::ai_text(3, "?"),
        ];
        assert!(name_of(&blank_user).starts_with("Untitled chat at "));
    }

    #[test]
    fn test_sanitize_drops_pending_and_volatile_previews() {
        let mut conv = Conversation::new("Welcome");
        conv.messages.push(Message::user(
            2,
            None,
            vec![
                attachment("a.png", "image/png", Some("blob:1234")),
                attachment("b.png", "image/png", Some("data:image/png;base64,AAAA")),
            ],
        ));
        conv.messages.push(Message::pending(3, "Analyzing..."));

        let stored = sanitize_for_storage(&conv);
        assert_eq!(stored.messages.len(), 2);
        let attachments = &stored.messages[1].attachments;
        assert_eq!(attachments[0].preview_ref, None);
        assert_eq!(attachments[0].inline_data.as_deref(), Some("AAAA"));
        assert!(attachments[1].preview_ref.as_deref().unwrap().starts_with("data:"));
    }

    #[test]
    fn test_hydrate_synthesizes_image_previews_only() {
        let mut conv = Conversation::new("Welcome");
        let mut pdf = attachment("doc.pdf", "application/pdf", Some("blob:stale"));
        pdf.inline_data = Some("JVBE".into());
        conv.messages.push(Message::user(
            2,
            None,
            vec![attachment("a.png", "image/png", Some("blob:stale")), pdf],
        ));

        let loaded = hydrate_after_load(conv);
        let attachments = &loaded.messages[1].attachments;
        assert_eq!(attachments[0].preview_ref.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(attachments[1].preview_ref, None);
    }

    #[tokio::test]
    async fn test_seed_only_conversation_is_not_saved() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConversationHistoryStore::new(kv.clone(), Arc::new(Catalog::english()));
        let mut conv = Conversation::new("Welcome");
        store.save("u1", &mut conv).await;
        assert!(store.list("u1").await.is_empty());
        assert!(kv.get("chatHistoryList_u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_reads_as_empty_and_is_replaced() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("chatHistoryList_u1", "{not json").await.unwrap();
        let store = ConversationHistoryStore::new(kv.clone(), Arc::new(Catalog::english()));
        assert!(store.list("u1").await.is_empty());

        let mut conv = Conversation::new("Welcome");
        conv.messages.push(Message::user(2, Some("hi".into()), vec![]));
        store.save("u1", &mut conv).await;
        assert_eq!(store.list("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_activity_regardless_of_stored_order() {
        let kv = Arc::new(MemoryStore::new());
        let mut older = Conversation::new("Welcome");
        older.messages.push(Message::user(2, Some("older".into()), vec![]));
        older.last_activity_at = Utc::now() - chrono::Duration::minutes(30);
        let mut newer = Conversation::new("Welcome");
        newer.messages.push(Message::user(2, Some("newer".into()), vec![]));
        newer.last_activity_at = Utc::now();
        let stored = serde_json::to_string(&vec![older.clone(), newer.clone()]).unwrap();
        kv.set("chatHistoryList_u1", &stored).await.unwrap();

        let store = ConversationHistoryStore::new(kv, Arc::new(Catalog::english()));
        let ids: Vec<_> = store.list("u1").await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_quota_failure_is_absorbed() {
        let kv = Arc::new(MemoryStore::new().with_quota(16));
        let store = ConversationHistoryStore::new(kv, Arc::new(Catalog::english()));
        let mut conv = Conversation::new("Welcome");
        conv.messages.push(Message::user(2, Some("hello".into()), vec![]));
        assert!(matches!(
            store.try_save("u1", &mut conv).await,
            Err(PersistenceError::QuotaExceeded { .. })
        ));
        store.save("u1", &mut conv).await;
        assert!(store.list("u1").await.is_empty());
        assert_eq!(conv.name, "hello");
    }

    #[tokio::test]
    async fn test_delete_and_clear_all() {
        let store = ConversationHistoryStore::new(Arc::new(MemoryStore::new()), Arc::new(Catalog::english()));
        let mut first = Conversation::new("Welcome");
        first.messages.push(Message::user(2, Some("one".into()), vec![]));
        let mut second = Conversation::new("Welcome");
        second.messages.push(Message::user(2, Some("two".into()), vec![]));
        store.save("u1", &mut first).await;
        store.save("u1", &mut second).await;
        store.save("u2", &mut first.clone()).await;

        store.delete("u1", first.id).await;
        let remaining = store.list("u1").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);

        store.clear_all("u1").await;
        assert!(store.list("u1").await.is_empty());
        assert_eq!(store.list("u2").await.len(), 1);
        assert!(store.load("u2", first.id).await.is_some());
    }
}
