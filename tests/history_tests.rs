use std::sync::Arc;

use riskchat_lib::history::{hydrate_after_load, sanitize_for_storage, ConversationHistoryStore};
use riskchat_lib::i18n::Catalog;
use riskchat_lib::models::{AttachmentRef, Conversation, Message};
use riskchat_lib::storage::StorageManager;

async fn sqlite_history(dir: &tempfile::TempDir, max: usize) -> ConversationHistoryStore {
    let storage = StorageManager::new(&dir.path().join("history.sqlite")).await.unwrap();
    ConversationHistoryStore::new(Arc::new(storage), Arc::new(Catalog::english())).with_max_conversations(max)
}

fn conversation_with(text: &str) -> Conversation {
    let mut conversation = Conversation::new("Welcome");
    conversation
        .messages
        .push(Message::user(2, Some(text.to_string()), vec![]));
    conversation.turn_count = 1;
    conversation
}

fn image(name: &str, preview: &str) -> AttachmentRef {
    AttachmentRef {
        name: name.to_string(),
        mime_type: "image/jpeg".to_string(),
        inline_data: Some("/9j/4AAQ".to_string()),
        text_content: None,
        preview_ref: Some(preview.to_string()),
    }
}

#[tokio::test]
async fn test_retention_evicts_oldest_activity() {
    let dir = tempfile::tempdir().unwrap();
    let history = sqlite_history(&dir, 3).await;

    let mut saved = Vec::new();
    for i in 0..3 {
        let mut conversation = conversation_with(&format!("question {}", i));
        history.save("u1", &mut conversation).await;
        saved.push(conversation);
    }
    // Touch the oldest so the second one becomes the eviction candidate
    history.save("u1", &mut saved[0]).await;

    let mut newest = conversation_with("question 3");
    history.save("u1", &mut newest).await;

    let ids: Vec<_> = history.list("u1").await.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], newest.id);
    assert!(ids.contains(&saved[0].id));
    assert!(!ids.contains(&saved[1].id));
    assert!(ids.contains(&saved[2].id));
}

#[tokio::test]
async fn test_repeated_save_only_moves_activity() {
    let dir = tempfile::tempdir().unwrap();
    let history = sqlite_history(&dir, 10).await;
    let mut conversation = conversation_with("Is this invoice real?");

    history.save("u1", &mut conversation).await;
    let first = history.load("u1", conversation.id).await.unwrap();
    history.save("u1", &mut conversation).await;
    let second = history.load("u1", conversation.id).await.unwrap();

    assert_eq!(history.list("u1").await.len(), 1);
    assert_eq!(first.messages, second.messages);
    assert_eq!(first.name, second.name);
    assert_eq!(first.turn_count, second.turn_count);
    assert!(second.last_activity_at >= first.last_activity_at);
}

#[tokio::test]
async fn test_durable_fields_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut conversation = Conversation::new("Welcome");
    let attachments = vec![
        image("photo.jpg", "blob:3f1c"),
        AttachmentRef {
            name: "mail.txt".to_string(),
            mime_type: "text/plain".to_string(),
            inline_data: None,
            text_content: Some("Your account is locked".to_string()),
            preview_ref: None,
        },
    ];
    conversation
        .messages
        .push(Message::user(2, Some("2 file(s) attached".into()), attachments.clone()));
    conversation.turn_count = 1;

    {
        let history = sqlite_history(&dir, 10).await;
        history.save("u1", &mut conversation).await;
    }
    let history = sqlite_history(&dir, 10).await;
    let loaded = history.load("u1", conversation.id).await.unwrap();

    assert_eq!(loaded.name, "2 file(s): photo.jpg");
    let restored = &loaded.messages[1].attachments;
    for (before, after) in attachments.iter().zip(restored) {
        assert_eq!(before.name, after.name);
        assert_eq!(before.mime_type, after.mime_type);
        assert_eq!(before.inline_data, after.inline_data);
        assert_eq!(before.text_content, after.text_content);
    }
    assert_eq!(restored[0].preview_ref.as_deref(), Some("data:image/jpeg;base64,/9j/4AAQ"));
    assert_eq!(restored[1].preview_ref, None);
}

#[test]
fn test_sanitize_after_hydrate_keeps_durable_form() {
    let mut conversation = Conversation::new("Welcome");
    conversation
        .messages
        .push(Message::user(2, None, vec![image("a.jpg", "blob:1")]));

    let stored = sanitize_for_storage(&conversation);
    let again = sanitize_for_storage(&hydrate_after_load(stored.clone()));
    let before = &stored.messages[1].attachments[0];
    let after = &again.messages[1].attachments[0];
    assert_eq!(before.preview_ref, None);
    assert_eq!(before.inline_data, after.inline_data);
    assert_eq!(before.name, after.name);
    assert!(after.preview_ref.as_deref().unwrap().starts_with("data:"));
}

#[tokio::test]
async fn test_histories_are_isolated_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let history = sqlite_history(&dir, 10).await;
    let mut conversation = conversation_with("mine");
    history.save("alice", &mut conversation).await;

    assert_eq!(history.list("alice").await.len(), 1);
    assert!(history.list("bob").await.is_empty());
    assert!(history.load("bob", conversation.id).await.is_none());
    assert!(history.list("").await.is_empty());
}
