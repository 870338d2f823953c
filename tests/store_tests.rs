use genagent::model::{Conversation, Item, Message, Metadata, ToolCall};
use genagent::store::{ConversationStore, FileStore, MemoryStore, NullStore, StoreError};
use serde_json::json;

fn sample_conversation() -> Conversation {
    let mut conv = Conversation::new(Metadata::titled("weather chat"));
    conv.push(Item::Message(Message::user("What's the weather in Oslo?")));
    conv.push(Item::ToolCall(ToolCall::new(
        "get_weather",
        json!({"city": "Oslo"}),
    )));
    conv
}

#[tokio::test]
async fn memory_store_round_trips() {
    let store = MemoryStore::new();
    let conv = sample_conversation();
    let id = conv.id;

    store.save(&conv).await.unwrap();
    let loaded = store.load(id).await.unwrap();
    assert_eq!(loaded, conv);
}

#[tokio::test]
async fn memory_store_missing_id_is_not_found() {
    let store = MemoryStore::new();
    let conv = sample_conversation();
    let err = store.load(conv.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == conv.id));
}

#[tokio::test]
async fn memory_store_delete_is_idempotent() {
    let store = MemoryStore::new();
    let conv = sample_conversation();
    store.save(&conv).await.unwrap();

    store.delete(conv.id).await.unwrap();
    store.delete(conv.id).await.unwrap();
    assert!(store.load(conv.id).await.is_err());
}

#[tokio::test]
async fn memory_store_lists_created_conversations() {
    let store = MemoryStore::new();
    let a = store.create(Some(Metadata::titled("a"))).await.unwrap();
    let b = store.create(Some(Metadata::titled("b"))).await.unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|c| c.id == a.id));
    assert!(listed.iter().any(|c| c.id == b.id));
}

#[tokio::test]
async fn file_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let conv = sample_conversation();

    store.save(&conv).await.unwrap();
    let loaded = store.load(conv.id).await.unwrap();
    assert_eq!(loaded, conv);
}

#[tokio::test]
async fn file_store_save_overwrites_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let mut conv = sample_conversation();
    store.save(&conv).await.unwrap();

    conv.push(Item::Message(Message::assistant("It is raining.")));
    store.save(&conv).await.unwrap();

    let loaded = store.load(conv.id).await.unwrap();
    assert_eq!(loaded.len(), 3);
}

#[tokio::test]
async fn file_store_missing_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let conv = sample_conversation();
    let err = store.load(conv.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn file_store_delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let conv = sample_conversation();
    store.save(&conv).await.unwrap();

    store.delete(conv.id).await.unwrap();
    store.delete(conv.id).await.unwrap();
    assert!(store.load(conv.id).await.is_err());
}

#[tokio::test]
async fn file_store_list_skips_unrelated_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let conv = sample_conversation();
    store.save(&conv).await.unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a conversation").unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, conv.id);
}

#[tokio::test]
async fn null_store_persists_nothing() {
    let store = NullStore;
    let conv = sample_conversation();
    store.save(&conv).await.unwrap();
    assert!(matches!(
        store.load(conv.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(store.list().await.unwrap().is_empty());
}
