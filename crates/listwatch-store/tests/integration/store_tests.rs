use listwatch_core::models::CategoryState;
use listwatch_core::traits::ListingStore;

use super::common::{bikes, listing, temp_store};

#[tokio::test]
async fn test_load_missing_document_is_empty() {
    let (store, _dir) = temp_store();
    let state = store.load(&bikes()).await.unwrap();
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_save_then_load() {
    let (store, _dir) = temp_store();
    let mut state = CategoryState::default();
    state.activate(listing("101"));
    let mut gone = listing("102");
    gone.sold = true;
    state.sold.insert("102".into(), gone);

    store.save(&bikes(), &state).await.unwrap();
    let loaded = store.load(&bikes()).await.unwrap();
    assert_eq!(loaded, state);

    let path = store.path_for(&bikes()).unwrap();
    assert!(path.ends_with("portland/bikes.json"));
}

#[tokio::test]
async fn test_document_shape_on_disk() {
    let (store, _dir) = temp_store();
    let mut state = CategoryState::default();
    state.activate(listing("101"));
    store.save(&bikes(), &state).await.unwrap();

    let raw = tokio::fs::read_to_string(store.path_for(&bikes()).unwrap())
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json["sold"].as_object().unwrap().is_empty());
    let entry = &json["active"]["101"];
    assert_eq!(entry["title-location"], "SE Portland");
    assert!(entry["last-seen"].is_string());
    assert_eq!(entry["sold"], false);
}

#[tokio::test]
async fn test_save_fully_overwrites() {
    let (store, _dir) = temp_store();
    let mut first = CategoryState::default();
    first.activate(listing("101"));
    first.activate(listing("102"));
    store.save(&bikes(), &first).await.unwrap();

    let mut second = CategoryState::default();
    second.activate(listing("103"));
    store.save(&bikes(), &second).await.unwrap();

    let loaded = store.load(&bikes()).await.unwrap();
    assert_eq!(loaded.active.keys().collect::<Vec<_>>(), vec!["103"]);
}

#[tokio::test]
async fn test_no_temp_files_left_behind() {
    let (store, _dir) = temp_store();
    store.save(&bikes(), &CategoryState::default()).await.unwrap();

    let dir = store.root().join("portland");
    let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, ["bikes.json"]);
}

#[tokio::test]
async fn test_corrupt_document_is_a_store_error() {
    let (store, _dir) = temp_store();
    let path = store.path_for(&bikes()).unwrap();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"{\"active\": [").await.unwrap();

    let err = store.load(&bikes()).await.unwrap_err();
    assert!(err.to_string().starts_with("Store error: corrupt document"));
}

#[tokio::test]
async fn test_health_check_creates_root() {
    let (store, _dir) = temp_store();
    assert!(!store.root().exists());
    store.health_check().await.unwrap();
    assert!(store.root().is_dir());
}

#[tokio::test]
async fn test_health_check_rejects_file_root() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    tokio::fs::write(&file, b"x").await.unwrap();
    let store = listwatch_store::JsonListingStore::new(&file);
    assert!(store.health_check().await.is_err());
}

#[tokio::test]
async fn test_attribute_labeled_other_survives_reload() {
    let (store, _dir) = temp_store();
    let mut posting = listing("103");
    posting.attributes.insert("condition", "fair");
    posting.attributes.insert("other", "see description");
    posting.attributes.other.push("delivery available".into());

    let mut state = CategoryState::default();
    state.activate(posting);
    store.save(&bikes(), &state).await.unwrap();

    let loaded = store.load(&bikes()).await.unwrap();
    assert_eq!(loaded, state);
    let attributes = &loaded.active["103"].attributes;
    assert_eq!(attributes.labeled["condition"], "fair");
    assert_eq!(attributes.other, ["see description", "delivery available"]);
}
