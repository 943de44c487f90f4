use chrono::Utc;
use listwatch_core::models::{CategoryKey, Listing};
use listwatch_store::JsonListingStore;
use tempfile::TempDir;

/// A store rooted in a fresh temporary directory. Keep the `TempDir` alive
/// for the duration of the test.
pub fn temp_store() -> (JsonListingStore, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    (JsonListingStore::new(dir.path().join("cl")), dir)
}

pub fn bikes() -> CategoryKey {
    CategoryKey::new("portland", "bikes")
}

pub fn listing(id: &str) -> Listing {
    Listing {
        id: id.to_string(),
        url: format!("https://portland.example.org/bik/d/{id}.html"),
        title: format!("bike {id}"),
        price: Some(250.0),
        title_location: Some("SE Portland".into()),
        description: "rides well".into(),
        location: Default::default(),
        posted: Some("Thu 01 Oct 09:15:00 AM".into()),
        attributes: Default::default(),
        last_seen: Utc::now(),
        sold: false,
    }
}
