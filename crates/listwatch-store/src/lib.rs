pub mod config;
pub mod json_store;

pub use config::StoreConfig;
pub use json_store::JsonListingStore;
