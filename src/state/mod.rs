//! Persistent profile state

mod store;

pub use store::{normalize_name, Loaded, ProfileStore, StoreWarning};
