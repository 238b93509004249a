//! Storage layer
//!
//! Handles the durable pieces of the network layer:
//!
//! - **Secure store**: credential key/value storage ([`SecureStore`])
//! - **Persistence**: atomic JSON files used by the response cache and the
//!   offline queue

pub mod error;
pub mod persistence;
pub mod secure;

pub use error::{StorageError, StorageResult};
pub use persistence::{atomic_write, load_json, save_json, save_private_json};
pub use secure::{FileSecureStore, MemoryStore, SecureStore};
