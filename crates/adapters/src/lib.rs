//! threadline adapters crate
//!
//! Infrastructure implementations of the domain ports:
//! - `http`: REST mutation client, polling feed and streaming asset uploader
//! - `memory`: in-process discussion backend and stub uploader
//! - `state`: SQLite and in-memory interaction ledgers

mod http_api;
mod http_feed;
mod memory_backend;
mod state_memory;
mod state_sqlite;
mod upload_http;
mod upload_stub;

/// Re-exports for HTTP adapters
pub mod http {
    pub use crate::http_api::HttpDiscussionApi;
    pub use crate::http_feed::HttpPollingFeed;
    pub use crate::upload_http::HttpAssetUploader;
}

/// Re-exports for in-process adapters
pub mod memory {
    pub use crate::memory_backend::{MemoryBackend, MemorySession};
    pub use crate::upload_stub::StubUploader;
}

/// Re-exports for interaction ledger stores
pub mod state {
    pub use crate::state_memory::InMemoryInteractionRepo;
    pub use crate::state_sqlite::SqliteInteractionRepo;
}
