//! threadline domain crate
//!
//! This crate contains the core discussion engine following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `usecases`: Tree builder, interaction ledger, toggle engine, solution
//!   propagation, upload pipeline, feed subscriber and the controller
//! - `policy`: Validation constraints applied before any network call
//! - `error`: Engine error taxonomy

pub mod error;
pub mod model;
pub mod policy;
pub mod ports;
pub mod usecases;

pub use error::{EngineError, ValidationError};
pub use model::*;
pub use ports::*;

use sha2::{Digest, Sha256};

/// Compute a deterministic digest of a reply collection.
///
/// Independent of input order; used to suppress re-delivery of unchanged
/// snapshots by polling feeds.
pub fn compute_snapshot_digest(replies: &[Reply]) -> String {
    let mut sorted: Vec<_> = replies.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for reply in sorted {
        hasher.update(reply.id.as_str().as_bytes());
        hasher.update([0]);
        if let Some(parent) = &reply.parent_reply_id {
            hasher.update(parent.as_str().as_bytes());
        }
        hasher.update([0]);
        hasher.update(reply.body.as_bytes());
        hasher.update([0]);
        hasher.update(reply.created_at.unix_timestamp_nanos().to_le_bytes());
        hasher.update(reply.upvotes.to_le_bytes());
        hasher.update(reply.downvotes.to_le_bytes());
        for user in reply.upvoted_by.iter().chain(reply.downvoted_by.iter()) {
            hasher.update(user.as_str().as_bytes());
            hasher.update([1]);
        }
        for (kind, users) in &reply.reactions {
            hasher.update(kind.as_str().as_bytes());
            for user in users {
                hasher.update(user.as_str().as_bytes());
                hasher.update([1]);
            }
        }
        hasher.update([u8::from(reply.is_solution)]);
        for asset in &reply.media {
            hasher.update(asset.id.as_str().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}
