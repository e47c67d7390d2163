//! Validation constraints applied before anything reaches the network

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::model::{AssetKind, LocalFile, UserId};

/// Policy configuration
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    /// Maximum body length in characters
    pub max_body_chars: usize,
    /// Maximum distinct mentions per reply
    pub max_mentions: usize,
    /// Maximum size of a single media file
    pub max_asset_bytes: u64,
    /// Media kinds accepted for upload
    pub allowed_kinds: Vec<AssetKind>,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            max_body_chars: 10_000,
            max_mentions: 20,
            max_asset_bytes: 10 * 1024 * 1024,
            allowed_kinds: vec![AssetKind::Image, AssetKind::Video],
        }
    }
}

impl ReplyPolicy {
    /// Validate a reply body and its mention list
    pub fn validate_reply(&self, body: &str, mentions: &[UserId]) -> Result<(), ValidationError> {
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }

        let len = body.chars().count();
        if len > self.max_body_chars {
            return Err(ValidationError::BodyTooLong {
                len,
                max: self.max_body_chars,
            });
        }

        if mentions.len() > self.max_mentions {
            return Err(ValidationError::TooManyMentions {
                count: mentions.len(),
                max: self.max_mentions,
            });
        }

        Ok(())
    }

    /// Validate a file chosen for upload
    pub fn validate_file(&self, file: &LocalFile) -> Result<AssetKind, ValidationError> {
        let kind = file
            .kind()
            .ok_or_else(|| ValidationError::UnsupportedMedia(file.content_type.clone()))?;

        if !self.allowed_kinds.contains(&kind) {
            return Err(ValidationError::MediaKindNotAllowed(kind));
        }

        if file.size() > self.max_asset_bytes {
            return Err(ValidationError::MediaTooLarge {
                size: file.size(),
                max: self.max_asset_bytes,
            });
        }

        Ok(kind)
    }
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^\w@])@([A-Za-z0-9_]{1,32})\b").expect("mention pattern is valid")
    })
}

/// Extract `@handle` mentions from a body, de-duplicated in first-seen order
pub fn extract_mentions(body: &str) -> Vec<UserId> {
    let mut seen = HashSet::new();
    mention_pattern()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|handle| seen.insert(handle.to_string()))
        .map(UserId::from)
        .collect()
}
