//! Announcement text and its content-derived cache key.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::schedule::TimeBlock;

/// Spoken message for a block's outstanding items.
///
/// Empty when every item is complete; callers treat that as nothing to say.
pub fn build_announcement_text(block: &TimeBlock) -> String {
    let outstanding: Vec<&str> = block
        .items
        .iter()
        .filter(|item| !item.is_completed)
        .map(|item| item.name.as_str())
        .collect();

    if outstanding.is_empty() {
        return String::new();
    }

    format!("Time for {}. You need to: {}", block.time, outstanding.join(", "))
}

/// SHA-256 of the announcement text. Blocks with identical text share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnouncementKey(String);

impl AnnouncementKey {
    pub fn for_text(text: &str) -> Self {
        let hash = Sha256::digest(text.as_bytes());
        Self(hash.iter().map(|b| format!("{b:02x}")).collect())
    }
}

impl fmt::Display for AnnouncementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell entries apart in logs
        write!(f, "{}", &self.0[..12])
    }
}
