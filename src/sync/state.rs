//! Per-member synchronization watermarks, persisted as `sync_state.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberSyncState {
    /// Highest message id seen for this member; the next sync fetches
    /// strictly newer messages.
    pub last_message_id: i64,
    pub total_messages: usize,
    /// RFC 3339 UTC timestamp of the last completed sync.
    pub last_sync: String,
}

/// All members' watermarks, keyed by `"{group_id}_{member_id}"`. Loaded once
/// at startup and written back after every member.
pub struct SyncState {
    path: PathBuf,
    entries: HashMap<String, MemberSyncState>,
}

impl SyncState {
    /// Load from disk; a missing or unreadable file starts from scratch.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(path = %path.display(), "Failed to parse sync state: {}", e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        SyncState {
            path: path.to_path_buf(),
            entries,
        }
    }

    fn key(group_id: i64, member_id: i64) -> String {
        format!("{}_{}", group_id, member_id)
    }

    pub fn last_id(&self, group_id: i64, member_id: i64) -> Option<i64> {
        self.entries
            .get(&Self::key(group_id, member_id))
            .map(|s| s.last_message_id)
    }

    /// Advance a member's watermark and persist immediately.
    pub fn update(&mut self, group_id: i64, member_id: i64, last_message_id: i64, total: usize) {
        self.entries.insert(
            Self::key(group_id, member_id),
            MemberSyncState {
                last_message_id,
                total_messages: total,
                last_sync: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        );
        self.save();
    }

    fn save(&self) {
        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(&self.path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            error!(path = %self.path.display(), "Failed to save sync state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_state.json");

        let mut state = SyncState::load(&path);
        assert_eq!(state.last_id(3, 7), None);

        state.update(3, 7, 1200, 45);
        let reloaded = SyncState::load(&path);
        assert_eq!(reloaded.last_id(3, 7), Some(1200));
        assert_eq!(reloaded.last_id(3, 8), None);
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_state.json");
        std::fs::write(&path, "{not json").unwrap();

        let state = SyncState::load(&path);
        assert_eq!(state.last_id(1, 1), None);
    }
}
