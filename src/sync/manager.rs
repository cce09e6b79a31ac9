//! Mirrors a group's timelines into a local message archive plus media files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::state::SyncState;
use crate::client::Client;
use crate::error::HakoError;
use crate::models::message::{media_extension, media_url, normalize_message, MessageKind};

/// One pending media download, produced while preparing messages and
/// consumed by the bounded download pass.
#[derive(Debug, Clone)]
pub struct MediaTask {
    pub url: String,
    pub path: PathBuf,
    pub message_id: i64,
}

pub struct SyncManager {
    client: Client,
    output_dir: PathBuf,
    concurrency: usize,
    state: SyncState,
}

impl SyncManager {
    pub fn new(client: Client, output_dir: &Path, concurrency: usize) -> Self {
        let state = SyncState::load(&output_dir.join("sync_state.json"));
        SyncManager {
            client,
            output_dir: output_dir.to_path_buf(),
            concurrency,
            state,
        }
    }

    /// Full sync: every subscribed group, every member, then the media
    /// queue. Returns the number of new messages processed.
    pub async fn run(&mut self) -> Result<usize, HakoError> {
        let groups = self.client.get_groups(false).await?;
        if groups.is_empty() {
            warn!("No active group subscriptions to sync");
            return Ok(0);
        }

        let mut queue: Vec<MediaTask> = Vec::new();
        let mut processed = 0usize;
        for group in &groups {
            let Some(group_id) = group.get("id").and_then(Value::as_i64) else {
                continue;
            };
            let members = self.client.get_members(group_id).await?;
            for member in &members {
                processed += self.sync_member(group, member, &mut queue).await?;
            }
        }

        let downloaded = self.process_media_queue(queue).await;
        info!(processed, downloaded, "Sync complete");
        Ok(processed)
    }

    /// Sync one member's timeline: fetch messages past the stored
    /// watermark, merge them into the member's archive, queue missing media.
    pub async fn sync_member(
        &mut self,
        group: &Value,
        member: &Value,
        media_queue: &mut Vec<MediaTask>,
    ) -> Result<usize, HakoError> {
        let (Some(group_id), Some(member_id)) = (
            group.get("id").and_then(Value::as_i64),
            member.get("id").and_then(Value::as_i64),
        ) else {
            return Ok(0);
        };
        let group_name = sanitize_name(group.get("name").and_then(Value::as_str).unwrap_or(""));
        let member_name = sanitize_name(member.get("name").and_then(Value::as_str).unwrap_or(""));

        let member_dir = self
            .output_dir
            .join(self.client.group.config().display_name)
            .join("messages")
            .join(format!("{} {}", group_id, group_name))
            .join(format!("{} {}", member_id, member_name));
        for kind in ["picture", "video", "voice"] {
            tokio::fs::create_dir_all(member_dir.join(kind)).await?;
        }

        let last_id = self.state.last_id(group_id, member_id);
        info!(member = %member_name, member_id, ?last_id, "Syncing member");

        let messages = self.client.get_messages(group_id, last_id, None).await?;
        let messages: Vec<&Value> = messages
            .iter()
            .filter(|m| m.get("member_id").and_then(Value::as_i64) == Some(member_id))
            .collect();
        if messages.is_empty() {
            return Ok(0);
        }
        info!(count = messages.len(), member = %member_name, "Fetched new messages");

        let processed = self.prepare_messages(&messages, &member_dir, media_queue);

        let archive_path = member_dir.join("messages.json");
        let existing = load_archived_messages(&archive_path).await;
        let merged = merge_messages(existing, processed.clone());

        let export = json!({
            "exported_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "member": {
                "id": member_id,
                "name": member_name,
                "group_id": group_id,
                "portrait": member.get("portrait").cloned().unwrap_or(Value::Null),
                "thumbnail": member.get("thumbnail").cloned().unwrap_or(Value::Null),
                "phone_image": member.get("phone_image").cloned().unwrap_or(Value::Null),
                "group_thumbnail": group.get("thumbnail").cloned().unwrap_or(Value::Null),
                "is_active": group.pointer("/subscription/state").and_then(Value::as_str)
                    == Some("active"),
            },
            "total_messages": merged.len(),
            "message_type_counts": type_counts(&merged),
            "messages": merged,
        });
        tokio::fs::write(&archive_path, serde_json::to_vec_pretty(&export)?).await?;

        let max_id = export["messages"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m.get("id").and_then(Value::as_i64))
            .max()
            .or(last_id)
            .unwrap_or(0);
        let total = export["total_messages"].as_u64().unwrap_or(0) as usize;
        self.state.update(group_id, member_id, max_id, total);

        Ok(processed.len())
    }

    /// Normalize raw messages and queue any media not yet on disk.
    fn prepare_messages(
        &self,
        messages: &[&Value],
        member_dir: &Path,
        queue: &mut Vec<MediaTask>,
    ) -> Vec<Value> {
        let mut processed = Vec::new();
        for message in messages {
            let Some(mut normalized) = normalize_message(message) else {
                warn!("Skipping message without a usable id");
                continue;
            };
            let id = normalized["id"].as_i64().unwrap_or_default();
            let kind = MessageKind::from_raw(message.get("type").and_then(Value::as_str));

            if let Some(url) = media_url(message) {
                let ext = media_extension(Some(url), kind);
                let subdir = match kind {
                    MessageKind::Text => "other",
                    other => other.as_str(),
                };
                let path = member_dir.join(subdir).join(format!("{}.{}", id, ext));
                if !path.exists() {
                    queue.push(MediaTask {
                        url: url.to_string(),
                        path: path.clone(),
                        message_id: id,
                    });
                }
                if let Ok(relative) = path.strip_prefix(&self.output_dir) {
                    normalized["media_file"] = Value::from(relative.to_string_lossy().as_ref());
                }
            }

            processed.push(normalized);
        }
        processed
    }

    /// Download everything in the queue, at most `concurrency` transfers at
    /// a time. Returns the number downloaded; individual failures are logged
    /// and skipped.
    pub async fn process_media_queue(&self, queue: Vec<MediaTask>) -> usize {
        if queue.is_empty() {
            return 0;
        }
        info!(total = queue.len(), concurrency = self.concurrency, "Downloading media");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let client = &self.client;
        let downloads = queue.into_iter().map(|task| {
            let semaphore = semaphore.clone();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return false;
                };
                let ok = client.download_file(&task.url, &task.path).await;
                if !ok {
                    error!(message_id = task.message_id, "Media download failed");
                }
                ok
            }
        });

        futures::future::join_all(downloads)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }
}

/// Directory names must be filesystem-safe; spaces are kept for readability.
fn sanitize_name(name: &str) -> String {
    name.replace('/', "_").trim().to_string()
}

async fn load_archived_messages(path: &Path) -> Vec<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|mut v| v.get_mut("messages").map(Value::take))
            .and_then(|v| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Upsert-merge by message id (new data wins), sorted by timestamp.
fn merge_messages(existing: Vec<Value>, new: Vec<Value>) -> Vec<Value> {
    let mut by_id: BTreeMap<i64, Value> = BTreeMap::new();
    for message in existing.into_iter().chain(new) {
        if let Some(id) = message.get("id").and_then(Value::as_i64) {
            by_id.insert(id, message);
        }
    }
    let mut merged: Vec<Value> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        let ts = |m: &Value| {
            m.get("timestamp")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        ts(a).cmp(&ts(b))
    });
    merged
}

/// Per-kind message counts for the export envelope.
fn type_counts(messages: &[Value]) -> Value {
    let mut counts = Map::new();
    for kind in ["text", "video", "picture", "voice"] {
        counts.insert(kind.to_string(), Value::from(0));
    }
    for message in messages {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_string();
        if let Some(Value::Number(n)) = counts.get(&kind) {
            let next = n.as_i64().unwrap_or(0) + 1;
            counts.insert(kind, Value::from(next));
        }
    }
    Value::Object(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_new_data() {
        let existing = vec![
            json!({"id": 1, "timestamp": "2024-01-01T00:00:00Z", "content": "old"}),
            json!({"id": 2, "timestamp": "2024-01-02T00:00:00Z", "content": "kept"}),
        ];
        let new = vec![json!({"id": 1, "timestamp": "2024-01-01T00:00:00Z", "content": "new"})];

        let merged = merge_messages(existing, new);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["content"], "new");
        assert_eq!(merged[1]["content"], "kept");
    }

    #[test]
    fn test_merge_sorts_by_timestamp() {
        let merged = merge_messages(
            vec![json!({"id": 5, "timestamp": "2024-03-01T00:00:00Z"})],
            vec![json!({"id": 9, "timestamp": "2024-01-01T00:00:00Z"})],
        );
        assert_eq!(merged[0]["id"], 9);
        assert_eq!(merged[1]["id"], 5);
    }

    #[test]
    fn test_type_counts() {
        let messages = vec![
            json!({"type": "text"}),
            json!({"type": "picture"}),
            json!({"type": "picture"}),
            json!({}),
        ];
        let counts = type_counts(&messages);
        assert_eq!(counts["text"], 2);
        assert_eq!(counts["picture"], 2);
        assert_eq!(counts["video"], 0);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(" A/B "), "A_B");
    }
}
