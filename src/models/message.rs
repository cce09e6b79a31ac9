//! Message normalization helpers.
//!
//! Upstream messages arrive as loosely-shaped JSON objects; the wire format
//! is treated as an opaque contract, so the export shape is derived from the
//! raw object rather than a fully typed mirror of it.

use serde_json::{json, Value};

/// Canonical message categories used for export and media subdirectories.
/// The upstream API uses several aliases (`image`/`picture`, `movie`/`video`)
/// which are folded together here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Picture,
    Video,
    Voice,
}

impl MessageKind {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("image") | Some("picture") => MessageKind::Picture,
            Some("video") | Some("movie") => MessageKind::Video,
            Some("voice") => MessageKind::Voice,
            _ => MessageKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Picture => "picture",
            MessageKind::Video => "video",
            MessageKind::Voice => "voice",
        }
    }

    /// Default media extension when none can be derived from the URL.
    fn default_extension(&self) -> &'static str {
        match self {
            MessageKind::Picture => "jpg",
            MessageKind::Video => "mp4",
            MessageKind::Voice => "m4a",
            MessageKind::Text => "bin",
        }
    }
}

const KNOWN_EXTENSIONS: [&str; 11] = [
    "jpg", "jpeg", "png", "gif", "webp", "m4a", "mp3", "wav", "mp4", "mov", "webm",
];

/// Determine the media file extension from the URL path, falling back to the
/// per-kind default.
pub fn media_extension(url: Option<&str>, kind: MessageKind) -> &'static str {
    if let Some(url) = url {
        // Strip query/fragment before looking at the path suffix.
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if let Some(idx) = path.rfind('.') {
            let ext = path[idx + 1..].to_ascii_lowercase();
            if let Some(known) = KNOWN_EXTENSIONS.iter().find(|k| **k == ext) {
                return known;
            }
        }
    }
    kind.default_extension()
}

/// Normalize a raw API message into the standard export shape: id, timestamp,
/// kind, favorite flag, and text content. Returns `None` when the object has
/// no usable `id`.
pub fn normalize_message(msg: &Value) -> Option<Value> {
    let id = msg.get("id").and_then(Value::as_i64)?;
    let kind = MessageKind::from_raw(msg.get("type").and_then(Value::as_str));

    Some(json!({
        "id": id,
        "timestamp": msg.get("published_at").cloned().unwrap_or(Value::Null),
        "type": kind.as_str(),
        "is_favorite": msg.get("is_favorite").and_then(Value::as_bool).unwrap_or(false),
        "content": msg.get("text").cloned().unwrap_or(Value::Null),
    }))
}

/// The media URL of a message: the full file when present, the thumbnail
/// otherwise.
pub fn media_url(msg: &Value) -> Option<&str> {
    msg.get("file")
        .and_then(Value::as_str)
        .or_else(|| msg.get("thumbnail").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases_fold_together() {
        assert_eq!(MessageKind::from_raw(Some("image")), MessageKind::Picture);
        assert_eq!(MessageKind::from_raw(Some("picture")), MessageKind::Picture);
        assert_eq!(MessageKind::from_raw(Some("movie")), MessageKind::Video);
        assert_eq!(MessageKind::from_raw(Some("voice")), MessageKind::Voice);
        assert_eq!(MessageKind::from_raw(None), MessageKind::Text);
        assert_eq!(MessageKind::from_raw(Some("sticker")), MessageKind::Text);
    }

    #[test]
    fn test_extension_from_url_or_default() {
        assert_eq!(
            media_extension(Some("https://cdn.example/a/b.PNG?sig=x"), MessageKind::Picture),
            "png"
        );
        assert_eq!(
            media_extension(Some("https://cdn.example/a/clip"), MessageKind::Video),
            "mp4"
        );
        assert_eq!(media_extension(None, MessageKind::Voice), "m4a");
        // Unknown extensions fall back to the kind default.
        assert_eq!(
            media_extension(Some("https://cdn.example/x.exe"), MessageKind::Picture),
            "jpg"
        );
    }

    #[test]
    fn test_normalize_message_shape() {
        let raw = json!({
            "id": 42,
            "type": "movie",
            "published_at": "2024-05-01T10:00:00Z",
            "text": "hi",
            "file": "https://cdn.example/42.mp4",
            "internal_field": true,
        });
        let normalized = normalize_message(&raw).unwrap();
        assert_eq!(normalized["id"], 42);
        assert_eq!(normalized["type"], "video");
        assert_eq!(normalized["timestamp"], "2024-05-01T10:00:00Z");
        assert_eq!(normalized["content"], "hi");
        assert_eq!(normalized["is_favorite"], false);
        assert!(normalized.get("internal_field").is_none());
    }

    #[test]
    fn test_normalize_message_requires_id() {
        assert!(normalize_message(&json!({"type": "text"})).is_none());
    }

    #[test]
    fn test_media_url_prefers_file() {
        let msg = json!({"file": "f.jpg", "thumbnail": "t.jpg"});
        assert_eq!(media_url(&msg), Some("f.jpg"));
        let msg = json!({"thumbnail": "t.jpg"});
        assert_eq!(media_url(&msg), Some("t.jpg"));
        assert_eq!(media_url(&json!({})), None);
    }
}
