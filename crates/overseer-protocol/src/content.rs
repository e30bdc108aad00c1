//! Text extraction from message content.
//!
//! Content is either a bare string or an ordered list of typed blocks.
//! Only blocks whose `type` is `"text"` contribute; their `text` fields are
//! concatenated in order with no separator. Tool call/result blocks are
//! skipped.

use serde_json::Value;

/// Extract the text of a content value.
///
/// Returns `None` when there is no text block at all, which is distinct
/// from `Some("")` (a text block whose text is empty).
pub fn extract_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let mut found = false;
            let mut out = String::new();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) != Some("text") {
                    continue;
                }
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    found = true;
                    out.push_str(text);
                }
            }
            found.then_some(out)
        }
        _ => None,
    }
}

/// Extract the text of a chat message.
///
/// Accepts either a message object (its `content` field is used) or a bare
/// content value.
pub fn extract_message_text(message: &Value) -> Option<String> {
    match message {
        Value::Object(map) => map.get("content").and_then(extract_text),
        other => extract_text(other),
    }
}
