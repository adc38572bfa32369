//! Conversation wire events and the aggregator that folds them into
//! complete messages.
//!
//! A runtime streaming in chat mode emits [`ConversationEvent`]s, each
//! carrying at most one message-level event. [`ChatEvents`] keeps one
//! [`ConversationMessage`] per `message_id` and mutates it in place as
//! content chunks and tool-call events arrive.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Mime type assumed for content parts whose start event was never seen.
pub const TEXT_PLAIN: &str = "text/plain";

/// Role assumed for messages whose start event carries none.
pub const DEFAULT_ROLE: &str = "assistant";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeEvent {
    pub exchange_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<MessageStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<MessageEnd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_part: Option<ContentPartEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallEvent>,
}

impl MessageEvent {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            start: None,
            end: None,
            content_part: None,
            tool_call: None,
        }
    }

    /// Wrap into a conversation event with a fresh exchange ID.
    pub fn into_conversation_event(self, conversation_id: impl Into<String>) -> ConversationEvent {
        ConversationEvent {
            conversation_id: conversation_id.into(),
            exchange: Some(ExchangeEvent {
                exchange_id: Uuid::new_v4().to_string(),
                message: Some(self),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEnd {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPartEvent {
    pub content_part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ContentPartStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ContentChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<ContentPartEnd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPartStart {
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPartEnd {
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ToolCallStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<ToolCallEnd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStart {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEnd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub cancelled: bool,
}

/// Aggregated content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    pub content_part_id: String,
    pub mime_type: String,
    pub data: String,
    pub is_incomplete: bool,
}

/// Outcome of a finished tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub timestamp: Option<DateTime<Utc>>,
    pub value: Option<Value>,
    pub is_error: bool,
    pub cancelled: bool,
}

/// Aggregated tool call. `name` is empty until a start event is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub result: Option<ToolCallResult>,
}

/// A conversation message assembled from its events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub message_id: String,
    pub role: String,
    pub content_parts: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationMessage {
    /// Concatenated data of every `text/*` content part.
    pub fn text(&self) -> String {
        self.content_parts
            .iter()
            .filter(|p| p.mime_type.starts_with("text/"))
            .map(|p| p.data.as_str())
            .collect()
    }
}

/// Incrementally builds messages from conversation events.
#[derive(Debug, Clone, Default)]
pub struct ChatEvents {
    messages: HashMap<String, ConversationMessage>,
}

impl ChatEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: &str) -> Option<&ConversationMessage> {
        self.messages.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Apply one event and return the updated message snapshot, or `None`
    /// when the event carries no message-level payload.
    pub fn add(&mut self, event: &ConversationEvent) -> Option<ConversationMessage> {
        let ev = event.exchange.as_ref()?.message.as_ref()?;
        let timestamp = event_timestamp(ev);

        let msg = self
            .messages
            .entry(ev.message_id.clone())
            .or_insert_with(|| ConversationMessage {
                message_id: ev.message_id.clone(),
                role: event_role(ev),
                content_parts: Vec::new(),
                tool_calls: Vec::new(),
                created_at: timestamp,
                updated_at: timestamp,
            });

        if let Some(cp) = &ev.content_part {
            apply_content_part(msg, cp);
        }
        if let Some(tc) = &ev.tool_call {
            apply_tool_call(msg, tc);
        }

        msg.updated_at = timestamp;
        Some(msg.clone())
    }
}

fn apply_content_part(msg: &mut ConversationMessage, cp: &ContentPartEvent) {
    let mut idx = msg
        .content_parts
        .iter()
        .position(|p| p.content_part_id == cp.content_part_id);

    if let (Some(start), None) = (&cp.start, idx) {
        msg.content_parts.push(ContentPart {
            content_part_id: cp.content_part_id.clone(),
            mime_type: start.mime_type.clone(),
            data: String::new(),
            is_incomplete: true,
        });
        idx = Some(msg.content_parts.len() - 1);
    }

    if let Some(chunk) = &cp.chunk {
        let i = match idx {
            Some(i) => i,
            None => {
                msg.content_parts.push(ContentPart {
                    content_part_id: cp.content_part_id.clone(),
                    mime_type: TEXT_PLAIN.to_string(),
                    data: String::new(),
                    is_incomplete: true,
                });
                msg.content_parts.len() - 1
            }
        };
        msg.content_parts[i].data.push_str(&chunk.data);
        idx = Some(i);
    }

    if let (Some(end), Some(i)) = (&cp.end, idx) {
        msg.content_parts[i].is_incomplete = end.interrupted;
    }
}

fn apply_tool_call(msg: &mut ConversationMessage, tc: &ToolCallEvent) {
    let mut idx = msg
        .tool_calls
        .iter()
        .position(|c| c.tool_call_id == tc.tool_call_id);

    if let Some(start) = &tc.start {
        match idx {
            Some(i) => {
                let call = &mut msg.tool_calls[i];
                if !start.tool_name.is_empty() {
                    call.name = start.tool_name.clone();
                }
                if start.timestamp.is_some() {
                    call.timestamp = start.timestamp;
                }
            }
            None => {
                msg.tool_calls.push(ToolCall {
                    tool_call_id: tc.tool_call_id.clone(),
                    name: start.tool_name.clone(),
                    timestamp: start.timestamp,
                    result: None,
                });
                idx = Some(msg.tool_calls.len() - 1);
            }
        }
    }

    if let Some(end) = &tc.end {
        let i = match idx {
            Some(i) => i,
            None => {
                msg.tool_calls.push(ToolCall {
                    tool_call_id: tc.tool_call_id.clone(),
                    name: String::new(),
                    timestamp: None,
                    result: None,
                });
                msg.tool_calls.len() - 1
            }
        };
        msg.tool_calls[i].result = Some(ToolCallResult {
            timestamp: end.timestamp,
            value: end.result.clone(),
            is_error: end.is_error,
            cancelled: end.cancelled,
        });
    }
}

fn event_timestamp(ev: &MessageEvent) -> DateTime<Utc> {
    ev.start
        .as_ref()
        .and_then(|s| s.timestamp)
        .unwrap_or_else(Utc::now)
}

fn event_role(ev: &MessageEvent) -> String {
    ev.start
        .as_ref()
        .and_then(|s| s.role.clone())
        .unwrap_or_else(|| DEFAULT_ROLE.to_string())
}

/// Build a complete user message from text input.
pub fn user_message(text: &str) -> ConversationMessage {
    let now = Utc::now();
    ConversationMessage {
        message_id: Uuid::new_v4().to_string(),
        role: "user".to_string(),
        content_parts: vec![ContentPart {
            content_part_id: Uuid::new_v4().to_string(),
            mime_type: TEXT_PLAIN.to_string(),
            data: text.to_string(),
            is_incomplete: false,
        }],
        tool_calls: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Build the single conversation event that carries a whole user message:
/// message start, one text part (start, chunk, end) and message end.
pub fn user_message_event(text: &str, conversation_id: &str) -> ConversationEvent {
    MessageEvent {
        message_id: Uuid::new_v4().to_string(),
        start: Some(MessageStart {
            role: Some("user".to_string()),
            timestamp: Some(Utc::now()),
        }),
        end: Some(MessageEnd {}),
        content_part: Some(ContentPartEvent {
            content_part_id: Uuid::new_v4().to_string(),
            start: Some(ContentPartStart {
                mime_type: TEXT_PLAIN.to_string(),
            }),
            chunk: Some(ContentChunk {
                data: text.to_string(),
            }),
            end: Some(ContentPartEnd::default()),
        }),
        tool_call: None,
    }
    .into_conversation_event(conversation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn part_event(message_id: &str, part: ContentPartEvent) -> ConversationEvent {
        MessageEvent {
            content_part: Some(part),
            ..MessageEvent::new(message_id)
        }
        .into_conversation_event("c1")
    }

    fn chunk(part_id: &str, data: &str) -> ContentPartEvent {
        ContentPartEvent {
            content_part_id: part_id.into(),
            start: None,
            chunk: Some(ContentChunk { data: data.into() }),
            end: None,
        }
    }

    #[test]
    fn event_without_message_is_ignored() {
        let mut chat = ChatEvents::new();
        let event = ConversationEvent {
            conversation_id: "c1".into(),
            exchange: None,
        };
        assert!(chat.add(&event).is_none());
        assert!(chat.is_empty());
    }

    #[test]
    fn chunks_accumulate_and_backfill_text_plain() {
        let mut chat = ChatEvents::new();
        chat.add(&part_event("m1", chunk("p1", "Hel")));
        let msg = chat.add(&part_event("m1", chunk("p1", "lo"))).unwrap();

        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.content_parts.len(), 1);
        assert_eq!(msg.content_parts[0].mime_type, TEXT_PLAIN);
        assert_eq!(msg.content_parts[0].data, "Hello");
        assert!(msg.content_parts[0].is_incomplete);
    }

    #[test]
    fn part_end_marks_incomplete_only_when_interrupted() {
        let mut chat = ChatEvents::new();
        let start = ContentPartEvent {
            content_part_id: "p1".into(),
            start: Some(ContentPartStart {
                mime_type: "application/json".into(),
            }),
            chunk: Some(ContentChunk { data: "{}".into() }),
            end: None,
        };
        chat.add(&part_event("m1", start));

        let end = ContentPartEvent {
            content_part_id: "p1".into(),
            start: None,
            chunk: None,
            end: Some(ContentPartEnd { interrupted: false }),
        };
        let msg = chat.add(&part_event("m1", end)).unwrap();
        assert_eq!(msg.content_parts[0].mime_type, "application/json");
        assert!(!msg.content_parts[0].is_incomplete);

        let interrupted = ContentPartEvent {
            content_part_id: "p1".into(),
            start: None,
            chunk: None,
            end: Some(ContentPartEnd { interrupted: true }),
        };
        let msg = chat.add(&part_event("m1", interrupted)).unwrap();
        assert!(msg.content_parts[0].is_incomplete);
    }

    #[test]
    fn tool_call_end_without_start_backfills_unnamed_call() {
        let mut chat = ChatEvents::new();
        let event = MessageEvent {
            tool_call: Some(ToolCallEvent {
                tool_call_id: "t1".into(),
                start: None,
                end: Some(ToolCallEnd {
                    result: Some(json!({"ok": true})),
                    ..ToolCallEnd::default()
                }),
            }),
            ..MessageEvent::new("m1")
        }
        .into_conversation_event("c1");

        let msg = chat.add(&event).unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "");
        assert_eq!(
            msg.tool_calls[0].result.as_ref().unwrap().value,
            Some(json!({"ok": true}))
        );
    }

    #[test]
    fn tool_call_start_then_end_keeps_name() {
        let mut chat = ChatEvents::new();
        let start = MessageEvent {
            tool_call: Some(ToolCallEvent {
                tool_call_id: "t1".into(),
                start: Some(ToolCallStart {
                    tool_name: "lookup_order".into(),
                    timestamp: None,
                }),
                end: None,
            }),
            ..MessageEvent::new("m1")
        };
        let end = MessageEvent {
            tool_call: Some(ToolCallEvent {
                tool_call_id: "t1".into(),
                start: None,
                end: Some(ToolCallEnd {
                    is_error: true,
                    ..ToolCallEnd::default()
                }),
            }),
            ..MessageEvent::new("m1")
        };
        chat.add(&start.into_conversation_event("c1"));
        let msg = chat.add(&end.into_conversation_event("c1")).unwrap();

        assert_eq!(msg.tool_calls[0].name, "lookup_order");
        assert!(msg.tool_calls[0].result.as_ref().unwrap().is_error);
    }

    #[test]
    fn user_message_event_aggregates_to_user_text() {
        let mut chat = ChatEvents::new();
        let msg = chat.add(&user_message_event("hi there", "c9")).unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.text(), "hi there");
        assert!(!msg.content_parts[0].is_incomplete);

        let direct = user_message("hi there");
        assert_eq!(direct.text(), "hi there");
        assert_eq!(direct.role, "user");
    }
}
