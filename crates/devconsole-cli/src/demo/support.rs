//! Customer-support chat agent. It answers in streamed chunks, records an
//! order lookup tool call, then suspends until the operator approves or
//! declines a refund.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use serde_json::{json, Value};
use uuid::Uuid;

use devconsole_core::domain::chat::{
    ContentChunk, ContentPartEnd, ContentPartEvent, ContentPartStart, MessageEnd, MessageEvent,
    MessageStart, ToolCallEnd, ToolCallEvent, ToolCallStart, TEXT_PLAIN,
};
use devconsole_core::{
    ExecuteOptions, RunTelemetry, Runtime, RuntimeError, RuntimeEvent, RuntimeResult,
    RuntimeSchema,
};

use super::{last_result, schema, SUPPORT};

const REFUND_QUESTION: &str = "Would you like me to issue a refund? (yes/no)";

pub struct SupportChatRuntime {
    telemetry: RunTelemetry,
}

impl SupportChatRuntime {
    pub fn new(telemetry: RunTelemetry) -> Self {
        Self { telemetry }
    }

    fn conversation_id(&self) -> &str {
        self.telemetry.run_id()
    }
}

/// Latest user text: `messages[-1]` parts, or a plain `message` field.
fn user_text(input: Option<&Value>) -> String {
    let Some(input) = input else {
        return String::new();
    };
    if let Some(last) = input
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.last())
    {
        return last
            .get("contentParts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("data").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
    }
    input
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn approved(resume: Option<&Value>) -> bool {
    match resume {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "y" | "yes" | "approve"),
        Some(Value::Object(map)) => map.get("approved").and_then(Value::as_bool).unwrap_or(false),
        _ => false,
    }
}

/// Events for one streamed assistant message.
struct Reply {
    conversation_id: String,
    message_id: String,
    events: Vec<RuntimeEvent>,
}

impl Reply {
    fn new(conversation_id: &str) -> Self {
        let mut reply = Self {
            conversation_id: conversation_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            events: Vec::new(),
        };
        let mut start = MessageEvent::new(&reply.message_id);
        start.start = Some(MessageStart {
            role: Some("assistant".into()),
            timestamp: Some(Utc::now()),
        });
        reply.push(start);
        reply
    }

    fn push(&mut self, event: MessageEvent) {
        self.events.push(RuntimeEvent::Message(
            event.into_conversation_event(&self.conversation_id),
        ));
    }

    fn text(mut self, text: &str) -> Self {
        let part_id = Uuid::new_v4().to_string();
        let words: Vec<&str> = text.split_inclusive(' ').collect();
        let last = words.len().saturating_sub(1);
        for (i, word) in words.into_iter().enumerate() {
            let mut event = MessageEvent::new(&self.message_id);
            event.content_part = Some(ContentPartEvent {
                content_part_id: part_id.clone(),
                start: (i == 0).then(|| ContentPartStart {
                    mime_type: TEXT_PLAIN.into(),
                }),
                chunk: Some(ContentChunk {
                    data: word.to_string(),
                }),
                end: (i == last).then(ContentPartEnd::default),
            });
            self.push(event);
        }
        self
    }

    fn tool_call(mut self, name: &str, result: Value) -> Self {
        let call_id = Uuid::new_v4().to_string();
        let mut start = MessageEvent::new(&self.message_id);
        start.tool_call = Some(ToolCallEvent {
            tool_call_id: call_id.clone(),
            start: Some(ToolCallStart {
                tool_name: name.into(),
                timestamp: Some(Utc::now()),
            }),
            end: None,
        });
        self.push(start);

        let mut end = MessageEvent::new(&self.message_id);
        end.tool_call = Some(ToolCallEvent {
            tool_call_id: call_id,
            start: None,
            end: Some(ToolCallEnd {
                timestamp: Some(Utc::now()),
                result: Some(result),
                ..ToolCallEnd::default()
            }),
        });
        self.push(end);
        self
    }

    fn finish(mut self) -> Vec<RuntimeEvent> {
        let mut end = MessageEvent::new(&self.message_id);
        end.end = Some(MessageEnd {});
        self.push(end);
        self.events
    }
}

#[async_trait]
impl Runtime for SupportChatRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema(
            SUPPORT,
            "agent",
            json!({"messages": {"type": "array"}, "message": {"type": "string"}}),
            json!({"resolution": {"type": "string"}}),
        ))
    }

    async fn execute(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        last_result(self.stream(input, options)).await
    }

    fn stream<'a>(
        &'a self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> BoxStream<'a, Result<RuntimeEvent, RuntimeError>> {
        let (mut events, result) = if options.resume {
            let refund = approved(input.as_ref());
            self.telemetry
                .info(format!("Refund decision received: {refund}"));
            let (text, resolution) = if refund {
                ("Done. Your refund is on its way.", "refunded")
            } else {
                ("Understood, no refund. Anything else I can help with?", "closed")
            };
            (
                Reply::new(self.conversation_id()).text(text).finish(),
                RuntimeResult::successful(json!({"resolution": resolution})),
            )
        } else {
            let question = user_text(input.as_ref());
            let span = self.telemetry.span("lookup_order");
            self.telemetry
                .info(format!("Support request: {}", question.trim()));
            let events = Reply::new(self.conversation_id())
                .text("Let me look up your order. ")
                .tool_call("lookup_order", json!({"status": "delivered", "damaged": true}))
                .text(&format!("Your order was delivered damaged. {REFUND_QUESTION}"))
                .finish();
            span.finish();
            (
                events,
                RuntimeResult::suspended(Some(json!({"question": REFUND_QUESTION}))),
            )
        };
        events.push(RuntimeEvent::Result(result));
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }
}
