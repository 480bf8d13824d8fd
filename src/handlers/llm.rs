//! # Summary and Talk Endpoints
//!
//! Request/response WebSocket glue over the chat-completion collaborator.
//! Neither endpoint touches the streaming pipeline; each incoming frame
//! becomes one collaborator call and one reply frame.
//!
//! ## Protocols:
//! - `/ws/summary`: text frame holding a transcript → JSON text frame with
//!   the structured summary
//! - `/ws/talk`: JSON text frame `{"transcription": ..., "query": ...}` →
//!   text frame with the assistant's reply
//!
//! Collaborator failures come back as the plain error string the client
//! sees in place of a reply — the accepted contract for these surfaces.

use crate::llm::{ChatClient, ChatMessage};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are an assistant that writes structured notes from conversation transcripts.";

const SUMMARY_INSTRUCTION: &str = "Summarize the conversation in one sentence, list the key \
     points as comma separated values, and list any action items that were mentioned.";

const TALK_SYSTEM_PROMPT: &str =
    "You are an assistant answering questions about the user's transcribed notes.";

/// Structured-output schema sent with every summary request.
fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "key_points": { "type": "string" },
            "action_items": { "type": "string" }
        },
        "required": ["summary", "key_points", "action_items"]
    })
}

/// Reply frame produced by a finished collaborator call.
#[derive(Message)]
#[rtype(result = "()")]
struct ReplyText(String);

/// Actor for one `/ws/summary` connection.
pub struct SummarySocket {
    client: Arc<ChatClient>,
}

impl Actor for SummarySocket {
    type Context = ws::WebsocketContext<Self>;
}

impl Handler<ReplyText> for SummarySocket {
    type Result = ();

    fn handle(&mut self, msg: ReplyText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SummarySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let client = self.client.clone();
                let addr = ctx.address();
                let transcript = text.to_string();

                tokio::spawn(async move {
                    let messages = [
                        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                        ChatMessage::user(transcript),
                        ChatMessage::user(SUMMARY_INSTRUCTION),
                    ];
                    let reply = match client.chat(&messages, Some(&summary_schema())).await {
                        Ok(content) => content,
                        Err(err) => err.to_string(),
                    };
                    addr.do_send(ReplyText(reply));
                });
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "summary websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Incoming payload on `/ws/talk`.
#[derive(Debug, Deserialize)]
struct TalkQuery {
    transcription: Option<String>,
    query: Option<String>,
}

/// Actor for one `/ws/talk` connection.
pub struct TalkSocket {
    client: Arc<ChatClient>,
}

impl Actor for TalkSocket {
    type Context = ws::WebsocketContext<Self>;
}

impl Handler<ReplyText> for TalkSocket {
    type Result = ();

    fn handle(&mut self, msg: ReplyText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TalkSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let parsed: TalkQuery = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        ctx.text(format!("Exception: invalid request: {}", err));
                        return;
                    }
                };

                let client = self.client.clone();
                let addr = ctx.address();

                tokio::spawn(async move {
                    let messages = [
                        ChatMessage::system(TALK_SYSTEM_PROMPT),
                        ChatMessage::user(parsed.transcription.unwrap_or_default()),
                        ChatMessage::user(parsed.query.unwrap_or_default()),
                    ];
                    let reply = match client.chat(&messages, None).await {
                        Ok(content) => content,
                        Err(err) => err.to_string(),
                    };
                    addr.do_send(ReplyText(reply));
                });
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "talk websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// HTTP → WebSocket upgrade for `/ws/summary`.
pub async fn summary_ws(
    req: HttpRequest,
    stream: web::Payload,
    client: web::Data<ChatClient>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "new summary connection");
    ws::start(
        SummarySocket {
            client: client.into_inner(),
        },
        &req,
        stream,
    )
}

/// HTTP → WebSocket upgrade for `/ws/talk`.
pub async fn talk_ws(
    req: HttpRequest,
    stream: web::Payload,
    client: web::Data<ChatClient>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "new talk connection");
    ws::start(
        TalkSocket {
            client: client.into_inner(),
        },
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_schema_shape() {
        let schema = summary_schema();
        assert_eq!(schema["type"], "object");
        for field in ["summary", "key_points", "action_items"] {
            assert_eq!(schema["properties"][field]["type"], "string");
        }
        assert_eq!(schema["required"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_talk_query_parsing() {
        let parsed: TalkQuery =
            serde_json::from_str(r#"{"transcription": "we met", "query": "when?"}"#).unwrap();
        assert_eq!(parsed.transcription.as_deref(), Some("we met"));
        assert_eq!(parsed.query.as_deref(), Some("when?"));
    }

    #[test]
    fn test_talk_query_fields_are_optional() {
        let parsed: TalkQuery = serde_json::from_str(r#"{"query": "hello"}"#).unwrap();
        assert!(parsed.transcription.is_none());
        assert_eq!(parsed.query.as_deref(), Some("hello"));
    }
}
