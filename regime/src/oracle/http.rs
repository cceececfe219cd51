//! OpenAI-compatible chat-completions oracle

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    CompletionRequest, Message, OracleError, OracleReply, OracleResult, ReasoningOracle, Role,
    TextStream, ToolCall,
};

/// Endpoint configuration for [`HttpOracle`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL up to and including `/v1`
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("REGIME_ORACLE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("REGIME_ORACLE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            api_key: std::env::var("REGIME_ORACLE_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            timeout_secs: 120,
            temperature: 0.3,
        }
    }
}

/// Oracle backed by any server speaking the chat-completions protocol
pub struct HttpOracle {
    config: OracleConfig,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> OracleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }
        if request.strict_json {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    async fn post(&self, body: &Value) -> OracleResult<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Request(format!(
                "Oracle API error ({}): {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ReasoningOracle for HttpOracle {
    async fn complete(&self, request: CompletionRequest) -> OracleResult<OracleReply> {
        let body = self.request_body(&request, false);
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Oracle completion"
        );

        let resp_json: Value = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        parse_completion(&resp_json)
    }

    async fn complete_streaming(&self, request: CompletionRequest) -> OracleResult<TextStream> {
        let body = self.request_body(&request, true);
        debug!(model = %self.config.model, "Oracle streaming completion");

        let chunks = self
            .post(&body)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(sse_fragments(chunks))
    }
}

/// Decode a server-sent-events body into content fragments.
///
/// Chunks are raw bytes; only complete lines are decoded, so a character
/// split across chunks arrives intact.
fn sse_fragments(chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> TextStream {
    futures::stream::unfold(
        SseState {
            chunks,
            buffer: Vec::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.next_event() {
                    match event {
                        SseEvent::Done => return None,
                        SseEvent::Fragment(text) => return Some((Ok(text), state)),
                        SseEvent::Skip => continue,
                    }
                }
                if state.done {
                    return None;
                }
                match state.chunks.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(OracleError::Stream(e.to_string())), state));
                    }
                    None => {
                        // Flush a final line that lacked its newline
                        state.done = true;
                        state.buffer.push(b'\n');
                    }
                }
            }
        },
    )
    .boxed()
}

/// Incremental server-sent-events decoder state
struct SseState {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    done: bool,
}

enum SseEvent {
    Fragment(String),
    Skip,
    Done,
}

impl SseState {
    /// Pop one complete `data:` line from the buffer
    fn next_event(&mut self) -> Option<SseEvent> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();

        let Some(data) = line.strip_prefix("data:") else {
            return Some(SseEvent::Skip);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<Value>(data) {
            Ok(chunk) => match chunk["choices"][0]["delta"]["content"].as_str() {
                Some(text) if !text.is_empty() => Some(SseEvent::Fragment(text.to_string())),
                _ => Some(SseEvent::Skip),
            },
            Err(e) => {
                warn!(error = %e, "Skipping malformed stream chunk");
                Some(SseEvent::Skip)
            }
        }
    }
}

fn wire_message(message: &Message) -> Value {
    let mut value = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if message.role == Role::Tool {
        if let Some(id) = &message.tool_call_id {
            value["tool_call_id"] = json!(id);
        }
    }
    if !message.tool_calls.is_empty() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    value
}

fn parse_completion(resp_json: &Value) -> OracleResult<OracleReply> {
    let message = &resp_json["choices"][0]["message"];
    if message.is_null() {
        return Err(OracleError::Parse(format!(
            "missing choices[0].message in {}",
            resp_json
        )));
    }

    let content = message["content"].as_str().unwrap_or("").to_string();
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = &call["function"];
                    let name = function["name"].as_str()?.to_string();
                    // Arguments arrive as a JSON-encoded string
                    let arguments = match &function["arguments"] {
                        Value::String(raw) => {
                            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                        }
                        other => other.clone(),
                    };
                    Some(ToolCall {
                        id: call["id"].as_str().unwrap_or_default().to_string(),
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(OracleReply {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let resp = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"article\": 12}"}
                    }]
                }
            }]
        });
        let reply = parse_completion(&resp).unwrap();
        assert_eq!(reply.content, "");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "lookup");
        assert_eq!(reply.tool_calls[0].arguments["article"], 12);
    }

    #[test]
    fn test_parse_completion_missing_message() {
        let err = parse_completion(&json!({"error": "overloaded"})).unwrap_err();
        assert!(matches!(err, OracleError::Parse(_)));
    }

    #[test]
    fn test_request_body_includes_tools_and_format() {
        let oracle = HttpOracle::new(OracleConfig {
            base_url: "http://oracle.local/v1/".into(),
            model: "test-model".into(),
            api_key: None,
            timeout_secs: 5,
            temperature: 0.0,
        })
        .unwrap();
        let request = CompletionRequest::json(vec![Message::user("hi")]).with_tools(vec![
            super::super::ToolSpec {
                name: "lookup".into(),
                description: "Look up an article".into(),
                parameters: json!({"type": "object"}),
            },
        ]);

        let body = oracle.request_body(&request, false);
        assert_eq!(oracle.endpoint(), "http://oracle.local/v1/chat/completions");
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    fn byte_chunks(parts: Vec<&[u8]>) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, reqwest::Error>(p.to_vec()))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_sse_fragments_split_across_chunks() {
        let chunks = byte_chunks(vec![
            &b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hel"[..],
            &b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n"[..],
            &b"data: [DONE]\n"[..],
            &b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n"[..],
        ]);

        let fragments: Vec<String> = sse_fragments(chunks)
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn test_sse_multibyte_character_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        // Cut between the two bytes of 'é'
        let cut = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks = byte_chunks(vec![&line[..cut], &line[cut..]]);

        let fragments: Vec<String> = sse_fragments(chunks)
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["café"]);
    }

    #[test]
    fn test_wire_message_encodes_tool_call_arguments_as_string() {
        let msg = Message::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "lookup".into(),
                arguments: json!({"q": "x"}),
            }],
        );
        let wire = wire_message(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"q\":\"x\"}");
    }
}
