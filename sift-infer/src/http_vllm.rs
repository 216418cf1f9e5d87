use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{LlmEngine, LlmError, LlmRequest, LlmToken, TokenStream};

/// Request body of an OpenAI-compatible chat completion.
#[derive(Debug, Serialize)]
struct CompletionBody {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming engine for any OpenAI-compatible `/chat/completions` endpoint (vLLM, Ollama, ...).
pub struct HttpVllmEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    deterministic: bool,
    seed: Option<u64>,
    api_key: Option<String>,
}

impl HttpVllmEngine {
    pub fn new(base_url: String, model: String, deterministic: bool, seed: Option<u64>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            deterministic,
            seed,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn completion_body(&self, req: LlmRequest) -> CompletionBody {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = req.system {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: req.prompt,
        });

        CompletionBody {
            model: self.model.clone(),
            messages,
            max_tokens: u32::try_from(req.max_tokens).unwrap_or(u32::MAX),
            stream: true,
            seed: self.seed.filter(|_| self.deterministic),
            temperature: self.deterministic.then_some(0.0),
            response_format: req.json_mode.then(|| json!({ "type": "json_object" })),
        }
    }
}

/// Content deltas carried by one complete SSE line.
fn parse_sse_line(line: &str) -> Vec<String> {
    let Some(payload) = line.trim().strip_prefix("data:").map(str::trim) else {
        return Vec::new();
    };
    if payload.is_empty() || payload == "[DONE]" {
        return Vec::new();
    }
    serde_json::from_str::<StreamChunk>(payload)
        .map(|chunk| {
            chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Reassembles SSE lines from body chunks that may split a line, or a UTF-8
/// sequence, at any byte.
#[derive(Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Deltas from every line completed by `bytes`. The unterminated tail is kept.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let Some(end) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=end).collect();
        String::from_utf8_lossy(&complete)
            .lines()
            .flat_map(parse_sse_line)
            .collect()
    }

    /// Deltas from a final line the server did not terminate.
    fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

#[async_trait]
impl LlmEngine for HttpVllmEngine {
    async fn generate(&self, req: LlmRequest) -> Result<TokenStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.completion_body(req);

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| LlmError::new(format!("completion request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::new(format!("completion endpoint returned {status}")));
        }
        debug!(url = %url, model = %self.model, "completion stream opened");

        let mut decoder = SseDecoder::default();
        let mut next_id: u32 = 0;
        let tokens = resp
            .bytes_stream()
            .map(Some)
            .chain(stream::once(async { None }))
            .flat_map(move |chunk| {
                let deltas = match chunk {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(e)) => {
                        let err = LlmError::new(format!("completion stream broke: {e}"));
                        return stream::iter(vec![Err(err)]);
                    }
                    None => decoder.finish(),
                };
                let items: Vec<Result<LlmToken, LlmError>> = deltas
                    .into_iter()
                    .map(|text| {
                        next_id += 1;
                        Ok(LlmToken {
                            token_id: next_id,
                            text,
                        })
                    })
                    .collect();
                stream::iter(items)
            });

        Ok(Box::pin(tokens) as TokenStream)
    }
}
