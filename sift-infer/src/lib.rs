use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;

pub mod http_vllm;
pub use http_vllm::HttpVllmEngine;

pub mod scripted;
pub use scripted::ScriptedLlmEngine;

pub mod oracle;
pub use oracle::{
    consult_or_default, parse_oracle_json, Consulted, HypothesisPrompt, HypothesisRequest,
    InterpretationPrompt, InterpretationRequest, LlmOracle, Oracle, OracleError, OraclePrompt,
    MAX_HYPOTHESES,
};

/// Single completion request handed to an engine.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: usize,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
}

#[derive(Clone, Debug)]
pub struct LlmToken {
    pub token_id: u32,
    pub text: String,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<LlmToken, LlmError>> + Send>>;

#[derive(Debug, Error)]
#[error("llm error: {message}")]
pub struct LlmError {
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait LlmEngine: Send + Sync {
    async fn generate(&self, req: LlmRequest) -> Result<TokenStream, LlmError>;
}

/// Drain a token stream into the full completion text.
pub async fn collect_text(mut stream: TokenStream) -> Result<String, LlmError> {
    let mut text = String::new();
    while let Some(token) = stream.next().await {
        text.push_str(&token?.text);
    }
    Ok(text)
}

/// Dummy implementation that yields no tokens.
pub struct NullLlmEngine;

#[async_trait]
impl LlmEngine for NullLlmEngine {
    async fn generate(&self, _req: LlmRequest) -> Result<TokenStream, LlmError> {
        use futures_util::stream;

        Ok(Box::pin(stream::empty()))
    }
}
