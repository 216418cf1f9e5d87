use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Mutex;

use crate::{LlmEngine, LlmError, LlmRequest, LlmToken, TokenStream};

/// Engine that replays canned completions in order, for tests and offline demos.
///
/// Once the script runs out every call fails, which is how tests exercise the
/// oracle failure paths.
#[derive(Default)]
pub struct ScriptedLlmEngine {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().await.push_back(Ok(reply.into()));
    }

    pub async fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().await.push_back(Err(message.into()));
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmEngine for ScriptedLlmEngine {
    async fn generate(&self, req: LlmRequest) -> Result<TokenStream, LlmError> {
        self.prompts.lock().await.push(req.prompt);
        let next = self.replies.lock().await.pop_front();
        match next {
            Some(Ok(text)) => Ok(Box::pin(stream::iter(vec![Ok(LlmToken { token_id: 0, text })]))),
            Some(Err(message)) => Err(LlmError::new(message)),
            None => Err(LlmError::new("script exhausted")),
        }
    }
}
