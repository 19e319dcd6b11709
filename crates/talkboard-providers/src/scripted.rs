//! In-memory provider with canned answers per model, for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{ChunkStream, CompletionChunk, CompletionRequest, Credentials, LlmProvider};

#[derive(Debug, Clone)]
enum Script {
    Reply(String),
    Fail(String),
}

/// Answers every request for a model with the same scripted text (streamed in
/// small chunks) or the same error. Unknown models fail.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: HashMap<String, Script>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, model: &str, text: &str) -> Self {
        self.scripts
            .insert(model.to_string(), Script::Reply(text.to_string()));
        self
    }

    pub fn fail(mut self, model: &str, message: &str) -> Self {
        self.scripts
            .insert(model.to_string(), Script::Fail(message.to_string()));
        self
    }

    /// Number of `stream` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        match self.scripts.get(&request.model) {
            Some(Script::Reply(text)) => {
                let chars: Vec<char> = text.chars().collect();
                let chunks: Vec<anyhow::Result<CompletionChunk>> = chars
                    .chunks(7)
                    .map(|c| {
                        Ok(CompletionChunk {
                            delta: Some(c.iter().collect()),
                            ..CompletionChunk::default()
                        })
                    })
                    .collect();
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Some(Script::Fail(message)) => anyhow::bail!("{message}"),
            None => anyhow::bail!("no script for model '{}'", request.model),
        }
    }
}
