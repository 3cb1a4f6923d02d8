//! Fakes shared by matcher and fill tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::constants::Constants;
use crate::llm_client::{
    Completion, EmbeddingProvider, LlmError, TextGenerationProvider, Usage,
};

pub fn constants(pairs: &[(&str, &str)]) -> Constants {
    Arc::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// Embeds text by table lookup. Batch calls give unknown texts a zero vector;
/// single calls fail for unknown texts.
pub struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    truncate_batch: Option<usize>,
    fail_batch: bool,
    query_delay: Option<Duration>,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(table: &[(&str, &[f32])]) -> Self {
        Self {
            vectors: table
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            truncate_batch: None,
            fail_batch: false,
            query_delay: None,
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_query(mut self, text: &str, vector: &[f32]) -> Self {
        self.vectors.insert(text.to_string(), vector.to_vec());
        self
    }

    pub fn truncate_batch(mut self, len: usize) -> Self {
        self.truncate_batch = Some(len);
        self
    }

    pub fn failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch {
            return Err(LlmError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0; 2]))
            .collect();
        if let Some(len) = self.truncate_batch {
            vectors.truncate(len);
        }
        Ok(vectors)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.vectors
            .get(text)
            .cloned()
            .ok_or(LlmError::MissingEmbedding)
    }
}

/// Replays scripted completions in order; once the script runs out, repeats `fallback`.
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn answering(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(text.to_string()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerationProvider for FakeGenerator {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => self.fallback.clone().ok_or(LlmError::Api {
                status: 500,
                message: "script exhausted".to_string(),
            })?,
        };

        Ok(Completion {
            text,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 5,
            },
        })
    }
}
