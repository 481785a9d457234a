use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, GenerateError};
use crate::http::HttpFetcher;
use crate::retry::RetryPolicy;

/// Produces the final answer from a question and the retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerateError>;
}

/// Returns the retrieved context itself, framed as a summary.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn summarize(question: &str, context: &str) -> String {
        format!("Based on the retrieved context for '{question}', here is a summary:\n\n{context}")
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerateError> {
        Ok(Self::summarize(question, context))
    }
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the context below. \
         If the context does not contain the answer, say so.\n\n\
         Context:\n{context}\n\nQuestion: {question}\n\nAnswer:"
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `POST {base}/chat/completions` (OpenAI, Groq, HF router).
pub struct HttpChatGenerator {
    http: HttpFetcher,
    url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl HttpChatGenerator {
    pub fn new(
        client: Client,
        api_base: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<HttpChatGenerator, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("LLM_API_KEY"))?;
        Ok(HttpChatGenerator {
            http: HttpFetcher::new(client, RetryPolicy::http_default()),
            url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            model: model.into(),
            api_key,
            max_tokens: 512,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.http.set_retry_policy(retry);
        self
    }
}

#[async_trait]
impl AnswerGenerator for HttpChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerateError> {
        let prompt = build_prompt(question, context);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };
        let response = self
            .http
            .send("chat completion", |client| {
                client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| GenerateError::Decode(e.to_string()))?;
        let parsed: ChatResponse =
            serde_json::from_slice(&body).map_err(|e| GenerateError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(GenerateError::EmptyCompletion)
    }
}
