use crate::{
    config::AssistantConfig,
    ledger::{Transaction, TransactionType},
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, instrument};

pub const EMPTY_INSIGHT: &str = "Keep tracking your expenses to get better insights.";
pub const INSIGHT_FALLBACK: &str = "Unable to generate insights at the moment.";
pub const DEFAULT_CATEGORY: &str = "Other";
pub const EMPTY_CHAT_REPLY: &str = "I couldn't generate a response.";
pub const CHAT_FALLBACK: &str = "Sorry, I encountered an error processing your request.";

/// How many of the newest transactions an insight looks at.
const INSIGHT_WINDOW: usize = 10;

/// A web page the model grounded its answer on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChatReply {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Text and speech features backed by a hosted model.
#[async_trait]
pub trait FinanceAssistant: Send + Sync {
    /// A one-sentence tip about the newest transactions.
    async fn generate_insight(&self, transactions: &[Transaction]) -> Result<String>;

    /// Maps a free-text description onto a category name.
    async fn categorize(&self, description: &str) -> Result<String>;

    /// Answers a question using web search, with the previous turns as context.
    async fn chat(&self, message: &str, history: &[String]) -> Result<ChatReply>;

    /// Base64 PCM16 speech for `text`, if the model returned any.
    async fn synthesize_speech(&self, text: &str) -> Result<Option<String>>;
}

/// Talks to the Gemini `generateContent` REST endpoint.
pub struct GeminiAssistant {
    http: reqwest::Client,
    config: AssistantConfig,
}

impl GeminiAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn generate(&self, model: &str, request: &wire::Request) -> Result<wire::Response> {
        let url = format!("{}/models/{}:generateContent", self.config.api_base, model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.gemini_api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("request to {model} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{model} returned {status}: {body}"));
        }
        response
            .json::<wire::Response>()
            .await
            .context("unreadable generateContent response")
    }
}

#[async_trait]
impl FinanceAssistant for GeminiAssistant {
    #[instrument(skip_all, fields(count = transactions.len()))]
    async fn generate_insight(&self, transactions: &[Transaction]) -> Result<String> {
        let request = wire::Request::text(insight_prompt(transactions));
        let response = self.generate(&self.config.text_model, &request).await?;
        Ok(response.text().unwrap_or_else(|| EMPTY_INSIGHT.to_string()))
    }

    #[instrument(skip(self))]
    async fn categorize(&self, description: &str) -> Result<String> {
        let request = wire::Request::text(categorize_prompt(description));
        let response = self.generate(&self.config.text_model, &request).await?;
        let category = response
            .text()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        debug!(%category, "Categorized transaction.");
        Ok(category)
    }

    #[instrument(skip(self, history), fields(turns = history.len()))]
    async fn chat(&self, message: &str, history: &[String]) -> Result<ChatReply> {
        let mut request = wire::Request::text(chat_prompt(message, history));
        request.tools = Some(vec![wire::Tool::google_search()]);
        let response = self.generate(&self.config.text_model, &request).await?;
        Ok(ChatReply {
            text: response
                .text()
                .unwrap_or_else(|| EMPTY_CHAT_REPLY.to_string()),
            sources: response.sources(),
        })
    }

    #[instrument(skip_all, fields(len = text.len()))]
    async fn synthesize_speech(&self, text: &str) -> Result<Option<String>> {
        let mut request = wire::Request::text(text.to_string());
        request.generation_config = Some(wire::GenerationConfig::audio(&self.config.tts_voice));
        let response = self.generate(&self.config.tts_model, &request).await?;
        Ok(response.first_inline_data())
    }
}

fn type_label(kind: TransactionType) -> &'static str {
    match kind {
        TransactionType::Income => "INCOME",
        TransactionType::Expense => "EXPENSE",
    }
}

pub fn insight_prompt(transactions: &[Transaction]) -> String {
    let summary = transactions
        .iter()
        .take(INSIGHT_WINDOW)
        .map(|t| {
            format!(
                "{}: {} of ₹{} for {} ({})",
                t.date,
                type_label(t.kind),
                t.amount,
                t.description,
                t.category
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze these recent transactions and give a one-sentence financial tip or observation for an Indian user:\n{summary}"
    )
}

pub fn categorize_prompt(description: &str) -> String {
    format!(
        "Categorize this transaction description into a standard financial category (e.g., Food, Transport, Utilities, Entertainment, Housing, Health). Return ONLY the category name.\nDescription: {description}"
    )
}

pub fn chat_prompt(message: &str, history: &[String]) -> String {
    format!(
        "Previous conversation context:\n{}\nUser: {message}\nSystem: You are Aijaz, a helpful and professional financial assistant for an Indian user. Use Rupees (₹) for currency. Provide smart, actionable financial advice.",
        history.join("\n")
    )
}

/// Request and response bodies of `generateContent`.
mod wire {
    use super::Source;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Request {
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tools: Option<Vec<Tool>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub generation_config: Option<GenerationConfig>,
    }

    impl Request {
        pub fn text(text: String) -> Self {
            Self {
                contents: vec![Content {
                    parts: vec![Part {
                        text: Some(text),
                        inline_data: None,
                    }],
                }],
                tools: None,
                generation_config: None,
            }
        }
    }

    #[derive(Serialize, Deserialize, Debug, Default)]
    pub(super) struct Content {
        #[serde(default)]
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Part {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub inline_data: Option<Blob>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        #[serde(default)]
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Tool {
        pub google_search: serde_json::Value,
    }

    impl Tool {
        pub fn google_search() -> Self {
            Self {
                google_search: serde_json::json!({}),
            }
        }
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<&'static str>,
        pub speech_config: SpeechConfig,
    }

    impl GenerationConfig {
        pub fn audio(voice: &str) -> Self {
            Self {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            }
        }
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Response {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Candidate {
        #[serde(default)]
        pub content: Content,
        pub grounding_metadata: Option<GroundingMetadata>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GroundingMetadata {
        #[serde(default)]
        pub grounding_chunks: Vec<GroundingChunk>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct GroundingChunk {
        pub web: Option<WebSource>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct WebSource {
        pub uri: Option<String>,
        pub title: Option<String>,
    }

    impl Response {
        /// Concatenated text parts of the first candidate, if non-empty.
        pub fn text(&self) -> Option<String> {
            let text: String = self
                .candidates
                .first()?
                .content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect();
            (!text.is_empty()).then_some(text)
        }

        pub fn first_inline_data(&self) -> Option<String> {
            self.candidates
                .first()?
                .content
                .parts
                .first()?
                .inline_data
                .as_ref()
                .map(|b| b.data.clone())
        }

        pub fn sources(&self) -> Vec<Source> {
            let Some(metadata) = self
                .candidates
                .first()
                .and_then(|c| c.grounding_metadata.as_ref())
            else {
                return Vec::new();
            };
            metadata
                .grounding_chunks
                .iter()
                .filter_map(|chunk| chunk.web.as_ref())
                .filter_map(|web| {
                    let uri = web.uri.clone()?;
                    Some(Source {
                        title: web.title.clone().unwrap_or_else(|| "Source".to_string()),
                        uri,
                    })
                })
                .collect()
        }
    }
}
