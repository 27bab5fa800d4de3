#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The external generative-language service used for rubric structuring and
//! visual judgment.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bon::Builder;

use crate::config::OpenAiEnv;

/// An image sent alongside the text of an oracle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// MIME type of the image, e.g. `image/png`.
    media_type: String,
    /// Raw encoded image bytes.
    bytes:      Vec<u8>,
}

impl ImageAttachment {
    /// Wraps PNG bytes.
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            media_type: "image/png".to_string(),
            bytes,
        }
    }

    /// Encodes the image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

/// A single request to the oracle: instructions, a user turn, and any images.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct OracleRequest {
    /// Instructions that frame the task.
    system: String,
    /// The user turn.
    text:   String,
    /// Images attached to the user turn, in order.
    #[builder(default)]
    images: Vec<ImageAttachment>,
}

impl OracleRequest {
    /// Returns the system instructions.
    pub fn system_text(&self) -> &str {
        &self.system
    }

    /// Returns the user turn.
    pub fn user_text(&self) -> &str {
        &self.text
    }

    /// Returns the attached images.
    pub fn attachments(&self) -> &[ImageAttachment] {
        &self.images
    }
}

/// A request/response capability the grading pipeline depends on.
///
/// Responses are free-form text; callers own all parsing.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Sends a request and returns the raw response text.
    async fn complete(&self, request: OracleRequest) -> Result<String>;
}

/// Gives up on any request to the wrapped oracle after a fixed wait.
pub struct BoundedOracle<'a> {
    /// The oracle doing the work.
    inner:   &'a dyn Oracle,
    /// Longest wait for one answer.
    timeout: Duration,
}

impl<'a> BoundedOracle<'a> {
    /// Wraps `inner` so no request outlives `timeout`.
    pub fn new(inner: &'a dyn Oracle, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Oracle for BoundedOracle<'_> {
    async fn complete(&self, request: OracleRequest) -> Result<String> {
        tokio::time::timeout(self.timeout, self.inner.complete(request))
            .await
            .map_err(|_| {
                anyhow!("No answer from the oracle within {}s", self.timeout.as_secs_f64())
            })?
    }
}

/// Oracle backed by an OpenAI-compatible chat completion endpoint.
pub struct OpenAiOracle {
    /// Credentials and tuning parameters.
    env:    OpenAiEnv,
    /// Reused API client.
    client: OpenAIClient<OpenAIConfig>,
}

impl OpenAiOracle {
    /// Creates an oracle from the configured endpoint.
    pub fn new(env: OpenAiEnv) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base().to_owned())
                .with_api_key(env.api_key().to_owned()),
        );
        Self { env, client }
    }

    /// Converts an oracle request into chat messages.
    fn messages(request: &OracleRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_text().to_string())
            .name("Instructor")
            .build()?;

        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            vec![ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(request.user_text().to_string())
                .build()?
                .into()];

        for image in request.attachments() {
            parts.push(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image.data_url())
                            .detail(ImageDetail::High)
                            .build()?,
                    )
                    .build()?
                    .into(),
            );
        }

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()?;

        Ok(vec![system.into(), user.into()])
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String> {
        let messages = Self::messages(&request)?;
        tracing::debug!(
            "Sending oracle request ({} chars, {} images)",
            request.user_text().len(),
            request.attachments().len()
        );

        let response = self
            .client
            .chat()
            .create(CreateChatCompletionRequest {
                model: self.env.model().to_owned(),
                messages,
                temperature: self.env.temperature(),
                top_p: self.env.top_p(),
                n: Some(1),
                stream: Some(false),
                reasoning_effort: Some(self.env.reasoning_effort()),
                ..Default::default()
            })
            .await
            .context("Oracle request failed")?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .context("No content in oracle response")
    }
}
