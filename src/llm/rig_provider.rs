//! rig-core backed provider for Ollama and OpenAI-compatible endpoints.

use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use rig::client::{CompletionClient, Nothing};
use rig::completion::{CompletionModel, GetTokenUsage, Message};
use rig::providers::{ollama, openai};
use rig::streaming::StreamedAssistantContent;
use tracing::debug;

use crate::document::access::ApiKey;
use crate::document::core::block::TokenUsage;
use crate::document::core::config::LlmConfig;
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::ProviderId;
use crate::llm::provider::{
    ChatMessage, ModelProvider, ModelRequest, ProviderFuture, ProviderStream, Role,
};
use crate::llm::stream::StreamEvent;

/// Provider id served by a local Ollama runtime.
pub const OLLAMA: &str = "ollama";
/// Provider id served by the OpenAI API (or a compatible endpoint).
pub const OPENAI: &str = "openai";

/// Finish reason reported when a backend ends its stream without one.
const DEFAULT_FINISH_REASON: &str = "stop";

/// Streams completions through rig-core clients.
#[derive(Clone, Debug, Default)]
pub struct RigProvider {
    ollama_base_url: Option<String>,
    openai_base_url: Option<String>,
}

impl RigProvider {
    /// Build from the model provider settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            ollama_base_url: config.ollama_base_url.clone(),
            openai_base_url: config.openai_base_url.clone(),
        }
    }

    /// Provider ids this backend can serve.
    #[must_use]
    pub fn supported() -> Vec<ProviderId> {
        [OLLAMA, OPENAI]
            .into_iter()
            .filter_map(|id| ProviderId::new(id).ok())
            .collect()
    }

    fn ollama_client(&self) -> DocResult<ollama::Client<ReqwestClient>> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(Nothing);
        let builder = if let Some(base_url) = &self.ollama_base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        Ok(builder.build()?)
    }

    fn openai_client(&self, api_key: Option<&ApiKey>) -> DocResult<openai::Client<ReqwestClient>> {
        let key = api_key.ok_or_else(|| DocError::ApiKeyNotFound(OPENAI.to_string()))?;
        let builder = openai::Client::<ReqwestClient>::builder().api_key(key.expose());
        let builder = if let Some(base_url) = &self.openai_base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        Ok(builder.build()?)
    }
}

impl ModelProvider for RigProvider {
    fn supports(&self, provider: &ProviderId) -> bool {
        matches!(provider.as_str(), OLLAMA | OPENAI)
    }

    fn requires_api_key(&self, provider: &ProviderId) -> bool {
        provider.as_str() == OPENAI
    }

    fn stream(
        &self,
        request: ModelRequest,
        api_key: Option<ApiKey>,
    ) -> ProviderFuture<'_, DocResult<ProviderStream>> {
        Box::pin(async move {
            debug!(
                provider = %request.provider,
                model = %request.model,
                messages = request.messages.len(),
                "opening completion stream"
            );
            match request.provider.as_str() {
                OLLAMA => {
                    let model = self.ollama_client()?.completion_model(request.model.as_str());
                    open_stream(model, request).await
                }
                OPENAI => {
                    let model = self
                        .openai_client(api_key.as_ref())?
                        .completion_model(request.model.as_str());
                    open_stream(model, request).await
                }
                other => Err(DocError::UnsupportedProvider(other.to_string())),
            }
        })
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        Role::User => Message::user(message.content.clone()),
        Role::Assistant => Message::assistant(message.content.clone()),
    }
}

async fn open_stream<M>(model: M, request: ModelRequest) -> DocResult<ProviderStream>
where
    M: CompletionModel + 'static,
    M::StreamingResponse: Send + 'static,
{
    let mut history: Vec<Message> = request.messages.iter().map(to_rig_message).collect();
    let prompt = history
        .pop()
        .ok_or_else(|| DocError::Provider("no messages to send".to_string()))?;

    let completion = model
        .completion_request(prompt)
        .preamble(request.preamble)
        .messages(history)
        .temperature(request.temperature)
        .max_tokens_opt(request.max_tokens)
        .build();

    let response = Box::pin(model.stream(completion).await?);

    let events = futures::stream::unfold(Some((response, false)), |state| async move {
        let (mut response, finished) = state?;
        loop {
            match response.next().await {
                Some(Ok(StreamedAssistantContent::Text(text))) => {
                    return Some((StreamEvent::delta(text.text), Some((response, finished))));
                }
                Some(Ok(StreamedAssistantContent::Final(final_response))) => {
                    let usage = final_response.token_usage().map(|usage| TokenUsage {
                        input: usage.input_tokens,
                        output: usage.output_tokens,
                    });
                    let event = StreamEvent::Finish {
                        finish_reason: Some(DEFAULT_FINISH_REASON.to_string()),
                        usage,
                    };
                    return Some((event, Some((response, true))));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Some((StreamEvent::error(err.to_string()), None)),
                None if finished => return None,
                None => {
                    let event = StreamEvent::Finish {
                        finish_reason: Some(DEFAULT_FINISH_REASON.to_string()),
                        usage: None,
                    };
                    return Some((event, None));
                }
            }
        }
    });

    Ok(events.boxed())
}
