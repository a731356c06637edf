//! In-process provider replaying fixed event scripts.

use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;

use crate::document::access::ApiKey;
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::ProviderId;
use crate::llm::provider::{ModelProvider, ModelRequest, ProviderFuture, ProviderStream};
use crate::llm::stream::StreamEvent;

/// Provider id the scripted backend answers to.
pub(crate) const SCRIPTED_PROVIDER: &str = "ollama";

/// Replays `events` for every request and records what it was asked.
pub(crate) struct ScriptedProvider {
    events: Vec<StreamEvent>,
    needs_key: bool,
    fail_to_start: bool,
    delay: Option<Duration>,
    pub(crate) requests: Mutex<Vec<(ModelRequest, Option<ApiKey>)>>,
}

impl ScriptedProvider {
    pub(crate) fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            needs_key: false,
            fail_to_start: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_key_required(mut self) -> Self {
        self.needs_key = true;
        self
    }

    /// Wait `delay` before each event.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_to_start() -> Self {
        let mut provider = Self::new(Vec::new());
        provider.fail_to_start = true;
        provider
    }

    pub(crate) fn recorded(&self) -> Vec<(ModelRequest, Option<ApiKey>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModelProvider for ScriptedProvider {
    fn supports(&self, provider: &ProviderId) -> bool {
        provider.as_str() == SCRIPTED_PROVIDER
    }

    fn requires_api_key(&self, _provider: &ProviderId) -> bool {
        self.needs_key
    }

    fn stream(
        &self,
        request: ModelRequest,
        api_key: Option<ApiKey>,
    ) -> ProviderFuture<'_, DocResult<ProviderStream>> {
        self.requests.lock().unwrap().push((request, api_key));
        let events = self.events.clone();
        let fail = self.fail_to_start;
        let delay = self.delay;
        Box::pin(async move {
            if fail {
                return Err(DocError::Provider("connection refused".to_string()));
            }
            let events = futures::stream::iter(events);
            Ok(match delay {
                Some(delay) => events
                    .then(move |event| async move {
                        tokio::time::sleep(delay).await;
                        event
                    })
                    .boxed(),
                None => events.boxed(),
            })
        })
    }
}
