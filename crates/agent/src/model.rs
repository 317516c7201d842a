//! Model handle — the provider plus what it can do, decided once.
//!
//! Whether tools are bound is a property of the handle variant, chosen from
//! [`Provider::capabilities`] when the graph is built. Call sites never query
//! the provider again.

use std::sync::Arc;

use agentgraph_core::error::ProviderError;
use agentgraph_core::message::Message;
use agentgraph_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::context::accounting::TokenAccounting;

/// Provider binding shared by both handle variants.
#[derive(Clone)]
pub struct ModelBinding {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    structured_output: bool,
}

/// A model ready to be invoked.
#[derive(Clone)]
pub enum ModelHandle {
    /// Tool definitions are sent with every request.
    ToolCalling(ModelBinding),
    /// Tools are never sent; tool calls in replies are ignored by routing.
    TextOnly(ModelBinding),
}

impl ModelHandle {
    /// Inspect the provider's capabilities and pick the variant.
    pub fn select(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f32) -> Self {
        let caps = provider.capabilities();
        let binding = ModelBinding {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            structured_output: caps.structured_output,
        };
        if caps.tool_calling {
            ModelHandle::ToolCalling(binding)
        } else {
            ModelHandle::TextOnly(binding)
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.binding_mut().max_tokens = max_tokens;
        self
    }

    fn binding(&self) -> &ModelBinding {
        match self {
            ModelHandle::ToolCalling(b) | ModelHandle::TextOnly(b) => b,
        }
    }

    fn binding_mut(&mut self) -> &mut ModelBinding {
        match self {
            ModelHandle::ToolCalling(b) | ModelHandle::TextOnly(b) => b,
        }
    }

    pub fn supports_tools(&self) -> bool {
        matches!(self, ModelHandle::ToolCalling(_))
    }

    pub fn supports_structured_output(&self) -> bool {
        self.binding().structured_output
    }

    pub fn model(&self) -> &str {
        &self.binding().model
    }

    pub fn provider_name(&self) -> &str {
        self.binding().provider.name()
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        let b = self.binding();
        let mut request = ProviderRequest::new(b.model.clone(), messages);
        request.temperature = b.temperature;
        request.max_tokens = b.max_tokens;
        request
    }

    /// Send `messages`, binding `tools` only on a tool-calling handle.
    pub async fn invoke(
        &self,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
        accounting: &TokenAccounting,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut request = self.request(messages);
        if self.supports_tools() {
            request.tools = tools.to_vec();
        }
        let sent = request.messages.clone();
        let response = self.binding().provider.complete(request).await?;
        let usage = accounting.record(&sent, &response);
        debug!(
            model = %response.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Model responded"
        );
        Ok(response)
    }

    /// Request a response conforming to `schema` and parse it into `T`.
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        messages: Vec<Message>,
        schema: serde_json::Value,
        accounting: &TokenAccounting,
    ) -> Result<T, ProviderError> {
        if !self.supports_structured_output() {
            return Err(ProviderError::NotConfigured(format!(
                "provider '{}' does not support structured output",
                self.provider_name()
            )));
        }
        let mut request = self.request(messages);
        request.response_schema = Some(schema);
        let sent = request.messages.clone();
        let response = self.binding().provider.complete(request).await?;
        accounting.record(&sent, &response);
        parse_structured(&response.message.content)
    }
}

/// Parse structured model output, tolerating a surrounding code fence.
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, ProviderError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| ProviderError::InvalidStructuredOutput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_text_response, SequentialMockProvider};
    use agentgraph_core::provider::ProviderCapabilities;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: u32,
    }

    fn tool_def() -> ToolDefinition {
        ToolDefinition {
            name: "get_price".into(),
            description: "price".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn parse_plain_and_fenced_json() {
        assert_eq!(parse_structured::<Answer>(r#"{"value": 3}"#).unwrap(), Answer { value: 3 });
        let fenced = "```json\n{\"value\": 4}\n```";
        assert_eq!(parse_structured::<Answer>(fenced).unwrap(), Answer { value: 4 });
        assert!(matches!(
            parse_structured::<Answer>("not json"),
            Err(ProviderError::InvalidStructuredOutput(_))
        ));
    }

    #[test]
    fn variant_follows_capabilities() {
        let text_only = Arc::new(SequentialMockProvider::new(vec![]).with_capabilities(
            ProviderCapabilities { tool_calling: false, structured_output: false },
        ));
        let handle = ModelHandle::select(text_only, "m", 0.2);
        assert!(!handle.supports_tools());
        assert!(!handle.supports_structured_output());

        let full = Arc::new(SequentialMockProvider::new(vec![]));
        assert!(ModelHandle::select(full, "m", 0.2).supports_tools());
    }

    #[tokio::test]
    async fn text_only_handle_never_sends_tools() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![make_text_response("hi")]).with_capabilities(
                ProviderCapabilities { tool_calling: false, structured_output: true },
            ),
        );
        let handle = ModelHandle::select(provider.clone(), "m", 0.2);
        let accounting = TokenAccounting::new();
        handle
            .invoke(vec![Message::user("hello")], &[tool_def()], &accounting)
            .await
            .unwrap();
        assert!(provider.requests()[0].tools.is_empty());
        assert_eq!(accounting.totals().calls, 1);
    }

    #[tokio::test]
    async fn structured_call_sets_schema_and_parses() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(r#"{"value": 7}"#)]));
        let handle = ModelHandle::select(provider.clone(), "m", 0.2);
        let accounting = TokenAccounting::new();
        let answer: Answer = handle
            .invoke_structured(vec![Message::user("q")], serde_json::json!({"type": "object"}), &accounting)
            .await
            .unwrap();
        assert_eq!(answer.value, 7);
        assert!(provider.requests()[0].response_schema.is_some());
    }

    #[tokio::test]
    async fn structured_call_refused_without_capability() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]).with_capabilities(
            ProviderCapabilities { tool_calling: true, structured_output: false },
        ));
        let handle = ModelHandle::select(provider.clone(), "m", 0.2);
        let result: Result<Answer, _> = handle
            .invoke_structured(vec![], serde_json::json!({}), &TokenAccounting::new())
            .await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
        assert_eq!(provider.call_count(), 0);
    }
}
