//! OpenAI Chat Completions transport, built on `async-openai`.
//!
//! Each [`weft_event::Role`] can be routed to a different model (the Planner often
//! wants a stronger model than the Executor's per-step tool loop); see [`RoleModels`].

use async_trait::async_trait;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};

use weft_event::Role;

use super::{LlmError, LlmTransport};

/// Per-role model names, e.g. a stronger model for planning than for step execution.
#[derive(Clone, Debug)]
pub struct RoleModels {
    pub planner: String,
    pub executor: String,
    pub reflector: String,
}

impl RoleModels {
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            planner: model.clone(),
            executor: model.clone(),
            reflector: model,
        }
    }

    fn model_for(&self, role: Role) -> &str {
        match role {
            Role::Planner => &self.planner,
            Role::Executor => &self.executor,
            Role::Reflector => &self.reflector,
        }
    }
}

/// Sends one user-role prompt per `complete()` call; the caller is responsible for
/// folding any system framing and conversation history into `prompt` itself, since
/// this transport has no notion of message history (§4.4 treats each ask as one shot).
pub struct OpenAiTransport {
    client: Client<OpenAIConfig>,
    models: RoleModels,
    temperature: Option<f32>,
}

impl OpenAiTransport {
    pub fn new(models: RoleModels) -> Self {
        Self {
            client: Client::new(),
            models,
            temperature: None,
        }
    }

    pub fn with_config(config: OpenAIConfig, models: RoleModels) -> Self {
        Self {
            client: Client::with_config(config),
            models,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    async fn complete(&self, role: Role, prompt: &str) -> Result<String, LlmError> {
        let model = self.models.model_for(role);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model.to_string());
        args.messages(vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage::from(prompt),
        )]);
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        let request = args
            .build()
            .map_err(|e| LlmError::Transport(format!("request build failed: {e}")))?;

        debug!(role = ?role, model = %model, prompt_chars = prompt.len(), "openai chat create");
        if let Ok(js) = serde_json::to_string_pretty(&request) {
            trace!(role = ?role, request = %js, "openai request body");
        }

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Transport(format!("openai api error: {e}")))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Transport("openai returned no choices".into()))?;

        choice
            .message
            .content
            .ok_or_else(|| LlmError::InvalidResponse("openai reply had no content".into()))
    }
}
