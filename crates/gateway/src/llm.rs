//! Single-provider HTTP `LlmClient`, speaking the OpenAI-compatible
//! chat-completions wire format.
//!
//! Grounded on `OpenAiCompatProvider` from the provider-routing crate
//! this workspace no longer carries: same request/response shape, same
//! tool-call parsing, but collapsed down to exactly the one seam Lucy
//! needs — `model` arrives as `"provider_id/model_name"` (a `RoleConfig`
//! entry), this client splits it, looks the provider up in
//! `ModelConfig::providers`, and posts. No routing, no fallback chains,
//! no streaming: those are provider-registry concerns this crate
//! doesn't have one of anymore.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lucy_domain::config::{AuthMode, ProviderConfig, ProviderKind};
use lucy_domain::{Config, Error, Result};
use lucy_orchestrator::{ChatMessage, ChatRole, LlmResponse, ToolCall, ToolDefinition};
use serde_json::Value;

pub struct HttpLlmClient {
    client: reqwest::Client,
    providers: HashMap<String, ResolvedProvider>,
    roles: HashMap<String, lucy_domain::config::RoleConfig>,
    max_retries: u32,
}

struct ResolvedProvider {
    base_url: String,
    kind: ProviderKind,
    api_key: Option<String>,
}

impl ResolvedProvider {
    fn from_config(cfg: &ProviderConfig) -> Self {
        let api_key = match cfg.auth.mode {
            AuthMode::None => None,
            AuthMode::ApiKey => cfg
                .auth
                .env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .or_else(|| cfg.auth.key.clone()),
        };
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            kind: cfg.kind,
            api_key,
        }
    }
}

impl HttpLlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut providers = HashMap::new();
        for provider_cfg in &config.model.providers {
            if provider_cfg.kind != ProviderKind::OpenaiCompat {
                tracing::warn!(
                    provider = %provider_cfg.id,
                    kind = ?provider_cfg.kind,
                    "skipping provider with unsupported kind; only openai_compat is wired"
                );
                continue;
            }
            providers.insert(provider_cfg.id.clone(), ResolvedProvider::from_config(provider_cfg));
        }
        if providers.is_empty() {
            return Err(Error::Config("no usable (openai_compat) model providers configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.model.default_timeout_ms))
            .build()
            .map_err(|err| Error::Http(err.to_string()))?;
        Ok(Self {
            client,
            providers,
            roles: config.model.roles.clone(),
            max_retries: config.model.max_retries,
        })
    }

    /// Split `"provider_id/model_name"` and look the provider up.
    fn resolve(&self, model: &str) -> Result<(&ResolvedProvider, &str)> {
        let (provider_id, model_name) = model
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("model '{model}' is not in 'provider_id/model_name' form")))?;
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| Error::Config(format!("unknown model provider '{provider_id}'")))?;
        Ok((provider, model_name))
    }

    fn role_model(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|r| r.model.as_str())
    }

    async fn post_with_retry(&self, provider: &ResolvedProvider, body: Value) -> Result<Value> {
        let url = format!("{}/chat/completions", provider.base_url);
        let mut attempt = 0;
        loop {
            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &provider.api_key {
                req = req.bearer_auth(key);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<Value>().await.map_err(|err| Error::Http(err.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Error::Provider {
                        provider: provider.base_url.clone(),
                        message: format!("HTTP {status}: {text}"),
                    });
                }
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    continue;
                }
                Err(err) => return Err(Error::Http(err.to_string())),
            }
        }
    }
}

fn role_to_wire(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn message_to_wire(msg: &ChatMessage) -> Value {
    if let Some(tool_call_id) = &msg.tool_call_id {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": msg.content,
        });
    }
    if let Some(tool_calls) = &msg.tool_calls {
        let wire_calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": { "name": tc.name, "arguments": tc.arguments.to_string() },
                })
            })
            .collect();
        return serde_json::json!({
            "role": "assistant",
            "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
            "tool_calls": wire_calls,
        });
    }
    serde_json::json!({ "role": role_to_wire(&msg.role), "content": msg.content })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_response(body: &Value) -> Result<LlmResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider { provider: "openai_compat".into(), message: "no choices in response".into() })?;
    let message = choice
        .get("message")
        .ok_or_else(|| Error::Provider { provider: "openai_compat".into(), message: "no message in choice".into() })?;

    let content = message.get("content").and_then(|v| v.as_str()).map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: Value = serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse { content, tool_calls })
}

#[async_trait]
impl lucy_orchestrator::LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<LlmResponse> {
        let (provider, model_name) = self.resolve(model)?;

        let mut wire_messages = vec![serde_json::json!({ "role": "system", "content": system_prompt })];
        wire_messages.extend(messages.iter().map(message_to_wire));

        let mut body = serde_json::json!({ "model": model_name, "messages": wire_messages });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
        }

        let response = self.post_with_retry(provider, body).await?;
        parse_response(&response)
    }
}

#[async_trait]
impl lucy_supervisor::LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let model = self
            .role_model("fast")
            .or_else(|| self.role_model("default"))
            .ok_or_else(|| Error::Config("no 'fast' or 'default' model role configured".into()))?
            .to_string();
        let (provider, model_name) = self.resolve(&model)?;

        let body = serde_json::json!({
            "model": model_name,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self.post_with_retry(provider, body).await?;
        let text = response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(text)
    }
}
