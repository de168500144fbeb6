//! Declarative configuration: providers, defaults, and agents from JSON.
//!
//! [`QuorumConfig`] mirrors the shape an application would keep in a config
//! file; [`Session::from_config`] materialises provider clients and agents
//! from it.  Unknown provider names and preset keys are configuration errors.
//!
//! # Example
//!
//! ```rust
//! use quorum::config::QuorumConfig;
//!
//! let config = QuorumConfig::from_json_str(r#"{
//!     "providers": {
//!         "openai": {"api_key": "sk-test"}
//!     },
//!     "defaults": {"provider": "openai", "model": "gpt-4o-mini", "temperature": 0.4},
//!     "agents": [
//!         {"id": "a1", "name": "Analyst", "personality": {"preset": "analyst"}},
//!         {"id": "a2", "name": "Devil's Advocate", "personality": {
//!             "custom": {
//!                 "name": "Contrarian",
//!                 "system_prompt": "Argue the opposite of the emerging consensus.",
//!                 "creativity": 0.8,
//!                 "communication_style": "direct"
//!             }
//!         }}
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(config.agents.len(), 2);
//! ```

use crate::agent::Agent;
use crate::client_wrapper::{ClientWrapper, CompletionOptions};
use crate::clients::anthropic::AnthropicClient;
use crate::clients::gemini::GeminiClient;
use crate::clients::openai::OpenAIClient;
use crate::error::EngineError;
use crate::personality::{CommunicationStyle, Personality};
use crate::session::Session;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Root of the declarative configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuorumConfig {
    /// Provider credentials and endpoints.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Fallbacks applied to agents that omit a field.
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// The agents to build.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// One entry per supported provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI (or any OpenAI-compatible endpoint via `base_url`).
    pub openai: Option<ProviderConfig>,
    /// Anthropic.
    pub anthropic: Option<ProviderConfig>,
    /// Google Gemini.
    pub gemini: Option<ProviderConfig>,
}

/// Credentials for one provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API key.
    pub api_key: String,
    /// Optional endpoint override.
    pub base_url: Option<String>,
}

/// Session-wide fallbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    /// Provider used by agents that name none.
    pub provider: Option<String>,
    /// Model used by agents that name none.
    pub model: Option<String>,
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Default completion token cap.
    pub max_tokens: Option<usize>,
}

/// One agent declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Stable agent id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider key (`openai` / `anthropic` / `gemini`); falls back to
    /// `defaults.provider`.
    pub provider: Option<String>,
    /// Model override; falls back to `defaults.model`, then the provider default.
    pub model: Option<String>,
    /// Personality, as a preset key or a custom record.
    #[serde(default)]
    pub personality: PersonalityConfig,
}

/// Either a preset key or a custom personality record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonalityConfig {
    /// Preset key: `analyst`, `creative`, `critic`, `diplomat`, `expert:<domain>`.
    pub preset: Option<String>,
    /// Fully custom personality.
    pub custom: Option<CustomPersonalityConfig>,
}

/// Custom personality fields; numeric dials are clamped at build.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomPersonalityConfig {
    /// Display name of the persona.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Base system prompt.
    #[serde(default)]
    pub system_prompt: String,
    /// Domain expertise tag.
    pub expertise: Option<String>,
    /// Creativity dial.
    pub creativity: Option<f64>,
    /// Precision dial.
    pub precision: Option<f64>,
    /// Communication style key (see [`CommunicationStyle::from_key`]).
    pub communication_style: Option<String>,
    /// Free-form trait map.
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
}

impl QuorumConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid config: {}", e)))
    }

    /// Load and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Configuration(format!(
                "cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&text)
    }
}

/// Default model per provider when neither the agent nor the defaults name one.
fn default_model(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "claude-sonnet-4-0",
        "gemini" => "gemini-2.5-flash",
        _ => "gpt-4o",
    }
}

fn build_client(
    providers: &ProvidersConfig,
    provider: &str,
    model: &str,
) -> Result<Arc<dyn ClientWrapper>, EngineError> {
    match provider {
        "openai" => {
            let cfg = providers.openai.as_ref().ok_or_else(|| {
                EngineError::Configuration("provider 'openai' is not configured".to_string())
            })?;
            Ok(match &cfg.base_url {
                Some(url) => Arc::new(OpenAIClient::new_with_base_url(&cfg.api_key, model, url)),
                None => Arc::new(OpenAIClient::new(&cfg.api_key, model)),
            })
        }
        "anthropic" => {
            let cfg = providers.anthropic.as_ref().ok_or_else(|| {
                EngineError::Configuration("provider 'anthropic' is not configured".to_string())
            })?;
            Ok(match &cfg.base_url {
                Some(url) => {
                    Arc::new(AnthropicClient::new_with_base_url(&cfg.api_key, model, url))
                }
                None => Arc::new(AnthropicClient::new(&cfg.api_key, model)),
            })
        }
        "gemini" => {
            let cfg = providers.gemini.as_ref().ok_or_else(|| {
                EngineError::Configuration("provider 'gemini' is not configured".to_string())
            })?;
            Ok(match &cfg.base_url {
                Some(url) => Arc::new(GeminiClient::new_with_base_url(&cfg.api_key, model, url)),
                None => Arc::new(GeminiClient::new(&cfg.api_key, model)),
            })
        }
        other => Err(EngineError::Configuration(format!(
            "unknown provider '{}'",
            other
        ))),
    }
}

fn build_personality(config: &PersonalityConfig, agent_name: &str) -> Result<Personality, EngineError> {
    if let Some(preset) = &config.preset {
        return Personality::from_preset(preset).ok_or_else(|| {
            EngineError::Configuration(format!("unknown personality preset '{}'", preset))
        });
    }
    if let Some(custom) = &config.custom {
        let mut builder = Personality::builder(custom.name.clone())
            .description(custom.description.clone())
            .system_prompt(custom.system_prompt.clone());
        if let Some(expertise) = &custom.expertise {
            builder = builder.expertise(expertise.clone());
        }
        if let Some(creativity) = custom.creativity {
            builder = builder.creativity(creativity);
        }
        if let Some(precision) = custom.precision {
            builder = builder.precision(precision);
        }
        if let Some(style) = &custom.communication_style {
            let style = CommunicationStyle::from_key(style).ok_or_else(|| {
                EngineError::Configuration(format!("unknown communication style '{}'", style))
            })?;
            builder = builder.style(style);
        }
        for (key, value) in &custom.traits {
            builder = builder.trait_hint(key.clone(), value.clone());
        }
        return Ok(builder.build());
    }
    // No personality section: a neutral persona named after the agent.
    Ok(Personality::builder(agent_name).build())
}

impl Session {
    /// Materialise a session (clients plus agents) from a declarative config.
    pub fn from_config(config: &QuorumConfig) -> Result<Session, EngineError> {
        let mut session = Session::new();

        for agent_cfg in &config.agents {
            let provider = agent_cfg
                .provider
                .as_deref()
                .or(config.defaults.provider.as_deref())
                .ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "agent '{}' names no provider and no default is set",
                        agent_cfg.id
                    ))
                })?;
            let model = agent_cfg
                .model
                .as_deref()
                .or(config.defaults.model.as_deref())
                .unwrap_or_else(|| default_model(provider));

            let client = build_client(&config.providers, provider, model)?;
            session.register_client(format!("{}:{}", provider, model), client.clone());

            let personality = build_personality(&agent_cfg.personality, &agent_cfg.name)?;
            let default_options = CompletionOptions {
                temperature: config.defaults.temperature,
                max_tokens: config.defaults.max_tokens,
                ..Default::default()
            };

            let agent = Agent::new(agent_cfg.id.clone(), agent_cfg.name.clone(), client)
                .with_personality(personality)
                .with_default_options(default_options);
            session.add_agent(agent)?;
        }

        Ok(session)
    }
}
