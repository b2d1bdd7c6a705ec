use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::tools::{DisplayGeometry, ToolManifest};
use crate::types::DEFAULT_MAX_TURNS;

pub const DEFAULT_MODEL: &str = "computer-use-preview";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Scrapybara,
    Hyperbrowser,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "scrapybara" => Ok(Provider::Scrapybara),
            "hyperbrowser" => Ok(Provider::Hyperbrowser),
            _ => Err(ConfigError::UnsupportedProvider(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Scrapybara => "scrapybara",
            Provider::Hyperbrowser => "hyperbrowser",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Web,
    Ubuntu,
    Windows,
}

impl Environment {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(Environment::Web),
            "ubuntu" => Ok(Environment::Ubuntu),
            "windows" => Ok(Environment::Windows),
            _ => Err(ConfigError::InvalidEnvironment(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Web => "web",
            Environment::Ubuntu => "ubuntu",
            Environment::Windows => "windows",
        }
    }

    /// Name of the environment in the computer-use tool definition.
    pub fn model_environment(self) -> &'static str {
        match self {
            Environment::Web => "browser",
            Environment::Ubuntu => "ubuntu",
            Environment::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Provider-specific session parameters. Unknown keys are passed through to
/// the provider's create call untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenSize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Delays and per-call bounds used by the action translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub settle_ms: u64,
    pub wait_action_ms: u64,
    pub drag_step_min_ms: u64,
    pub drag_step_jitter_ms: u64,
    pub navigation_timeout_ms: u64,
    pub screenshot_timeout_ms: u64,
    pub history_timeout_ms: u64,
    /// How long a DevTools connection may sit without traffic before it is
    /// dropped. Must outlast model turns and pauses between web UI commands.
    pub idle_connection_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 1_000,
            wait_action_ms: 2_000,
            drag_step_min_ms: 40,
            drag_step_jitter_ms: 40,
            navigation_timeout_ms: 15_000,
            screenshot_timeout_ms: 15_000,
            history_timeout_ms: 30_000,
            idle_connection_ms: 3_600_000,
        }
    }
}

impl Timing {
    /// No pauses, default bounds. Used by tests.
    pub fn instant() -> Self {
        Self {
            settle_ms: 0,
            wait_action_ms: 0,
            drag_step_min_ms: 0,
            drag_step_jitter_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn wait_action(&self) -> Duration {
        Duration::from_millis(self.wait_action_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn screenshot_timeout(&self) -> Duration {
        Duration::from_millis(self.screenshot_timeout_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn idle_connection(&self) -> Duration {
        Duration::from_millis(self.idle_connection_ms)
    }

    /// Pause between drag moves: the fixed minimum plus a random share of the
    /// jitter window.
    pub fn drag_step(&self) -> Duration {
        let jitter = if self.drag_step_jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.drag_step_jitter_ms
        };
        Duration::from_millis(self.drag_step_min_ms + jitter)
    }
}

/// Raw agent configuration, as read from file, environment and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: String,
    pub environment: String,
    pub zdr_enabled: bool,
    pub prompt: Option<String>,
    pub session_params: SessionParams,
    pub model: String,
    pub openai_base_url: String,
    pub max_turns: usize,
    pub timing: Timing,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "scrapybara".to_string(),
            environment: "web".to_string(),
            zdr_enabled: false,
            prompt: None,
            session_params: SessionParams::default(),
            model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timing: Timing::default(),
        }
    }
}

impl AgentConfig {
    /// Default config file location: `<config dir>/cua-agent/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cua-agent").join("config.json"))
    }

    /// Load a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file_err = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let file = std::fs::File::open(path).map_err(|e| file_err(e.to_string()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| file_err(e.to_string()))
    }

    /// Apply `CUA_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = var("CUA_PROVIDER") {
            self.provider = provider;
        }
        if let Some(environment) = var("CUA_ENVIRONMENT") {
            self.environment = environment;
        }
        if let Some(zdr) = var("CUA_ZDR_ENABLED") {
            self.zdr_enabled = matches!(zdr.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(model) = var("CUA_MODEL") {
            self.model = model;
        }
        if let Some(prompt) = var("CUA_PROMPT") {
            self.prompt = Some(prompt);
        }
        if let Some(max_turns) = var("CUA_MAX_TURNS").and_then(|v| v.parse().ok()) {
            self.max_turns = max_turns;
        }
    }

    /// Resolve into the immutable descriptor shared by the model invoker and
    /// the action translator.
    pub fn resolve(&self) -> Result<Descriptor, ConfigError> {
        let provider = Provider::parse(&self.provider)?;
        let environment = Environment::parse(&self.environment)?;

        let geometry = match provider {
            Provider::Scrapybara => DisplayGeometry::default(),
            Provider::Hyperbrowser => {
                if environment != Environment::Web {
                    return Err(ConfigError::UnsupportedEnvironment {
                        provider: provider.as_str().to_string(),
                        environment: environment.as_str().to_string(),
                    });
                }
                match self.session_params.screen {
                    Some(ScreenSize { width, height }) => DisplayGeometry { width, height },
                    None => DisplayGeometry::default(),
                }
            }
        };

        if geometry.width == 0 || geometry.height == 0 {
            return Err(ConfigError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
            });
        }

        Ok(Descriptor {
            provider,
            environment,
            geometry,
            manifest: ToolManifest::for_target(provider, environment, geometry),
            session_params: self.session_params.clone(),
            zdr_enabled: self.zdr_enabled,
            prompt: self.prompt.clone().filter(|p| !p.trim().is_empty()),
            model: self.model.clone(),
            max_turns: self.max_turns,
            timing: self.timing,
        })
    }
}

/// Resolved, immutable run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub provider: Provider,
    pub environment: Environment,
    pub geometry: DisplayGeometry,
    pub manifest: ToolManifest,
    pub session_params: SessionParams,
    pub zdr_enabled: bool,
    pub prompt: Option<String>,
    pub model: String,
    pub max_turns: usize,
    pub timing: Timing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_resolve_to_scrapybara_web() {
        let descriptor = AgentConfig::default().resolve().unwrap();
        assert_eq!(descriptor.provider, Provider::Scrapybara);
        assert_eq!(descriptor.environment, Environment::Web);
        assert_eq!(descriptor.geometry, DisplayGeometry::default());
        assert_eq!(descriptor.manifest.tools().len(), 1);
    }

    #[test]
    fn unsupported_provider_is_a_config_error() {
        let config = AgentConfig {
            provider: "browserbase".into(),
            ..AgentConfig::default()
        };
        assert_eq!(
            config.resolve().unwrap_err(),
            ConfigError::UnsupportedProvider("browserbase".into())
        );
    }

    #[test]
    fn hyperbrowser_uses_screen_param_and_rejects_desktops() {
        let mut config = AgentConfig {
            provider: "hyperbrowser".into(),
            session_params: SessionParams {
                screen: Some(ScreenSize {
                    width: 1920,
                    height: 1080,
                }),
                extra: Map::new(),
            },
            ..AgentConfig::default()
        };
        let descriptor = config.resolve().unwrap();
        assert_eq!(descriptor.geometry.width, 1920);
        assert_eq!(descriptor.manifest.tools().len(), 3);

        config.environment = "windows".into();
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::UnsupportedEnvironment { .. })
        ));
    }

    #[test]
    fn scrapybara_ignores_screen_param() {
        let config = AgentConfig {
            environment: "ubuntu".into(),
            session_params: SessionParams {
                screen: Some(ScreenSize {
                    width: 1920,
                    height: 1080,
                }),
                extra: Map::new(),
            },
            ..AgentConfig::default()
        };
        let descriptor = config.resolve().unwrap();
        assert_eq!(descriptor.geometry, DisplayGeometry::default());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let config = AgentConfig {
            provider: "hyperbrowser".into(),
            session_params: SessionParams {
                screen: Some(ScreenSize {
                    width: 0,
                    height: 768,
                }),
                extra: Map::new(),
            },
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CUA_PROVIDER", "hyperbrowser"),
            ("CUA_ZDR_ENABLED", "true"),
            ("CUA_MAX_TURNS", "7"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.provider, "hyperbrowser");
        assert!(config.zdr_enabled);
        assert_eq!(config.max_turns, 7);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"provider":"hyperbrowser","session_params":{"screen":{"width":800,"height":600},"useStealth":true}}"#,
        )
        .unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.session_params.extra["useStealth"], Value::Bool(true));
    }

    #[test]
    fn idle_connection_outlasts_a_model_turn() {
        let timing = Timing::default();
        assert_eq!(timing.idle_connection(), Duration::from_secs(3_600));
        assert_eq!(Timing::instant().idle_connection(), timing.idle_connection());

        let config: AgentConfig =
            serde_json::from_str(r#"{"timing":{"idle_connection_ms":120000}}"#).unwrap();
        let descriptor = config.resolve().unwrap();
        assert_eq!(descriptor.timing.idle_connection(), Duration::from_secs(120));
        assert_eq!(descriptor.timing.settle_ms, 1_000);
    }
}
