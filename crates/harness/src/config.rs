//! Scenario configuration and inputs

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::network::IdleMode;

/// Tunables for one installation scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// URL fragment of the block-directory search endpoint
    pub search_endpoint: String,

    /// Bound for plain UI actions (new post, typing, clicks, DOM reads)
    pub action_timeout_ms: u64,

    /// Bound for the search response after typing the term
    pub search_timeout_ms: u64,

    /// Bound for the install button to appear
    pub install_trigger_timeout_ms: u64,

    /// Grace period for the busy indicator cycle (best-effort)
    pub busy_indicator_grace_ms: u64,

    /// Bound for the network to settle after clicking install
    pub network_idle_timeout_ms: u64,

    /// How long the network must stay idle
    pub quiet_window_ms: u64,

    pub idle_mode: IdleMode,

    /// Capture and publish screenshots
    pub screenshots: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            search_endpoint: "/wp/v2/block-directory/search".to_string(),
            action_timeout_ms: 10_000,
            search_timeout_ms: 30_000,
            install_trigger_timeout_ms: 10_000,
            busy_indicator_grace_ms: 10_000,
            network_idle_timeout_ms: 60_000,
            quiet_window_ms: 500,
            idle_mode: IdleMode::NetworkIdle0,
            screenshots: true,
        }
    }
}

impl ScenarioConfig {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            debug!(path = %path.display(), "no scenario config, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.search_endpoint.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "search_endpoint must not be empty".to_string(),
            ));
        }

        let bounds = [
            ("action_timeout_ms", self.action_timeout_ms),
            ("search_timeout_ms", self.search_timeout_ms),
            ("install_trigger_timeout_ms", self.install_trigger_timeout_ms),
            ("busy_indicator_grace_ms", self.busy_indicator_grace_ms),
            ("network_idle_timeout_ms", self.network_idle_timeout_ms),
            ("quiet_window_ms", self.quiet_window_ms),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(HarnessError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn install_trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.install_trigger_timeout_ms)
    }

    pub fn busy_indicator_grace(&self) -> Duration {
        Duration::from_millis(self.busy_indicator_grace_ms)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.network_idle_timeout_ms)
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }
}

/// What to search for and which plugin it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioInputs {
    pub search_term: String,
    pub plugin_slug: String,
}

/// Payload shape sent by the upstream repository_dispatch trigger
#[derive(Debug, Default, Deserialize)]
struct TriggerEvent {
    #[serde(default)]
    client_payload: TriggerPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerPayload {
    search_term: Option<String>,
    slug: Option<String>,
}

impl ScenarioInputs {
    pub fn new(search_term: impl Into<String>, plugin_slug: impl Into<String>) -> Self {
        Self {
            search_term: search_term.into(),
            plugin_slug: plugin_slug.into(),
        }
    }

    /// Read `SEARCH_TERM` / `PLUGIN_SLUG`, falling back to the event at `GITHUB_EVENT_PATH`
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`ScenarioInputs::from_env`] with an injectable variable lookup
    pub fn from_vars<F>(var: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let payload = match var("GITHUB_EVENT_PATH").filter(|p| !p.is_empty()) {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                serde_json::from_str::<TriggerEvent>(&content)?.client_payload
            }
            None => TriggerPayload::default(),
        };

        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let search_term = non_empty(var("SEARCH_TERM"))
            .or_else(|| non_empty(payload.search_term))
            .ok_or_else(|| HarnessError::InvalidConfig("no search term provided".to_string()))?;
        let plugin_slug = non_empty(var("PLUGIN_SLUG"))
            .or_else(|| non_empty(payload.slug))
            .unwrap_or_else(|| search_term.clone());

        Ok(Self {
            search_term,
            plugin_slug,
        })
    }
}
