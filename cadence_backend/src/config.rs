use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::backoff::BackoffPolicy;
use crate::agent::cadence::{CadenceSettings, DelayRange};
use crate::agent::{AcquisitionRule, AcquisitionSettings, SamplingSettings, SchedulerSettings};

pub const CONFIG_FILE_NAME: &str = "cadence_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_daily_limit")]
    pub new_item_daily_limit: u32,
    #[serde(default = "default_daily_limit")]
    pub reply_daily_limit: u32,
    #[serde(default = "default_exhausted_cooldown")]
    pub exhausted_cooldown_secs: u64,
}

fn default_daily_limit() -> u32 {
    50
}

fn default_exhausted_cooldown() -> u64 {
    12 * 60 * 60
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            new_item_daily_limit: default_daily_limit(),
            reply_daily_limit: default_daily_limit(),
            exhausted_cooldown_secs: default_exhausted_cooldown(),
        }
    }
}

/// Delay ranges are `[min, max]` in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_new_item_weight")]
    pub new_item_weight: f64,
    #[serde(default = "default_peak_hours")]
    pub peak_hours: Vec<u32>,
    #[serde(default = "default_new_item_peak")]
    pub new_item_peak_secs: [u64; 2],
    #[serde(default = "default_new_item_off_peak")]
    pub new_item_off_peak_secs: [u64; 2],
    #[serde(default = "default_reply_peak")]
    pub reply_peak_secs: [u64; 2],
    #[serde(default = "default_reply_off_peak")]
    pub reply_off_peak_secs: [u64; 2],
    #[serde(default = "default_idle")]
    pub idle_secs: [u64; 2],
    #[serde(default = "default_extra_delay_chance")]
    pub extra_delay_chance: f64,
    #[serde(default = "default_extra_delay")]
    pub extra_delay_secs: [u64; 2],
}

fn default_new_item_weight() -> f64 {
    0.7
}

fn default_peak_hours() -> Vec<u32> {
    vec![7, 8, 9, 10, 17, 18, 19, 20, 21, 22]
}

fn default_new_item_peak() -> [u64; 2] {
    [600, 1200]
}

fn default_new_item_off_peak() -> [u64; 2] {
    [1200, 2400]
}

fn default_reply_peak() -> [u64; 2] {
    [300, 900]
}

fn default_reply_off_peak() -> [u64; 2] {
    [900, 1800]
}

fn default_idle() -> [u64; 2] {
    [600, 1200]
}

fn default_extra_delay_chance() -> f64 {
    0.1
}

fn default_extra_delay() -> [u64; 2] {
    [300, 900]
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            new_item_weight: default_new_item_weight(),
            peak_hours: default_peak_hours(),
            new_item_peak_secs: default_new_item_peak(),
            new_item_off_peak_secs: default_new_item_off_peak(),
            reply_peak_secs: default_reply_peak(),
            reply_off_peak_secs: default_reply_off_peak(),
            idle_secs: default_idle(),
            extra_delay_chance: default_extra_delay_chance(),
            extra_delay_secs: default_extra_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_new_item_max_age")]
    pub new_item_max_age_secs: u64,
    #[serde(default = "default_new_item_min_chars")]
    pub new_item_min_chars: usize,
    #[serde(default = "default_reply_max_age")]
    pub reply_max_age_secs: u64,
    #[serde(default = "default_reply_min_chars")]
    pub reply_min_chars: usize,
    /// How many of the agent's own items seed the dedup registry. 0 reads all.
    #[serde(default = "default_history_seed_limit")]
    pub history_seed_limit: usize,
}

fn default_new_item_max_age() -> u64 {
    2 * 60 * 60
}

fn default_new_item_min_chars() -> usize {
    100
}

fn default_reply_max_age() -> u64 {
    60 * 60
}

fn default_reply_min_chars() -> usize {
    40
}

fn default_history_seed_limit() -> usize {
    1000
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            new_item_max_age_secs: default_new_item_max_age(),
            new_item_min_chars: default_new_item_min_chars(),
            reply_max_age_secs: default_reply_max_age(),
            reply_min_chars: default_reply_min_chars(),
            history_seed_limit: default_history_seed_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_rate_limit_wait")]
    pub default_rate_limit_wait_secs: u64,
    #[serde(default = "default_extra_cooldown")]
    pub extra_cooldown_secs: u64,
    #[serde(default)]
    pub max_total_wait_secs: Option<u64>,
}

fn default_rate_limit_wait() -> u64 {
    10 * 60
}

fn default_extra_cooldown() -> u64 {
    5 * 60
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_wait_secs: default_rate_limit_wait(),
            extra_cooldown_secs: default_extra_cooldown(),
            max_total_wait_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomesConfig {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_sample_chance")]
    pub sample_chance: f64,
    #[serde(default = "default_pre_sample_pause")]
    pub pre_sample_pause_secs: [u64; 2],
    #[serde(default)]
    pub sample_cap: Option<usize>,
    #[serde(default = "default_action_log_path")]
    pub action_log_path: String,
}

fn default_store_path() -> String {
    "stored_outcomes.json".to_string()
}

fn default_sample_chance() -> f64 {
    1.0 / 30.0
}

fn default_pre_sample_pause() -> [u64; 2] {
    [240, 600]
}

fn default_action_log_path() -> String {
    "acted_links.txt".to_string()
}

impl Default for OutcomesConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            sample_chance: default_sample_chance(),
            pre_sample_pause_secs: default_pre_sample_pause(),
            sample_cap: None,
            action_log_path: default_action_log_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Platform connection
    #[serde(default = "default_platform_url")]
    pub platform_url: String,
    #[serde(default)]
    pub platform_token: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    /// Topics searched for new items, tried in random order.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    // LLM configuration (OpenAI-compatible endpoint)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub outcomes: OutcomesConfig,
}

fn default_platform_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_username() -> String {
    "cadence".to_string()
}

fn default_sources() -> Vec<String> {
    vec!["general".to_string()]
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_system_prompt() -> String {
    "You are a thoughtful participant in an online discussion forum. \
     You respond to what people actually wrote, stay on topic, and write plainly \
     without hashtags, emojis or sign-offs."
        .to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            platform_url: default_platform_url(),
            platform_token: None,
            username: default_username(),
            sources: default_sources(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            system_prompt: default_system_prompt(),
            quota: QuotaConfig::default(),
            cadence: CadenceConfig::default(),
            acquisition: AcquisitionConfig::default(),
            backoff: BackoffConfig::default(),
            outcomes: OutcomesConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Directory of the running executable, or the working directory.
    pub fn get_base_dir() -> PathBuf {
        match env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Load from `path` or the default location, then apply `.env` and
    /// environment overrides.
    pub fn load_from(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<AgentConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        };

        if let Ok(env_path) = dotenvy::dotenv() {
            tracing::info!("Loaded environment from {:?}", env_path);
        }
        config.apply_env_overrides();
        config
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("CADENCE_PLATFORM_URL") {
            self.platform_url = url;
        }
        if let Some(token) = get("CADENCE_PLATFORM_TOKEN") {
            self.platform_token = Some(token);
        }
        if let Some(name) = get("CADENCE_USERNAME") {
            self.username = name;
        }
        if let Some(sources) = get("CADENCE_SOURCES") {
            let parsed: Vec<String> = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                self.sources = parsed;
            }
        }
        if let Some(url) = get("LLM_API_URL") {
            self.llm_api_url = url;
        }
        if let Some(model) = get("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Some(key) = get("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(path) = get("CADENCE_OUTCOME_STORE") {
            self.outcomes.store_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("cadence.new_item_peak_secs", self.cadence.new_item_peak_secs),
            ("cadence.new_item_off_peak_secs", self.cadence.new_item_off_peak_secs),
            ("cadence.reply_peak_secs", self.cadence.reply_peak_secs),
            ("cadence.reply_off_peak_secs", self.cadence.reply_off_peak_secs),
            ("cadence.idle_secs", self.cadence.idle_secs),
            ("cadence.extra_delay_secs", self.cadence.extra_delay_secs),
            ("outcomes.pre_sample_pause_secs", self.outcomes.pre_sample_pause_secs),
        ];
        for (name, [min, max]) in ranges {
            if min > max {
                bail!("{} is inverted: [{}, {}]", name, min, max);
            }
        }

        let weights = [
            ("cadence.new_item_weight", self.cadence.new_item_weight),
            ("cadence.extra_delay_chance", self.cadence.extra_delay_chance),
            ("outcomes.sample_chance", self.outcomes.sample_chance),
        ];
        for (name, value) in weights {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if let Some(hour) = self.cadence.peak_hours.iter().find(|h| **h > 23) {
            bail!("cadence.peak_hours contains {}, hours run 0-23", hour);
        }
        if self.sources.is_empty() {
            bail!("at least one source is required");
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let range = |[min, max]: [u64; 2]| DelayRange::new(min, max);
        SchedulerSettings {
            new_item_daily_limit: self.quota.new_item_daily_limit,
            reply_daily_limit: self.quota.reply_daily_limit,
            exhausted_cooldown: Duration::from_secs(self.quota.exhausted_cooldown_secs),
            cadence: CadenceSettings {
                new_item_weight: self.cadence.new_item_weight,
                peak_hours: self.cadence.peak_hours.clone(),
                new_item_peak: range(self.cadence.new_item_peak_secs),
                new_item_off_peak: range(self.cadence.new_item_off_peak_secs),
                reply_peak: range(self.cadence.reply_peak_secs),
                reply_off_peak: range(self.cadence.reply_off_peak_secs),
                idle: range(self.cadence.idle_secs),
                extra_delay_chance: self.cadence.extra_delay_chance,
                extra_delay: range(self.cadence.extra_delay_secs),
            },
            acquisition: AcquisitionSettings {
                new_item: AcquisitionRule {
                    max_age: Duration::from_secs(self.acquisition.new_item_max_age_secs),
                    min_chars: self.acquisition.new_item_min_chars,
                },
                reply: AcquisitionRule {
                    max_age: Duration::from_secs(self.acquisition.reply_max_age_secs),
                    min_chars: self.acquisition.reply_min_chars,
                },
            },
            sampling: SamplingSettings {
                chance: self.outcomes.sample_chance,
                pause: range(self.outcomes.pre_sample_pause_secs),
                cap: self.outcomes.sample_cap,
            },
            backoff: BackoffPolicy {
                default_rate_limit_wait: Duration::from_secs(
                    self.backoff.default_rate_limit_wait_secs,
                ),
                extra_cooldown: Duration::from_secs(self.backoff.extra_cooldown_secs),
                max_total_wait: self.backoff.max_total_wait_secs.map(Duration::from_secs),
            },
            history_seed_limit: match self.acquisition.history_seed_limit {
                0 => None,
                n => Some(n),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_convert_to_default_scheduler_settings() {
        let config = AgentConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.scheduler_settings(), SchedulerSettings::default());
    }

    #[test]
    fn partial_toml_fills_missing_fields() {
        let config = AgentConfig::from_toml(
            r#"
platform_url = "https://forum.example"
sources = ["advice", "stories"]

[quota]
new_item_daily_limit = 10

[cadence]
peak_hours = [8, 20]
reply_peak_secs = [60, 120]

[backoff]
max_total_wait_secs = 7200
"#,
        )
        .expect("parse");

        assert_eq!(config.platform_url, "https://forum.example");
        assert_eq!(config.quota.new_item_daily_limit, 10);
        assert_eq!(config.quota.reply_daily_limit, 50);
        assert_eq!(config.cadence.new_item_weight, 0.7);

        let settings = config.scheduler_settings();
        assert_eq!(settings.cadence.reply_peak, DelayRange::new(60, 120));
        assert_eq!(
            settings.backoff.max_total_wait,
            Some(Duration::from_secs(7200))
        );
        assert_eq!(settings.history_seed_limit, Some(1000));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AgentConfig::default();
        let vars: HashMap<&str, &str> = [
            ("CADENCE_PLATFORM_URL", "https://other.example"),
            ("CADENCE_SOURCES", "advice, , stories"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_MODEL", "   "),
            ("CADENCE_OUTCOME_STORE", "/tmp/outcomes.json"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.platform_url, "https://other.example");
        assert_eq!(config.sources, vec!["advice", "stories"]);
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm_model, default_llm_model());
        assert_eq!(config.outcomes.store_path, "/tmp/outcomes.json");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AgentConfig::default();
        config.cadence.idle_secs = [900, 600];
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.cadence.new_item_weight = 1.5;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.cadence.peak_hours = vec![8, 24];
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_seed_limit_reads_full_history() {
        let mut config = AgentConfig::default();
        config.acquisition.history_seed_limit = 0;
        assert_eq!(config.scheduler_settings().history_seed_limit, None);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig::load_from(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.quota.exhausted_cooldown_secs, 43200);
    }
}
