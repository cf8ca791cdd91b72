use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::agent::{ActionOutcome, ActionScheduler, AgentEvent};
use crate::config::AgentConfig;
use crate::generator::{ContentGenerator, LlmContentGenerator};
use crate::http_client::build_http_client;
use crate::llm_client::LlmClient;
use crate::outcomes::OutcomeStore;
use crate::platform::forum::ForumClient;
use crate::platform::{Identity, PlatformClient};

pub struct AgentRuntime {
    pub config: AgentConfig,
    pub identity: Identity,
    pub scheduler: ActionScheduler,
}

pub struct AgentRuntimeBuilder {
    config: AgentConfig,
    event_tx: Sender<AgentEvent>,
    platform: Option<Arc<dyn PlatformClient>>,
    generator: Option<Arc<dyn ContentGenerator>>,
    seed: Option<u64>,
}

impl AgentRuntimeBuilder {
    pub fn new(config: AgentConfig, event_tx: Sender<AgentEvent>) -> Self {
        Self {
            config,
            event_tx,
            platform: None,
            generator: None,
            seed: None,
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn PlatformClient>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Fix the scheduler's RNG seed so a run's choices can be replayed.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Authentication failure is fatal; history seeding failure is not.
    pub async fn build(self) -> Result<AgentRuntime> {
        let config = self.config;
        config.validate().context("Invalid configuration")?;

        let platform = match self.platform {
            Some(platform) => platform,
            None => {
                tracing::info!(
                    "Forum platform: {} (sources: {})",
                    config.platform_url,
                    config.sources.join(", ")
                );
                Arc::new(ForumClient::new(
                    config.platform_url.clone(),
                    config.platform_token.clone(),
                    config.username.clone(),
                    config.sources.clone(),
                    build_http_client()?,
                )) as Arc<dyn PlatformClient>
            }
        };

        let generator = match self.generator {
            Some(generator) => generator,
            None => {
                tracing::info!("LLM generator: {} at {}", config.llm_model, config.llm_api_url);
                let client = LlmClient::new(
                    config.llm_api_url.clone(),
                    config.llm_api_key.clone().unwrap_or_default(),
                    config.llm_model.clone(),
                    build_http_client()?,
                );
                Arc::new(LlmContentGenerator::new(client, config.system_prompt.clone()))
                    as Arc<dyn ContentGenerator>
            }
        };

        let identity = platform
            .authenticate()
            .await
            .with_context(|| format!("Failed to authenticate with {}", platform.name()))?;
        tracing::info!("Authenticated as {} ({})", identity.name, identity.id);

        let outcomes = OutcomeStore::open(&config.outcomes.store_path);
        let rng = match self.seed {
            Some(seed) => {
                tracing::info!("Using fixed scheduler seed {}", seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };

        let mut scheduler = ActionScheduler::new(
            platform,
            generator,
            config.scheduler_settings(),
            outcomes,
            rng,
            self.event_tx,
        );
        if let Err(e) = scheduler.seed_from_history().await {
            tracing::warn!("Starting with an empty dedup registry: {:#}", e);
        }

        Ok(AgentRuntime {
            config,
            identity,
            scheduler,
        })
    }
}

impl AgentRuntime {
    /// Drain events into the action ledger until every sender is gone.
    pub fn spawn_action_ledger(&self, event_rx: Receiver<AgentEvent>) -> JoinHandle<()> {
        let path = PathBuf::from(&self.config.outcomes.action_log_path);
        tokio::spawn(record_actions(event_rx, path))
    }

    pub async fn run(self) -> Result<()> {
        self.scheduler.run_loop().await
    }
}

/// Append the link of every successful action to `path`, one per line.
pub async fn record_actions(event_rx: Receiver<AgentEvent>, path: PathBuf) {
    while let Ok(event) = event_rx.recv_async().await {
        match event {
            AgentEvent::Action(record) => {
                let ActionOutcome::Success { url, .. } = &record.outcome else {
                    continue;
                };
                let Some(link) = url.as_ref().or(record.target_url.as_ref()) else {
                    tracing::debug!("Action {} has no link to record", record.id);
                    continue;
                };
                if let Err(e) = append_line(&path, link).await {
                    tracing::warn!("Failed to record action {} in {:?}: {:#}", record.id, path, e);
                }
            }
            AgentEvent::Observation(text) => tracing::debug!("{}", text),
            AgentEvent::OutcomesSampled(report) => {
                tracing::debug!("Outcome sample: {:?}", report)
            }
            AgentEvent::Error(text) => tracing::debug!("Agent error event: {}", text),
        }
    }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {:?}", path))?;
    file.write_all(format!("{}\n", line).as_bytes())
        .await
        .with_context(|| format!("Failed to append to {:?}", path))?;
    Ok(())
}
