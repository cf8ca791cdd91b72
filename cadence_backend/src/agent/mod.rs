pub mod backoff;
pub mod cadence;
pub mod dedup;
pub mod quota;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use flume::Sender;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::time::sleep;
use uuid::Uuid;

use crate::generator::ContentGenerator;
use crate::outcomes::sampling::{sample_outcomes, SamplingReport};
use crate::outcomes::OutcomeStore;
use crate::platform::{is_eligible, ActionCategory, PlatformClient, Target};

use self::backoff::{BackoffController, BackoffPolicy, SubmissionOutcome};
use self::cadence::{
    choose_category, inter_action_delay, roll_chance, CadenceSettings, DelayRange,
};
use self::dedup::DedupRegistry;
use self::quota::QuotaTracker;

const MIN_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Observation(String),
    Action(ActionRecord),
    OutcomesSampled(SamplingReport),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success {
        confirmation_id: String,
        url: Option<String>,
    },
    Failed {
        detail: String,
    },
    Abandoned {
        detail: String,
    },
}

/// One iteration's action, emitted as an event and then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub category: ActionCategory,
    pub target_id: String,
    pub target_url: Option<String>,
    pub content: String,
    pub outcome: ActionOutcome,
}

impl ActionRecord {
    fn new(
        category: ActionCategory,
        target: &Target,
        content: &str,
        outcome: ActionOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            target_id: target.id.clone(),
            target_url: target.url.clone(),
            content: content.to_string(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Both categories were out of quota; nothing was attempted.
    QuotaExhausted,
    NoTarget(ActionCategory),
    GenerationFailed(ActionCategory),
    Submitted(ActionCategory),
    Abandoned(ActionCategory),
}

impl IterationOutcome {
    /// Category of an action that reached the platform, if any.
    fn acted_category(&self) -> Option<ActionCategory> {
        match self {
            IterationOutcome::Submitted(c) | IterationOutcome::Abandoned(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionRule {
    /// Candidates must be younger than this.
    pub max_age: Duration,
    /// Candidates' bodies must be longer than this many characters.
    pub min_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionSettings {
    pub new_item: AcquisitionRule,
    pub reply: AcquisitionRule,
}

impl AcquisitionSettings {
    pub fn rule(&self, category: ActionCategory) -> AcquisitionRule {
        match category {
            ActionCategory::NewItem => self.new_item,
            ActionCategory::Reply => self.reply,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            new_item: AcquisitionRule {
                max_age: Duration::from_secs(2 * 3600),
                min_chars: 100,
            },
            reply: AcquisitionRule {
                max_age: Duration::from_secs(3600),
                min_chars: 40,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingSettings {
    pub chance: f64,
    /// Pause taken before a sampling pass.
    pub pause: DelayRange,
    pub cap: Option<usize>,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            chance: 1.0 / 30.0,
            pause: DelayRange::new(240, 600),
            cap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub new_item_daily_limit: u32,
    pub reply_daily_limit: u32,
    /// Sleep after an iteration that found both quotas exhausted.
    pub exhausted_cooldown: Duration,
    pub cadence: CadenceSettings,
    pub acquisition: AcquisitionSettings,
    pub sampling: SamplingSettings,
    pub backoff: BackoffPolicy,
    pub history_seed_limit: Option<usize>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            new_item_daily_limit: 50,
            reply_daily_limit: 50,
            exhausted_cooldown: Duration::from_secs(12 * 3600),
            cadence: CadenceSettings::default(),
            acquisition: AcquisitionSettings::default(),
            sampling: SamplingSettings::default(),
            backoff: BackoffPolicy::default(),
            history_seed_limit: Some(1000),
        }
    }
}

/// Owns all scheduling state. Driven by a single loop; nothing here is shared.
pub struct ActionScheduler {
    platform: Arc<dyn PlatformClient>,
    generator: Arc<dyn ContentGenerator>,
    settings: SchedulerSettings,
    quota: QuotaTracker,
    dedup: DedupRegistry,
    backoff: BackoffController,
    outcomes: OutcomeStore,
    rng: StdRng,
    event_tx: Sender<AgentEvent>,
}

impl ActionScheduler {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        generator: Arc<dyn ContentGenerator>,
        settings: SchedulerSettings,
        outcomes: OutcomeStore,
        rng: StdRng,
        event_tx: Sender<AgentEvent>,
    ) -> Self {
        let quota = QuotaTracker::new(
            settings.new_item_daily_limit,
            settings.reply_daily_limit,
            Utc::now(),
        );
        let backoff = BackoffController::new(settings.backoff.clone());
        Self {
            platform,
            generator,
            settings,
            quota,
            dedup: DedupRegistry::new(),
            backoff,
            outcomes,
            rng,
            event_tx,
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn dedup(&self) -> &DedupRegistry {
        &self.dedup
    }

    pub fn outcomes(&self) -> &OutcomeStore {
        &self.outcomes
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Mark everything the agent has already responded to. Returns the number
    /// of history items read.
    pub async fn seed_from_history(&mut self) -> Result<usize> {
        let history = self
            .platform
            .fetch_own_history(self.settings.history_seed_limit)
            .await
            .context("Failed to fetch own history for dedup seeding")?;
        self.dedup.seed_from_history(&history);
        tracing::info!(
            "Seeded dedup registry from {} history items ({} posts, {} remarks)",
            history.len(),
            self.dedup.len(ActionCategory::NewItem),
            self.dedup.len(ActionCategory::Reply)
        );
        Ok(history.len())
    }

    /// First fresh, substantial candidate of `category` not yet acted upon.
    pub async fn acquire_target(
        &self,
        category: ActionCategory,
        now: DateTime<Utc>,
    ) -> Result<Option<Target>> {
        let rule = self.settings.acquisition.rule(category);
        let dedup = &self.dedup;
        let already_acted = move |id: &str| dedup.contains(category, id);
        let candidate = self
            .platform
            .find_candidate(category, rule.max_age, rule.min_chars, &already_acted)
            .await
            .with_context(|| format!("Failed to find a {} candidate", category))?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };
        if dedup.contains(category, &candidate.id) {
            tracing::debug!("Skipping {} {}: already acted on", category, candidate.id);
            return Ok(None);
        }
        if !is_eligible(&candidate, now, rule.max_age, rule.min_chars) {
            tracing::debug!("Skipping {} {}: stale or too short", category, candidate.id);
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    /// One pass of select, acquire, generate, submit, and maybe sample.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        let now = Utc::now();
        if self.quota.roll_window(now) {
            tracing::info!("Quota window rolled over; counters reset");
            self.emit(AgentEvent::Observation("Daily quota reset".to_string()));
        }

        let Some(category) =
            choose_category(&self.quota, self.settings.cadence.new_item_weight, &mut self.rng)
        else {
            tracing::info!(
                "Daily limits reached ({}/{} new items, {}/{} replies)",
                self.quota.count(ActionCategory::NewItem),
                self.quota.limit(ActionCategory::NewItem),
                self.quota.count(ActionCategory::Reply),
                self.quota.limit(ActionCategory::Reply)
            );
            self.emit(AgentEvent::Observation(
                "Daily limits reached, cooling down".to_string(),
            ));
            return IterationOutcome::QuotaExhausted;
        };

        let outcome = self.act(category, now).await;
        self.maybe_sample_outcomes().await;
        outcome
    }

    async fn act(&mut self, category: ActionCategory, now: DateTime<Utc>) -> IterationOutcome {
        let target = match self.acquire_target(category, now).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                tracing::info!("No eligible {} target found", category);
                self.emit(AgentEvent::Observation(format!(
                    "No eligible {} target",
                    category
                )));
                return IterationOutcome::NoTarget(category);
            }
            Err(e) => {
                tracing::warn!("Target acquisition failed: {:#}", e);
                self.emit(AgentEvent::Error(e.to_string()));
                return IterationOutcome::NoTarget(category);
            }
        };
        tracing::info!(
            "Selected {} target {} in {}: {}",
            category,
            target.id,
            target.origin,
            target.title
        );

        let snippets = match self.platform.context_snippets(&target).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!("No context for {}: {:#}", target.id, e);
                Vec::new()
            }
        };

        let content = match self.generator.generate(&target, &snippets, category).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Generation for {} failed: {:#}", target.id, e);
                String::new()
            }
        };
        if content.is_empty() {
            tracing::warn!("No content generated for {}, skipping", target.id);
            self.emit(AgentEvent::Action(ActionRecord::new(
                category,
                &target,
                &content,
                ActionOutcome::Failed {
                    detail: "no content generated".to_string(),
                },
            )));
            return IterationOutcome::GenerationFailed(category);
        }

        match self
            .backoff
            .submit(self.platform.as_ref(), category, &target, &content)
            .await
        {
            SubmissionOutcome::Posted {
                confirmation,
                attempts,
            } => {
                self.dedup.add(category, target.id.clone());
                self.quota.increment(category);
                tracing::info!(
                    "Submitted {} on {} as {} after {} attempt(s) ({}/{} today)",
                    category,
                    target.id,
                    confirmation.id,
                    attempts,
                    self.quota.count(category),
                    self.quota.limit(category)
                );
                self.emit(AgentEvent::Action(ActionRecord::new(
                    category,
                    &target,
                    &content,
                    ActionOutcome::Success {
                        confirmation_id: confirmation.id,
                        url: confirmation.url.or_else(|| target.url.clone()),
                    },
                )));
                IterationOutcome::Submitted(category)
            }
            SubmissionOutcome::Abandoned { reason, attempts } => {
                let detail = reason.describe();
                tracing::warn!(
                    "Abandoned {} on {} after {} attempt(s): {}",
                    category,
                    target.id,
                    attempts,
                    detail
                );
                self.emit(AgentEvent::Action(ActionRecord::new(
                    category,
                    &target,
                    &content,
                    ActionOutcome::Abandoned { detail },
                )));
                IterationOutcome::Abandoned(category)
            }
        }
    }

    /// Occasionally pause and score past submissions.
    pub async fn maybe_sample_outcomes(&mut self) -> Option<SamplingReport> {
        if !roll_chance(self.settings.sampling.chance, &mut self.rng) {
            return None;
        }
        let pause = self.settings.sampling.pause.sample(&mut self.rng);
        tracing::info!("Pausing {}s before sampling outcomes", pause.as_secs());
        sleep(pause).await;

        match sample_outcomes(
            self.platform.as_ref(),
            &mut self.outcomes,
            self.settings.sampling.cap,
        )
        .await
        {
            Ok(report) => {
                self.emit(AgentEvent::OutcomesSampled(report));
                Some(report)
            }
            Err(e) => {
                tracing::error!("Outcome sampling failed: {:#}", e);
                self.emit(AgentEvent::Error(format!("Outcome sampling failed: {}", e)));
                None
            }
        }
    }

    /// Wait before the next iteration. `local_hour` selects peak or off-peak ranges.
    pub fn next_delay(
        &mut self,
        outcome: &IterationOutcome,
        now: DateTime<Utc>,
        local_hour: u32,
    ) -> Duration {
        match outcome {
            IterationOutcome::QuotaExhausted => self
                .settings
                .exhausted_cooldown
                .min(self.quota.time_until_reset(now))
                .max(MIN_COOLDOWN),
            other => inter_action_delay(
                other.acted_category(),
                local_hour,
                &self.settings.cadence,
                &mut self.rng,
            ),
        }
    }

    pub async fn run_loop(mut self) -> Result<()> {
        tracing::info!("Scheduler loop starting on {}", self.platform.name());
        self.emit(AgentEvent::Observation("Scheduler starting".to_string()));

        loop {
            let outcome = self.run_iteration().await;
            let delay = self.next_delay(&outcome, Utc::now(), Local::now().hour());
            tracing::info!(
                "Iteration ended with {:?}; next in {}m {}s",
                outcome,
                delay.as_secs() / 60,
                delay.as_secs() % 60
            );
            sleep(delay).await;
        }
    }
}
