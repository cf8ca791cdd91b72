pub mod forum;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of action the agent can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// A new top-level remark on a post.
    NewItem,
    /// A reply to an existing remark.
    Reply,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 2] = [ActionCategory::NewItem, ActionCategory::Reply];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionCategory::NewItem => "new_item",
            ActionCategory::Reply => "reply",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item the agent may act on. Obtained from the platform, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Thread the item lives in; equal to `id` for a top-level post.
    pub thread_id: String,
    pub title: String,
    pub body: String,
    pub score: i64,
    /// Topic or community the item was found in.
    pub origin: String,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Target {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Freshness and substance filter shared by platform clients and target acquisition.
pub fn is_eligible(
    target: &Target,
    now: DateTime<Utc>,
    freshness_ceiling: Duration,
    min_substance: usize,
) -> bool {
    target.age(now) < freshness_ceiling && target.body.chars().count() > min_substance
}

/// A piece of surrounding discussion handed to the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub body: String,
    pub score: i64,
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One of the agent's own previously submitted items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    /// What the item was a response to: a post (new item) or a remark (reply).
    pub parent_category: ActionCategory,
    /// Identifier of the post or remark the item responded to.
    pub parent_id: String,
    pub score: i64,
    pub age_seconds: u64,
    pub body: String,
    pub title: String,
    pub origin: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl HistoryItem {
    pub fn age_hours(&self) -> f64 {
        self.age_seconds as f64 / 3600.0
    }
}

/// The authenticated account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

/// Why the platform refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionFailure {
    #[error("rate limited: {detail}")]
    RateLimited {
        suggested_wait: Option<Duration>,
        detail: String,
    },
    #[error("target no longer accepts submissions: {0}")]
    Locked(String),
    #[error("submission failed: {0}")]
    Other(String),
}

/// Network binding to the remote service the agent acts on.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Verify credentials and return the account the agent acts as.
    async fn authenticate(&self) -> Result<Identity>;

    /// List items of `category` younger than `freshness_ceiling` whose body is
    /// longer than `min_substance` characters, in the order they should be tried.
    async fn list_candidates(
        &self,
        category: ActionCategory,
        freshness_ceiling: Duration,
        min_substance: usize,
    ) -> Result<Vec<Target>>;

    /// First candidate of `category`, in `list_candidates` order, whose id
    /// `skip` does not reject. Clients that pay a request per item should
    /// override this to stop fetching once a target is found.
    async fn find_candidate(
        &self,
        category: ActionCategory,
        freshness_ceiling: Duration,
        min_substance: usize,
        skip: &(dyn for<'s> Fn(&'s str) -> bool + Sync),
    ) -> Result<Option<Target>> {
        let candidates = self
            .list_candidates(category, freshness_ceiling, min_substance)
            .await?;
        Ok(candidates.into_iter().find(|c| !skip(&c.id)))
    }

    /// Surrounding discussion for a target.
    async fn context_snippets(&self, target: &Target) -> Result<Vec<Snippet>>;

    async fn submit(
        &self,
        category: ActionCategory,
        target: &Target,
        content: &str,
    ) -> std::result::Result<Confirmation, SubmissionFailure>;

    /// Newest-first history of the agent's own items; `None` means no limit.
    async fn fetch_own_history(&self, limit: Option<usize>) -> Result<Vec<HistoryItem>>;
}
