use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    is_eligible, ActionCategory, Confirmation, HistoryItem, Identity, PlatformClient, Snippet,
    SubmissionFailure, Target,
};

/// Threads inspected per source when looking for a new-item target.
const THREAD_SCAN_LIMIT: usize = 25;
const RECENT_POST_SCAN_LIMIT: usize = 50;
const MAX_CONTEXT_SNIPPETS: usize = 20;
const DEFAULT_ORIGIN: &str = "forum";

// ========================================================================
// Forum API Types
// ========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDetails {
    pub thread: ThreadSummary,
    #[serde(default)]
    pub posts: Vec<PostView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub author_peer_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub parent_post_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PostMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub id: String,
    pub alias: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreatePostInput {
    pub thread_id: String,
    pub body: String,
    #[serde(default)]
    pub parent_post_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PostMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPostView {
    pub post: PostView,
    pub thread_title: String,
    #[serde(default)]
    pub thread_topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPostsResponse {
    pub posts: Vec<RecentPostView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResponse {
    pub post: PostView,
}

// ========================================================================
// Forum Client
// ========================================================================

pub struct ForumClient {
    base_url: String,
    token: Option<String>,
    username: String,
    sources: Vec<String>,
    client: Client,
    self_peer: OnceLock<PeerView>,
}

impl ForumClient {
    pub fn new(
        base_url: String,
        token: Option<String>,
        username: String,
        sources: Vec<String>,
        client: Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            username,
            sources,
            client,
            self_peer: OnceLock::new(),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn permalink(&self, thread_id: &str, post_id: Option<&str>) -> String {
        match post_id {
            Some(post_id) => format!("{}/threads/{}#{}", self.base_url, thread_id, post_id),
            None => format!("{}/threads/{}", self.base_url, thread_id),
        }
    }

    pub async fn list_threads(&self, topic: Option<&str>) -> Result<Vec<ThreadSummary>> {
        let url = format!("{}/threads", self.base_url);
        let mut req = self.request(Method::GET, &url);
        if let Some(topic) = topic {
            req = req.query(&[("topic", topic)]);
        }
        let response = req.send().await?.error_for_status()?;
        let threads = response.json().await?;
        Ok(threads)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetails> {
        let url = format!("{}/threads/{}", self.base_url, thread_id);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await?
            .error_for_status()?;
        let thread = response.json().await?;
        Ok(thread)
    }

    pub async fn get_recent_posts(&self, limit: usize) -> Result<RecentPostsResponse> {
        let url = format!("{}/posts/recent?limit={}", self.base_url, limit);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await?
            .error_for_status()?;
        let posts = response.json().await?;
        Ok(posts)
    }

    pub async fn create_post(
        &self,
        input: CreatePostInput,
    ) -> std::result::Result<PostView, SubmissionFailure> {
        let url = format!("{}/threads/{}/posts", self.base_url, input.thread_id);
        let response = self
            .request(Method::POST, &url)
            .json(&input)
            .send()
            .await
            .map_err(|e| SubmissionFailure::Other(format!("transport error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, retry_after.as_deref(), &body));
        }

        let response_wrapper: PostResponse = response
            .json()
            .await
            .map_err(|e| SubmissionFailure::Other(format!("unreadable post response: {}", e)))?;
        Ok(response_wrapper.post)
    }

    pub async fn get_self_peer(&self) -> Result<PeerView> {
        if let Some(peer) = self.self_peer.get() {
            return Ok(peer.clone());
        }

        let url = format!("{}/peers/self", self.base_url);
        let response = self.request(Method::GET, &url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to get self peer: {} - {}", status, body);
        }

        let peer: PeerView = response.json().await?;
        let _ = self.self_peer.set(peer.clone());
        Ok(peer)
    }

    pub async fn get_own_posts(&self, limit: Option<usize>) -> Result<RecentPostsResponse> {
        let peer = self.get_self_peer().await?;
        let url = format!("{}/peers/{}/posts", self.base_url, peer.id);
        let mut req = self.request(Method::GET, &url);
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        let response = req.send().await?.error_for_status()?;
        let posts = response.json().await?;
        Ok(posts)
    }

    fn is_own_post(&self, post: &PostView, self_id: Option<&str>) -> bool {
        let by_peer = matches!(
            (post.author_peer_id.as_deref(), self_id),
            (Some(author), Some(me)) if author == me
        );
        let by_metadata = post
            .metadata
            .as_ref()
            .and_then(|m| m.agent.as_ref())
            .map(|a| a.name == self.username)
            .unwrap_or(false);
        by_peer || by_metadata
    }

    fn source_order(&self) -> Vec<Option<String>> {
        if self.sources.is_empty() {
            return vec![None];
        }
        let mut sources: Vec<Option<String>> = self.sources.iter().cloned().map(Some).collect();
        sources.shuffle(&mut rand::thread_rng());
        sources
    }

    /// Walk the sources in shuffled order, opening fresh threads until
    /// `limit` eligible new-item targets are found (`None` means all).
    async fn new_item_candidates(
        &self,
        freshness_ceiling: Duration,
        min_substance: usize,
        skip: &(dyn for<'s> Fn(&'s str) -> bool + Sync),
        limit: Option<usize>,
    ) -> Vec<Target> {
        let now = Utc::now();
        let sources = self.source_order();
        let total = sources.len();
        let mut candidates: Vec<Target> = Vec::new();

        for (i, source) in sources.into_iter().enumerate() {
            let remaining = limit.map(|limit| limit.saturating_sub(candidates.len()));
            if remaining == Some(0) {
                break;
            }

            let label = source.as_deref().unwrap_or(DEFAULT_ORIGIN);
            tracing::debug!("[{}/{}] Checking source '{}'", i + 1, total, label);

            let threads = match self.list_threads(source.as_deref()).await {
                Ok(threads) => threads,
                Err(e) => {
                    tracing::warn!("Error accessing source '{}': {:#}", label, e);
                    continue;
                }
            };

            let to_open = threads_to_open(threads, now, freshness_ceiling, skip);
            let found = open_threads(
                to_open,
                label,
                now,
                freshness_ceiling,
                min_substance,
                remaining,
                move |thread_id: String| async move { self.get_thread(&thread_id).await },
            )
            .await;

            if found.is_empty() {
                tracing::debug!("No eligible posts in source '{}'", label);
            }
            candidates.extend(found.into_iter().map(|mut target| {
                target.url = Some(self.permalink(&target.thread_id, None));
                target
            }));
        }

        candidates
    }

    async fn reply_candidates(
        &self,
        freshness_ceiling: Duration,
        min_substance: usize,
    ) -> Result<Vec<Target>> {
        let now = Utc::now();
        let self_id = self.self_peer.get().map(|p| p.id.clone());
        let recent = self.get_recent_posts(RECENT_POST_SCAN_LIMIT).await?;

        let candidates = recent
            .posts
            .into_iter()
            .filter(|view| !self.is_own_post(&view.post, self_id.as_deref()))
            .filter(|view| {
                self.sources.is_empty()
                    || view.thread_topic.as_ref().is_some_and(|topic| {
                        self.sources.iter().any(|s| s.eq_ignore_ascii_case(topic))
                    })
            })
            .map(|view| Target {
                url: Some(self.permalink(&view.post.thread_id, Some(&view.post.id))),
                id: view.post.id,
                thread_id: view.post.thread_id,
                title: view.thread_title,
                body: view.post.body,
                score: view.post.score,
                origin: view
                    .thread_topic
                    .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
                created_at: view.post.created_at,
            })
            .filter(|target| is_eligible(target, now, freshness_ceiling, min_substance))
            .collect();

        Ok(candidates)
    }
}

/// Map a non-success submission response onto the failure taxonomy.
/// Threads worth opening: within the per-source scan limit, unlocked, fresh,
/// and not rejected by `skip`. Uses only the listing, no extra requests.
fn threads_to_open(
    threads: Vec<ThreadSummary>,
    now: DateTime<Utc>,
    freshness_ceiling: Duration,
    skip: &dyn Fn(&str) -> bool,
) -> Vec<ThreadSummary> {
    threads
        .into_iter()
        .take(THREAD_SCAN_LIMIT)
        .filter(|t| !t.locked)
        .filter(|t| {
            (now - t.created_at)
                .to_std()
                .map(|age| age < freshness_ceiling)
                .unwrap_or(true)
        })
        .filter(|t| !skip(&t.id))
        .collect()
}

/// Fetch threads in order and turn their opening posts into targets,
/// stopping as soon as `limit` eligible ones are found.
async fn open_threads<F, Fut>(
    threads: Vec<ThreadSummary>,
    origin: &str,
    now: DateTime<Utc>,
    freshness_ceiling: Duration,
    min_substance: usize,
    limit: Option<usize>,
    mut fetch: F,
) -> Vec<Target>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<ThreadDetails>>,
{
    let mut targets = Vec::new();
    for thread in threads {
        if limit.is_some_and(|limit| targets.len() >= limit) {
            break;
        }
        let details = match fetch(thread.id.clone()).await {
            Ok(details) => details,
            Err(e) => {
                tracing::debug!("Skipping thread {}: {:#}", thread.id, e);
                continue;
            }
        };
        let Some(opening) = details.posts.into_iter().find(|p| p.parent_post_ids.is_empty())
        else {
            continue;
        };
        let target = Target {
            id: thread.id.clone(),
            thread_id: thread.id,
            title: thread.title,
            body: opening.body,
            score: thread.score,
            origin: thread.topic.unwrap_or_else(|| origin.to_string()),
            url: None,
            created_at: thread.created_at,
        };
        if is_eligible(&target, now, freshness_ceiling, min_substance) {
            targets.push(target);
        }
    }
    targets
}

pub fn classify_rejection(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> SubmissionFailure {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, body.trim())
    };

    if status == StatusCode::TOO_MANY_REQUESTS || body.to_ascii_uppercase().contains("RATELIMIT")
    {
        let suggested_wait = retry_after
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return SubmissionFailure::RateLimited {
            suggested_wait,
            detail,
        };
    }

    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::LOCKED
        || status == StatusCode::GONE
        || (status == StatusCode::FORBIDDEN && lowered.contains("locked"))
    {
        return SubmissionFailure::Locked(detail);
    }

    SubmissionFailure::Other(detail)
}

fn history_item_from(view: RecentPostView, now: DateTime<Utc>, url: String) -> HistoryItem {
    let (parent_category, parent_id) = match view.post.parent_post_ids.first() {
        Some(parent) => (ActionCategory::Reply, parent.clone()),
        None => (ActionCategory::NewItem, view.post.thread_id.clone()),
    };
    HistoryItem {
        id: view.post.id,
        parent_category,
        parent_id,
        score: view.post.score,
        age_seconds: (now - view.post.created_at).num_seconds().max(0) as u64,
        body: view.post.body,
        title: view.thread_title,
        origin: view
            .thread_topic
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
        url: Some(url),
    }
}

#[async_trait]
impl PlatformClient for ForumClient {
    fn name(&self) -> &str {
        "forum"
    }

    async fn authenticate(&self) -> Result<Identity> {
        let peer = self
            .get_self_peer()
            .await
            .with_context(|| format!("Failed to authenticate against {}", self.base_url))?;
        Ok(Identity {
            name: peer
                .username
                .clone()
                .or(peer.alias.clone())
                .unwrap_or_else(|| self.username.clone()),
            id: peer.id,
        })
    }

    async fn list_candidates(
        &self,
        category: ActionCategory,
        freshness_ceiling: Duration,
        min_substance: usize,
    ) -> Result<Vec<Target>> {
        match category {
            ActionCategory::NewItem => Ok(self
                .new_item_candidates(freshness_ceiling, min_substance, &|_: &str| false, None)
                .await),
            ActionCategory::Reply => self.reply_candidates(freshness_ceiling, min_substance).await,
        }
    }

    async fn find_candidate(
        &self,
        category: ActionCategory,
        freshness_ceiling: Duration,
        min_substance: usize,
        skip: &(dyn for<'s> Fn(&'s str) -> bool + Sync),
    ) -> Result<Option<Target>> {
        match category {
            ActionCategory::NewItem => Ok(self
                .new_item_candidates(freshness_ceiling, min_substance, skip, Some(1))
                .await
                .into_iter()
                .next()),
            ActionCategory::Reply => Ok(self
                .reply_candidates(freshness_ceiling, min_substance)
                .await?
                .into_iter()
                .find(|target| !skip(&target.id))),
        }
    }

    async fn context_snippets(&self, target: &Target) -> Result<Vec<Snippet>> {
        let details = self.get_thread(&target.thread_id).await?;
        let mut snippets: Vec<Snippet> = details
            .posts
            .into_iter()
            .filter(|p| p.id != target.id && !p.parent_post_ids.is_empty())
            .map(|p| Snippet {
                body: p.body,
                score: p.score,
            })
            .collect();
        snippets.sort_by(|a, b| b.score.cmp(&a.score));
        snippets.truncate(MAX_CONTEXT_SNIPPETS);
        Ok(snippets)
    }

    async fn submit(
        &self,
        category: ActionCategory,
        target: &Target,
        content: &str,
    ) -> std::result::Result<Confirmation, SubmissionFailure> {
        let parent_post_ids = match category {
            ActionCategory::NewItem => Vec::new(),
            ActionCategory::Reply => vec![target.id.clone()],
        };
        let input = CreatePostInput {
            thread_id: target.thread_id.clone(),
            body: content.to_string(),
            parent_post_ids,
            metadata: Some(PostMetadata {
                agent: Some(AgentInfo {
                    name: self.username.clone(),
                    version: Some(env!("CARGO_PKG_VERSION").to_string()),
                }),
                client: Some("cadence".to_string()),
            }),
        };

        let posted = self.create_post(input).await?;
        Ok(Confirmation {
            url: Some(self.permalink(&posted.thread_id, Some(&posted.id))),
            id: posted.id,
        })
    }

    async fn fetch_own_history(&self, limit: Option<usize>) -> Result<Vec<HistoryItem>> {
        let now = Utc::now();
        let own = self
            .get_own_posts(limit)
            .await
            .context("Failed to fetch own post history")?;
        Ok(own
            .posts
            .into_iter()
            .map(|view| {
                let url = self.permalink(&view.post.thread_id, Some(&view.post.id));
                history_item_from(view, now, url)
            })
            .collect())
    }
}
