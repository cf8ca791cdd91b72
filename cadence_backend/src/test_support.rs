//! In-crate fakes for the platform and generator seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::generator::ContentGenerator;
use crate::platform::{
    is_eligible, ActionCategory, Confirmation, HistoryItem, Identity, PlatformClient, Snippet,
    SubmissionFailure, Target,
};

pub fn sample_target(id: &str, age_minutes: i64, body_len: usize) -> Target {
    Target {
        id: id.to_string(),
        thread_id: id.to_string(),
        title: format!("Thread {}", id),
        body: "b".repeat(body_len),
        score: 1,
        origin: "general".to_string(),
        url: Some(format!("https://forum.example/threads/{}", id)),
        created_at: Utc::now() - ChronoDuration::minutes(age_minutes),
    }
}

pub fn history_item(
    id: &str,
    parent_category: ActionCategory,
    parent_id: &str,
    score: i64,
    age_hours: u64,
) -> HistoryItem {
    HistoryItem {
        id: id.to_string(),
        parent_category,
        parent_id: parent_id.to_string(),
        score,
        age_seconds: age_hours * 3600,
        body: format!("body of {}", id),
        title: format!("title of {}", parent_id),
        origin: "general".to_string(),
        url: Some(format!("https://forum.example/threads/{}", parent_id)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Authenticate,
    ListCandidates(ActionCategory),
    ContextSnippets(String),
    Submit(ActionCategory, String),
    FetchOwnHistory(Option<usize>),
}

#[derive(Default)]
struct FakeState {
    candidates: HashMap<ActionCategory, Vec<Target>>,
    submissions: VecDeque<std::result::Result<Confirmation, SubmissionFailure>>,
    history: Vec<HistoryItem>,
    fail_auth: bool,
    calls: Vec<PlatformCall>,
}

/// Scripted platform. Submissions succeed unless a scripted result is queued.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candidates(&self, category: ActionCategory, targets: Vec<Target>) {
        self.state
            .lock()
            .unwrap()
            .candidates
            .insert(category, targets);
    }

    pub fn script_submissions(
        &self,
        results: Vec<std::result::Result<Confirmation, SubmissionFailure>>,
    ) {
        self.state.lock().unwrap().submissions.extend(results);
    }

    pub fn set_history(&self, history: Vec<HistoryItem>) {
        self.state.lock().unwrap().history = history;
    }

    pub fn fail_authentication(&self) {
        self.state.lock().unwrap().fail_auth = true;
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PlatformCall::Submit(..)))
            .count()
    }

    fn record(&self, call: PlatformCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authenticate(&self) -> Result<Identity> {
        self.record(PlatformCall::Authenticate);
        if self.state.lock().unwrap().fail_auth {
            return Err(anyhow!("401 - bad token"));
        }
        Ok(Identity {
            id: "agent-1".to_string(),
            name: "cadence".to_string(),
        })
    }

    async fn list_candidates(
        &self,
        category: ActionCategory,
        freshness_ceiling: Duration,
        min_substance: usize,
    ) -> Result<Vec<Target>> {
        self.record(PlatformCall::ListCandidates(category));
        let now = Utc::now();
        let state = self.state.lock().unwrap();
        Ok(state
            .candidates
            .get(&category)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| is_eligible(t, now, freshness_ceiling, min_substance))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn context_snippets(&self, target: &Target) -> Result<Vec<Snippet>> {
        self.record(PlatformCall::ContextSnippets(target.id.clone()));
        Ok(vec![Snippet {
            body: "an earlier remark".to_string(),
            score: 4,
        }])
    }

    async fn submit(
        &self,
        category: ActionCategory,
        target: &Target,
        _content: &str,
    ) -> std::result::Result<Confirmation, SubmissionFailure> {
        self.record(PlatformCall::Submit(category, target.id.clone()));
        let scripted = self.state.lock().unwrap().submissions.pop_front();
        scripted.unwrap_or_else(|| {
            Ok(Confirmation {
                id: format!("c-{}", target.id),
                url: target.url.clone(),
            })
        })
    }

    async fn fetch_own_history(&self, limit: Option<usize>) -> Result<Vec<HistoryItem>> {
        self.record(PlatformCall::FetchOwnHistory(limit));
        let history = self.state.lock().unwrap().history.clone();
        Ok(match limit {
            Some(n) => history.into_iter().take(n).collect(),
            None => history,
        })
    }
}

/// Generator returning queued outputs, then a fixed reply.
#[derive(Default)]
pub struct FakeGenerator {
    outputs: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<(ActionCategory, String)>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outputs: Vec<Result<String>>) {
        self.outputs.lock().unwrap().extend(outputs);
    }

    pub fn calls(&self) -> Vec<(ActionCategory, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        target: &Target,
        _snippets: &[Snippet],
        category: ActionCategory,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((category, target.id.clone()));
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("thoughts on {}", target.id)))
    }
}
