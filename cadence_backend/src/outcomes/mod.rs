//! Durable record of submitted items that were later received badly.
//!
//! The store is an append log: entries are never updated or removed, and
//! sampling the same item twice produces two entries. The whole file is
//! rewritten on every append, so only the scheduling loop may write to it.

pub mod sampling;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::HistoryItem;

const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    Downvoted,
    Underperforming,
}

impl OutcomeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeReason::Downvoted => "downvoted",
            OutcomeReason::Underperforming => "underperforming",
        }
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeReason {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "downvoted" => Ok(OutcomeReason::Downvoted),
            "underperforming" => Ok(OutcomeReason::Underperforming),
            other => Err(format!(
                "unknown outcome reason '{}' (expected downvoted or underperforming)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub id: String,
    pub body: String,
    pub score: i64,
    pub post_url: String,
    pub post_title: String,
    #[serde(alias = "subreddit")]
    pub origin: String,
    pub reason: OutcomeReason,
    pub age_hours: f64,
    pub stored_at: DateTime<Utc>,
    pub stored_timestamp: f64,
}

impl OutcomeEntry {
    pub fn from_history(item: &HistoryItem, reason: OutcomeReason, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            body: item.body.clone(),
            score: item.score,
            post_url: item.url.clone().unwrap_or_default(),
            post_title: shorten_title(&item.title),
            origin: item.origin.clone(),
            reason,
            age_hours: item.age_hours(),
            stored_at: now,
            stored_timestamp: now.timestamp_millis() as f64 / 1000.0,
        }
    }

    fn mentions(&self, query_lower: &str) -> bool {
        self.body.to_lowercase().contains(query_lower)
            || self.post_title.to_lowercase().contains(query_lower)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub total_stored: u64,
    pub downvoted: u64,
    pub underperforming: u64,
}

impl OutcomeStats {
    pub fn from_entries(entries: &[OutcomeEntry]) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.count(entry.reason);
        }
        stats
    }

    fn count(&mut self, reason: OutcomeReason) {
        self.total_stored += 1;
        match reason {
            OutcomeReason::Downvoted => self.downvoted += 1,
            OutcomeReason::Underperforming => self.underperforming += 1,
        }
    }
}

/// On-disk layout of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeLog {
    #[serde(default)]
    pub comments: Vec<OutcomeEntry>,
    #[serde(default)]
    pub stats: OutcomeStats,
}

/// Operator query over the store; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub reason: Option<OutcomeReason>,
    pub origin: Option<String>,
    pub query: Option<String>,
}

pub struct OutcomeStore {
    path: PathBuf,
    log: OutcomeLog,
}

impl OutcomeStore {
    /// Load the store at `path`. A missing or malformed file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let log = if !path.exists() {
            tracing::info!("No outcome store at {:?}, starting empty", path);
            OutcomeLog::default()
        } else {
            match load_log(&path) {
                Ok(log) => {
                    tracing::info!(
                        "Loaded {} outcome entries from {:?}",
                        log.comments.len(),
                        path
                    );
                    log
                }
                Err(e) => {
                    tracing::warn!("Failed to load outcome store {:?}, starting empty: {:#}", path, e);
                    OutcomeLog::default()
                }
            }
        };
        Self { path, log }
    }

    pub fn entries(&self) -> &[OutcomeEntry] {
        &self.log.comments
    }

    pub fn stats(&self) -> OutcomeStats {
        self.log.stats
    }

    pub fn log(&self) -> &OutcomeLog {
        &self.log
    }

    /// Append one entry and rewrite the file. The in-memory store only
    /// changes once the write has succeeded.
    pub fn append(&mut self, entry: OutcomeEntry) -> Result<&OutcomeEntry> {
        let mut log = self.log.clone();
        log.stats.count(entry.reason);
        log.comments.push(entry);
        write_log(&self.path, &log)?;
        self.log = log;
        self.log
            .comments
            .last()
            .context("outcome entry vanished after append")
    }

    pub fn record(
        &mut self,
        item: &HistoryItem,
        reason: OutcomeReason,
        now: DateTime<Utc>,
    ) -> Result<&OutcomeEntry> {
        self.append(OutcomeEntry::from_history(item, reason, now))
    }

    /// Rebuild stats from the entries. Returns true if they had drifted.
    pub fn recompute_stats(&mut self) -> bool {
        let fresh = OutcomeStats::from_entries(&self.log.comments);
        let drifted = fresh != self.log.stats;
        self.log.stats = fresh;
        drifted
    }

    /// Write the whole store via a sibling temp file and rename.
    pub fn flush(&self) -> Result<()> {
        write_log(&self.path, &self.log)
    }

    pub fn by_reason(&self, reason: OutcomeReason) -> Vec<&OutcomeEntry> {
        self.entries().iter().filter(|e| e.reason == reason).collect()
    }

    pub fn by_origin(&self, origin: &str) -> Vec<&OutcomeEntry> {
        self.entries()
            .iter()
            .filter(|e| e.origin.eq_ignore_ascii_case(origin))
            .collect()
    }

    /// Case-insensitive substring match over body and post title.
    pub fn search(&self, query: &str) -> Vec<&OutcomeEntry> {
        let query_lower = query.to_lowercase();
        self.entries()
            .iter()
            .filter(|e| e.mentions(&query_lower))
            .collect()
    }

    pub fn review(&self, filter: &ReviewFilter) -> Vec<&OutcomeEntry> {
        let mut selected = match &filter.query {
            Some(query) => self.search(query),
            None => self.entries().iter().collect(),
        };
        if let Some(reason) = filter.reason {
            selected.retain(|e| e.reason == reason);
        }
        if let Some(origin) = &filter.origin {
            selected.retain(|e| e.origin.eq_ignore_ascii_case(origin));
        }
        selected
    }
}

fn write_log(path: &Path, log: &OutcomeLog) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(log).context("Failed to serialize outcome store")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace outcome store {:?}", path))?;
    Ok(())
}

fn load_log(path: &Path) -> Result<OutcomeLog> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut log: OutcomeLog =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
    let derived = OutcomeStats::from_entries(&log.comments);
    if derived != log.stats {
        tracing::warn!(
            "Outcome stats in {:?} did not match entries ({:?} vs {:?}); using entry counts",
            path,
            log.stats,
            derived
        );
        log.stats = derived;
    }
    Ok(log)
}

fn shorten_title(title: &str) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        let mut short: String = title.chars().take(MAX_TITLE_CHARS).collect();
        short.push_str("...");
        short
    } else {
        title.to_string()
    }
}
