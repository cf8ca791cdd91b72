use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{OutcomeReason, OutcomeStore};
use crate::platform::PlatformClient;

const STALE_AFTER_HOURS: f64 = 24.0;
const UNDERPERFORMING_SCORE: i64 = 3;

/// Net-negative items are downvoted; stale items below the score floor are
/// underperforming; anything else is left alone.
pub fn classify(score: i64, age_hours: f64) -> Option<OutcomeReason> {
    if score < 0 {
        Some(OutcomeReason::Downvoted)
    } else if age_hours >= STALE_AFTER_HOURS && score < UNDERPERFORMING_SCORE {
        Some(OutcomeReason::Underperforming)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingReport {
    pub checked: usize,
    pub stored: usize,
    /// Stale items that scored well enough to keep.
    pub kept: usize,
}

/// Score the agent's own history and append an entry for every item that
/// classifies. A store write failure ends the pass with an error.
pub async fn sample_outcomes(
    platform: &dyn PlatformClient,
    store: &mut OutcomeStore,
    cap: Option<usize>,
) -> Result<SamplingReport> {
    tracing::info!("Sampling outcomes of submitted items");
    let history = platform
        .fetch_own_history(cap)
        .await
        .context("Failed to fetch own history for outcome sampling")?;

    let now = Utc::now();
    let mut report = SamplingReport::default();
    for item in &history {
        report.checked += 1;
        let age_hours = item.age_hours();
        match classify(item.score, age_hours) {
            Some(reason) => {
                store.record(item, reason, now)?;
                report.stored += 1;
                tracing::info!(
                    "Stored {} item {} (score {}, {:.1}h old)",
                    reason,
                    item.id,
                    item.score,
                    age_hours
                );
            }
            None if age_hours >= STALE_AFTER_HOURS => {
                report.kept += 1;
                tracing::debug!("Keeping item {} (score {})", item.id, item.score);
            }
            None => {}
        }
    }

    if store.recompute_stats() {
        tracing::warn!("Outcome stats drifted from entries; rebuilt");
    }
    store.flush()?;

    let stats = store.stats();
    tracing::info!(
        "Outcome sampling checked {}, stored {}, kept {} (totals: {} stored, {} downvoted, {} underperforming)",
        report.checked,
        report.stored,
        report.kept,
        stats.total_stored,
        stats.downvoted,
        stats.underperforming
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ActionCategory;
    use crate::test_support::{history_item, FakePlatform, PlatformCall};

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify(-2, 5.0), Some(OutcomeReason::Downvoted));
        assert_eq!(classify(1, 30.0), Some(OutcomeReason::Underperforming));
        assert_eq!(classify(10, 30.0), None);
        assert_eq!(classify(0, 2.0), None);
        assert_eq!(classify(2, 24.0), Some(OutcomeReason::Underperforming));
        assert_eq!(classify(3, 48.0), None);
    }

    #[tokio::test]
    async fn pass_records_classified_items_and_counts_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = OutcomeStore::open(dir.path().join("stored_outcomes.json"));
        let platform = FakePlatform::new();
        platform.set_history(vec![
            history_item("a", ActionCategory::NewItem, "p1", -2, 5),
            history_item("b", ActionCategory::Reply, "r1", 1, 30),
            history_item("c", ActionCategory::NewItem, "p2", 10, 30),
            history_item("d", ActionCategory::NewItem, "p3", 0, 2),
        ]);

        let report = sample_outcomes(&platform, &mut store, None)
            .await
            .expect("sampling");

        assert_eq!(
            report,
            SamplingReport {
                checked: 4,
                stored: 2,
                kept: 1
            }
        );
        assert_eq!(store.stats().downvoted, 1);
        assert_eq!(store.stats().underperforming, 1);
        assert_eq!(platform.calls(), vec![PlatformCall::FetchOwnHistory(None)]);

        let reloaded = OutcomeStore::open(dir.path().join("stored_outcomes.json"));
        assert_eq!(reloaded.log(), store.log());
    }

    #[tokio::test]
    async fn cap_is_passed_through_to_history_fetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = OutcomeStore::open(dir.path().join("stored_outcomes.json"));
        let platform = FakePlatform::new();
        platform.set_history(vec![
            history_item("a", ActionCategory::NewItem, "p1", -1, 1),
            history_item("b", ActionCategory::NewItem, "p2", -1, 1),
        ]);

        let report = sample_outcomes(&platform, &mut store, Some(1))
            .await
            .expect("sampling");

        assert_eq!(report.checked, 1);
        assert_eq!(platform.calls(), vec![PlatformCall::FetchOwnHistory(Some(1))]);
    }

    #[tokio::test]
    async fn resampling_appends_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = OutcomeStore::open(dir.path().join("stored_outcomes.json"));
        let platform = FakePlatform::new();
        platform.set_history(vec![history_item("a", ActionCategory::NewItem, "p1", -3, 2)]);

        sample_outcomes(&platform, &mut store, None).await.expect("first");
        sample_outcomes(&platform, &mut store, None).await.expect("second");

        assert_eq!(store.entries().len(), 2);
        assert_eq!(store.stats().total_stored, 2);
    }

    #[tokio::test]
    async fn write_failure_fails_the_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory at the store path makes the final rename fail.
        let blocked = dir.path().join("stored_outcomes.json");
        std::fs::create_dir(&blocked).expect("mkdir");
        std::fs::write(blocked.join("keep"), "x").expect("write");
        let mut store = OutcomeStore::open(&blocked);
        let platform = FakePlatform::new();
        platform.set_history(vec![history_item("a", ActionCategory::NewItem, "p1", -3, 2)]);

        assert!(sample_outcomes(&platform, &mut store, None).await.is_err());
    }
}
