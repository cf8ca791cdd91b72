use std::time::Duration;

use regex_lite::Regex;
use tokio::time::sleep;

use crate::platform::{ActionCategory, Confirmation, PlatformClient, SubmissionFailure, Target};

/// Longest single wait a platform hint may impose. Larger hints are clamped.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait used when a rate-limit response carries no usable hint.
    pub default_rate_limit_wait: Duration,
    /// Added after every rate-limit wait before retrying.
    pub extra_cooldown: Duration,
    /// Total rate-limit waiting allowed for one submission. `None` retries forever.
    pub max_total_wait: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            default_rate_limit_wait: Duration::from_secs(10 * 60),
            extra_cooldown: Duration::from_secs(5 * 60),
            max_total_wait: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    Locked(String),
    Failed(String),
    WaitBudgetExceeded { waited: Duration },
}

impl AbandonReason {
    pub fn describe(&self) -> String {
        match self {
            AbandonReason::Locked(detail) => format!("target locked: {}", detail),
            AbandonReason::Failed(detail) => format!("submission failed: {}", detail),
            AbandonReason::WaitBudgetExceeded { waited } => format!(
                "rate-limit wait budget exhausted after {}s",
                waited.as_secs()
            ),
        }
    }
}

/// Terminal result of a submission. There is no intermediate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Posted {
        confirmation: Confirmation,
        attempts: u32,
    },
    Abandoned {
        reason: AbandonReason,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BackoffController {
    policy: BackoffPolicy,
}

impl BackoffController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    /// Wait before retrying a rate-limited submission, excluding the extra
    /// cooldown. Never longer than `MAX_RATE_LIMIT_WAIT`.
    pub fn rate_limit_wait(&self, suggested: Option<Duration>, detail: &str) -> Duration {
        suggested
            .or_else(|| parse_suggested_wait(detail))
            .unwrap_or(self.policy.default_rate_limit_wait)
            .min(MAX_RATE_LIMIT_WAIT)
    }

    /// Submit, sleeping through rate limits. Locks and any other failure
    /// abandon after the attempt that produced them.
    pub async fn submit(
        &self,
        platform: &dyn PlatformClient,
        category: ActionCategory,
        target: &Target,
        content: &str,
    ) -> SubmissionOutcome {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            attempts += 1;
            match platform.submit(category, target, content).await {
                Ok(confirmation) => {
                    return SubmissionOutcome::Posted {
                        confirmation,
                        attempts,
                    };
                }
                Err(SubmissionFailure::RateLimited {
                    suggested_wait,
                    detail,
                }) => {
                    let wait = self.rate_limit_wait(suggested_wait, &detail);
                    let total = wait.saturating_add(self.policy.extra_cooldown);
                    if let Some(max) = self.policy.max_total_wait {
                        if waited.saturating_add(total) > max {
                            tracing::warn!(
                                "Rate limited on {} (attempt {}), wait budget of {}s exhausted",
                                target.id,
                                attempts,
                                max.as_secs()
                            );
                            return SubmissionOutcome::Abandoned {
                                reason: AbandonReason::WaitBudgetExceeded { waited },
                                attempts,
                            };
                        }
                    }

                    tracing::warn!(
                        "Rate limited on {} (attempt {}): {}. Waiting {}m {}s plus {}s cooldown",
                        target.id,
                        attempts,
                        detail,
                        wait.as_secs() / 60,
                        wait.as_secs() % 60,
                        self.policy.extra_cooldown.as_secs()
                    );
                    sleep(wait).await;
                    sleep(self.policy.extra_cooldown).await;
                    waited = waited.saturating_add(total);
                }
                Err(SubmissionFailure::Locked(detail)) => {
                    tracing::warn!("Target {} is locked: {}", target.id, detail);
                    return SubmissionOutcome::Abandoned {
                        reason: AbandonReason::Locked(detail),
                        attempts,
                    };
                }
                Err(SubmissionFailure::Other(detail)) => {
                    tracing::warn!("Submission to {} failed: {}", target.id, detail);
                    return SubmissionOutcome::Abandoned {
                        reason: AbandonReason::Failed(detail),
                        attempts,
                    };
                }
            }
        }
    }
}

/// Pull a wait hint such as "take a break for 8 minutes" out of an error
/// message. The last number-with-unit wins; a hint too large to represent is
/// ignored.
pub fn parse_suggested_wait(detail: &str) -> Option<Duration> {
    let pattern =
        Regex::new(r"(?i)(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?)\b").ok()?;
    let caps = pattern.captures_iter(detail).last()?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    let secs = if unit.starts_with('h') {
        amount.checked_mul(3600)?
    } else if unit.starts_with('m') {
        amount.checked_mul(60)?
    } else {
        amount
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_target, FakePlatform, PlatformCall};
    use tokio::time::Instant;

    fn rate_limited(wait_secs: Option<u64>) -> Result<Confirmation, SubmissionFailure> {
        Err(SubmissionFailure::RateLimited {
            suggested_wait: wait_secs.map(Duration::from_secs),
            detail: "RATELIMIT".to_string(),
        })
    }

    #[test]
    fn parses_wait_hints_from_messages() {
        assert_eq!(
            parse_suggested_wait("Take a break for 8 minutes before trying again."),
            Some(Duration::from_secs(480))
        );
        assert_eq!(
            parse_suggested_wait("try again in 45 seconds"),
            Some(Duration::from_secs(45))
        );
        assert_eq!(
            parse_suggested_wait("wait 1 hour or 3 minutes"),
            Some(Duration::from_secs(180))
        );
        assert_eq!(parse_suggested_wait("you are doing that too much"), None);
    }

    #[test]
    fn oversized_text_hints_are_ignored() {
        assert_eq!(
            parse_suggested_wait("take a break for 18446744073709551615 minutes"),
            None
        );
        assert_eq!(
            parse_suggested_wait("try again in 99999999999999999999999 seconds"),
            None
        );
        let controller = BackoffController::default();
        assert_eq!(
            controller.rate_limit_wait(None, "take a break for 18446744073709551615 hours"),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn huge_hints_are_clamped() {
        let controller = BackoffController::default();
        assert_eq!(
            controller.rate_limit_wait(Some(Duration::from_secs(u64::MAX)), ""),
            MAX_RATE_LIMIT_WAIT
        );
        assert_eq!(
            controller.rate_limit_wait(None, "wait 5000 hours"),
            MAX_RATE_LIMIT_WAIT
        );
    }

    #[test]
    fn falls_back_to_default_wait() {
        let controller = BackoffController::default();
        assert_eq!(
            controller.rate_limit_wait(None, "no hint here"),
            Duration::from_secs(600)
        );
        assert_eq!(
            controller.rate_limit_wait(Some(Duration::from_secs(30)), "8 minutes"),
            Duration::from_secs(30)
        );
        assert_eq!(
            controller.rate_limit_wait(None, "take a break for 2 minutes"),
            Duration::from_secs(120)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_until_success() {
        let platform = FakePlatform::new();
        platform.script_submissions(vec![
            rate_limited(Some(60)),
            rate_limited(None),
            rate_limited(Some(1)),
        ]);
        let controller = BackoffController::default();
        let target = sample_target("t1", 10, 200);

        let started = Instant::now();
        let outcome = controller
            .submit(&platform, ActionCategory::NewItem, &target, "hello")
            .await;

        assert!(matches!(outcome, SubmissionOutcome::Posted { attempts: 4, .. }));
        // 60 + 600 + 1 seconds of hinted/default waits, plus 3 five-minute cooldowns.
        assert_eq!(started.elapsed(), Duration::from_secs(60 + 600 + 1 + 3 * 300));
        assert_eq!(platform.submit_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn long_rate_limit_streak_is_never_silently_abandoned() {
        let platform = FakePlatform::new();
        platform.script_submissions((0..50).map(|_| rate_limited(Some(5))).collect());
        let controller = BackoffController::default();
        let target = sample_target("t1", 10, 200);

        let outcome = controller
            .submit(&platform, ActionCategory::Reply, &target, "hello")
            .await;

        assert!(matches!(outcome, SubmissionOutcome::Posted { attempts: 51, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn locked_target_is_abandoned_after_one_attempt() {
        let platform = FakePlatform::new();
        platform.script_submissions(vec![Err(SubmissionFailure::Locked(
            "THREAD_LOCKED".to_string(),
        ))]);
        let controller = BackoffController::default();
        let target = sample_target("t1", 10, 200);

        let started = Instant::now();
        let outcome = controller
            .submit(&platform, ActionCategory::NewItem, &target, "hello")
            .await;

        assert_eq!(
            outcome,
            SubmissionOutcome::Abandoned {
                reason: AbandonReason::Locked("THREAD_LOCKED".to_string()),
                attempts: 1,
            }
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::Submit(ActionCategory::NewItem, "t1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_failures_fail_fast() {
        let platform = FakePlatform::new();
        platform.script_submissions(vec![Err(SubmissionFailure::Other("500".to_string()))]);
        let controller = BackoffController::default();
        let target = sample_target("t1", 10, 200);

        let outcome = controller
            .submit(&platform, ActionCategory::Reply, &target, "hello")
            .await;

        assert!(matches!(
            outcome,
            SubmissionOutcome::Abandoned {
                reason: AbandonReason::Failed(_),
                attempts: 1
            }
        ));
        assert_eq!(platform.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn maximal_retry_after_hint_waits_then_retries() {
        let platform = FakePlatform::new();
        platform.script_submissions(vec![Err(SubmissionFailure::RateLimited {
            suggested_wait: Some(Duration::from_secs(u64::MAX)),
            detail: "429".to_string(),
        })]);
        let controller = BackoffController::default();
        let target = sample_target("t1", 10, 200);

        let started = Instant::now();
        let outcome = controller
            .submit(&platform, ActionCategory::NewItem, &target, "hello")
            .await;

        assert!(matches!(outcome, SubmissionOutcome::Posted { attempts: 2, .. }));
        assert_eq!(started.elapsed(), MAX_RATE_LIMIT_WAIT + Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_cooldown_against_budget_does_not_overflow() {
        let platform = FakePlatform::new();
        platform.script_submissions(vec![rate_limited(Some(u64::MAX))]);
        let controller = BackoffController::new(BackoffPolicy {
            default_rate_limit_wait: Duration::from_secs(600),
            extra_cooldown: Duration::MAX,
            max_total_wait: Some(Duration::from_secs(3600)),
        });
        let target = sample_target("t1", 10, 200);

        let outcome = controller
            .submit(&platform, ActionCategory::NewItem, &target, "hello")
            .await;

        assert!(matches!(
            outcome,
            SubmissionOutcome::Abandoned {
                reason: AbandonReason::WaitBudgetExceeded { waited },
                attempts: 1,
            } if waited.is_zero()
        ));
        assert_eq!(platform.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_wait_budget_caps_total_backoff() {
        let platform = FakePlatform::new();
        platform.script_submissions((0..10).map(|_| rate_limited(Some(600))).collect());
        let controller = BackoffController::new(BackoffPolicy {
            max_total_wait: Some(Duration::from_secs(2000)),
            ..BackoffPolicy::default()
        });
        let target = sample_target("t1", 10, 200);

        let outcome = controller
            .submit(&platform, ActionCategory::NewItem, &target, "hello")
            .await;

        // Each retry costs 900s; the third would push past 2000s.
        assert_eq!(
            outcome,
            SubmissionOutcome::Abandoned {
                reason: AbandonReason::WaitBudgetExceeded {
                    waited: Duration::from_secs(1800)
                },
                attempts: 3,
            }
        );
    }
}
