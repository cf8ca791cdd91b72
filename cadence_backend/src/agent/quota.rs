use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::platform::ActionCategory;

pub const QUOTA_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counter {
    count: u32,
    limit: u32,
}

impl Counter {
    fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    fn is_available(&self) -> bool {
        self.count < self.limit
    }
}

/// Daily action counters. All categories share one window and reset together.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    new_item: Counter,
    reply: Counter,
    window_start: DateTime<Utc>,
}

impl QuotaTracker {
    pub fn new(new_item_limit: u32, reply_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            new_item: Counter::new(new_item_limit),
            reply: Counter::new(reply_limit),
            window_start: now,
        }
    }

    fn counter(&self, category: ActionCategory) -> &Counter {
        match category {
            ActionCategory::NewItem => &self.new_item,
            ActionCategory::Reply => &self.reply,
        }
    }

    fn counter_mut(&mut self, category: ActionCategory) -> &mut Counter {
        match category {
            ActionCategory::NewItem => &mut self.new_item,
            ActionCategory::Reply => &mut self.reply,
        }
    }

    /// Start a new window if the current one has run its 24 hours.
    /// Returns true when counters were reset.
    pub fn roll_window(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.window_start < ChronoDuration::hours(QUOTA_WINDOW_HOURS) {
            return false;
        }
        self.new_item.count = 0;
        self.reply.count = 0;
        self.window_start = now;
        true
    }

    pub fn is_available(&self, category: ActionCategory) -> bool {
        self.counter(category).is_available()
    }

    /// Record one confirmed action. A call on an exhausted category is a no-op
    /// and returns false.
    pub fn increment(&mut self, category: ActionCategory) -> bool {
        let counter = self.counter_mut(category);
        if !counter.is_available() {
            return false;
        }
        counter.count += 1;
        true
    }

    pub fn all_exhausted(&self) -> bool {
        ActionCategory::ALL.iter().all(|c| !self.is_available(*c))
    }

    pub fn count(&self, category: ActionCategory) -> u32 {
        self.counter(category).count
    }

    pub fn limit(&self, category: ActionCategory) -> u32 {
        self.counter(category).limit
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        let reset_at = self.window_start + ChronoDuration::hours(QUOTA_WINDOW_HOURS);
        (reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}
