//! Pure scheduling decisions: which category to act on next and how long to
//! wait afterwards. Every random choice draws from the caller's RNG so a seeded
//! generator reproduces the same schedule.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::quota::QuotaTracker;
use crate::platform::ActionCategory;

/// Inclusive range of whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn is_valid(&self) -> bool {
        self.min_secs <= self.max_secs
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let hi = self.max_secs.max(self.min_secs);
        Duration::from_secs(rng.gen_range(self.min_secs..=hi))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceSettings {
    /// Probability of choosing a new item when both categories have quota.
    pub new_item_weight: f64,
    /// Local hours (0-23) treated as peak.
    pub peak_hours: Vec<u32>,
    pub new_item_peak: DelayRange,
    pub new_item_off_peak: DelayRange,
    pub reply_peak: DelayRange,
    pub reply_off_peak: DelayRange,
    /// Wait after an iteration that acted on nothing.
    pub idle: DelayRange,
    pub extra_delay_chance: f64,
    pub extra_delay: DelayRange,
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            new_item_weight: 0.7,
            peak_hours: vec![7, 8, 9, 10, 17, 18, 19, 20, 21, 22],
            new_item_peak: DelayRange::new(600, 1200),
            new_item_off_peak: DelayRange::new(1200, 2400),
            reply_peak: DelayRange::new(300, 900),
            reply_off_peak: DelayRange::new(900, 1800),
            idle: DelayRange::new(600, 1200),
            extra_delay_chance: 0.1,
            extra_delay: DelayRange::new(300, 900),
        }
    }
}

impl CadenceSettings {
    pub fn is_peak(&self, hour: u32) -> bool {
        self.peak_hours.contains(&hour)
    }

    fn base_range(&self, category: Option<ActionCategory>, hour: u32) -> DelayRange {
        let peak = self.is_peak(hour);
        match (category, peak) {
            (None, _) => self.idle,
            (Some(ActionCategory::NewItem), true) => self.new_item_peak,
            (Some(ActionCategory::NewItem), false) => self.new_item_off_peak,
            (Some(ActionCategory::Reply), true) => self.reply_peak,
            (Some(ActionCategory::Reply), false) => self.reply_off_peak,
        }
    }
}

/// Weighted pick between categories, forced to whichever still has quota.
/// `None` means both are exhausted.
pub fn choose_category<R: Rng + ?Sized>(
    quota: &QuotaTracker,
    new_item_weight: f64,
    rng: &mut R,
) -> Option<ActionCategory> {
    match (
        quota.is_available(ActionCategory::NewItem),
        quota.is_available(ActionCategory::Reply),
    ) {
        (false, false) => None,
        (true, false) => Some(ActionCategory::NewItem),
        (false, true) => Some(ActionCategory::Reply),
        (true, true) => {
            if rng.gen_bool(new_item_weight.clamp(0.0, 1.0)) {
                Some(ActionCategory::NewItem)
            } else {
                Some(ActionCategory::Reply)
            }
        }
    }
}

/// Delay before the next iteration. `category` is `None` when nothing was acted on.
pub fn inter_action_delay<R: Rng + ?Sized>(
    category: Option<ActionCategory>,
    hour: u32,
    settings: &CadenceSettings,
    rng: &mut R,
) -> Duration {
    let base = settings.base_range(category, hour).sample(rng);
    if rng.gen_bool(settings.extra_delay_chance.clamp(0.0, 1.0)) {
        base + settings.extra_delay.sample(rng)
    } else {
        base
    }
}

pub fn roll_chance<R: Rng + ?Sized>(chance: f64, rng: &mut R) -> bool {
    rng.gen_bool(chance.clamp(0.0, 1.0))
}
