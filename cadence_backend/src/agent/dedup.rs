use std::collections::HashSet;

use crate::platform::{ActionCategory, HistoryItem};

/// Targets already acted upon, one set per category. Entries are never removed.
#[derive(Debug, Default, Clone)]
pub struct DedupRegistry {
    acted_on_posts: HashSet<String>,
    replied_to_remarks: HashSet<String>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, category: ActionCategory) -> &HashSet<String> {
        match category {
            ActionCategory::NewItem => &self.acted_on_posts,
            ActionCategory::Reply => &self.replied_to_remarks,
        }
    }

    fn set_mut(&mut self, category: ActionCategory) -> &mut HashSet<String> {
        match category {
            ActionCategory::NewItem => &mut self.acted_on_posts,
            ActionCategory::Reply => &mut self.replied_to_remarks,
        }
    }

    pub fn seed<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = (ActionCategory, String)>,
    {
        for (category, id) in ids {
            self.set_mut(category).insert(id);
        }
    }

    /// Seed from the agent's own history; each item marks what it responded to.
    pub fn seed_from_history(&mut self, history: &[HistoryItem]) {
        self.seed(
            history
                .iter()
                .map(|item| (item.parent_category, item.parent_id.clone())),
        );
    }

    pub fn contains(&self, category: ActionCategory, id: &str) -> bool {
        self.set(category).contains(id)
    }

    /// Returns false if the id was already present.
    pub fn add(&mut self, category: ActionCategory, id: impl Into<String>) -> bool {
        self.set_mut(category).insert(id.into())
    }

    pub fn len(&self, category: ActionCategory) -> usize {
        self.set(category).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(parent_category: ActionCategory, parent_id: &str) -> HistoryItem {
        HistoryItem {
            id: format!("mine-{}", parent_id),
            parent_category,
            parent_id: parent_id.to_string(),
            score: 1,
            age_seconds: 60,
            body: "body".to_string(),
            title: "title".to_string(),
            origin: "general".to_string(),
            url: None,
        }
    }

    #[test]
    fn categories_are_partitioned() {
        let mut dedup = DedupRegistry::new();
        assert!(dedup.add(ActionCategory::NewItem, "abc"));
        assert!(dedup.contains(ActionCategory::NewItem, "abc"));
        assert!(!dedup.contains(ActionCategory::Reply, "abc"));
    }

    #[test]
    fn adding_twice_reports_existing_entry() {
        let mut dedup = DedupRegistry::new();
        assert!(dedup.add(ActionCategory::Reply, "r1"));
        assert!(!dedup.add(ActionCategory::Reply, "r1"));
        assert_eq!(dedup.len(ActionCategory::Reply), 1);
    }

    #[test]
    fn history_seeds_parent_ids_under_their_category() {
        let mut dedup = DedupRegistry::new();
        dedup.seed_from_history(&[
            history(ActionCategory::NewItem, "post-1"),
            history(ActionCategory::NewItem, "post-1"),
            history(ActionCategory::Reply, "remark-7"),
        ]);

        assert!(dedup.contains(ActionCategory::NewItem, "post-1"));
        assert!(dedup.contains(ActionCategory::Reply, "remark-7"));
        assert!(!dedup.contains(ActionCategory::NewItem, "mine-post-1"));
        assert_eq!(dedup.len(ActionCategory::NewItem), 1);
    }
}
