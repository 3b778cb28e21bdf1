//! Competition listing as published by the forge site; the source of the
//! active topic set.

use serde::{Deserialize, Serialize};

use crate::TopicId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Competition {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub preview_image_url: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `0` means the competition is not bound to a topic.
    #[serde(default)]
    pub topic_id: i64,
    #[serde(default)]
    pub prize_pool: i64,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub season_id: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Competition {
    /// Active: bound to a topic, not listed as past, and untagged.
    pub fn is_active(&self, listed_as_past: bool) -> bool {
        self.topic_id != 0 && !listed_as_past && self.tags.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompetitionListing {
    pub active_and_upcoming: Vec<Competition>,
    pub past: Vec<Competition>,
}

impl CompetitionListing {
    /// Distinct non-zero topic ids of active/upcoming competitions, first-seen order.
    pub fn active_topic_ids(&self) -> Vec<TopicId> {
        let mut out: Vec<TopicId> = Vec::new();
        for comp in &self.active_and_upcoming {
            if comp.topic_id == 0 {
                continue;
            }
            let id = comp.topic_id.to_string();
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Every competition paired with whether it appeared in the past list.
    pub fn iter_all(&self) -> impl Iterator<Item = (&Competition, bool)> {
        self.active_and_upcoming
            .iter()
            .map(|c| (c, false))
            .chain(self.past.iter().map(|c| (c, true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(id: i64, topic: i64, tags: &[&str]) -> Competition {
        Competition { id, topic_id: topic, tags: tags.iter().map(|s| s.to_string()).collect(), ..Default::default() }
    }

    #[test]
    fn active_topic_ids_skip_zero_and_dedup() {
        let listing = CompetitionListing {
            active_and_upcoming: vec![comp(1, 13, &[]), comp(2, 0, &[]), comp(3, 13, &[]), comp(4, 7, &["beta"])],
            past: vec![comp(5, 21, &[])],
        };
        assert_eq!(listing.active_topic_ids(), vec!["13".to_string(), "7".to_string()]);
    }

    #[test]
    fn activity_requires_topic_untagged_and_not_past() {
        assert!(comp(1, 13, &[]).is_active(false));
        assert!(!comp(1, 13, &[]).is_active(true));
        assert!(!comp(1, 0, &[]).is_active(false));
        assert!(!comp(1, 13, &["x"]).is_active(false));
    }
}
