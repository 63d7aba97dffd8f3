//! Feedback analytics over past approve/reject decisions

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::error::Result;
use super::record::Status;
use super::store::{ImprovementFilter, ImprovementStore};

/// Approve/reject tallies for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecisionCounts {
    pub approved: u32,
    pub rejected: u32,
}

impl DecisionCounts {
    pub fn total(&self) -> u32 {
        self.approved + self.rejected
    }

    pub fn rejection_ratio(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            f64::from(self.rejected) / f64::from(self.total())
        }
    }

    fn record(&mut self, status: Status) {
        match status {
            Status::Approved | Status::Applied | Status::RolledBack => self.approved += 1,
            Status::Rejected => self.rejected += 1,
            Status::Pending => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub by_category: BTreeMap<String, DecisionCounts>,
    pub by_severity: BTreeMap<String, DecisionCounts>,
}

/// Advisory: stop scanning a category the user keeps rejecting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSuggestion {
    pub category: String,
    pub approved: u32,
    pub rejected: u32,
    pub rejection_ratio: f64,
    pub reason: String,
}

pub struct FeedbackAnalytics {
    store: ImprovementStore,
    rejection_threshold: f64,
    min_decisions: u32,
}

impl FeedbackAnalytics {
    pub fn new(store: ImprovementStore, rejection_threshold: f64, min_decisions: u32) -> Self {
        Self {
            store,
            rejection_threshold,
            min_decisions,
        }
    }

    /// Pending records have no decision yet and are left out
    pub async fn get_feedback_stats(&self) -> Result<FeedbackStats> {
        let mut stats = FeedbackStats::default();

        for imp in self.store.list(&ImprovementFilter::default()).await? {
            if imp.status == Status::Pending {
                continue;
            }
            stats.by_category.entry(imp.category.clone()).or_default().record(imp.status);
            stats
                .by_severity
                .entry(imp.severity.to_string())
                .or_default()
                .record(imp.status);
        }

        Ok(stats)
    }

    pub async fn get_filter_suggestions(&self) -> Result<Vec<FilterSuggestion>> {
        let stats = self.get_feedback_stats().await?;

        let suggestions: Vec<FilterSuggestion> = stats
            .by_category
            .into_iter()
            .filter(|(_, counts)| {
                counts.total() >= self.min_decisions
                    && counts.rejection_ratio() > self.rejection_threshold
            })
            .map(|(category, counts)| {
                let ratio = counts.rejection_ratio();
                FilterSuggestion {
                    reason: format!(
                        "{} of {} '{}' improvements were rejected ({:.0}%)",
                        counts.rejected,
                        counts.total(),
                        category,
                        ratio * 100.0
                    ),
                    category,
                    approved: counts.approved,
                    rejected: counts.rejected,
                    rejection_ratio: ratio,
                }
            })
            .collect();

        debug!("{} filter suggestion(s)", suggestions.len());
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improvement::record::{Improvement, Severity};
    use crate::improvement::store::{Database, Transition};

    async fn decided(store: &ImprovementStore, id: &str, category: &str, severity: Severity, to: Option<Status>) {
        store
            .insert_if_absent(&Improvement::new(id, category, severity, "t", "d", "s"))
            .await
            .unwrap();
        if let Some(to) = to {
            store
                .transition(Transition {
                    id,
                    allowed_from: &[Status::Pending],
                    to,
                    rejection_reason: None,
                    backup_id: None,
                    note: None,
                })
                .await
                .unwrap();
        }
    }

    fn analytics(store: &ImprovementStore) -> FeedbackAnalytics {
        FeedbackAnalytics::new(store.clone(), 0.6, 3)
    }

    #[tokio::test]
    async fn test_styling_gets_flagged() {
        let store = ImprovementStore::new(Database::open_in_memory().unwrap());
        decided(&store, "s1", "styling", Severity::Low, Some(Status::Approved)).await;
        decided(&store, "s2", "styling", Severity::Low, Some(Status::Rejected)).await;
        decided(&store, "s3", "styling", Severity::Medium, Some(Status::Rejected)).await;
        decided(&store, "c1", "configuration", Severity::High, Some(Status::Rejected)).await;
        decided(&store, "c2", "configuration", Severity::High, None).await;

        let stats = analytics(&store).get_feedback_stats().await.unwrap();
        assert_eq!(stats.by_category["styling"], DecisionCounts { approved: 1, rejected: 2 });
        assert_eq!(stats.by_category["configuration"], DecisionCounts { approved: 0, rejected: 1 });
        assert_eq!(stats.by_severity["low"], DecisionCounts { approved: 1, rejected: 1 });

        let suggestions = analytics(&store).get_filter_suggestions().await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category, "styling");
        assert!(suggestions[0].reason.contains("2 of 3"));
    }

    #[tokio::test]
    async fn test_small_samples_are_not_flagged() {
        let store = ImprovementStore::new(Database::open_in_memory().unwrap());
        decided(&store, "a", "security", Severity::Low, Some(Status::Rejected)).await;
        decided(&store, "b", "security", Severity::Low, Some(Status::Rejected)).await;

        assert!(analytics(&store).get_filter_suggestions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ratio_at_threshold_is_not_flagged() {
        let store = ImprovementStore::new(Database::open_in_memory().unwrap());
        for (id, to) in [
            ("a", Status::Rejected),
            ("b", Status::Rejected),
            ("c", Status::Rejected),
            ("d", Status::Approved),
            ("e", Status::Approved),
        ] {
            decided(&store, id, "dependencies", Severity::Low, Some(to)).await;
        }

        // 3/5 = 0.6 is not strictly above the threshold
        assert!(analytics(&store).get_filter_suggestions().await.unwrap().is_empty());
    }
}
