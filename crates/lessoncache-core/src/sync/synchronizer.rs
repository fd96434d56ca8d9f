//! Bulk download of practice content into the local store.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::api::{ApiClient, ApiError, BulkQuestion};
use crate::store::{Store, StoreError};

use super::events::{SyncEvent, SyncEvents};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch content for {level_id}: {source}")]
    Fetch {
        level_id: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of storing one skill's questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub skill_id: String,
    pub count: usize,
    /// Set when the group's transaction failed; nothing from it was stored.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub level_id: String,
    pub fetched: usize,
    pub groups: Vec<GroupOutcome>,
}

impl SyncReport {
    pub fn stored(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.error.is_none())
            .map(|g| g.count)
            .sum()
    }

    pub fn failed_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.error.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_groups() == 0
    }
}

/// Split a flat bulk response by skill. Skills keep first-appearance order
/// and questions keep response order within their skill.
fn group_by_skill(questions: Vec<BulkQuestion>) -> Vec<(String, Vec<Value>)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
    for question in questions {
        match positions.get(&question.skill_id) {
            Some(&i) => groups[i].1.push(question.question_data),
            None => {
                positions.insert(question.skill_id.clone(), groups.len());
                groups.push((question.skill_id, vec![question.question_data]));
            }
        }
    }
    groups
}

/// Clone is cheap; clones share the event channel.
#[derive(Clone)]
pub struct Synchronizer {
    api: ApiClient,
    store: Store,
    events: SyncEvents,
}

impl Synchronizer {
    pub fn new(api: ApiClient, store: Store) -> Self {
        Self {
            api,
            store,
            events: SyncEvents::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register for progress events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn fail(&self, level_id: &str, source: ApiError) -> SyncError {
        error!(level_id, error = %source, "Bulk sync failed");
        self.events.publish(SyncEvent::Failed {
            level_id: level_id.to_string(),
            error: source.to_string(),
        });
        SyncError::Fetch {
            level_id: level_id.to_string(),
            source,
        }
    }

    /// Fetch every skill of a level in one request and bank it skill by skill.
    ///
    /// A fetch or decode failure returns before anything is written. Each
    /// skill is its own transaction: a failed skill is recorded in the report
    /// and the remaining skills are still attempted. Stored skills are never
    /// rolled back.
    pub async fn sync_level(
        &self,
        level_id: &str,
        questions_per_skill: usize,
    ) -> Result<SyncReport, SyncError> {
        info!(level_id, questions_per_skill, "Starting bulk sync");
        self.events.publish(SyncEvent::Started {
            level_id: level_id.to_string(),
        });

        let questions = self
            .api
            .fetch_bulk_lessons(level_id, questions_per_skill)
            .await
            .map_err(|e| self.fail(level_id, e))?;

        let fetched = questions.len();
        let grouped = group_by_skill(questions);
        info!(level_id, fetched, skills = grouped.len(), "Fetched bulk batch");
        self.events.publish(SyncEvent::Fetched {
            level_id: level_id.to_string(),
            questions: fetched,
            skills: grouped.len(),
        });

        let mut groups = Vec::with_capacity(grouped.len());
        for (skill_id, batch) in grouped {
            let count = batch.len();
            match self.store.add_questions(level_id, &skill_id, &batch) {
                Ok(_) => {
                    self.events.publish(SyncEvent::GroupStored {
                        level_id: level_id.to_string(),
                        skill_id: skill_id.clone(),
                        count,
                    });
                    groups.push(GroupOutcome {
                        skill_id,
                        count,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(
                        level_id,
                        skill_id = %skill_id,
                        error = %e,
                        "Failed to store skill batch"
                    );
                    self.events.publish(SyncEvent::GroupFailed {
                        level_id: level_id.to_string(),
                        skill_id: skill_id.clone(),
                        error: e.to_string(),
                    });
                    groups.push(GroupOutcome {
                        skill_id,
                        count,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let report = SyncReport {
            level_id: level_id.to_string(),
            fetched,
            groups,
        };
        info!(
            level_id,
            stored = report.stored(),
            failed_groups = report.failed_groups(),
            "Bulk sync complete"
        );
        self.events.publish(SyncEvent::Completed {
            level_id: level_id.to_string(),
            stored: report.stored(),
            failed_groups: report.failed_groups(),
        });
        Ok(report)
    }

    /// Sync the level only when fewer than `threshold` unanswered questions
    /// are banked. Returns the report when a sync ran.
    pub async fn ensure_level(
        &self,
        level_id: &str,
        threshold: usize,
        questions_per_skill: usize,
    ) -> Result<Option<SyncReport>, SyncError> {
        let banked = self.store.count_unanswered(level_id)?;
        if banked >= threshold {
            info!(level_id, banked, threshold, "Question bank is full enough, skipping sync");
            return Ok(None);
        }
        self.sync_level(level_id, questions_per_skill).await.map(Some)
    }

    /// Download a level's placement test and keep it as the offline snapshot.
    pub async fn download_placement_test(&self, level_id: &str) -> Result<usize, SyncError> {
        let questions = self
            .api
            .fetch_placement_test(level_id)
            .await
            .map_err(|source| SyncError::Fetch {
                level_id: level_id.to_string(),
                source,
            })?;
        self.store.save_placement_test(level_id, &questions)?;
        self.events.publish(SyncEvent::PlacementTestSaved {
            level_id: level_id.to_string(),
            questions: questions.len(),
        });
        Ok(questions.len())
    }

    /// Placement test questions, fresh from the network when reachable and
    /// from the stored snapshot otherwise.
    pub async fn placement_test(&self, level_id: &str) -> Result<Vec<Value>, SyncError> {
        match self.api.fetch_placement_test(level_id).await {
            Ok(questions) => {
                if let Err(e) = self.store.save_placement_test(level_id, &questions) {
                    warn!(level_id, error = %e, "Failed to refresh placement test snapshot");
                }
                Ok(questions)
            }
            Err(source) => match self.store.placement_test(level_id)? {
                Some(questions) => {
                    warn!(
                        level_id,
                        error = %source,
                        "Placement test fetch failed, using saved snapshot"
                    );
                    Ok(questions)
                }
                None => Err(SyncError::Fetch {
                    level_id: level_id.to_string(),
                    source,
                }),
            },
        }
    }
}
