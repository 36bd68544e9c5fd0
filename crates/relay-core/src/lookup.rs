//! Read-only queries the relay makes against participant records.
//!
//! The relay never writes through this interface. A backend answers each
//! query with `Ok(None)` when nothing is on file and `Err` only when the
//! backend itself failed.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::LookupError;
use crate::ids::ParticipantId;

/// A patient's case on file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseRecord {
    pub id: i64,
    pub patient: ParticipantId,
    /// Sortable date string (ISO 8601).
    pub date: String,
}

#[async_trait]
pub trait DataLookup: Send + Sync {
    /// Human-readable name for a participant.
    async fn display_name(&self, id: ParticipantId) -> Result<Option<String>, LookupError>;

    /// The patient's most recent case, by date.
    async fn latest_case(&self, patient: ParticipantId) -> Result<Option<CaseRecord>, LookupError>;

    /// Question set of the category the participant belongs to.
    async fn question_set(&self, participant: ParticipantId) -> Result<Option<String>, LookupError>;
}

/// Process-local directory, used by tests and when no database is configured.
#[derive(Default)]
pub struct InMemoryDirectory {
    names: DashMap<ParticipantId, String>,
    cases: DashMap<ParticipantId, Vec<CaseRecord>>,
    categories: DashMap<ParticipantId, u64>,
    question_sets: DashMap<u64, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(self, id: ParticipantId, name: impl Into<String>) -> Self {
        self.names.insert(id, name.into());
        self
    }

    pub fn add_case(&self, patient: ParticipantId, case_id: i64, date: impl Into<String>) {
        self.cases.entry(patient).or_default().push(CaseRecord {
            id: case_id,
            patient,
            date: date.into(),
        });
    }

    pub fn assign_category(&self, participant: ParticipantId, category: u64) {
        self.categories.insert(participant, category);
    }

    pub fn set_questions(&self, category: u64, questions: impl Into<String>) {
        self.question_sets.insert(category, questions.into());
    }
}

#[async_trait]
impl DataLookup for InMemoryDirectory {
    async fn display_name(&self, id: ParticipantId) -> Result<Option<String>, LookupError> {
        Ok(self.names.get(&id).map(|n| n.value().clone()))
    }

    async fn latest_case(&self, patient: ParticipantId) -> Result<Option<CaseRecord>, LookupError> {
        Ok(self.cases.get(&patient).and_then(|cases| {
            cases
                .iter()
                .max_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)))
                .cloned()
        }))
    }

    async fn question_set(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<String>, LookupError> {
        let Some(category) = self.categories.get(&participant).map(|c| *c) else {
            return Ok(None);
        };
        Ok(self.question_sets.get(&category).map(|q| q.value().clone()))
    }
}
