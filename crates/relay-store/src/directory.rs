//! SQLite-backed participant directory: names, case history and the
//! question set of each clinician's department.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tracing::instrument;

use relay_core::{CaseRecord, DataLookup, LookupError, ParticipantId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone)]
pub struct SqliteDirectory {
    db: Database,
}

fn sql_id(id: ParticipantId) -> Result<i64, StoreError> {
    i64::try_from(id.get())
        .map_err(|_| StoreError::NotFound(format!("participant {id}")))
}

impl SqliteDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// `first last`, or `None` when the account is unknown or unnamed.
    #[instrument(skip(self), fields(participant = %id))]
    pub fn find_display_name(&self, id: ParticipantId) -> Result<Option<String>, StoreError> {
        let id = sql_id(id)?;
        self.db.with_conn(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT first_name, last_name FROM accounts WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.and_then(|(first, last)| {
                let name = format!("{first} {last}").trim().to_string();
                (!name.is_empty()).then_some(name)
            }))
        })
    }

    #[instrument(skip(self), fields(patient = %patient))]
    pub fn find_latest_case(
        &self,
        patient: ParticipantId,
    ) -> Result<Option<CaseRecord>, StoreError> {
        let raw = sql_id(patient)?;
        self.db.with_conn(|conn| {
            let case = conn
                .query_row(
                    "SELECT id, date FROM cases WHERE patient_id = ?1
                     ORDER BY date DESC, id DESC LIMIT 1",
                    [raw],
                    |row| {
                        Ok(CaseRecord {
                            id: row.get(0)?,
                            patient,
                            date: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(case)
        })
    }

    #[instrument(skip(self), fields(participant = %participant))]
    pub fn find_question_set(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<String>, StoreError> {
        let id = sql_id(participant)?;
        self.db.with_conn(|conn| {
            let questions: Option<Option<String>> = conn
                .query_row(
                    "SELECT d.questions FROM doctors doc
                     JOIN departments d ON d.id = doc.department_id
                     WHERE doc.account_id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(questions.flatten())
        })
    }

    pub fn upsert_account(
        &self,
        id: ParticipantId,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), StoreError> {
        let id = sql_id(id)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, first_name, last_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE
                 SET first_name = excluded.first_name, last_name = excluded.last_name",
                rusqlite::params![id, first_name, last_name],
            )?;
            Ok(())
        })
    }

    pub fn insert_department(
        &self,
        id: i64,
        name: &str,
        questions: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO departments (id, name, questions) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, name, questions],
            )?;
            Ok(())
        })
    }

    /// Record a clinician as belonging to a department. The account must exist.
    pub fn assign_department(
        &self,
        doctor: ParticipantId,
        department: i64,
    ) -> Result<(), StoreError> {
        let id = sql_id(doctor)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO doctors (account_id, department_id) VALUES (?1, ?2)
                 ON CONFLICT(account_id) DO UPDATE SET department_id = excluded.department_id",
                rusqlite::params![id, department],
            )?;
            Ok(())
        })
    }

    pub fn insert_case(
        &self,
        case_id: i64,
        patient: ParticipantId,
        date: &str,
    ) -> Result<(), StoreError> {
        let patient = sql_id(patient)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cases (id, patient_id, date) VALUES (?1, ?2, ?3)",
                rusqlite::params![case_id, patient, date],
            )?;
            Ok(())
        })
    }

    /// Run a query on the blocking pool so the connection lock and SQLite
    /// I/O never stall a runtime worker.
    async fn off_runtime<T, F>(&self, query: F) -> Result<T, LookupError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteDirectory) -> Result<T, StoreError> + Send + 'static,
    {
        let dir = self.clone();
        let result = tokio::task::spawn_blocking(move || query(&dir))
            .await
            .map_err(|e| LookupError::Backend(format!("lookup task failed: {e}")))?;
        Ok(result?)
    }
}

#[async_trait]
impl DataLookup for SqliteDirectory {
    async fn display_name(&self, id: ParticipantId) -> Result<Option<String>, LookupError> {
        self.off_runtime(move |dir| dir.find_display_name(id)).await
    }

    async fn latest_case(&self, patient: ParticipantId) -> Result<Option<CaseRecord>, LookupError> {
        self.off_runtime(move |dir| dir.find_latest_case(patient))
            .await
    }

    async fn question_set(&self, participant: ParticipantId) -> Result<Option<String>, LookupError> {
        self.off_runtime(move |dir| dir.find_question_set(participant))
            .await
    }
}
