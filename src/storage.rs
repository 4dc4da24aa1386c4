//! Conversation persistence.
//!
//! [`ConversationStore`] is what the conversation engine needs from a
//! database; [`Storage`] implements it on SQLite.
//!
//! # Consistency
//!
//! Every method is a single atomic operation. Mutations that advance a
//! conversation are guarded on the step the caller read (`expected_step`)
//! and on `status = 'ACTIVE'`, so a concurrent writer makes the loser fail
//! with [`Error::Conflict`] instead of silently overwriting progress.
//! Terminal states are never left.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use crate::error::{Error, Result};
use crate::model::{Answer, Conversation, ConversationStatus, HealthReport, Language};

/// Persistence operations used by the conversation engine.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a new conversation. Fails if the id exists.
    async fn create(&self, conversation: &Conversation) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Overwrite an active conversation, provided nobody changed it since it
    /// was read (`updated_at` acts as the version). Returns the stored copy.
    async fn update(&self, conversation: &Conversation) -> Result<Conversation>;

    /// Store an accepted answer for `expected_step` and advance to the next step.
    async fn append_answer(
        &self,
        id: &str,
        expected_step: u32,
        answer: &Answer,
    ) -> Result<Conversation>;

    /// Move an active conversation to a terminal status.
    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<()>;

    /// Attach the final report and mark the conversation complete.
    async fn set_final_report(&self, id: &str, report: &HealthReport) -> Result<()>;

    /// `append_answer` and `set_final_report` as one transaction.
    async fn complete_with_answer(
        &self,
        id: &str,
        expected_step: u32,
        answer: &Answer,
        report: &HealthReport,
    ) -> Result<Conversation>;

    /// Expire active conversations created before `cutoff`. Returns how many.
    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLite-backed conversation store.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:tena.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = if database_url.contains(":memory:") {
            // An in-memory database lives and dies with its connection; keep
            // exactly one, forever, so every query sees the same data.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    ///
    /// Questions, answers and the report are JSON documents; timestamps are
    /// Unix milliseconds.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                symptom TEXT NOT NULL,
                language TEXT NOT NULL,
                status TEXT NOT NULL,
                questions TEXT NOT NULL,
                answers TEXT NOT NULL,
                current_step INTEGER NOT NULL,
                total_steps INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER,
                final_report TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the expiry sweep
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_conversations_status_created
            ON conversations(status, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Explain why a guarded write touched no rows.
    async fn diagnose(&self, id: &str, expected_step: Option<u32>) -> Error {
        match self.get(id).await {
            Ok(None) => Error::ConversationNotFound(id.to_string()),
            Ok(Some(c)) if !c.is_active() => Error::ConversationNotActive {
                id: id.to_string(),
                status: c.status,
            },
            Ok(Some(c)) => match expected_step {
                Some(step) if c.current_step != step => Error::Conflict(format!(
                    "conversation {id} moved from step {step} to {}",
                    c.current_step
                )),
                _ => Error::Conflict(format!("conversation {id} was modified concurrently")),
            },
            Err(e) => e,
        }
    }

    /// Append `answer` inside `tx`, guarded on status and step.
    async fn append_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        expected_step: u32,
        answer: &Answer,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut conversation = conversation_from_row(&row)?;
        if !conversation.is_active() || conversation.current_step != expected_step {
            return Ok(None);
        }
        if answer.question_id != expected_step {
            return Err(Error::StepMismatch {
                current: expected_step,
                submitted: answer.question_id,
            });
        }

        conversation.answers.push(answer.clone());
        conversation.current_step += 1;
        conversation.updated_at = now;

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET answers = ?, current_step = ?, updated_at = ?
            WHERE id = ? AND status = 'ACTIVE' AND current_step = ?
            "#,
        )
        .bind(serde_json::to_string(&conversation.answers)?)
        .bind(i64::from(conversation.current_step))
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(i64::from(expected_step))
        .execute(&mut **tx)
        .await?;

        Ok((result.rows_affected() == 1).then_some(conversation))
    }
}

#[async_trait]
impl ConversationStore for Storage {
    async fn create(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, user_id, symptom, language, status, questions, answers,
                current_step, total_steps, created_at, updated_at, completed_at, final_report
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.symptom)
        .bind(conversation.language.code())
        .bind(conversation.status.as_str())
        .bind(serde_json::to_string(&conversation.questions)?)
        .bind(serde_json::to_string(&conversation.answers)?)
        .bind(i64::from(conversation.current_step))
        .bind(i64::from(conversation.total_steps))
        .bind(conversation.created_at.timestamp_millis())
        .bind(conversation.updated_at.timestamp_millis())
        .bind(conversation.completed_at.map(|t| t.timestamp_millis()))
        .bind(
            conversation
                .final_report
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn update(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut stored = conversation.clone();
        stored.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET user_id = ?, questions = ?, answers = ?, current_step = ?, updated_at = ?
            WHERE id = ? AND status = 'ACTIVE' AND updated_at = ? AND current_step <= ?
            "#,
        )
        .bind(&stored.user_id)
        .bind(serde_json::to_string(&stored.questions)?)
        .bind(serde_json::to_string(&stored.answers)?)
        .bind(i64::from(stored.current_step))
        .bind(stored.updated_at.timestamp_millis())
        .bind(&stored.id)
        .bind(conversation.updated_at.timestamp_millis())
        .bind(i64::from(stored.current_step))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(&conversation.id, None).await);
        }
        Ok(stored)
    }

    async fn append_answer(
        &self,
        id: &str,
        expected_step: u32,
        answer: &Answer,
    ) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;
        let updated = Self::append_in_tx(&mut tx, id, expected_step, answer, Utc::now()).await?;

        match updated {
            Some(conversation) => {
                tx.commit().await?;
                Ok(conversation)
            }
            None => {
                tx.rollback().await?;
                Err(self.diagnose(id, Some(expected_step)).await)
            }
        }
    }

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<()> {
        if status == ConversationStatus::Active {
            return Err(Error::InvalidInput(
                "a conversation cannot be moved back to ACTIVE".to_string(),
            ));
        }

        let now = Utc::now().timestamp_millis();
        let completed_at = (status == ConversationStatus::Complete).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at)
            WHERE id = ? AND status = 'ACTIVE'
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(id, None).await);
        }
        Ok(())
    }

    async fn set_final_report(&self, id: &str, report: &HealthReport) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET final_report = ?, status = 'COMPLETE', completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'ACTIVE' AND final_report IS NULL
            "#,
        )
        .bind(serde_json::to_string(report)?)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(id, None).await);
        }
        Ok(())
    }

    async fn complete_with_answer(
        &self,
        id: &str,
        expected_step: u32,
        answer: &Answer,
        report: &HealthReport,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let Some(mut conversation) =
            Self::append_in_tx(&mut tx, id, expected_step, answer, now).await?
        else {
            tx.rollback().await?;
            return Err(self.diagnose(id, Some(expected_step)).await);
        };

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET final_report = ?, status = 'COMPLETE', completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'ACTIVE' AND final_report IS NULL
            "#,
        )
        .bind(serde_json::to_string(report)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(self.diagnose(id, None).await);
        }
        tx.commit().await?;

        conversation.status = ConversationStatus::Complete;
        conversation.completed_at = Some(now);
        conversation.final_report = Some(report.clone());
        Ok(conversation)
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = 'EXPIRED', updated_at = ?
            WHERE status = 'ACTIVE' AND created_at < ?
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::CorruptRecord(format!("timestamp {ms} out of range")))
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    let language: String = row.try_get("language")?;
    let status: String = row.try_get("status")?;
    let questions: String = row.try_get("questions")?;
    let answers: String = row.try_get("answers")?;
    let final_report: Option<String> = row.try_get("final_report")?;
    let current_step: i64 = row.try_get("current_step")?;
    let total_steps: i64 = row.try_get("total_steps")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;

    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        symptom: row.try_get("symptom")?,
        language: Language::parse(&language)
            .map_err(|_| Error::CorruptRecord(format!("unknown language '{language}'")))?,
        status: ConversationStatus::from_db(&status)
            .ok_or_else(|| Error::CorruptRecord(format!("unknown status '{status}'")))?,
        questions: serde_json::from_str(&questions)?,
        answers: serde_json::from_str(&answers)?,
        current_step: u32::try_from(current_step)
            .map_err(|_| Error::CorruptRecord(format!("bad current_step {current_step}")))?,
        total_steps: u32::try_from(total_steps)
            .map_err(|_| Error::CorruptRecord(format!("bad total_steps {total_steps}")))?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
        completed_at: completed_at.map(millis_to_datetime).transpose()?,
        final_report: final_report
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Question, QuestionCategory};

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn sample_conversation(id: &str, created_at: DateTime<Utc>) -> Conversation {
        let questions = QuestionCategory::ALL
            .iter()
            .map(|c| Question {
                id: c.step(),
                text: format!("{} question", c.as_str()),
                category: *c,
                required: true,
            })
            .collect();
        Conversation::new(
            id.to_string(),
            "mild headache".to_string(),
            Language::En,
            Some("user-1".to_string()),
            questions,
            created_at,
        )
    }

    fn answer(question_id: u32) -> Answer {
        Answer {
            question_id,
            text: format!("answer {question_id}"),
            is_valid: true,
            feedback: None,
            answered_at: Utc::now(),
        }
    }

    fn sample_report() -> HealthReport {
        HealthReport {
            symptom: "mild headache".to_string(),
            duration: "2 days".to_string(),
            location: "forehead".to_string(),
            severity: "4/10".to_string(),
            associated_symptoms: vec!["tiredness".to_string()],
            medical_history: "none".to_string(),
            triggers: "screens".to_string(),
            possible_conditions: vec!["tension headache".to_string()],
            recommendations: vec!["rest".to_string()],
            urgency_level: "GREEN".to_string(),
            generated_at: Utc::now(),
            remedy: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let storage = setup_test_storage().await;
        let conversation = sample_conversation("c-1", Utc::now());

        storage.create(&conversation).await.unwrap();
        let loaded = storage.get("c-1").await.unwrap().unwrap();

        assert_eq!(loaded.id, "c-1");
        assert_eq!(loaded.user_id.as_deref(), Some("user-1"));
        assert_eq!(loaded.questions, conversation.questions);
        assert_eq!(loaded.status, ConversationStatus::Active);
        assert_eq!(loaded.current_step, 1);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            conversation.created_at.timestamp_millis()
        );

        assert!(storage.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let storage = setup_test_storage().await;
        let conversation = sample_conversation("c-1", Utc::now());

        storage.create(&conversation).await.unwrap();
        assert!(matches!(
            storage.create(&conversation).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_append_answer_advances_step() {
        let storage = setup_test_storage().await;
        storage
            .create(&sample_conversation("c-1", Utc::now()))
            .await
            .unwrap();

        let updated = storage.append_answer("c-1", 1, &answer(1)).await.unwrap();
        assert_eq!(updated.current_step, 2);
        assert_eq!(updated.answers.len(), 1);

        let loaded = storage.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_step, 2);
        assert_eq!(loaded.answers[0].text, "answer 1");
    }

    #[tokio::test]
    async fn test_stale_step_conflicts() {
        let storage = setup_test_storage().await;
        storage
            .create(&sample_conversation("c-1", Utc::now()))
            .await
            .unwrap();
        storage.append_answer("c-1", 1, &answer(1)).await.unwrap();

        // A second writer that also read step 1 loses
        let err = storage.append_answer("c-1", 1, &answer(1)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let loaded = storage.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.answers.len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let storage = setup_test_storage().await;
        let err = storage.append_answer("nope", 1, &answer(1)).await.unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_with_answer_is_atomic() {
        let storage = setup_test_storage().await;
        let mut conversation = sample_conversation("c-1", Utc::now());
        conversation.current_step = 5;
        storage.create(&conversation).await.unwrap();

        let report = sample_report();
        let done = storage
            .complete_with_answer("c-1", 5, &answer(5), &report)
            .await
            .unwrap();
        assert_eq!(done.status, ConversationStatus::Complete);
        assert_eq!(done.current_step, 6);

        let loaded = storage.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::Complete);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.final_report, Some(report.clone()));

        // Terminal: nothing further is accepted
        let err = storage
            .complete_with_answer("c-1", 6, &answer(6), &report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConversationNotActive { .. }));
    }

    #[tokio::test]
    async fn test_final_report_written_once() {
        let storage = setup_test_storage().await;
        storage
            .create(&sample_conversation("c-1", Utc::now()))
            .await
            .unwrap();

        storage.set_final_report("c-1", &sample_report()).await.unwrap();

        let mut other = sample_report();
        other.urgency_level = "RED".to_string();
        assert!(storage.set_final_report("c-1", &other).await.is_err());

        let loaded = storage.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.final_report.unwrap().urgency_level, "GREEN");
    }

    #[tokio::test]
    async fn test_set_status_only_from_active() {
        let storage = setup_test_storage().await;
        storage
            .create(&sample_conversation("c-1", Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            storage.set_status("c-1", ConversationStatus::Active).await,
            Err(Error::InvalidInput(_))
        ));

        storage
            .set_status("c-1", ConversationStatus::Expired)
            .await
            .unwrap();
        let err = storage
            .set_status("c-1", ConversationStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConversationNotActive {
                status: ConversationStatus::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_uses_updated_at_as_version() {
        let storage = setup_test_storage().await;
        let conversation = sample_conversation("c-1", Utc::now());
        storage.create(&conversation).await.unwrap();

        // Make sure the new version stamp differs from the creation time
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let mut edited = conversation.clone();
        edited.user_id = Some("user-2".to_string());
        let stored = storage.update(&edited).await.unwrap();
        assert_eq!(stored.user_id.as_deref(), Some("user-2"));

        // Writing from the original (now stale) copy fails
        let err = storage.update(&conversation).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expire_before_only_touches_old_active() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        storage
            .create(&sample_conversation("old", now - chrono::Duration::hours(30)))
            .await
            .unwrap();
        storage
            .create(&sample_conversation("fresh", now - chrono::Duration::hours(1)))
            .await
            .unwrap();
        storage
            .create(&sample_conversation("old-done", now - chrono::Duration::hours(30)))
            .await
            .unwrap();
        storage
            .set_final_report("old-done", &sample_report())
            .await
            .unwrap();

        let expired = storage
            .expire_before(now - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let status = |id: &'static str| {
            let storage = storage.clone();
            async move { storage.get(id).await.unwrap().unwrap().status }
        };
        assert_eq!(status("old").await, ConversationStatus::Expired);
        assert_eq!(status("fresh").await, ConversationStatus::Active);
        assert_eq!(status("old-done").await, ConversationStatus::Complete);
    }
}
