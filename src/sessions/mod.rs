use diesel::dsl::{count, count_star, sum};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{now_ts, Database};
use crate::error::{AdminError, Result};
use crate::validation::{self, Validate, MAX_NAME_LEN, MAX_TEXT_LEN};

pub(crate) mod schema;
use schema::session_steps;

pub const STEP_OUTCOMES: &[&str] = &["completed", "skipped", "failed"];

/// One step a viewer went through during a support session.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct SessionStep {
    pub id: i32,
    pub session_id: String,
    pub step_id: i32,
    pub problem_id: Option<i32>,
    pub device_id: Option<i32>,
    pub outcome: String,
    pub notes: Option<String>,
    pub duration_seconds: Option<i32>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordSessionStep {
    pub step_id: i32,
    pub outcome: String,
    pub notes: Option<String>,
    pub duration_seconds: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = session_steps)]
struct NewSessionStep<'a> {
    session_id: &'a str,
    step_id: i32,
    problem_id: Option<i32>,
    device_id: Option<i32>,
    outcome: &'a str,
    notes: Option<&'a str>,
    duration_seconds: Option<i32>,
    created_at: i64,
}

impl Validate for RecordSessionStep {
    fn validate(&self) -> Result<()> {
        validation::positive_id("step_id", Some(self.step_id))?;
        validation::one_of("outcome", Some(self.outcome.as_str()), STEP_OUTCOMES)?;
        validation::optional_text("notes", self.notes.as_deref(), MAX_TEXT_LEN)?;
        validation::non_negative("duration_seconds", self.duration_seconds)
    }
}

pub fn validate_session_id(session_id: &str) -> Result<()> {
    validation::required_text("session_id", session_id, MAX_NAME_LEN)?;
    if session_id.chars().any(char::is_whitespace) {
        return Err(AdminError::Validation(
            "session_id must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records an outcome. The problem and device are copied from the step so
    /// the history survives later edits to it.
    pub async fn record_step(
        &self,
        session_id: &str,
        input: &RecordSessionStep,
    ) -> Result<SessionStep> {
        validate_session_id(session_id)?;
        let mut conn = self.db.conn().await?;
        let step = crate::steps::ensure_active(&mut conn, input.step_id).await?;

        let recorded = diesel::insert_into(session_steps::table)
            .values(&NewSessionStep {
                session_id,
                step_id: step.id,
                problem_id: Some(step.problem_id),
                device_id: step.device_id,
                outcome: &input.outcome,
                notes: input.notes.as_deref(),
                duration_seconds: input.duration_seconds,
                created_at: now_ts(),
            })
            .get_result::<SessionStep>(&mut conn)
            .await?;
        tracing::debug!(session_id, step_id = step.id, outcome = %input.outcome, "Recorded session step");
        Ok(recorded)
    }

    pub async fn list_steps(&self, session_id: &str) -> Result<Vec<SessionStep>> {
        validate_session_id(session_id)?;
        let mut conn = self.db.conn().await?;
        let steps = session_steps::table
            .filter(session_steps::session_id.eq(session_id.to_string()))
            .order((session_steps::created_at.asc(), session_steps::id.asc()))
            .load::<SessionStep>(&mut conn)
            .await?;
        Ok(steps)
    }

    pub async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = session_steps::table.count().get_result(&mut conn).await?;
        let sessions: i64 = session_steps::table
            .select(count(session_steps::session_id).aggregate_distinct())
            .get_result(&mut conn)
            .await?;
        let by_outcome = session_steps::table
            .group_by(session_steps::outcome)
            .select((session_steps::outcome, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;
        let (timed, duration_total): (i64, Option<i64>) = session_steps::table
            .filter(session_steps::duration_seconds.is_not_null())
            .select((count_star(), sum(session_steps::duration_seconds)))
            .get_result(&mut conn)
            .await?;
        let avg_duration = duration_total
            .filter(|_| timed > 0)
            .map(|total| total as f64 / timed as f64);

        Ok(json!({
            "total": total,
            "sessions": sessions,
            "by_outcome": crate::problems::counts_object(by_outcome),
            "avg_duration_seconds": avg_duration,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::resource::Resource;
    use crate::problems::{CreateProblem, ProblemStore};
    use crate::steps::{CreateStep, StepStore};

    async fn setup() -> (tempfile::TempDir, SessionStore, i32) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("sessions.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");

        let problem = ProblemStore::new(db.clone())
            .create(CreateProblem {
                title: "No sound".to_string(),
                device_id: None,
                description: None,
                category: Some("audio".to_string()),
                icon: None,
                color: None,
                tags: None,
                priority: None,
                estimated_minutes: None,
                is_popular: None,
                status: None,
            })
            .await
            .expect("problem");
        let step = StepStore::new(db.clone())
            .create(CreateStep {
                problem_id: problem.id,
                device_id: None,
                remote_id: None,
                tv_interface_id: None,
                step_number: None,
                title: "Check mute".to_string(),
                description: None,
                instruction: "Press MUTE once".to_string(),
                hint: None,
                highlight_button: Some("mute".to_string()),
                highlight_area: None,
                media_url: None,
                estimated_seconds: Some(10),
                actions: None,
            })
            .await
            .expect("step");
        (dir, SessionStore::new(db), step.id)
    }

    fn outcome(step_id: i32, outcome: &str, duration: i32) -> RecordSessionStep {
        RecordSessionStep {
            step_id,
            outcome: outcome.to_string(),
            notes: None,
            duration_seconds: Some(duration),
        }
    }

    #[tokio::test]
    async fn records_in_order_and_aggregates() {
        let (_dir, store, step_id) = setup().await;
        let first = store
            .record_step("sess-1", &outcome(step_id, "failed", 10))
            .await
            .expect("first");
        store
            .record_step("sess-1", &outcome(step_id, "completed", 20))
            .await
            .expect("second");
        store
            .record_step("sess-2", &outcome(step_id, "completed", 30))
            .await
            .expect("third");

        assert!(first.problem_id.is_some());
        let steps = store.list_steps("sess-1").await.expect("list");
        let outcomes: Vec<&str> = steps.iter().map(|s| s.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["failed", "completed"]);

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats["sessions"], 2);
        assert_eq!(stats["by_outcome"]["completed"], 2);
        assert_eq!(stats["avg_duration_seconds"], 20.0);
    }

    #[tokio::test]
    async fn unknown_steps_and_bad_session_ids_are_rejected() {
        let (_dir, store, _step_id) = setup().await;
        let err = store
            .record_step("sess-1", &outcome(999, "completed", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));

        let err = store.list_steps("has space").await.unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
    }
}
