use std::collections::BTreeSet;

use async_trait::async_trait;
use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{like_pattern, now_ts, Database, Page, SqliteAsyncConn};
use crate::error::{AdminError, Result};
use crate::interfaces::resource::{Duplicable, Resource};
use crate::query::ListParams;
use crate::validation::{self, Validate, MAX_NAME_LEN, MAX_TEXT_LEN};

pub mod actions;
pub(crate) mod schema;

pub use actions::{ReplaceActions, StepAction, StepActionInput};
use schema::diagnostic_steps;

#[derive(Debug, Clone, Serialize, Queryable)]
pub struct DiagnosticStep {
    pub id: i32,
    pub problem_id: i32,
    pub device_id: Option<i32>,
    pub remote_id: Option<i32>,
    pub tv_interface_id: Option<i32>,
    pub step_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub instruction: String,
    pub hint: Option<String>,
    pub highlight_button: Option<String>,
    pub highlight_area: Option<String>,
    pub media_url: Option<String>,
    pub estimated_seconds: Option<i32>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStep {
    pub problem_id: i32,
    pub device_id: Option<i32>,
    pub remote_id: Option<i32>,
    pub tv_interface_id: Option<i32>,
    pub step_number: Option<i32>,
    pub title: String,
    pub description: Option<String>,
    pub instruction: String,
    pub hint: Option<String>,
    pub highlight_button: Option<String>,
    pub highlight_area: Option<String>,
    pub media_url: Option<String>,
    pub estimated_seconds: Option<i32>,
    pub actions: Option<Vec<StepActionInput>>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = diagnostic_steps)]
pub struct UpdateStep {
    pub problem_id: Option<i32>,
    pub device_id: Option<i32>,
    pub remote_id: Option<i32>,
    pub tv_interface_id: Option<i32>,
    pub step_number: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub hint: Option<String>,
    pub highlight_button: Option<String>,
    pub highlight_area: Option<String>,
    pub media_url: Option<String>,
    pub estimated_seconds: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderSteps {
    pub problem_id: i32,
    pub ordered_ids: Vec<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = diagnostic_steps)]
struct NewStep<'a> {
    problem_id: i32,
    device_id: Option<i32>,
    remote_id: Option<i32>,
    tv_interface_id: Option<i32>,
    step_number: i32,
    title: &'a str,
    description: Option<&'a str>,
    instruction: &'a str,
    hint: Option<&'a str>,
    highlight_button: Option<&'a str>,
    highlight_area: Option<&'a str>,
    media_url: Option<&'a str>,
    estimated_seconds: Option<i32>,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

impl<'a> NewStep<'a> {
    fn copy_of(source: &'a DiagnosticStep, problem_id: i32, step_number: i32, now: i64) -> Self {
        Self {
            problem_id,
            device_id: source.device_id,
            remote_id: source.remote_id,
            tv_interface_id: source.tv_interface_id,
            step_number,
            title: &source.title,
            description: source.description.as_deref(),
            instruction: &source.instruction,
            hint: source.hint.as_deref(),
            highlight_button: source.highlight_button.as_deref(),
            highlight_area: source.highlight_area.as_deref(),
            media_url: source.media_url.as_deref(),
            estimated_seconds: source.estimated_seconds,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Validate for CreateStep {
    fn validate(&self) -> Result<()> {
        validation::positive_id("problem_id", Some(self.problem_id))?;
        validation::positive_id("device_id", self.device_id)?;
        validation::positive_id("remote_id", self.remote_id)?;
        validation::positive_id("tv_interface_id", self.tv_interface_id)?;
        validation::positive_id("step_number", self.step_number)?;
        validation::required_text("title", &self.title, MAX_NAME_LEN)?;
        validation::required_text("instruction", &self.instruction, MAX_TEXT_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::optional_text("hint", self.hint.as_deref(), MAX_TEXT_LEN)?;
        validation::non_negative("estimated_seconds", self.estimated_seconds)?;
        if let Some(actions) = &self.actions {
            actions.iter().try_for_each(Validate::validate)?;
        }
        Ok(())
    }
}

impl Validate for UpdateStep {
    fn validate(&self) -> Result<()> {
        validation::positive_id("problem_id", self.problem_id)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::positive_id("remote_id", self.remote_id)?;
        validation::positive_id("tv_interface_id", self.tv_interface_id)?;
        validation::positive_id("step_number", self.step_number)?;
        validation::present_text("title", self.title.as_deref(), MAX_NAME_LEN)?;
        validation::present_text("instruction", self.instruction.as_deref(), MAX_TEXT_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::optional_text("hint", self.hint.as_deref(), MAX_TEXT_LEN)?;
        validation::non_negative("estimated_seconds", self.estimated_seconds)
    }
}

impl Validate for ReorderSteps {
    fn validate(&self) -> Result<()> {
        validation::positive_id("problem_id", Some(self.problem_id))?;
        if self.ordered_ids.is_empty() {
            return Err(AdminError::Validation(
                "ordered_ids must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn filtered(params: &ListParams) -> diagnostic_steps::BoxedQuery<'static, Sqlite> {
    let mut query = diagnostic_steps::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(diagnostic_steps::is_active.eq(true));
    }
    if let Some(problem_id) = params.problem_id {
        query = query.filter(diagnostic_steps::problem_id.eq(problem_id));
    }
    if let Some(device_id) = params.device_id {
        query = query.filter(diagnostic_steps::device_id.eq(device_id));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            diagnostic_steps::title
                .like(pattern.clone())
                .escape('\\')
                .or(diagnostic_steps::instruction.like(pattern.clone()).escape('\\'))
                .or(diagnostic_steps::description.like(pattern).escape('\\')),
        );
    }
    query
}

async fn ensure_references(
    conn: &mut SqliteAsyncConn,
    problem_id: Option<i32>,
    device_id: Option<i32>,
    remote_id: Option<i32>,
    tv_interface_id: Option<i32>,
) -> Result<()> {
    if let Some(problem_id) = problem_id {
        crate::problems::ensure_active(conn, problem_id).await?;
    }
    if let Some(device_id) = device_id {
        crate::devices::ensure_active(conn, device_id).await?;
    }
    if let Some(remote_id) = remote_id {
        crate::remotes::ensure_active(conn, remote_id).await?;
    }
    if let Some(tv_interface_id) = tv_interface_id {
        crate::tv_interfaces::ensure_active(conn, tv_interface_id).await?;
    }
    Ok(())
}

async fn next_step_number(conn: &mut SqliteAsyncConn, problem_id: i32) -> Result<i32> {
    let current: Option<i32> = diagnostic_steps::table
        .filter(diagnostic_steps::problem_id.eq(problem_id))
        .filter(diagnostic_steps::is_active.eq(true))
        .select(max(diagnostic_steps::step_number))
        .first(conn)
        .await?;
    Ok(current.unwrap_or(0) + 1)
}

async fn ensure_step_number_free(
    conn: &mut SqliteAsyncConn,
    problem_id: i32,
    step_number: i32,
    except_id: Option<i32>,
) -> Result<()> {
    let mut query = diagnostic_steps::table
        .filter(diagnostic_steps::problem_id.eq(problem_id))
        .filter(diagnostic_steps::step_number.eq(step_number))
        .filter(diagnostic_steps::is_active.eq(true))
        .into_boxed();
    if let Some(except_id) = except_id {
        query = query.filter(diagnostic_steps::id.ne(except_id));
    }
    let taken: i64 = query.count().get_result(conn).await?;
    if taken > 0 {
        return Err(AdminError::Duplicate(format!(
            "problem {problem_id} already has an active step number {step_number}"
        )));
    }
    Ok(())
}

async fn find_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<DiagnosticStep> {
    diagnostic_steps::table
        .filter(diagnostic_steps::id.eq(id))
        .filter(diagnostic_steps::is_active.eq(true))
        .first::<DiagnosticStep>(conn)
        .await
        .optional()?
        .ok_or_else(|| AdminError::not_found(StepStore::ENTITY, id))
}

pub(crate) async fn ensure_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<DiagnosticStep> {
    find_active(conn, id).await.map_err(|err| match err {
        AdminError::NotFound(_) => AdminError::Validation(format!(
            "step_id {id} does not reference an active step"
        )),
        other => other,
    })
}

/// Reactivates the steps that went inactive together with their problem at
/// `deleted_at`. Steps whose references or number no longer fit stay inactive.
pub(crate) async fn restore_cascaded(
    conn: &mut SqliteAsyncConn,
    problem_id: i32,
    deleted_at: i64,
) -> Result<usize> {
    let candidates = diagnostic_steps::table
        .filter(diagnostic_steps::problem_id.eq(problem_id))
        .filter(diagnostic_steps::is_active.eq(false))
        .filter(diagnostic_steps::updated_at.eq(deleted_at))
        .order(diagnostic_steps::step_number.asc())
        .load::<DiagnosticStep>(conn)
        .await?;

    let now = now_ts();
    let mut restored = 0;
    for step in candidates {
        let fits = match ensure_references(
            conn,
            None,
            step.device_id,
            step.remote_id,
            step.tv_interface_id,
        )
        .await
        {
            Ok(()) => ensure_step_number_free(conn, problem_id, step.step_number, Some(step.id)).await,
            Err(err) => Err(err),
        };
        match fits {
            Ok(()) => {}
            Err(AdminError::Validation(reason)) | Err(AdminError::Duplicate(reason)) => {
                tracing::debug!(step_id = step.id, %reason, "Leaving step inactive");
                continue;
            }
            Err(other) => return Err(other),
        }

        diesel::update(diagnostic_steps::table.filter(diagnostic_steps::id.eq(step.id)))
            .set((
                diagnostic_steps::is_active.eq(true),
                diagnostic_steps::updated_at.eq(now),
            ))
            .execute(conn)
            .await?;
        restored += 1;
    }
    Ok(restored)
}

async fn insert_step(conn: &mut SqliteAsyncConn, new: &NewStep<'_>) -> Result<DiagnosticStep> {
    let step = diesel::insert_into(diagnostic_steps::table)
        .values(new)
        .get_result::<DiagnosticStep>(conn)
        .await?;
    Ok(step)
}

/// Copies the active steps of `from_problem`, with their actions, onto `to_problem`.
pub(crate) async fn copy_problem_steps(
    conn: &mut SqliteAsyncConn,
    from_problem: i32,
    to_problem: i32,
) -> Result<usize> {
    let source_steps = diagnostic_steps::table
        .filter(diagnostic_steps::problem_id.eq(from_problem))
        .filter(diagnostic_steps::is_active.eq(true))
        .order(diagnostic_steps::step_number.asc())
        .load::<DiagnosticStep>(conn)
        .await?;

    let now = now_ts();
    for source in &source_steps {
        let copy = insert_step(
            conn,
            &NewStep::copy_of(source, to_problem, source.step_number, now),
        )
        .await?;
        actions::copy_actions(conn, source.id, copy.id).await?;
    }
    Ok(source_steps.len())
}

pub struct StepStore {
    db: Database,
}

impl StepStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Renumbers the problem's active steps 1..n in the given order. The list
    /// must name every active step of the problem exactly once.
    pub async fn reorder(&self, problem_id: i32, ordered_ids: &[i32]) -> Result<Vec<DiagnosticStep>> {
        let mut conn = self.db.conn().await?;
        crate::problems::ensure_active(&mut conn, problem_id).await?;

        let current: BTreeSet<i32> = diagnostic_steps::table
            .filter(diagnostic_steps::problem_id.eq(problem_id))
            .filter(diagnostic_steps::is_active.eq(true))
            .select(diagnostic_steps::id)
            .load::<i32>(&mut conn)
            .await?
            .into_iter()
            .collect();
        let requested: BTreeSet<i32> = ordered_ids.iter().copied().collect();
        if requested.len() != ordered_ids.len() || requested != current {
            return Err(AdminError::Validation(format!(
                "ordered_ids must list each active step of problem {problem_id} exactly once"
            )));
        }

        let now = now_ts();
        for (idx, id) in ordered_ids.iter().enumerate() {
            diesel::update(
                diagnostic_steps::table
                    .filter(diagnostic_steps::problem_id.eq(problem_id))
                    .filter(diagnostic_steps::id.eq(*id)),
            )
            .set((
                diagnostic_steps::step_number.eq((idx + 1) as i32),
                diagnostic_steps::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        }

        let steps = diagnostic_steps::table
            .filter(diagnostic_steps::problem_id.eq(problem_id))
            .filter(diagnostic_steps::is_active.eq(true))
            .order(diagnostic_steps::step_number.asc())
            .load::<DiagnosticStep>(&mut conn)
            .await?;
        Ok(steps)
    }

    pub async fn list_actions(&self, step_id: i32) -> Result<Vec<StepAction>> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, step_id).await?;
        actions::list_for_step(&mut conn, step_id).await
    }

    pub async fn replace_actions(
        &self,
        step_id: i32,
        input: &ReplaceActions,
    ) -> Result<Vec<StepAction>> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, step_id).await?;
        actions::replace_for_step(&mut conn, step_id, &input.actions).await
    }
}

#[async_trait]
impl Resource for StepStore {
    type Record = DiagnosticStep;
    type Create = CreateStep;
    type Update = UpdateStep;

    const ENTITY: &'static str = "step";

    fn id_of(record: &DiagnosticStep) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<DiagnosticStep>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let items = filtered(params)
            .order((
                diagnostic_steps::problem_id.asc(),
                diagnostic_steps::step_number.asc(),
            ))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<DiagnosticStep>(&mut conn)
            .await?;
        Ok(Page::new(items, params.page(), params.limit(), total))
    }

    async fn get(&self, id: i32) -> Result<DiagnosticStep> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, id).await
    }

    async fn create(&self, input: CreateStep) -> Result<DiagnosticStep> {
        let mut conn = self.db.conn().await?;
        ensure_references(
            &mut conn,
            Some(input.problem_id),
            input.device_id,
            input.remote_id,
            input.tv_interface_id,
        )
        .await?;

        let step_number = match input.step_number {
            Some(number) => {
                ensure_step_number_free(&mut conn, input.problem_id, number, None).await?;
                number
            }
            None => next_step_number(&mut conn, input.problem_id).await?,
        };

        let now = now_ts();
        let step = insert_step(
            &mut conn,
            &NewStep {
                problem_id: input.problem_id,
                device_id: input.device_id,
                remote_id: input.remote_id,
                tv_interface_id: input.tv_interface_id,
                step_number,
                title: input.title.trim(),
                description: input.description.as_deref(),
                instruction: input.instruction.trim(),
                hint: input.hint.as_deref(),
                highlight_button: input.highlight_button.as_deref(),
                highlight_area: input.highlight_area.as_deref(),
                media_url: input.media_url.as_deref(),
                estimated_seconds: input.estimated_seconds,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;

        if let Some(step_actions) = &input.actions {
            actions::replace_for_step(&mut conn, step.id, step_actions).await?;
        }
        tracing::debug!(step_id = step.id, problem_id = step.problem_id, "Created step");
        Ok(step)
    }

    async fn update(&self, id: i32, input: UpdateStep) -> Result<DiagnosticStep> {
        let mut conn = self.db.conn().await?;
        let current = find_active(&mut conn, id).await?;
        ensure_references(
            &mut conn,
            input.problem_id,
            input.device_id,
            input.remote_id,
            input.tv_interface_id,
        )
        .await?;

        let problem_id = input.problem_id.unwrap_or(current.problem_id);
        let step_number = input.step_number.unwrap_or(current.step_number);
        if problem_id != current.problem_id || step_number != current.step_number {
            ensure_step_number_free(&mut conn, problem_id, step_number, Some(id)).await?;
        }

        let step = diesel::update(diagnostic_steps::table.filter(diagnostic_steps::id.eq(id)))
            .set((&input, diagnostic_steps::updated_at.eq(now_ts())))
            .get_result::<DiagnosticStep>(&mut conn)
            .await?;
        Ok(step)
    }

    async fn soft_delete(&self, id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, id).await?;
        diesel::update(diagnostic_steps::table.filter(diagnostic_steps::id.eq(id)))
            .set((
                diagnostic_steps::is_active.eq(false),
                diagnostic_steps::updated_at.eq(now_ts()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn restore(&self, id: i32) -> Result<DiagnosticStep> {
        let mut conn = self.db.conn().await?;
        let step = diagnostic_steps::table
            .filter(diagnostic_steps::id.eq(id))
            .first::<DiagnosticStep>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))?;
        if step.is_active {
            return Ok(step);
        }
        ensure_references(
            &mut conn,
            Some(step.problem_id),
            step.device_id,
            step.remote_id,
            step.tv_interface_id,
        )
        .await?;
        ensure_step_number_free(&mut conn, step.problem_id, step.step_number, Some(id)).await?;

        let step = diesel::update(diagnostic_steps::table.filter(diagnostic_steps::id.eq(id)))
            .set((
                diagnostic_steps::is_active.eq(true),
                diagnostic_steps::updated_at.eq(now_ts()),
            ))
            .get_result::<DiagnosticStep>(&mut conn)
            .await?;
        Ok(step)
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<DiagnosticStep>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let items = filtered(&params)
            .order((
                diagnostic_steps::problem_id.asc(),
                diagnostic_steps::step_number.asc(),
            ))
            .limit(limit as i64)
            .load::<DiagnosticStep>(&mut conn)
            .await?;
        Ok(items)
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = diagnostic_steps::table.count().get_result(&mut conn).await?;
        let active: i64 = diagnostic_steps::table
            .filter(diagnostic_steps::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let by_problem = diagnostic_steps::table
            .filter(diagnostic_steps::is_active.eq(true))
            .group_by(diagnostic_steps::problem_id)
            .select((diagnostic_steps::problem_id, count_star()))
            .load::<(i32, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "by_problem": crate::problems::counts_object(
                by_problem
                    .into_iter()
                    .map(|(problem_id, count)| (problem_id.to_string(), count))
                    .collect(),
            ),
        }))
    }
}

#[async_trait]
impl Duplicable for StepStore {
    /// Copies the step, with its actions, to the next free number of the same problem.
    async fn duplicate(&self, id: i32) -> Result<DiagnosticStep> {
        let mut conn = self.db.conn().await?;
        let source = find_active(&mut conn, id).await?;
        let step_number = next_step_number(&mut conn, source.problem_id).await?;
        let copy = insert_step(
            &mut conn,
            &NewStep::copy_of(&source, source.problem_id, step_number, now_ts()),
        )
        .await?;
        actions::copy_actions(&mut conn, source.id, copy.id).await?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::{CreateProblem, ProblemStore};

    async fn stores() -> (tempfile::TempDir, ProblemStore, StepStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("steps.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        (dir, ProblemStore::new(db.clone()), StepStore::new(db))
    }

    async fn problem(store: &ProblemStore) -> i32 {
        store
            .create(CreateProblem {
                title: "No signal".to_string(),
                device_id: None,
                description: None,
                category: None,
                icon: None,
                color: None,
                tags: None,
                priority: None,
                estimated_minutes: None,
                is_popular: None,
                status: None,
            })
            .await
            .expect("problem")
            .id
    }

    fn step(problem_id: i32, title: &str, step_number: Option<i32>) -> CreateStep {
        CreateStep {
            problem_id,
            device_id: None,
            remote_id: None,
            tv_interface_id: None,
            step_number,
            title: title.to_string(),
            description: None,
            instruction: format!("Do {title}"),
            hint: None,
            highlight_button: None,
            highlight_area: None,
            media_url: None,
            estimated_seconds: None,
            actions: Some(vec![StepActionInput {
                action_type: "press_button".to_string(),
                button: Some("power".to_string()),
                area: None,
                description: None,
            }]),
        }
    }

    #[tokio::test]
    async fn step_numbers_auto_increment_and_must_be_unique() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;

        let first = steps.create(step(problem_id, "one", None)).await.expect("first");
        let second = steps.create(step(problem_id, "two", None)).await.expect("second");
        assert_eq!(first.step_number, 1);
        assert_eq!(second.step_number, 2);

        let err = steps
            .create(step(problem_id, "clash", Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Duplicate(_)));

        steps.soft_delete(second.id).await.expect("delete");
        steps
            .create(step(problem_id, "reuse", Some(2)))
            .await
            .expect("number free after soft delete");
    }

    #[tokio::test]
    async fn reorder_requires_every_step_once() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;
        let a = steps.create(step(problem_id, "a", None)).await.expect("a");
        let b = steps.create(step(problem_id, "b", None)).await.expect("b");
        let c = steps.create(step(problem_id, "c", None)).await.expect("c");

        let err = steps.reorder(problem_id, &[c.id, a.id]).await.unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));

        let ordered = steps
            .reorder(problem_id, &[c.id, a.id, b.id])
            .await
            .expect("reorder");
        let ids: Vec<i32> = ordered.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
        assert_eq!(ordered[0].step_number, 1);
    }

    #[tokio::test]
    async fn duplicate_problem_copies_steps_and_actions() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;
        steps.create(step(problem_id, "a", None)).await.expect("a");
        steps.create(step(problem_id, "b", None)).await.expect("b");

        let copy = problems.duplicate(problem_id).await.expect("duplicate");
        assert_eq!(copy.status, "draft");

        let copied = steps
            .list(&ListParams {
                problem_id: Some(copy.id),
                ..ListParams::default()
            })
            .await
            .expect("list copied");
        assert_eq!(copied.items.len(), 2);
        let actions = steps
            .list_actions(copied.items[0].id)
            .await
            .expect("actions");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].button.as_deref(), Some("power"));

        problems.soft_delete(problem_id).await.expect("delete problem");
        let remaining = steps
            .list(&ListParams {
                problem_id: Some(problem_id),
                ..ListParams::default()
            })
            .await
            .expect("list");
        assert!(remaining.items.is_empty());
    }

    #[tokio::test]
    async fn replace_actions_renumbers_positions() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;
        let created = steps.create(step(problem_id, "a", None)).await.expect("a");

        let replaced = steps
            .replace_actions(
                created.id,
                &ReplaceActions {
                    actions: vec![
                        StepActionInput {
                            action_type: "navigate".to_string(),
                            button: None,
                            area: Some("settings".to_string()),
                            description: None,
                        },
                        StepActionInput {
                            action_type: "wait".to_string(),
                            button: None,
                            area: None,
                            description: Some("10 seconds".to_string()),
                        },
                    ],
                },
            )
            .await
            .expect("replace");
        let positions: Vec<i32> = replaced.iter().map(|a| a.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(replaced[0].action_type, "navigate");
    }

    #[tokio::test]
    async fn restore_requires_an_active_problem() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;
        let created = steps.create(step(problem_id, "Reboot", None)).await.expect("step");

        problems.soft_delete(problem_id).await.expect("delete problem");
        let err = steps.restore(created.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
        assert!(steps.get(created.id).await.is_err());
    }

    #[tokio::test]
    async fn restore_refuses_a_taken_step_number() {
        let (_dir, problems, steps) = stores().await;
        let problem_id = problem(&problems).await;
        let original = steps.create(step(problem_id, "Reboot", Some(1))).await.expect("step");
        steps.soft_delete(original.id).await.expect("delete");
        let replacement = steps
            .create(step(problem_id, "Power cycle", Some(1)))
            .await
            .expect("replacement");
        assert_eq!(replacement.step_number, 1);

        let err = steps.restore(original.id).await.unwrap_err();
        assert!(matches!(err, AdminError::Duplicate(_)));
    }
}
