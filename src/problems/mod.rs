use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::db::{decode_json, encode_json, like_pattern, now_ts, Database, Page, SqliteAsyncConn};
use crate::error::{AdminError, Result};
use crate::interfaces::resource::{Duplicable, Resource};
use crate::query::ListParams;
use crate::validation::{self, Validate, MAX_NAME_LEN, MAX_TEXT_LEN};

pub(crate) mod schema;
use schema::problems;

pub const PROBLEM_STATUSES: &[&str] = &["draft", "published", "archived"];
const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub id: i32,
    pub device_id: Option<i32>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tags: Value,
    pub priority: i32,
    pub estimated_minutes: Option<i32>,
    pub is_popular: bool,
    pub status: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct ProblemRow {
    id: i32,
    device_id: Option<i32>,
    title: String,
    description: Option<String>,
    category: String,
    icon: Option<String>,
    color: Option<String>,
    tags: String,
    priority: i32,
    estimated_minutes: Option<i32>,
    is_popular: bool,
    status: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProblem {
    pub title: String,
    pub device_id: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tags: Option<Value>,
    pub priority: Option<i32>,
    pub estimated_minutes: Option<i32>,
    pub is_popular: Option<bool>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProblem {
    pub title: Option<String>,
    pub device_id: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tags: Option<Value>,
    pub priority: Option<i32>,
    pub estimated_minutes: Option<i32>,
    pub is_popular: Option<bool>,
    pub status: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = problems)]
struct NewProblem<'a> {
    device_id: Option<i32>,
    title: &'a str,
    description: Option<&'a str>,
    category: &'a str,
    icon: Option<&'a str>,
    color: Option<&'a str>,
    tags: String,
    priority: i32,
    estimated_minutes: Option<i32>,
    is_popular: bool,
    status: &'a str,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = problems)]
struct ProblemChangeset {
    device_id: Option<i32>,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    icon: Option<String>,
    color: Option<String>,
    tags: Option<String>,
    priority: Option<i32>,
    estimated_minutes: Option<i32>,
    is_popular: Option<bool>,
    status: Option<String>,
    updated_at: i64,
}

impl Validate for CreateProblem {
    fn validate(&self) -> Result<()> {
        validation::required_text("title", &self.title, MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::optional_text("category", self.category.as_deref(), MAX_NAME_LEN)?;
        validation::json_array("tags", self.tags.as_ref())?;
        validation::non_negative("estimated_minutes", self.estimated_minutes)?;
        validation::one_of("status", self.status.as_deref(), PROBLEM_STATUSES)
    }
}

impl Validate for UpdateProblem {
    fn validate(&self) -> Result<()> {
        validation::present_text("title", self.title.as_deref(), MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::present_text("category", self.category.as_deref(), MAX_NAME_LEN)?;
        validation::json_array("tags", self.tags.as_ref())?;
        validation::non_negative("estimated_minutes", self.estimated_minutes)?;
        validation::one_of("status", self.status.as_deref(), PROBLEM_STATUSES)
    }
}

fn prepare_update(input: UpdateProblem) -> Result<ProblemChangeset> {
    Ok(ProblemChangeset {
        device_id: input.device_id,
        title: input.title.map(|title| title.trim().to_string()),
        description: input.description,
        category: input.category.map(|category| category.trim().to_string()),
        icon: input.icon,
        color: input.color,
        tags: input.tags.as_ref().map(encode_json).transpose()?,
        priority: input.priority,
        estimated_minutes: input.estimated_minutes,
        is_popular: input.is_popular,
        status: input.status,
        updated_at: now_ts(),
    })
}

fn map_row(row: ProblemRow) -> Problem {
    Problem {
        id: row.id,
        device_id: row.device_id,
        title: row.title,
        description: row.description,
        category: row.category,
        icon: row.icon,
        color: row.color,
        tags: decode_json(Some(&row.tags), json!([])),
        priority: row.priority,
        estimated_minutes: row.estimated_minutes,
        is_popular: row.is_popular,
        status: row.status,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn filtered(params: &ListParams) -> problems::BoxedQuery<'static, Sqlite> {
    let mut query = problems::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(problems::is_active.eq(true));
    }
    if let Some(device_id) = params.device_id {
        query = query.filter(problems::device_id.eq(device_id));
    }
    if let Some(category) = params.category.clone() {
        query = query.filter(problems::category.eq(category));
    }
    if let Some(status) = params.status.clone() {
        query = query.filter(problems::status.eq(status));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            problems::title
                .like(pattern.clone())
                .escape('\\')
                .or(problems::description.like(pattern.clone()).escape('\\'))
                .or(problems::category.like(pattern).escape('\\')),
        );
    }
    query
}

pub(crate) async fn ensure_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<()> {
    let found: i64 = problems::table
        .filter(problems::id.eq(id))
        .filter(problems::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    if found == 0 {
        return Err(AdminError::Validation(format!(
            "problem_id {id} does not reference an active problem"
        )));
    }
    Ok(())
}

pub struct ProblemStore {
    db: Database,
}

impl ProblemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert(&self, new: &NewProblem<'_>) -> Result<Problem> {
        let mut conn = self.db.conn().await?;
        let row = diesel::insert_into(problems::table)
            .values(new)
            .get_result::<ProblemRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }
}

#[async_trait]
impl Resource for ProblemStore {
    type Record = Problem;
    type Create = CreateProblem;
    type Update = UpdateProblem;

    const ENTITY: &'static str = "problem";

    fn id_of(record: &Problem) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<Problem>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let rows = filtered(params)
            .order((problems::priority.desc(), problems::title.asc()))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<ProblemRow>(&mut conn)
            .await?;
        Ok(Page::new(rows, params.page(), params.limit(), total).map(map_row))
    }

    async fn get(&self, id: i32) -> Result<Problem> {
        let mut conn = self.db.conn().await?;
        problems::table
            .filter(problems::id.eq(id))
            .filter(problems::is_active.eq(true))
            .first::<ProblemRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn create(&self, input: CreateProblem) -> Result<Problem> {
        if let Some(device_id) = input.device_id {
            let mut conn = self.db.conn().await?;
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        let now = now_ts();
        let tags = input.tags.unwrap_or_else(|| json!([]));
        let category = input
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);
        let problem = self
            .insert(&NewProblem {
                device_id: input.device_id,
                title: input.title.trim(),
                description: input.description.as_deref(),
                category,
                icon: input.icon.as_deref(),
                color: input.color.as_deref(),
                tags: encode_json(&tags)?,
                priority: input.priority.unwrap_or(0),
                estimated_minutes: input.estimated_minutes,
                is_popular: input.is_popular.unwrap_or(false),
                status: input.status.as_deref().unwrap_or("draft"),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::debug!(problem_id = problem.id, "Created problem");
        Ok(problem)
    }

    async fn update(&self, id: i32, input: UpdateProblem) -> Result<Problem> {
        self.get(id).await?;
        let mut conn = self.db.conn().await?;
        if let Some(device_id) = input.device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        let changes = prepare_update(input)?;
        let row = diesel::update(problems::table.filter(problems::id.eq(id)))
            .set(&changes)
            .get_result::<ProblemRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }

    /// Soft-deletes the problem together with its steps.
    async fn soft_delete(&self, id: i32) -> Result<()> {
        use crate::steps::schema::diagnostic_steps;

        self.get(id).await?;
        let now = now_ts();
        let mut conn = self.db.conn().await?;
        let steps = diesel::update(
            diagnostic_steps::table
                .filter(diagnostic_steps::problem_id.eq(id))
                .filter(diagnostic_steps::is_active.eq(true)),
        )
        .set((
            diagnostic_steps::is_active.eq(false),
            diagnostic_steps::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;
        diesel::update(problems::table.filter(problems::id.eq(id)))
            .set((problems::is_active.eq(false), problems::updated_at.eq(now)))
            .execute(&mut conn)
            .await?;
        tracing::debug!(problem_id = id, steps, "Soft-deleted problem and its steps");
        Ok(())
    }

    /// Reactivates the problem and the steps its delete deactivated.
    async fn restore(&self, id: i32) -> Result<Problem> {
        let mut conn = self.db.conn().await?;
        let current = problems::table
            .filter(problems::id.eq(id))
            .first::<ProblemRow>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))?;
        if current.is_active {
            return Ok(map_row(current));
        }
        if let Some(device_id) = current.device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        let row = diesel::update(problems::table.filter(problems::id.eq(id)))
            .set((problems::is_active.eq(true), problems::updated_at.eq(now_ts())))
            .get_result::<ProblemRow>(&mut conn)
            .await?;
        let steps = crate::steps::restore_cascaded(&mut conn, id, current.updated_at).await?;
        tracing::debug!(problem_id = id, steps, "Restored problem");
        Ok(map_row(row))
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Problem>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let rows = filtered(&params)
            .order((problems::is_popular.desc(), problems::title.asc()))
            .limit(limit as i64)
            .load::<ProblemRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = problems::table.count().get_result(&mut conn).await?;
        let active: i64 = problems::table
            .filter(problems::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let popular: i64 = problems::table
            .filter(problems::is_active.eq(true))
            .filter(problems::is_popular.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let by_category = problems::table
            .filter(problems::is_active.eq(true))
            .group_by(problems::category)
            .select((problems::category, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;
        let by_status = problems::table
            .filter(problems::is_active.eq(true))
            .group_by(problems::status)
            .select((problems::status, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "popular": popular,
            "by_category": counts_object(by_category),
            "by_status": counts_object(by_status),
        }))
    }
}

pub(crate) fn counts_object(rows: Vec<(String, i64)>) -> Value {
    Value::Object(
        rows.into_iter()
            .map(|(key, count)| (key, json!(count)))
            .collect::<Map<String, Value>>(),
    )
}

#[async_trait]
impl Duplicable for ProblemStore {
    /// Copies the problem as a draft along with its active steps and their actions.
    async fn duplicate(&self, id: i32) -> Result<Problem> {
        let source = self.get(id).await?;
        let now = now_ts();
        let title = format!("{} (copy)", source.title);
        let copy = self
            .insert(&NewProblem {
                device_id: source.device_id,
                title: &title,
                description: source.description.as_deref(),
                category: &source.category,
                icon: source.icon.as_deref(),
                color: source.color.as_deref(),
                tags: encode_json(&source.tags)?,
                priority: source.priority,
                estimated_minutes: source.estimated_minutes,
                is_popular: false,
                status: "draft",
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut conn = self.db.conn().await?;
        let copied = crate::steps::copy_problem_steps(&mut conn, source.id, copy.id).await?;
        tracing::debug!(
            source_id = source.id,
            copy_id = copy.id,
            steps = copied,
            "Duplicated problem"
        );
        Ok(copy)
    }
}
