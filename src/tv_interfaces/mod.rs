use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{decode_json, encode_json, like_pattern, now_ts, Database, Page, SqliteAsyncConn};
use crate::error::{AdminError, Result};
use crate::interfaces::resource::{Duplicable, Resource};
use crate::query::ListParams;
use crate::validation::{self, Validate, MAX_NAME_LEN, MAX_TEXT_LEN};

pub(crate) mod schema;
use schema::tv_interfaces;

pub const INTERFACE_TYPES: &[&str] = &["home", "menu", "settings", "guide", "app", "error", "custom"];
const DEFAULT_INTERFACE_TYPE: &str = "custom";

/// A screen of the set-top-box UI with the regions a step can point at.
#[derive(Debug, Clone, Serialize)]
pub struct TvInterface {
    pub id: i32,
    pub device_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
    pub interface_type: String,
    pub screenshot_url: Option<String>,
    pub dimensions: Value,
    pub clickable_areas: Value,
    pub highlight_areas: Value,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct TvInterfaceRow {
    id: i32,
    device_id: Option<i32>,
    name: String,
    description: Option<String>,
    interface_type: String,
    screenshot_url: Option<String>,
    dimensions: String,
    clickable_areas: String,
    highlight_areas: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTvInterface {
    pub name: String,
    pub device_id: Option<i32>,
    pub description: Option<String>,
    pub interface_type: Option<String>,
    pub screenshot_url: Option<String>,
    pub dimensions: Option<Value>,
    pub clickable_areas: Option<Value>,
    pub highlight_areas: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTvInterface {
    pub name: Option<String>,
    pub device_id: Option<i32>,
    pub description: Option<String>,
    pub interface_type: Option<String>,
    pub screenshot_url: Option<String>,
    pub dimensions: Option<Value>,
    pub clickable_areas: Option<Value>,
    pub highlight_areas: Option<Value>,
}

#[derive(Insertable)]
#[diesel(table_name = tv_interfaces)]
struct NewTvInterface<'a> {
    device_id: Option<i32>,
    name: &'a str,
    description: Option<&'a str>,
    interface_type: &'a str,
    screenshot_url: Option<&'a str>,
    dimensions: String,
    clickable_areas: String,
    highlight_areas: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = tv_interfaces)]
struct TvInterfaceChangeset {
    device_id: Option<i32>,
    name: Option<String>,
    description: Option<String>,
    interface_type: Option<String>,
    screenshot_url: Option<String>,
    dimensions: Option<String>,
    clickable_areas: Option<String>,
    highlight_areas: Option<String>,
    updated_at: i64,
}

impl Validate for CreateTvInterface {
    fn validate(&self) -> Result<()> {
        validation::required_text("name", &self.name, MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::one_of("interface_type", self.interface_type.as_deref(), INTERFACE_TYPES)?;
        validation::json_object("dimensions", self.dimensions.as_ref())?;
        validation::json_array("clickable_areas", self.clickable_areas.as_ref())?;
        validation::json_array("highlight_areas", self.highlight_areas.as_ref())
    }
}

impl Validate for UpdateTvInterface {
    fn validate(&self) -> Result<()> {
        validation::present_text("name", self.name.as_deref(), MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::one_of("interface_type", self.interface_type.as_deref(), INTERFACE_TYPES)?;
        validation::json_object("dimensions", self.dimensions.as_ref())?;
        validation::json_array("clickable_areas", self.clickable_areas.as_ref())?;
        validation::json_array("highlight_areas", self.highlight_areas.as_ref())
    }
}

fn prepare_update(input: UpdateTvInterface) -> Result<TvInterfaceChangeset> {
    Ok(TvInterfaceChangeset {
        device_id: input.device_id,
        name: input.name.map(|name| name.trim().to_string()),
        description: input.description,
        interface_type: input.interface_type,
        screenshot_url: input.screenshot_url,
        dimensions: input.dimensions.as_ref().map(encode_json).transpose()?,
        clickable_areas: input.clickable_areas.as_ref().map(encode_json).transpose()?,
        highlight_areas: input.highlight_areas.as_ref().map(encode_json).transpose()?,
        updated_at: now_ts(),
    })
}

fn map_row(row: TvInterfaceRow) -> TvInterface {
    TvInterface {
        id: row.id,
        device_id: row.device_id,
        name: row.name,
        description: row.description,
        interface_type: row.interface_type,
        screenshot_url: row.screenshot_url,
        dimensions: decode_json(Some(&row.dimensions), json!({})),
        clickable_areas: decode_json(Some(&row.clickable_areas), json!([])),
        highlight_areas: decode_json(Some(&row.highlight_areas), json!([])),
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn filtered(params: &ListParams) -> tv_interfaces::BoxedQuery<'static, Sqlite> {
    let mut query = tv_interfaces::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(tv_interfaces::is_active.eq(true));
    }
    if let Some(device_id) = params.device_id {
        query = query.filter(tv_interfaces::device_id.eq(device_id));
    }
    if let Some(interface_type) = params.interface_type.clone() {
        query = query.filter(tv_interfaces::interface_type.eq(interface_type));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            tv_interfaces::name
                .like(pattern.clone())
                .escape('\\')
                .or(tv_interfaces::description.like(pattern).escape('\\')),
        );
    }
    query
}

pub(crate) async fn ensure_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<()> {
    let found: i64 = tv_interfaces::table
        .filter(tv_interfaces::id.eq(id))
        .filter(tv_interfaces::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    if found == 0 {
        return Err(AdminError::Validation(format!(
            "tv_interface_id {id} does not reference an active TV interface"
        )));
    }
    Ok(())
}

pub struct TvInterfaceStore {
    db: Database,
}

impl TvInterfaceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert(&self, new: &NewTvInterface<'_>) -> Result<TvInterface> {
        let mut conn = self.db.conn().await?;
        let row = diesel::insert_into(tv_interfaces::table)
            .values(new)
            .get_result::<TvInterfaceRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }
}

#[async_trait]
impl Resource for TvInterfaceStore {
    type Record = TvInterface;
    type Create = CreateTvInterface;
    type Update = UpdateTvInterface;

    const ENTITY: &'static str = "tv_interface";

    fn id_of(record: &TvInterface) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<TvInterface>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let rows = filtered(params)
            .order((tv_interfaces::interface_type.asc(), tv_interfaces::name.asc()))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<TvInterfaceRow>(&mut conn)
            .await?;
        Ok(Page::new(rows, params.page(), params.limit(), total).map(map_row))
    }

    async fn get(&self, id: i32) -> Result<TvInterface> {
        let mut conn = self.db.conn().await?;
        tv_interfaces::table
            .filter(tv_interfaces::id.eq(id))
            .filter(tv_interfaces::is_active.eq(true))
            .first::<TvInterfaceRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn create(&self, input: CreateTvInterface) -> Result<TvInterface> {
        if let Some(device_id) = input.device_id {
            let mut conn = self.db.conn().await?;
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        let now = now_ts();
        let interface = self
            .insert(&NewTvInterface {
                device_id: input.device_id,
                name: input.name.trim(),
                description: input.description.as_deref(),
                interface_type: input
                    .interface_type
                    .as_deref()
                    .unwrap_or(DEFAULT_INTERFACE_TYPE),
                screenshot_url: input.screenshot_url.as_deref(),
                dimensions: encode_json(input.dimensions.as_ref().unwrap_or(&json!({})))?,
                clickable_areas: encode_json(
                    input.clickable_areas.as_ref().unwrap_or(&json!([])),
                )?,
                highlight_areas: encode_json(
                    input.highlight_areas.as_ref().unwrap_or(&json!([])),
                )?,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::debug!(tv_interface_id = interface.id, "Created TV interface");
        Ok(interface)
    }

    async fn update(&self, id: i32, input: UpdateTvInterface) -> Result<TvInterface> {
        self.get(id).await?;
        let mut conn = self.db.conn().await?;
        if let Some(device_id) = input.device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        let changes = prepare_update(input)?;
        let row = diesel::update(tv_interfaces::table.filter(tv_interfaces::id.eq(id)))
            .set(&changes)
            .get_result::<TvInterfaceRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }

    async fn soft_delete(&self, id: i32) -> Result<()> {
        use crate::steps::schema::diagnostic_steps;

        self.get(id).await?;
        let mut conn = self.db.conn().await?;
        let in_use: i64 = diagnostic_steps::table
            .filter(diagnostic_steps::tv_interface_id.eq(id))
            .filter(diagnostic_steps::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        if in_use > 0 {
            return Err(AdminError::ResourceInUse(format!(
                "tv interface {id} is still used by {in_use} steps"
            )));
        }

        diesel::update(tv_interfaces::table.filter(tv_interfaces::id.eq(id)))
            .set((
                tv_interfaces::is_active.eq(false),
                tv_interfaces::updated_at.eq(now_ts()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn restore(&self, id: i32) -> Result<TvInterface> {
        let mut conn = self.db.conn().await?;
        let device_id = tv_interfaces::table
            .filter(tv_interfaces::id.eq(id))
            .select(tv_interfaces::device_id)
            .first::<Option<i32>>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))?;
        if let Some(device_id) = device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        diesel::update(tv_interfaces::table.filter(tv_interfaces::id.eq(id)))
            .set((
                tv_interfaces::is_active.eq(true),
                tv_interfaces::updated_at.eq(now_ts()),
            ))
            .get_result::<TvInterfaceRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<TvInterface>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let rows = filtered(&params)
            .order(tv_interfaces::name.asc())
            .limit(limit as i64)
            .load::<TvInterfaceRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = tv_interfaces::table.count().get_result(&mut conn).await?;
        let active: i64 = tv_interfaces::table
            .filter(tv_interfaces::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let by_type = tv_interfaces::table
            .filter(tv_interfaces::is_active.eq(true))
            .group_by(tv_interfaces::interface_type)
            .select((tv_interfaces::interface_type, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "by_type": crate::problems::counts_object(by_type),
        }))
    }
}

#[async_trait]
impl Duplicable for TvInterfaceStore {
    async fn duplicate(&self, id: i32) -> Result<TvInterface> {
        let source = self.get(id).await?;
        let now = now_ts();
        let name = format!("{} (copy)", source.name);
        self.insert(&NewTvInterface {
            device_id: source.device_id,
            name: &name,
            description: source.description.as_deref(),
            interface_type: &source.interface_type,
            screenshot_url: source.screenshot_url.as_deref(),
            dimensions: encode_json(&source.dimensions)?,
            clickable_areas: encode_json(&source.clickable_areas)?,
            highlight_areas: encode_json(&source.highlight_areas)?,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
    }
}
