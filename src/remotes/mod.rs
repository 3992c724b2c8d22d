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
use schema::remotes;

const DEFAULT_LAYOUT: &str = "standard";

#[derive(Debug, Clone, Serialize)]
pub struct Remote {
    pub id: i32,
    pub device_id: Option<i32>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub layout: String,
    pub image_url: Option<String>,
    pub dimensions: Value,
    pub buttons: Value,
    pub zones: Value,
    pub is_default: bool,
    pub usage_count: i32,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct RemoteRow {
    id: i32,
    device_id: Option<i32>,
    name: String,
    manufacturer: Option<String>,
    model: Option<String>,
    description: Option<String>,
    layout: String,
    image_url: Option<String>,
    dimensions: String,
    buttons: String,
    zones: String,
    is_default: bool,
    usage_count: i32,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRemote {
    pub name: String,
    pub device_id: Option<i32>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub layout: Option<String>,
    pub image_url: Option<String>,
    pub dimensions: Option<Value>,
    pub buttons: Option<Value>,
    pub zones: Option<Value>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRemote {
    pub name: Option<String>,
    pub device_id: Option<i32>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub layout: Option<String>,
    pub image_url: Option<String>,
    pub dimensions: Option<Value>,
    pub buttons: Option<Value>,
    pub zones: Option<Value>,
    pub is_default: Option<bool>,
}

#[derive(Insertable)]
#[diesel(table_name = remotes)]
struct NewRemote<'a> {
    device_id: Option<i32>,
    name: &'a str,
    manufacturer: Option<&'a str>,
    model: Option<&'a str>,
    description: Option<&'a str>,
    layout: &'a str,
    image_url: Option<&'a str>,
    dimensions: String,
    buttons: String,
    zones: String,
    is_default: bool,
    usage_count: i32,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = remotes)]
struct RemoteChangeset {
    device_id: Option<i32>,
    name: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    description: Option<String>,
    layout: Option<String>,
    image_url: Option<String>,
    dimensions: Option<String>,
    buttons: Option<String>,
    zones: Option<String>,
    is_default: Option<bool>,
    updated_at: i64,
}

impl Validate for CreateRemote {
    fn validate(&self) -> Result<()> {
        validation::required_text("name", &self.name, MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("manufacturer", self.manufacturer.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("model", self.model.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::optional_text("layout", self.layout.as_deref(), MAX_NAME_LEN)?;
        validation::json_object("dimensions", self.dimensions.as_ref())?;
        validation::json_array("buttons", self.buttons.as_ref())?;
        validation::json_array("zones", self.zones.as_ref())
    }
}

impl Validate for UpdateRemote {
    fn validate(&self) -> Result<()> {
        validation::present_text("name", self.name.as_deref(), MAX_NAME_LEN)?;
        validation::positive_id("device_id", self.device_id)?;
        validation::optional_text("manufacturer", self.manufacturer.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("model", self.model.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::present_text("layout", self.layout.as_deref(), MAX_NAME_LEN)?;
        validation::json_object("dimensions", self.dimensions.as_ref())?;
        validation::json_array("buttons", self.buttons.as_ref())?;
        validation::json_array("zones", self.zones.as_ref())
    }
}

fn prepare_update(input: UpdateRemote) -> Result<RemoteChangeset> {
    Ok(RemoteChangeset {
        device_id: input.device_id,
        name: input.name.map(|name| name.trim().to_string()),
        manufacturer: input.manufacturer,
        model: input.model,
        description: input.description,
        layout: input.layout.map(|layout| layout.trim().to_string()),
        image_url: input.image_url,
        dimensions: input.dimensions.as_ref().map(encode_json).transpose()?,
        buttons: input.buttons.as_ref().map(encode_json).transpose()?,
        zones: input.zones.as_ref().map(encode_json).transpose()?,
        is_default: input.is_default,
        updated_at: now_ts(),
    })
}

fn map_row(row: RemoteRow) -> Remote {
    Remote {
        id: row.id,
        device_id: row.device_id,
        name: row.name,
        manufacturer: row.manufacturer,
        model: row.model,
        description: row.description,
        layout: row.layout,
        image_url: row.image_url,
        dimensions: decode_json(Some(&row.dimensions), json!({})),
        buttons: decode_json(Some(&row.buttons), json!([])),
        zones: decode_json(Some(&row.zones), json!([])),
        is_default: row.is_default,
        usage_count: row.usage_count,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn filtered(params: &ListParams) -> remotes::BoxedQuery<'static, Sqlite> {
    let mut query = remotes::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(remotes::is_active.eq(true));
    }
    if let Some(device_id) = params.device_id {
        query = query.filter(remotes::device_id.eq(device_id));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            remotes::name
                .like(pattern.clone())
                .escape('\\')
                .or(remotes::manufacturer.like(pattern.clone()).escape('\\'))
                .or(remotes::model.like(pattern).escape('\\')),
        );
    }
    query
}

pub(crate) async fn ensure_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<()> {
    let found: i64 = remotes::table
        .filter(remotes::id.eq(id))
        .filter(remotes::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    if found == 0 {
        return Err(AdminError::Validation(format!(
            "remote_id {id} does not reference an active remote"
        )));
    }
    Ok(())
}

/// Clears `is_default` on every other remote of the device so at most one stays set.
async fn clear_other_defaults(
    conn: &mut SqliteAsyncConn,
    device_id: Option<i32>,
    keep_id: Option<i32>,
) -> Result<usize> {
    let mut target = remotes::table
        .filter(remotes::is_default.eq(true))
        .into_boxed();
    target = match device_id {
        Some(device_id) => target.filter(remotes::device_id.eq(device_id)),
        None => target.filter(remotes::device_id.is_null()),
    };
    if let Some(keep_id) = keep_id {
        target = target.filter(remotes::id.ne(keep_id));
    }
    let ids = target.select(remotes::id).load::<i32>(conn).await?;
    if ids.is_empty() {
        return Ok(0);
    }
    let cleared = diesel::update(remotes::table.filter(remotes::id.eq_any(ids)))
        .set((remotes::is_default.eq(false), remotes::updated_at.eq(now_ts())))
        .execute(conn)
        .await?;
    Ok(cleared)
}

async fn find_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<Remote> {
    remotes::table
        .filter(remotes::id.eq(id))
        .filter(remotes::is_active.eq(true))
        .first::<RemoteRow>(conn)
        .await
        .optional()?
        .map(map_row)
        .ok_or_else(|| AdminError::not_found(RemoteStore::ENTITY, id))
}

async fn steps_using(conn: &mut SqliteAsyncConn, id: i32) -> Result<i64> {
    use crate::steps::schema::diagnostic_steps;

    let count = diagnostic_steps::table
        .filter(diagnostic_steps::remote_id.eq(id))
        .filter(diagnostic_steps::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    Ok(count)
}

pub struct RemoteStore {
    db: Database,
}

impl RemoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert(&self, conn: &mut SqliteAsyncConn, new: &NewRemote<'_>) -> Result<Remote> {
        let row = diesel::insert_into(remotes::table)
            .values(new)
            .get_result::<RemoteRow>(conn)
            .await?;
        Ok(map_row(row))
    }

    pub async fn set_default(&self, id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        let remote = find_active(&mut conn, id).await?;
        let cleared = clear_other_defaults(&mut conn, remote.device_id, Some(id)).await?;
        let row = diesel::update(remotes::table.filter(remotes::id.eq(id)))
            .set((remotes::is_default.eq(true), remotes::updated_at.eq(now_ts())))
            .get_result::<RemoteRow>(&mut conn)
            .await?;
        tracing::debug!(remote_id = id, device_id = ?remote.device_id, cleared, "Set default remote");
        Ok(map_row(row))
    }

    pub async fn default_for_device(&self, device_id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        remotes::table
            .filter(remotes::device_id.eq(device_id))
            .filter(remotes::is_default.eq(true))
            .filter(remotes::is_active.eq(true))
            .first::<RemoteRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| {
                AdminError::NotFound(format!("no default remote for device {device_id}"))
            })
    }

    pub async fn increment_usage(&self, id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, id).await?;
        let row = diesel::update(remotes::table.filter(remotes::id.eq(id)))
            .set((
                remotes::usage_count.eq(remotes::usage_count + 1),
                remotes::updated_at.eq(now_ts()),
            ))
            .get_result::<RemoteRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }
}

#[async_trait]
impl Resource for RemoteStore {
    type Record = Remote;
    type Create = CreateRemote;
    type Update = UpdateRemote;

    const ENTITY: &'static str = "remote";

    fn id_of(record: &Remote) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<Remote>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let rows = filtered(params)
            .order((remotes::is_default.desc(), remotes::name.asc()))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<RemoteRow>(&mut conn)
            .await?;
        Ok(Page::new(rows, params.page(), params.limit(), total).map(map_row))
    }

    async fn get(&self, id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, id).await
    }

    async fn create(&self, input: CreateRemote) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        if let Some(device_id) = input.device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }
        let is_default = input.is_default.unwrap_or(false);
        if is_default {
            clear_other_defaults(&mut conn, input.device_id, None).await?;
        }

        let now = now_ts();
        let layout = input
            .layout
            .as_deref()
            .map(str::trim)
            .filter(|layout| !layout.is_empty())
            .unwrap_or(DEFAULT_LAYOUT);
        let remote = self
            .insert(
                &mut conn,
                &NewRemote {
                    device_id: input.device_id,
                    name: input.name.trim(),
                    manufacturer: input.manufacturer.as_deref(),
                    model: input.model.as_deref(),
                    description: input.description.as_deref(),
                    layout,
                    image_url: input.image_url.as_deref(),
                    dimensions: encode_json(input.dimensions.as_ref().unwrap_or(&json!({})))?,
                    buttons: encode_json(input.buttons.as_ref().unwrap_or(&json!([])))?,
                    zones: encode_json(input.zones.as_ref().unwrap_or(&json!([])))?,
                    is_default,
                    usage_count: 0,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await?;
        tracing::debug!(remote_id = remote.id, is_default, "Created remote");
        Ok(remote)
    }

    async fn update(&self, id: i32, input: UpdateRemote) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        let current = find_active(&mut conn, id).await?;
        if let Some(device_id) = input.device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }
        let device_id = input.device_id.or(current.device_id);
        let becomes_default = input.is_default.unwrap_or(current.is_default);
        if becomes_default {
            clear_other_defaults(&mut conn, device_id, Some(id)).await?;
        }

        let changes = prepare_update(input)?;
        let row = diesel::update(remotes::table.filter(remotes::id.eq(id)))
            .set(&changes)
            .get_result::<RemoteRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }

    async fn soft_delete(&self, id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        find_active(&mut conn, id).await?;
        let in_use = steps_using(&mut conn, id).await?;
        if in_use > 0 {
            return Err(AdminError::ResourceInUse(format!(
                "remote {id} is still used by {in_use} steps"
            )));
        }

        diesel::update(remotes::table.filter(remotes::id.eq(id)))
            .set((
                remotes::is_active.eq(false),
                remotes::is_default.eq(false),
                remotes::updated_at.eq(now_ts()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn restore(&self, id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        let device_id = remotes::table
            .filter(remotes::id.eq(id))
            .select(remotes::device_id)
            .first::<Option<i32>>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))?;
        if let Some(device_id) = device_id {
            crate::devices::ensure_active(&mut conn, device_id).await?;
        }

        diesel::update(remotes::table.filter(remotes::id.eq(id)))
            .set((remotes::is_active.eq(true), remotes::updated_at.eq(now_ts())))
            .get_result::<RemoteRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Remote>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let rows = filtered(&params)
            .order(remotes::name.asc())
            .limit(limit as i64)
            .load::<RemoteRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = remotes::table.count().get_result(&mut conn).await?;
        let active: i64 = remotes::table
            .filter(remotes::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let defaults: i64 = remotes::table
            .filter(remotes::is_active.eq(true))
            .filter(remotes::is_default.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let by_layout = remotes::table
            .filter(remotes::is_active.eq(true))
            .group_by(remotes::layout)
            .select((remotes::layout, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "defaults": defaults,
            "by_layout": crate::problems::counts_object(by_layout),
        }))
    }
}

#[async_trait]
impl Duplicable for RemoteStore {
    /// Copies the remote layout; the copy never takes over as default.
    async fn duplicate(&self, id: i32) -> Result<Remote> {
        let mut conn = self.db.conn().await?;
        let source = find_active(&mut conn, id).await?;
        let now = now_ts();
        let name = format!("{} (copy)", source.name);
        self.insert(
            &mut conn,
            &NewRemote {
                device_id: source.device_id,
                name: &name,
                manufacturer: source.manufacturer.as_deref(),
                model: source.model.as_deref(),
                description: source.description.as_deref(),
                layout: &source.layout,
                image_url: source.image_url.as_deref(),
                dimensions: encode_json(&source.dimensions)?,
                buttons: encode_json(&source.buttons)?,
                zones: encode_json(&source.zones)?,
                is_default: false,
                usage_count: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await
    }
}
