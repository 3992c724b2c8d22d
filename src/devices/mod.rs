use async_trait::async_trait;
use diesel::dsl::count_star;
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

pub(crate) mod schema;
use schema::devices;

#[derive(Debug, Clone, Serialize, Queryable)]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub order_index: i32,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDevice {
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = devices)]
pub struct UpdateDevice {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = devices)]
struct NewDevice<'a> {
    name: &'a str,
    manufacturer: Option<&'a str>,
    model: Option<&'a str>,
    description: Option<&'a str>,
    image_url: Option<&'a str>,
    order_index: i32,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

impl Validate for CreateDevice {
    fn validate(&self) -> Result<()> {
        validation::required_text("name", &self.name, MAX_NAME_LEN)?;
        validation::optional_text("manufacturer", self.manufacturer.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("model", self.model.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::non_negative("order_index", self.order_index)
    }
}

impl Validate for UpdateDevice {
    fn validate(&self) -> Result<()> {
        validation::present_text("name", self.name.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("manufacturer", self.manufacturer.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("model", self.model.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        validation::non_negative("order_index", self.order_index)
    }
}

pub struct DeviceStore {
    db: Database,
}

impl DeviceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert(&self, new: &NewDevice<'_>) -> Result<Device> {
        let mut conn = self.db.conn().await?;
        let device = diesel::insert_into(devices::table)
            .values(new)
            .get_result::<Device>(&mut conn)
            .await?;
        Ok(device)
    }
}

fn filtered(params: &ListParams) -> devices::BoxedQuery<'static, Sqlite> {
    let mut query = devices::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(devices::is_active.eq(true));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            devices::name
                .like(pattern.clone())
                .escape('\\')
                .or(devices::manufacturer.like(pattern.clone()).escape('\\'))
                .or(devices::model.like(pattern).escape('\\')),
        );
    }
    query
}

/// Rejects references to missing or soft-deleted devices.
pub(crate) async fn ensure_active(conn: &mut SqliteAsyncConn, id: i32) -> Result<()> {
    let found: i64 = devices::table
        .filter(devices::id.eq(id))
        .filter(devices::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    if found == 0 {
        return Err(AdminError::Validation(format!(
            "device_id {id} does not reference an active device"
        )));
    }
    Ok(())
}

async fn active_dependents(
    conn: &mut SqliteAsyncConn,
    id: i32,
) -> Result<Vec<(&'static str, i64)>> {
    use crate::problems::schema::problems;
    use crate::remotes::schema::remotes;
    use crate::steps::schema::diagnostic_steps;
    use crate::tv_interfaces::schema::tv_interfaces;

    let problem_count: i64 = problems::table
        .filter(problems::device_id.eq(id))
        .filter(problems::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    let remote_count: i64 = remotes::table
        .filter(remotes::device_id.eq(id))
        .filter(remotes::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    let interface_count: i64 = tv_interfaces::table
        .filter(tv_interfaces::device_id.eq(id))
        .filter(tv_interfaces::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;
    let step_count: i64 = diagnostic_steps::table
        .filter(diagnostic_steps::device_id.eq(id))
        .filter(diagnostic_steps::is_active.eq(true))
        .count()
        .get_result(conn)
        .await?;

    Ok([
        ("problems", problem_count),
        ("remotes", remote_count),
        ("tv interfaces", interface_count),
        ("steps", step_count),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .collect())
}

#[async_trait]
impl Resource for DeviceStore {
    type Record = Device;
    type Create = CreateDevice;
    type Update = UpdateDevice;

    const ENTITY: &'static str = "device";

    fn id_of(record: &Device) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<Device>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let items = filtered(params)
            .order((devices::order_index.asc(), devices::name.asc()))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<Device>(&mut conn)
            .await?;
        Ok(Page::new(items, params.page(), params.limit(), total))
    }

    async fn get(&self, id: i32) -> Result<Device> {
        let mut conn = self.db.conn().await?;
        devices::table
            .filter(devices::id.eq(id))
            .filter(devices::is_active.eq(true))
            .first::<Device>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn create(&self, input: CreateDevice) -> Result<Device> {
        let now = now_ts();
        let device = self
            .insert(&NewDevice {
                name: input.name.trim(),
                manufacturer: input.manufacturer.as_deref(),
                model: input.model.as_deref(),
                description: input.description.as_deref(),
                image_url: input.image_url.as_deref(),
                order_index: input.order_index.unwrap_or(0),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::debug!(device_id = device.id, "Created device");
        Ok(device)
    }

    async fn update(&self, id: i32, input: UpdateDevice) -> Result<Device> {
        self.get(id).await?;
        let mut conn = self.db.conn().await?;
        let device = diesel::update(devices::table.filter(devices::id.eq(id)))
            .set((&input, devices::updated_at.eq(now_ts())))
            .get_result::<Device>(&mut conn)
            .await?;
        Ok(device)
    }

    async fn soft_delete(&self, id: i32) -> Result<()> {
        self.get(id).await?;
        let mut conn = self.db.conn().await?;
        let dependents = active_dependents(&mut conn, id).await?;
        if !dependents.is_empty() {
            let detail = dependents
                .iter()
                .map(|(kind, count)| format!("{count} {kind}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AdminError::ResourceInUse(format!(
                "device {id} is still referenced by {detail}"
            )));
        }

        diesel::update(devices::table.filter(devices::id.eq(id)))
            .set((devices::is_active.eq(false), devices::updated_at.eq(now_ts())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn restore(&self, id: i32) -> Result<Device> {
        let mut conn = self.db.conn().await?;
        diesel::update(devices::table.filter(devices::id.eq(id)))
            .set((devices::is_active.eq(true), devices::updated_at.eq(now_ts())))
            .get_result::<Device>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Device>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let items = filtered(&params)
            .order(devices::name.asc())
            .limit(limit as i64)
            .load::<Device>(&mut conn)
            .await?;
        Ok(items)
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = devices::table.count().get_result(&mut conn).await?;
        let active: i64 = devices::table
            .filter(devices::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let by_manufacturer = devices::table
            .filter(devices::is_active.eq(true))
            .group_by(devices::manufacturer)
            .select((devices::manufacturer, count_star()))
            .load::<(Option<String>, i64)>(&mut conn)
            .await?;

        let by_manufacturer: serde_json::Map<String, Value> = by_manufacturer
            .into_iter()
            .map(|(name, count)| (name.unwrap_or_else(|| "unknown".to_string()), json!(count)))
            .collect();

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "by_manufacturer": by_manufacturer,
        }))
    }
}

#[async_trait]
impl Duplicable for DeviceStore {
    async fn duplicate(&self, id: i32) -> Result<Device> {
        let source = self.get(id).await?;
        let now = now_ts();
        let name = format!("{} (copy)", source.name);
        self.insert(&NewDevice {
            name: &name,
            manufacturer: source.manufacturer.as_deref(),
            model: source.model.as_deref(),
            description: source.description.as_deref(),
            image_url: source.image_url.as_deref(),
            order_index: source.order_index,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
    }
}
