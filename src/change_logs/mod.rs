use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{decode_json, encode_json, now_ts, Database, Page};
use crate::error::{AdminError, Result};
use crate::query::ListParams;

pub(crate) mod schema;
use schema::change_logs;

pub const CHANGE_ACTIONS: &[&str] = &["create", "update", "delete", "duplicate", "restore"];

/// Keys never copied into a change log entry.
const REDACTED_KEYS: &[&str] = &["password", "new_password", "current_password", "password_hash"];

#[derive(Debug, Clone, Serialize)]
pub struct ChangeLog {
    pub id: i32,
    pub entity_type: String,
    pub entity_id: i32,
    pub action: String,
    pub user_id: Option<i32>,
    pub changes: Value,
    pub created_at: i64,
}

#[derive(Queryable)]
struct ChangeLogRow {
    id: i32,
    entity_type: String,
    entity_id: i32,
    action: String,
    user_id: Option<i32>,
    changes: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = change_logs)]
struct NewChangeLog<'a> {
    entity_type: &'a str,
    entity_id: i32,
    action: &'a str,
    user_id: Option<i32>,
    changes: String,
    created_at: i64,
}

/// What happened to which row, ready to be appended.
#[derive(Debug, Clone)]
pub struct ChangeEntry<'a> {
    pub entity_type: &'a str,
    pub entity_id: i32,
    pub action: &'a str,
    pub user_id: Option<i32>,
    pub changes: Value,
}

fn map_row(row: ChangeLogRow) -> ChangeLog {
    ChangeLog {
        id: row.id,
        entity_type: row.entity_type,
        entity_id: row.entity_id,
        action: row.action,
        user_id: row.user_id,
        changes: decode_json(Some(&row.changes), json!({})),
        created_at: row.created_at,
    }
}

fn redact(changes: Value) -> Value {
    match changes {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !REDACTED_KEYS.contains(&key.as_str()))
                .collect(),
        ),
        other => other,
    }
}

fn filtered(params: &ListParams) -> change_logs::BoxedQuery<'static, Sqlite> {
    let mut query = change_logs::table.into_boxed();
    if let Some(entity_type) = params.entity_type.clone() {
        query = query.filter(change_logs::entity_type.eq(entity_type));
    }
    if let Some(entity_id) = params.entity_id {
        query = query.filter(change_logs::entity_id.eq(entity_id));
    }
    if let Some(action) = params.action.clone() {
        query = query.filter(change_logs::action.eq(action));
    }
    query
}

pub struct ChangeLogStore {
    db: Database,
}

impl ChangeLogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(&self, entry: ChangeEntry<'_>) -> Result<ChangeLog> {
        if !CHANGE_ACTIONS.contains(&entry.action) {
            return Err(AdminError::Validation(format!(
                "unknown change action '{}'",
                entry.action
            )));
        }
        let mut conn = self.db.conn().await?;
        let row = diesel::insert_into(change_logs::table)
            .values(&NewChangeLog {
                entity_type: entry.entity_type,
                entity_id: entry.entity_id,
                action: entry.action,
                user_id: entry.user_id,
                changes: encode_json(&redact(entry.changes))?,
                created_at: now_ts(),
            })
            .get_result::<ChangeLogRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }

    /// Newest first.
    pub async fn list(&self, params: &ListParams) -> Result<Page<ChangeLog>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let rows = filtered(params)
            .order((change_logs::created_at.desc(), change_logs::id.desc()))
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<ChangeLogRow>(&mut conn)
            .await?;
        Ok(Page::new(rows, params.page(), params.limit(), total).map(map_row))
    }

    pub async fn get(&self, id: i32) -> Result<ChangeLog> {
        let mut conn = self.db.conn().await?;
        change_logs::table
            .filter(change_logs::id.eq(id))
            .first::<ChangeLogRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found("change log", id))
    }

    pub async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = change_logs::table.count().get_result(&mut conn).await?;
        let by_action = change_logs::table
            .group_by(change_logs::action)
            .select((change_logs::action, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;
        let by_entity_type = change_logs::table
            .group_by(change_logs::entity_type)
            .select((change_logs::entity_type, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "by_action": crate::problems::counts_object(by_action),
            "by_entity_type": crate::problems::counts_object(by_entity_type),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, ChangeLogStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("change_logs.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        (dir, ChangeLogStore::new(db))
    }

    fn entry(entity_type: &'static str, entity_id: i32, action: &'static str) -> ChangeEntry<'static> {
        ChangeEntry {
            entity_type,
            entity_id,
            action,
            user_id: Some(1),
            changes: json!({"name": "Box A", "password": "hunter22"}),
        }
    }

    #[tokio::test]
    async fn records_newest_first_without_secrets() {
        let (_dir, store) = store().await;
        let first = store.record(entry("device", 1, "create")).await.expect("first");
        let second = store.record(entry("device", 1, "update")).await.expect("second");
        store.record(entry("remote", 4, "create")).await.expect("third");

        assert!(first.changes.get("password").is_none());
        assert_eq!(first.changes["name"], "Box A");

        let page = store
            .list(&ListParams {
                entity_type: Some("device".to_string()),
                ..ListParams::default()
            })
            .await
            .expect("list");
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.items[0].id, second.id);

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats["by_action"]["create"], 2);
        assert_eq!(stats["by_entity_type"]["remote"], 1);
    }

    #[tokio::test]
    async fn unknown_actions_and_ids() {
        let (_dir, store) = store().await;
        let err = store.record(entry("device", 1, "explode")).await.unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
        assert!(matches!(store.get(99).await, Err(AdminError::NotFound(_))));
    }
}
