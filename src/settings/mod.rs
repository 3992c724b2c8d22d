use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{decode_json, encode_json, now_ts, Database};
use crate::error::{AdminError, Result};
use crate::validation::{self, Validate, MAX_TEXT_LEN};

pub(crate) mod schema;
use schema::site_settings;

static SETTING_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.-]{0,63}$").expect("valid setting key regex"));

#[derive(Debug, Clone, Serialize)]
pub struct SiteSetting {
    pub id: i32,
    pub key: String,
    pub value: Value,
    pub description: Option<String>,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct SiteSettingRow {
    id: i32,
    key: String,
    value: String,
    description: Option<String>,
    updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutSetting {
    pub value: Value,
    pub description: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = site_settings)]
struct NewSiteSetting<'a> {
    key: &'a str,
    value: String,
    description: Option<&'a str>,
    updated_at: i64,
}

impl Validate for PutSetting {
    fn validate(&self) -> Result<()> {
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    if !SETTING_KEY_RE.is_match(key) {
        return Err(AdminError::Validation(format!(
            "setting key '{key}' must start with a lowercase letter and contain only a-z, 0-9, '_', '.' or '-' (max 64)"
        )));
    }
    Ok(())
}

fn map_row(row: SiteSettingRow) -> SiteSetting {
    SiteSetting {
        id: row.id,
        key: row.key,
        value: decode_json(Some(&row.value), Value::Null),
        description: row.description,
        updated_at: row.updated_at,
    }
}

pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<SiteSetting>> {
        let mut conn = self.db.conn().await?;
        let rows = site_settings::table
            .order(site_settings::key.asc())
            .load::<SiteSettingRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    pub async fn get(&self, key: &str) -> Result<SiteSetting> {
        validate_key(key)?;
        let mut conn = self.db.conn().await?;
        site_settings::table
            .filter(site_settings::key.eq(key.to_string()))
            .first::<SiteSettingRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::NotFound(format!("setting '{key}' not found")))
    }

    /// Inserts the key or overwrites its value. A missing description keeps
    /// the stored one.
    pub async fn upsert(&self, key: &str, input: &PutSetting) -> Result<SiteSetting> {
        validate_key(key)?;
        let value = encode_json(&input.value)?;
        let now = now_ts();
        let mut conn = self.db.conn().await?;

        let existing = site_settings::table
            .filter(site_settings::key.eq(key.to_string()))
            .select(site_settings::id)
            .first::<i32>(&mut conn)
            .await
            .optional()?;

        let row = match existing {
            Some(id) => {
                let target = site_settings::table.filter(site_settings::id.eq(id));
                match input.description.as_deref() {
                    Some(description) => {
                        diesel::update(target)
                            .set((
                                site_settings::value.eq(value),
                                site_settings::description.eq(Some(description)),
                                site_settings::updated_at.eq(now),
                            ))
                            .get_result::<SiteSettingRow>(&mut conn)
                            .await?
                    }
                    None => {
                        diesel::update(target)
                            .set((
                                site_settings::value.eq(value),
                                site_settings::updated_at.eq(now),
                            ))
                            .get_result::<SiteSettingRow>(&mut conn)
                            .await?
                    }
                }
            }
            None => {
                diesel::insert_into(site_settings::table)
                    .values(&NewSiteSetting {
                        key,
                        value,
                        description: input.description.as_deref(),
                        updated_at: now,
                    })
                    .get_result::<SiteSettingRow>(&mut conn)
                    .await?
            }
        };
        tracing::debug!(key, "Stored site setting");
        Ok(map_row(row))
    }

    /// Settings are plain configuration, so removal is a hard delete.
    pub async fn delete(&self, key: &str) -> Result<SiteSetting> {
        let setting = self.get(key).await?;
        let mut conn = self.db.conn().await?;
        diesel::delete(site_settings::table.filter(site_settings::id.eq(setting.id)))
            .execute(&mut conn)
            .await?;
        Ok(setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("settings.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        (dir, SettingsStore::new(db))
    }

    #[test]
    fn key_rules() {
        assert!(validate_key("site.title").is_ok());
        assert!(validate_key("support_phone-2").is_ok());
        assert!(validate_key("Site").is_err());
        assert!(validate_key("1st").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn upsert_overwrites_and_keeps_description() {
        let (_dir, store) = store().await;
        store
            .upsert(
                "site.title",
                &PutSetting {
                    value: json!("TV Help"),
                    description: Some("Header text".to_string()),
                },
            )
            .await
            .expect("insert");
        let updated = store
            .upsert(
                "site.title",
                &PutSetting {
                    value: json!({"en": "TV Help", "fr": "Aide TV"}),
                    description: None,
                },
            )
            .await
            .expect("update");

        assert_eq!(updated.value["fr"], "Aide TV");
        assert_eq!(updated.description.as_deref(), Some("Header text"));
        assert_eq!(store.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_dir, store) = store().await;
        store
            .upsert(
                "maintenance",
                &PutSetting {
                    value: json!(false),
                    description: None,
                },
            )
            .await
            .expect("insert");
        store.delete("maintenance").await.expect("delete");
        assert!(matches!(
            store.get("maintenance").await,
            Err(AdminError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("maintenance").await,
            Err(AdminError::NotFound(_))
        ));
    }
}
