use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{decode_json, encode_json, like_pattern, now_ts, Database, Page, SqliteAsyncConn};
use crate::error::{AdminError, Result};
use crate::interfaces::resource::Resource;
use crate::query::ListParams;
use crate::validation::{self, Validate, MAX_NAME_LEN};

pub mod password;
pub(crate) mod schema;
use schema::users;

pub const USER_ROLES: &[&str] = &["admin", "editor", "viewer"];
const DEFAULT_ROLE: &str = "viewer";

/// Public view of an account. The password hash stays in [`UserRow`].
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub permissions: Value,
    pub preferences: Value,
    pub last_login_at: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct UserRow {
    id: i32,
    username: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    role: String,
    permissions: String,
    preferences: String,
    last_login_at: Option<i64>,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Value>,
    pub preferences: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Value>,
    pub preferences: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Username or email address.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePassword {
    pub current_password: Option<String>,
    pub new_password: String,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    username: &'a str,
    email: &'a str,
    password_hash: &'a str,
    display_name: Option<&'a str>,
    role: &'a str,
    permissions: String,
    preferences: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset {
    username: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    role: Option<String>,
    permissions: Option<String>,
    preferences: Option<String>,
    updated_at: i64,
}

impl Validate for CreateUser {
    fn validate(&self) -> Result<()> {
        validation::username("username", Some(&self.username))?;
        validation::email("email", Some(&self.email))?;
        password::check_strength(&self.password)?;
        validation::optional_text("display_name", self.display_name.as_deref(), MAX_NAME_LEN)?;
        validation::one_of("role", self.role.as_deref(), USER_ROLES)?;
        validation::json_array("permissions", self.permissions.as_ref())?;
        validation::json_object("preferences", self.preferences.as_ref())
    }
}

impl Validate for UpdateUser {
    fn validate(&self) -> Result<()> {
        validation::username("username", self.username.as_deref())?;
        validation::email("email", self.email.as_deref())?;
        validation::optional_text("display_name", self.display_name.as_deref(), MAX_NAME_LEN)?;
        validation::one_of("role", self.role.as_deref(), USER_ROLES)?;
        validation::json_array("permissions", self.permissions.as_ref())?;
        validation::json_object("preferences", self.preferences.as_ref())
    }
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<()> {
        validation::required_text("username", &self.username, MAX_NAME_LEN)?;
        if self.password.is_empty() {
            return Err(AdminError::Validation("password is required".to_string()));
        }
        Ok(())
    }
}

impl Validate for ChangePassword {
    fn validate(&self) -> Result<()> {
        password::check_strength(&self.new_password)
    }
}

fn map_row(row: UserRow) -> User {
    User {
        id: row.id,
        username: row.username,
        email: row.email,
        display_name: row.display_name,
        role: row.role,
        permissions: decode_json(Some(&row.permissions), json!([])),
        preferences: decode_json(Some(&row.preferences), json!({})),
        last_login_at: row.last_login_at,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn filtered(params: &ListParams) -> users::BoxedQuery<'static, Sqlite> {
    let mut query = users::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(users::is_active.eq(true));
    }
    if let Some(role) = params.role.clone() {
        query = query.filter(users::role.eq(role));
    }
    if let Some(term) = params.search_term() {
        let pattern = like_pattern(term);
        query = query.filter(
            users::username
                .like(pattern.clone())
                .escape('\\')
                .or(users::email.like(pattern.clone()).escape('\\'))
                .or(users::display_name.like(pattern).escape('\\')),
        );
    }
    query
}

async fn find_row(conn: &mut SqliteAsyncConn, id: i32) -> Result<UserRow> {
    users::table
        .filter(users::id.eq(id))
        .filter(users::is_active.eq(true))
        .first::<UserRow>(conn)
        .await
        .optional()?
        .ok_or_else(|| AdminError::not_found(UserStore::ENTITY, id))
}

/// Rejects a username or email already held by another account, active or not.
async fn ensure_unique(
    conn: &mut SqliteAsyncConn,
    username: Option<&str>,
    email: Option<&str>,
    except_id: Option<i32>,
) -> Result<()> {
    if let Some(username) = username {
        let mut query = users::table
            .filter(users::username.eq(username.to_string()))
            .into_boxed();
        if let Some(except_id) = except_id {
            query = query.filter(users::id.ne(except_id));
        }
        let taken: i64 = query.count().get_result(conn).await?;
        if taken > 0 {
            return Err(AdminError::Duplicate(format!(
                "username '{username}' is already taken"
            )));
        }
    }
    if let Some(email) = email {
        let mut query = users::table
            .filter(users::email.eq(email.to_string()))
            .into_boxed();
        if let Some(except_id) = except_id {
            query = query.filter(users::id.ne(except_id));
        }
        let taken: i64 = query.count().get_result(conn).await?;
        if taken > 0 {
            return Err(AdminError::Duplicate(format!(
                "email '{email}' is already registered"
            )));
        }
    }
    Ok(())
}

async fn other_active_admins(conn: &mut SqliteAsyncConn, id: i32) -> Result<i64> {
    let count = users::table
        .filter(users::role.eq("admin"))
        .filter(users::is_active.eq(true))
        .filter(users::id.ne(id))
        .count()
        .get_result(conn)
        .await?;
    Ok(count)
}

pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Checks credentials against an active account and stamps `last_login_at`.
    /// Unknown users and wrong passwords produce the same error.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User> {
        let login = login.trim();
        let mut conn = self.db.conn().await?;
        let row = users::table
            .filter(users::is_active.eq(true))
            .filter(
                users::username
                    .eq(login.to_string())
                    .or(users::email.eq(normalize_email(login))),
            )
            .first::<UserRow>(&mut conn)
            .await
            .optional()?;

        let Some(row) = row else {
            tracing::info!(login, "Login rejected: unknown user");
            return Err(AdminError::Unauthorized("invalid credentials".to_string()));
        };
        if !password::verify_password(password.to_string(), row.password_hash.clone()).await? {
            tracing::info!(user_id = row.id, "Login rejected: wrong password");
            return Err(AdminError::Unauthorized("invalid credentials".to_string()));
        }

        let now = now_ts();
        let row = diesel::update(users::table.filter(users::id.eq(row.id)))
            .set(users::last_login_at.eq(Some(now)))
            .get_result::<UserRow>(&mut conn)
            .await?;
        tracing::info!(user_id = row.id, "User logged in");
        Ok(map_row(row))
    }

    /// Replaces the password. When `current_password` is given it must match.
    pub async fn change_password(&self, id: i32, input: &ChangePassword) -> Result<User> {
        let mut conn = self.db.conn().await?;
        let row = find_row(&mut conn, id).await?;
        if let Some(current) = &input.current_password {
            if !password::verify_password(current.clone(), row.password_hash.clone()).await? {
                return Err(AdminError::Unauthorized(
                    "current password does not match".to_string(),
                ));
            }
        }

        let hash = password::hash_password(input.new_password.clone()).await?;
        let row = diesel::update(users::table.filter(users::id.eq(id)))
            .set((users::password_hash.eq(hash), users::updated_at.eq(now_ts())))
            .get_result::<UserRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }
}

#[async_trait]
impl Resource for UserStore {
    type Record = User;
    type Create = CreateUser;
    type Update = UpdateUser;

    const ENTITY: &'static str = "user";

    fn id_of(record: &User) -> i32 {
        record.id
    }

    async fn list(&self, params: &ListParams) -> Result<Page<User>> {
        let mut conn = self.db.conn().await?;
        let total: i64 = filtered(params).count().get_result(&mut conn).await?;
        let rows = filtered(params)
            .order(users::username.asc())
            .limit(params.limit() as i64)
            .offset(params.offset())
            .load::<UserRow>(&mut conn)
            .await?;
        Ok(Page::new(rows, params.page(), params.limit(), total).map(map_row))
    }

    async fn get(&self, id: i32) -> Result<User> {
        let mut conn = self.db.conn().await?;
        find_row(&mut conn, id).await.map(map_row)
    }

    async fn create(&self, input: CreateUser) -> Result<User> {
        let username = input.username.trim();
        let email = normalize_email(&input.email);
        let mut conn = self.db.conn().await?;
        ensure_unique(&mut conn, Some(username), Some(&email), None).await?;

        let hash = password::hash_password(input.password.clone()).await?;
        let now = now_ts();
        let row = diesel::insert_into(users::table)
            .values(&NewUser {
                username,
                email: &email,
                password_hash: &hash,
                display_name: input.display_name.as_deref(),
                role: input.role.as_deref().unwrap_or(DEFAULT_ROLE),
                permissions: encode_json(input.permissions.as_ref().unwrap_or(&json!([])))?,
                preferences: encode_json(input.preferences.as_ref().unwrap_or(&json!({})))?,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .get_result::<UserRow>(&mut conn)
            .await?;
        tracing::info!(user_id = row.id, role = %row.role, "Created user");
        Ok(map_row(row))
    }

    async fn update(&self, id: i32, input: UpdateUser) -> Result<User> {
        let mut conn = self.db.conn().await?;
        let current = find_row(&mut conn, id).await?;
        let username = input.username.as_deref().map(str::trim);
        let email = input.email.as_deref().map(normalize_email);
        ensure_unique(&mut conn, username, email.as_deref(), Some(id)).await?;

        let demoted = current.role == "admin"
            && input.role.as_deref().is_some_and(|role| role != "admin");
        if demoted && other_active_admins(&mut conn, id).await? == 0 {
            return Err(AdminError::ResourceInUse(
                "cannot demote the last active admin".to_string(),
            ));
        }

        let changes = UserChangeset {
            username: username.map(str::to_string),
            email,
            display_name: input.display_name,
            role: input.role,
            permissions: input.permissions.as_ref().map(encode_json).transpose()?,
            preferences: input.preferences.as_ref().map(encode_json).transpose()?,
            updated_at: now_ts(),
        };
        let row = diesel::update(users::table.filter(users::id.eq(id)))
            .set(&changes)
            .get_result::<UserRow>(&mut conn)
            .await?;
        Ok(map_row(row))
    }

    async fn soft_delete(&self, id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        let current = find_row(&mut conn, id).await?;
        if current.role == "admin" && other_active_admins(&mut conn, id).await? == 0 {
            return Err(AdminError::ResourceInUse(
                "cannot delete the last active admin".to_string(),
            ));
        }

        diesel::update(users::table.filter(users::id.eq(id)))
            .set((users::is_active.eq(false), users::updated_at.eq(now_ts())))
            .execute(&mut conn)
            .await?;
        tracing::info!(user_id = id, "Deactivated user");
        Ok(())
    }

    async fn restore(&self, id: i32) -> Result<User> {
        let mut conn = self.db.conn().await?;
        diesel::update(users::table.filter(users::id.eq(id)))
            .set((users::is_active.eq(true), users::updated_at.eq(now_ts())))
            .get_result::<UserRow>(&mut conn)
            .await
            .optional()?
            .map(map_row)
            .ok_or_else(|| AdminError::not_found(Self::ENTITY, id))
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<User>> {
        let params = ListParams {
            q: Some(term.to_string()),
            ..ListParams::default()
        };
        let mut conn = self.db.conn().await?;
        let rows = filtered(&params)
            .order(users::username.asc())
            .limit(limit as i64)
            .load::<UserRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    async fn stats(&self) -> Result<Value> {
        let mut conn = self.db.conn().await?;
        let total: i64 = users::table.count().get_result(&mut conn).await?;
        let active: i64 = users::table
            .filter(users::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let logged_in: i64 = users::table
            .filter(users::is_active.eq(true))
            .filter(users::last_login_at.is_not_null())
            .count()
            .get_result(&mut conn)
            .await?;
        let by_role = users::table
            .filter(users::is_active.eq(true))
            .group_by(users::role)
            .select((users::role, count_star()))
            .load::<(String, i64)>(&mut conn)
            .await?;

        Ok(json!({
            "total": total,
            "active": active,
            "inactive": total - active,
            "ever_logged_in": logged_in,
            "by_role": crate::problems::counts_object(by_role),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("users.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        (dir, UserStore::new(db))
    }

    fn create(username: &str, email: &str, role: &str) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            email: email.to_string(),
            password: "s3cret-pass".to_string(),
            display_name: None,
            role: Some(role.to_string()),
            permissions: Some(json!(["devices:write"])),
            preferences: None,
        }
    }

    #[tokio::test]
    async fn duplicates_are_rejected_before_insert() {
        let (_dir, store) = store().await;
        store
            .create(create("alice", "alice@example.com", "admin"))
            .await
            .expect("create");

        let err = store
            .create(create("alice", "other@example.com", "viewer"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Duplicate(_)));

        let err = store
            .create(create("bob", "ALICE@example.com", "viewer"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Duplicate(_)));
    }

    #[tokio::test]
    async fn authenticate_stamps_last_login() {
        let (_dir, store) = store().await;
        let user = store
            .create(create("alice", "alice@example.com", "editor"))
            .await
            .expect("create");
        assert!(user.last_login_at.is_none());

        let err = store.authenticate("alice", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, AdminError::Unauthorized(_)));

        let logged_in = store
            .authenticate("alice@example.com", "s3cret-pass")
            .await
            .expect("login by email");
        assert!(logged_in.last_login_at.is_some());

        let serialized = serde_json::to_value(&logged_in).expect("serialize");
        assert!(serialized.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn change_password_checks_current() {
        let (_dir, store) = store().await;
        let user = store
            .create(create("alice", "alice@example.com", "editor"))
            .await
            .expect("create");

        let err = store
            .change_password(
                user.id,
                &ChangePassword {
                    current_password: Some("nope-nope".to_string()),
                    new_password: "brand-new-pass".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Unauthorized(_)));

        store
            .change_password(
                user.id,
                &ChangePassword {
                    current_password: Some("s3cret-pass".to_string()),
                    new_password: "brand-new-pass".to_string(),
                },
            )
            .await
            .expect("change");
        store
            .authenticate("alice", "brand-new-pass")
            .await
            .expect("login with new password");
    }

    #[tokio::test]
    async fn last_admin_cannot_be_removed() {
        let (_dir, store) = store().await;
        let admin = store
            .create(create("root", "root@example.com", "admin"))
            .await
            .expect("admin");

        let err = store.soft_delete(admin.id).await.unwrap_err();
        assert!(matches!(err, AdminError::ResourceInUse(_)));
        let err = store
            .update(
                admin.id,
                UpdateUser {
                    role: Some("viewer".to_string()),
                    ..UpdateUser::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::ResourceInUse(_)));

        store
            .create(create("second", "second@example.com", "admin"))
            .await
            .expect("second admin");
        store.soft_delete(admin.id).await.expect("delete first admin");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats["by_role"]["admin"], 1);
        assert_eq!(stats["inactive"], 1);
    }
}
