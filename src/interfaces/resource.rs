use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::db::Page;
use crate::error::Result;
use crate::query::ListParams;
use crate::validation::Validate;

/// A table exposed as a uniform REST resource: list, get, create, update,
/// soft delete, restore, search and stats.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Record: Serialize + Send + Sync + 'static;
    type Create: DeserializeOwned + Validate + Send + 'static;
    type Update: DeserializeOwned + Validate + Send + 'static;

    /// Singular entity name used in messages and change logs.
    const ENTITY: &'static str;

    fn id_of(record: &Self::Record) -> i32;

    async fn list(&self, params: &ListParams) -> Result<Page<Self::Record>>;
    async fn get(&self, id: i32) -> Result<Self::Record>;
    async fn create(&self, input: Self::Create) -> Result<Self::Record>;
    async fn update(&self, id: i32, input: Self::Update) -> Result<Self::Record>;
    async fn soft_delete(&self, id: i32) -> Result<()>;
    async fn restore(&self, id: i32) -> Result<Self::Record>;
    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Self::Record>>;
    async fn stats(&self) -> Result<Value>;
}

#[async_trait]
pub trait Duplicable: Resource {
    async fn duplicate(&self, id: i32) -> Result<Self::Record>;
}
