use serde::Deserialize;

use crate::config::MAX_PAGE_SIZE;
use crate::error::{AdminError, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Query-string parameters shared by every list endpoint. Each repository
/// honours the filters that apply to its table and ignores the rest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(alias = "includeInactive")]
    pub include_inactive: bool,
    pub q: Option<String>,
    #[serde(alias = "deviceId")]
    pub device_id: Option<i32>,
    #[serde(alias = "problemId")]
    pub problem_id: Option<i32>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "interfaceType")]
    pub interface_type: Option<String>,
    #[serde(alias = "entityType")]
    pub entity_type: Option<String>,
    #[serde(alias = "entityId")]
    pub entity_id: Option<i32>,
    pub action: Option<String>,
}

impl ListParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.limit() as i64
    }

    pub fn search_term(&self) -> Option<&str> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<u32>,
}

impl SearchParams {
    pub fn term(&self) -> Result<&str> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .ok_or_else(|| AdminError::Validation("search query `q` is required".to_string()))
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}
