use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::case_convert::{self, KeyCase};
use crate::db::{Page, Pagination};
use crate::error::Result;

/// Uniform response wrapper. The envelope's own keys never change; only the
/// keys inside `data` follow the requested case.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub timestamp: String,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            pagination: None,
            error: None,
            error_type: None,
            timestamp: timestamp(),
        }
    }

    pub fn failure(message: impl Into<String>, error_type: &str) -> Self {
        Self {
            success: false,
            data: None,
            pagination: None,
            error: Some(message.into()),
            error_type: Some(error_type.to_string()),
            timestamp: timestamp(),
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn in_case(mut self, case: KeyCase) -> Self {
        if case == KeyCase::Camel {
            self.data = self.data.map(case_convert::into_camel);
        }
        self
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

pub fn ok<T: Serialize>(data: &T, case: KeyCase) -> Result<Response> {
    reply(StatusCode::OK, data, case)
}

pub fn created<T: Serialize>(data: &T, case: KeyCase) -> Result<Response> {
    reply(StatusCode::CREATED, data, case)
}

pub fn reply<T: Serialize>(status: StatusCode, data: &T, case: KeyCase) -> Result<Response> {
    let data = serde_json::to_value(data)?;
    Ok(Envelope::success(data)
        .in_case(case)
        .into_response_with(status))
}

pub fn page<T: Serialize>(page: Page<T>, case: KeyCase) -> Result<Response> {
    let data = serde_json::to_value(&page.items)?;
    Ok(Envelope::success(data)
        .with_pagination(page.pagination)
        .in_case(case)
        .into_response_with(StatusCode::OK))
}
